//! Guest 通道抽象接口

use std::sync::Arc;

use async_trait::async_trait;
use atp_common::CancellationToken;

use crate::qga::{BlockDevice, GuestExecCommand, GuestNetworkInterface};
use crate::Result;

/// 命令执行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// 进程是否已退出
    pub exited: bool,
    /// 退出码
    pub exit_code: Option<i32>,
    /// 终止信号
    pub signal: Option<i32>,
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
}

impl ExecOutput {
    /// 检查命令是否成功执行
    pub fn is_success(&self) -> bool {
        self.exited && self.exit_code == Some(0)
    }
}

/// 已连接到某台云主机的 guest agent
#[async_trait]
pub trait GuestAgent: Send + Sync {
    /// 测试 agent 连通性
    async fn ping(&self) -> Result<()>;

    /// 执行命令并等待结束
    async fn exec(&self, cmd: &GuestExecCommand, cancel: &CancellationToken) -> Result<ExecOutput>;

    /// 后台启动命令, 返回 guest 内的 pid
    async fn spawn(&self, cmd: &GuestExecCommand) -> Result<i64>;

    /// 查询后台命令状态与输出
    async fn exec_status(&self, pid: i64) -> Result<ExecOutput>;

    /// 网卡及地址
    async fn network_interfaces(&self) -> Result<Vec<GuestNetworkInterface>>;

    /// 块设备 (lsblk)
    async fn block_devices(&self, cancel: &CancellationToken) -> Result<Vec<BlockDevice>>;

    /// 主机名
    async fn hostname(&self) -> Result<String>;

    /// 非回环网卡上的全部 IPv4 地址
    async fn ip_addresses(&self) -> Result<Vec<String>> {
        let ifaces = self.network_interfaces().await?;
        Ok(ifaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .flat_map(|iface| iface.ipv4().map(str::to_string))
            .collect())
    }

    /// 执行 shell 脚本并等待结束
    async fn exec_shell(&self, script: &str, cancel: &CancellationToken) -> Result<ExecOutput> {
        self.exec(&GuestExecCommand::shell(script), cancel).await
    }
}

/// 根据计算节点和 libvirt 域名称建立 guest agent 连接
#[async_trait]
pub trait GuestConnector: Send + Sync {
    async fn connect(&self, host: &str, domain: &str) -> Result<Arc<dyn GuestAgent>>;
}

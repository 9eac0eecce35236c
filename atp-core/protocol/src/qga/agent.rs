use std::time::Duration;

use async_trait::async_trait;
use atp_common::{poll_until, Attempt, CancellationToken, RetryCondition, RetryError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::protocol::*;
use crate::traits::{ExecOutput, GuestAgent};
use crate::transport::AgentTransport;
use crate::{ProtocolError, Result};

/// 命令执行参数
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    /// 单条 QGA 命令超时（秒）
    pub command_timeout: i32,
    /// 等待 guest 内进程结束的超时
    pub exec_timeout: Duration,
    /// 查询进程状态的最大间隔
    pub poll_interval: Duration,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            command_timeout: 30,
            exec_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// QEMU Guest Agent 客户端
pub struct QgaAgent {
    transport: Box<dyn AgentTransport>,
    limits: ExecLimits,
}

impl QgaAgent {
    /// 创建新的 QGA 客户端
    pub fn new(transport: Box<dyn AgentTransport>, limits: ExecLimits) -> Self {
        Self { transport, limits }
    }

    /// 执行 QGA 命令的通用方法
    async fn execute_command<T, R>(&self, command: &str, args: Option<T>) -> Result<R>
    where
        T: Serialize + Send,
        R: DeserializeOwned,
    {
        let cmd = QgaCommand {
            execute: command,
            arguments: args,
        };

        let cmd_json = serde_json::to_string(&cmd)
            .map_err(|e| ProtocolError::ParseError(format!("序列化 QGA 命令失败: {}", e)))?;

        debug!("发送 QGA 命令 [{}]: {}", self.transport.describe(), cmd_json);

        let response_json = self
            .transport
            .agent_command(&cmd_json, self.limits.command_timeout)
            .await?;

        debug!("收到 QGA 响应: {}", response_json);

        let response: QgaResponse<R> = serde_json::from_str(&response_json)
            .map_err(|e| ProtocolError::ParseError(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(ProtocolError::CommandFailed(format!(
                "{}: {}",
                error.error_class, error.desc
            )));
        }

        response.ret.ok_or(ProtocolError::NoResponse)
    }
}

fn to_output(status: GuestExecStatus) -> ExecOutput {
    ExecOutput {
        exited: status.exited,
        exit_code: status.exit_code,
        signal: status.signal,
        stdout: status.decode_stdout(),
        stderr: status.decode_stderr(),
    }
}

#[async_trait]
impl GuestAgent for QgaAgent {
    async fn ping(&self) -> Result<()> {
        self.execute_command::<NoArguments, serde_json::Value>("guest-ping", None)
            .await?;
        Ok(())
    }

    async fn exec(&self, cmd: &GuestExecCommand, cancel: &CancellationToken) -> Result<ExecOutput> {
        let pid = self.spawn(cmd).await?;

        let condition = RetryCondition::new(
            self.limits.exec_timeout,
            Duration::from_millis(100),
            self.limits.poll_interval,
            Duration::from_millis(100),
        );

        let output = poll_until(&condition, cancel, move || async move {
            match self.exec_status(pid).await {
                Ok(output) if output.exited => Attempt::Done(output),
                Ok(_) => Attempt::Pending(format!("进程 {} 仍在运行", pid)),
                Err(e) => Attempt::Abort(e),
            }
        })
        .await
        .map_err(|e| match e {
            RetryError::Timeout { elapsed, .. } => ProtocolError::Timeout(format!(
                "{} (pid {}, 等待 {:?})",
                cmd.command_line(),
                pid,
                elapsed
            )),
            RetryError::Cancelled => ProtocolError::Cancelled,
            RetryError::Aborted(e) => e,
        })?;

        debug!(
            "命令结束: {} 退出码 {:?}",
            cmd.command_line(),
            output.exit_code
        );
        Ok(output)
    }

    async fn spawn(&self, cmd: &GuestExecCommand) -> Result<i64> {
        info!("执行 Guest 命令: {}", cmd.command_line());
        let result: GuestExecResult = self.execute_command("guest-exec", Some(cmd)).await?;
        debug!("命令已启动，PID: {}", result.pid);
        Ok(result.pid)
    }

    async fn exec_status(&self, pid: i64) -> Result<ExecOutput> {
        let status: GuestExecStatus = self
            .execute_command("guest-exec-status", Some(GuestExecStatusRequest { pid }))
            .await?;
        Ok(to_output(status))
    }

    async fn network_interfaces(&self) -> Result<Vec<GuestNetworkInterface>> {
        self.execute_command::<NoArguments, _>("guest-network-get-interfaces", None)
            .await
    }

    async fn block_devices(&self, cancel: &CancellationToken) -> Result<Vec<BlockDevice>> {
        let output = self
            .exec(&GuestExecCommand::simple("/usr/bin/lsblk", LSBLK_ARGS), cancel)
            .await?;
        if !output.is_success() {
            return Err(ProtocolError::CommandFailed(format!(
                "lsblk 执行失败: {}",
                output.stderr
            )));
        }
        parse_lsblk(&output.stdout).map_err(|e| ProtocolError::ParseError(e.to_string()))
    }

    async fn hostname(&self) -> Result<String> {
        let name: GuestHostName = self
            .execute_command::<NoArguments, _>("guest-get-host-name", None)
            .await?;
        Ok(name.host_name)
    }
}

//! Guest agent 连接器

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::qga::{ExecLimits, QgaAgent};
use crate::traits::{GuestAgent, GuestConnector};
use crate::transport::{AgentTransport, VirshTransport};
use crate::{ProtocolError, Result};

/// 通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Virsh,
    Libvirt,
}

/// QGA 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QgaConfig {
    /// libvirt 连接 URI 模板, `{host}` 替换为计算节点
    #[serde(default = "default_uri_template")]
    pub uri_template: String,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// virsh 可执行文件
    #[serde(default = "default_virsh")]
    pub virsh_path: String,

    /// 单条 QGA 命令超时（秒）
    #[serde(default = "default_command_timeout")]
    pub command_timeout: i32,

    /// 等待 guest 内命令结束的超时（秒）
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout: u64,

    /// 查询命令状态的间隔（毫秒）
    #[serde(default = "default_poll_interval")]
    pub exec_poll_interval_ms: u64,
}

fn default_uri_template() -> String {
    "qemu+tcp://{host}/system".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Virsh
}

fn default_virsh() -> String {
    "virsh".to_string()
}

fn default_command_timeout() -> i32 {
    30
}

fn default_exec_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for QgaConfig {
    fn default() -> Self {
        Self {
            uri_template: default_uri_template(),
            transport: default_transport(),
            virsh_path: default_virsh(),
            command_timeout: default_command_timeout(),
            exec_timeout: default_exec_timeout(),
            exec_poll_interval_ms: default_poll_interval(),
        }
    }
}

impl QgaConfig {
    pub fn uri_for(&self, host: &str) -> String {
        self.uri_template.replace("{host}", host)
    }

    pub fn limits(&self) -> ExecLimits {
        ExecLimits {
            command_timeout: self.command_timeout,
            exec_timeout: Duration::from_secs(self.exec_timeout),
            poll_interval: Duration::from_millis(self.exec_poll_interval_ms),
        }
    }
}

/// 基于 QGA 的连接器
#[derive(Debug, Clone, Default)]
pub struct QgaConnector {
    config: QgaConfig,
}

impl QgaConnector {
    pub fn new(config: QgaConfig) -> Self {
        Self { config }
    }

    fn transport(&self, uri: String, domain: &str) -> Result<Box<dyn AgentTransport>> {
        match self.config.transport {
            TransportKind::Virsh => Ok(Box::new(VirshTransport::new(
                self.config.virsh_path.clone(),
                uri,
                domain,
            ))),
            #[cfg(feature = "libvirt")]
            TransportKind::Libvirt => Ok(Box::new(crate::transport::LibvirtTransport::new(
                uri, domain,
            ))),
            #[cfg(not(feature = "libvirt"))]
            TransportKind::Libvirt => Err(ProtocolError::TransportError(
                "未启用 libvirt feature".to_string(),
            )),
        }
    }
}

#[async_trait]
impl GuestConnector for QgaConnector {
    async fn connect(&self, host: &str, domain: &str) -> Result<Arc<dyn GuestAgent>> {
        if host.is_empty() || domain.is_empty() {
            return Err(ProtocolError::ConnectionFailed(
                "缺少计算节点或域名称".to_string(),
            ));
        }

        let uri = self.config.uri_for(host);
        info!("连接 guest agent: {} {}", uri, domain);

        let agent = QgaAgent::new(self.transport(uri, domain)?, self.config.limits());
        if let Err(e) = agent.ping().await {
            warn!("guest agent 无响应: {} ({})", domain, e);
            return Err(e);
        }

        Ok(Arc::new(agent))
    }
}

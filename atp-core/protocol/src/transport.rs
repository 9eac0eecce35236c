//! QGA 命令通道
//!
//! 默认通过 `virsh qemu-agent-command` 把 JSON 命令转发给 libvirt,
//! 启用 `libvirt` feature 后可直接使用 libvirt 库。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{ProtocolError, Result};

/// QGA 命令通道
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// 发送一条 QGA JSON 命令并返回原始 JSON 响应
    async fn agent_command(&self, command: &str, timeout_secs: i32) -> Result<String>;

    /// 通道描述 (日志用)
    fn describe(&self) -> String;
}

/// 使用系统 virsh 命令的通道
#[derive(Debug, Clone)]
pub struct VirshTransport {
    virsh: String,
    uri: String,
    domain: String,
}

impl VirshTransport {
    pub fn new(virsh: impl Into<String>, uri: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            virsh: virsh.into(),
            uri: uri.into(),
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl AgentTransport for VirshTransport {
    async fn agent_command(&self, command: &str, timeout_secs: i32) -> Result<String> {
        let mut cmd = Command::new(&self.virsh);
        cmd.arg("-c")
            .arg(&self.uri)
            .arg("qemu-agent-command")
            .arg(&self.domain)
            .arg(command)
            .arg("--timeout")
            .arg(timeout_secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ProtocolError::TransportError(format!("启动 virsh 失败: {}", e)))?;

        // virsh 自身连接 libvirtd 也需要时间
        let limit = Duration::from_secs(timeout_secs.max(1) as u64 + 10);
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ProtocolError::Timeout(format!("virsh 执行超时: {}", self.describe())))??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            debug!("virsh 返回错误: {}", stderr);
            return Err(classify_virsh_error(&stderr));
        }

        Ok(stdout)
    }

    fn describe(&self) -> String {
        format!("{} {}", self.uri, self.domain)
    }
}

/// 区分连接失败与 guest agent 命令失败
fn classify_virsh_error(stderr: &str) -> ProtocolError {
    let lower = stderr.to_lowercase();
    if lower.contains("failed to connect")
        || lower.contains("not connected")
        || lower.contains("not responding")
        || lower.contains("domain not found")
        || lower.contains("failed to get domain")
    {
        ProtocolError::ConnectionFailed(stderr.to_string())
    } else {
        ProtocolError::CommandFailed(stderr.to_string())
    }
}

/// 通过 libvirt 库发送命令
#[cfg(feature = "libvirt")]
#[derive(Debug, Clone)]
pub struct LibvirtTransport {
    uri: String,
    domain: String,
}

#[cfg(feature = "libvirt")]
impl LibvirtTransport {
    pub fn new(uri: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            domain: domain.into(),
        }
    }
}

#[cfg(feature = "libvirt")]
#[async_trait]
impl AgentTransport for LibvirtTransport {
    async fn agent_command(&self, command: &str, timeout_secs: i32) -> Result<String> {
        let uri = self.uri.clone();
        let domain = self.domain.clone();
        let command = command.to_string();

        // libvirt 调用是阻塞的
        tokio::task::spawn_blocking(move || {
            let mut conn = virt::connect::Connect::open(Some(uri.as_str()))
                .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
            let result = virt::domain::Domain::lookup_by_name(&conn, &domain)
                .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))
                .and_then(|dom| {
                    dom.qemu_agent_command(&command, timeout_secs, 0)
                        .map_err(|e| ProtocolError::CommandFailed(e.to_string()))
                });
            let _ = conn.close();
            result
        })
        .await
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?
    }

    fn describe(&self) -> String {
        format!("{} {}", self.uri, self.domain)
    }
}

//! Guest agent 视角
//!
//! 尽力而为: 云主机未运行或 agent 始终不可连接时返回 NotApplicable, 不算失败。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atp_cloudplatform::{volume_serial, InterfaceAttachment, Server};
use atp_common::{retry_with_errors, CancellationToken, RetryTag};
use atp_protocol::{BlockDevice, GuestAgent, GuestConnector, ProtocolError};
use tracing::{info, warn};

use super::{CheckStatus, ServerChecker};
use crate::config::TargetConfig;
use crate::{ExecutorError, Result};

pub struct GuestChecker {
    connector: Arc<dyn GuestConnector>,
    config: Arc<TargetConfig>,
    cancel: CancellationToken,
}

/// 连接结果: 要么拿到 agent, 要么给出无法检查的原因
enum Connection {
    Agent(Arc<dyn GuestAgent>),
    Unavailable(String),
}

fn same_mac(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn find_disk<'a>(devices: &'a [BlockDevice], volume_id: &str) -> Option<&'a BlockDevice> {
    let serial = volume_serial(volume_id);
    devices
        .iter()
        .find(|d| d.is_disk() && d.serial.as_deref() == Some(serial))
}

impl GuestChecker {
    pub fn new(
        connector: Arc<dyn GuestConnector>,
        config: Arc<TargetConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            config,
            cancel,
        }
    }

    fn device_condition(&self) -> atp_common::RetryCondition {
        self.config
            .condition(Duration::from_secs(self.config.guest.device_timeout))
    }

    /// 连接 guest agent, 在 connect_timeout 内重试
    async fn connect(&self, server: &Server) -> Result<Connection> {
        if !server.is_running() {
            return Ok(Connection::Unavailable(format!(
                "云主机未运行 ({})",
                server.status
            )));
        }
        let (Some(host), Some(domain)) = (server.host.as_deref(), server.instance_name.as_deref())
        else {
            return Ok(Connection::Unavailable("缺少计算节点或域名称".to_string()));
        };

        let condition = self
            .config
            .condition(Duration::from_secs(self.config.guest.connect_timeout));
        let result = retry_with_errors(&condition, &[RetryTag::AgentNotReady], &self.cancel, || async {
            self.connector.connect(host, domain).await.map_err(|e| match e {
                ProtocolError::Cancelled => ExecutorError::Cancelled,
                other => ExecutorError::retryable(RetryTag::AgentNotReady, other.to_string()),
            })
        })
        .await;

        match result {
            Ok(agent) => Ok(Connection::Agent(agent)),
            Err(e) if e.is_timeout() => {
                warn!("云主机 {} guest agent 不可用: {}", server.id, e);
                Ok(Connection::Unavailable(format!("guest agent 不可用: {}", e)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

macro_rules! connect_or_skip {
    ($self:ident, $server:expr) => {
        match $self.connect($server).await? {
            Connection::Agent(agent) => agent,
            Connection::Unavailable(reason) => return Ok(CheckStatus::NotApplicable(reason)),
        }
    };
}

#[async_trait]
impl ServerChecker for GuestChecker {
    fn name(&self) -> &'static str {
        "guest"
    }

    async fn makesure_active(&self, server: &Server) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        agent.ping().await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_stopped(&self, _server: &Server) -> Result<CheckStatus> {
        Ok(CheckStatus::NotApplicable(
            "云主机已关机, 无法从内部确认".to_string(),
        ))
    }

    async fn makesure_interface_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        let expected = iface.ipv4();
        let condition = self
            .config
            .condition(Duration::from_secs(self.config.guest.address_timeout));

        let addresses = retry_with_errors(
            &condition,
            &[RetryTag::GuestDeviceChanging, RetryTag::GuestNoAddress],
            &self.cancel,
            || async {
                let ifaces = agent.network_interfaces().await?;
                let Some(found) = ifaces.iter().find(|i| {
                    i.hardware_address
                        .as_deref()
                        .is_some_and(|mac| same_mac(mac, &iface.mac_addr))
                }) else {
                    return Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("guest 内未出现网卡 {}", iface.mac_addr),
                    ));
                };

                let addresses: Vec<String> = found.ipv4().map(str::to_string).collect();
                let ready = match expected {
                    Some(ip) => addresses.iter().any(|a| a == ip),
                    None => !addresses.is_empty(),
                };
                if !ready {
                    return Err(ExecutorError::retryable(
                        RetryTag::GuestNoAddress,
                        format!(
                            "网卡 {} ({}) 尚未获取地址 {}",
                            found.name,
                            iface.mac_addr,
                            expected.unwrap_or("*")
                        ),
                    ));
                }
                Ok(addresses)
            },
        )
        .await?;

        info!("网卡 {} 在 guest 内可见: {:?}", iface.mac_addr, addresses);
        Ok(CheckStatus::Passed)
    }

    async fn makesure_interface_not_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        retry_with_errors(
            &self.device_condition(),
            &[RetryTag::GuestDeviceChanging],
            &self.cancel,
            || async {
                let ifaces = agent.network_interfaces().await?;
                let present = ifaces.iter().any(|i| {
                    i.hardware_address
                        .as_deref()
                        .is_some_and(|mac| same_mac(mac, &iface.mac_addr))
                });
                if present {
                    return Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("guest 内网卡 {} 仍存在", iface.mac_addr),
                    ));
                }
                Ok(())
            },
        )
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_exist(&self, server: &Server, volume_id: &str) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        retry_with_errors(
            &self.device_condition(),
            &[RetryTag::GuestDeviceChanging],
            &self.cancel,
            || async {
                let devices = agent.block_devices(&self.cancel).await?;
                if find_disk(&devices, volume_id).is_none() {
                    return Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("guest 内未出现磁盘 serial={}", volume_serial(volume_id)),
                    ));
                }
                Ok(())
            },
        )
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_not_exist(&self, server: &Server, volume_id: &str) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        retry_with_errors(
            &self.device_condition(),
            &[RetryTag::GuestDeviceChanging],
            &self.cancel,
            || async {
                let devices = agent.block_devices(&self.cancel).await?;
                if let Some(disk) = find_disk(&devices, volume_id) {
                    return Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("guest 内磁盘 {} 仍存在", disk.name),
                    ));
                }
                Ok(())
            },
        )
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_size(
        &self,
        server: &Server,
        volume_id: &str,
        size_gb: u64,
    ) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        let expected = size_gb << 30;
        retry_with_errors(
            &self.device_condition(),
            &[RetryTag::GuestDeviceChanging],
            &self.cancel,
            || async {
                let devices = agent.block_devices(&self.cancel).await?;
                match find_disk(&devices, volume_id) {
                    Some(disk) if disk.size == expected => Ok(()),
                    Some(disk) => Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("磁盘 {} 容量 {} 字节, 期望 {}", disk.name, disk.size, expected),
                    )),
                    None => Err(ExecutorError::retryable(
                        RetryTag::GuestDeviceChanging,
                        format!("guest 内未出现磁盘 serial={}", volume_serial(volume_id)),
                    )),
                }
            },
        )
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_hostname(&self, server: &Server, expected: &str) -> Result<CheckStatus> {
        let agent = connect_or_skip!(self, server);
        let hostname = agent.hostname().await?;
        // 重命名只改控制面名称, guest 内主机名由 cloud-init 在首次启动时设置
        if hostname != expected {
            return Ok(CheckStatus::NotApplicable(format!(
                "guest 主机名为 {}, 未随重命名更新为 {}",
                hostname, expected
            )));
        }
        Ok(CheckStatus::Passed)
    }
}

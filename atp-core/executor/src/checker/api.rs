//! 控制面 API 视角

use std::sync::Arc;

use async_trait::async_trait;
use atp_cloudplatform::{ControlPlane, InterfaceAttachment, Server};
use atp_common::{retry_with_errors, CancellationToken, RetryCondition, RetryTag};

use super::{CheckStatus, ServerChecker};
use crate::{ExecutorError, Result};

/// 重新读取云主机/网卡/云盘, 与期望状态比对
pub struct ApiChecker {
    client: Arc<dyn ControlPlane>,
    condition: RetryCondition,
    cancel: CancellationToken,
}

impl ApiChecker {
    pub fn new(client: Arc<dyn ControlPlane>, condition: RetryCondition, cancel: CancellationToken) -> Self {
        Self {
            client,
            condition,
            cancel,
        }
    }

    async fn attached(&self, server_id: &str, volume_id: &str) -> Result<bool> {
        let attachments = self.client.list_volume_attachments(server_id).await?;
        Ok(attachments.iter().any(|a| a.volume_id == volume_id))
    }
}

#[async_trait]
impl ServerChecker for ApiChecker {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn makesure_active(&self, server: &Server) -> Result<CheckStatus> {
        let current = self.client.get_server(&server.id).await?;
        if !current.is_active() {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 状态为 {}, 期望 ACTIVE",
                current.id, current.status
            )));
        }
        Ok(CheckStatus::Passed)
    }

    async fn makesure_stopped(&self, server: &Server) -> Result<CheckStatus> {
        let current = self.client.get_server(&server.id).await?;
        if !current.is_shutoff() {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 状态为 {}, 期望 SHUTOFF",
                current.id, current.status
            )));
        }
        Ok(CheckStatus::Passed)
    }

    async fn makesure_interface_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus> {
        let ifaces = self.client.list_interfaces(&server.id).await?;
        if !ifaces.iter().any(|i| i.port_id == iface.port_id) {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 上找不到网卡 {}",
                server.id, iface.port_id
            )));
        }
        Ok(CheckStatus::Passed)
    }

    async fn makesure_interface_not_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus> {
        // 网卡卸载是异步的, 需要轮询
        retry_with_errors(&self.condition, &[RetryTag::ResourceExists], &self.cancel, || async {
            let ifaces = self.client.list_interfaces(&server.id).await?;
            if ifaces.iter().any(|i| i.port_id == iface.port_id) {
                return Err(ExecutorError::retryable(
                    RetryTag::ResourceExists,
                    format!("网卡 {} 仍挂载在云主机 {}", iface.port_id, server.id),
                ));
            }
            Ok(())
        })
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_exist(&self, server: &Server, volume_id: &str) -> Result<CheckStatus> {
        retry_with_errors(&self.condition, &[RetryTag::VolumeTaskPending], &self.cancel, || async {
            let volume = self.client.get_volume(volume_id).await?;
            if volume.is_error() {
                return Err(ExecutorError::ResourceError {
                    id: volume.id,
                    message: format!("云盘状态 {}", volume.status),
                });
            }
            if !volume.is_in_use() || !self.attached(&server.id, volume_id).await? {
                return Err(ExecutorError::retryable(
                    RetryTag::VolumeTaskPending,
                    format!("云盘 {} 尚未挂载到 {} ({})", volume_id, server.id, volume.status),
                ));
            }
            Ok(())
        })
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_not_exist(&self, server: &Server, volume_id: &str) -> Result<CheckStatus> {
        retry_with_errors(&self.condition, &[RetryTag::VolumeTaskPending], &self.cancel, || async {
            if self.attached(&server.id, volume_id).await? {
                return Err(ExecutorError::retryable(
                    RetryTag::VolumeTaskPending,
                    format!("云盘 {} 仍挂载在 {}", volume_id, server.id),
                ));
            }
            let volume = self.client.get_volume(volume_id).await?;
            if volume.is_error() {
                return Err(ExecutorError::ResourceError {
                    id: volume.id,
                    message: format!("云盘状态 {}", volume.status),
                });
            }
            if !volume.is_available() {
                return Err(ExecutorError::retryable(
                    RetryTag::VolumeTaskPending,
                    format!("云盘 {} 状态 {}", volume_id, volume.status),
                ));
            }
            Ok(())
        })
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_volume_size(
        &self,
        _server: &Server,
        volume_id: &str,
        size_gb: u64,
    ) -> Result<CheckStatus> {
        retry_with_errors(&self.condition, &[RetryTag::VolumeTaskPending], &self.cancel, || async {
            let volume = self.client.get_volume(volume_id).await?;
            if volume.is_error() {
                return Err(ExecutorError::ResourceError {
                    id: volume.id,
                    message: format!("云盘状态 {}", volume.status),
                });
            }
            if volume.is_transitional() || volume.size < size_gb {
                return Err(ExecutorError::retryable(
                    RetryTag::VolumeTaskPending,
                    format!("云盘 {} 容量 {} GB ({}), 期望 {} GB", volume_id, volume.size, volume.status, size_gb),
                ));
            }
            if volume.size != size_gb {
                return Err(ExecutorError::assertion(format!(
                    "云盘 {} 容量 {} GB, 期望 {} GB",
                    volume_id, volume.size, size_gb
                )));
            }
            Ok(())
        })
        .await?;
        Ok(CheckStatus::Passed)
    }

    async fn makesure_hostname(&self, server: &Server, expected: &str) -> Result<CheckStatus> {
        let current = self.client.get_server(&server.id).await?;
        if current.name != expected {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 名称为 {}, 期望 {}",
                current.id, current.name, expected
            )));
        }
        Ok(CheckStatus::Passed)
    }
}

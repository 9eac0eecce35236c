//! 等待远端状态
//!
//! 所有等待都经由 [`retry_with_errors`], 只把对应的 [`RetryTag`] 视为"尚未完成"。

use atp_cloudplatform::{ControlPlane, Server, ServerStatus, Snapshot, Volume};
use atp_common::{retry_with_errors, CancellationToken, RetryCondition, RetryTag};
use tracing::debug;

use crate::{ExecutorError, Result};

/// 等待云主机任务结束 (task_state 清空)
///
/// 云主机进入 ERROR 视为终止错误, 不再重试。
pub async fn wait_server_task_done(
    client: &dyn ControlPlane,
    server_id: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<Server> {
    let server = retry_with_errors(condition, &[RetryTag::TaskPending], cancel, || async {
        let server = client.get_server(server_id).await?;
        if server.is_error() {
            return Err(ExecutorError::ServerError {
                id: server.id.clone(),
                message: server.fault_message(),
            });
        }
        if server.has_pending_task() {
            return Err(ExecutorError::retryable(
                RetryTag::TaskPending,
                format!(
                    "云主机 {} 任务进行中: {} ({})",
                    server.id,
                    server.task_state.as_deref().unwrap_or_default(),
                    server.status
                ),
            ));
        }
        Ok(server)
    })
    .await?;

    debug!("云主机 {} 任务完成, 状态 {}", server.id, server.status);
    Ok(server)
}

/// 等待云主机删除完成
pub async fn wait_server_deleted(
    client: &dyn ControlPlane,
    server_id: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<()> {
    retry_with_errors(condition, &[RetryTag::ResourceExists], cancel, || async {
        match client.get_server(server_id).await {
            Ok(server) if server.status == ServerStatus::Deleted => Ok(()),
            Ok(server) => Err(ExecutorError::retryable(
                RetryTag::ResourceExists,
                format!("云主机 {} 仍存在 ({})", server.id, server.status),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
    .await?;
    Ok(())
}

/// 等待云盘进入 `expected` 状态, 进入 error* 状态视为终止错误
pub async fn wait_volume_status(
    client: &dyn ControlPlane,
    volume_id: &str,
    expected: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<Volume> {
    let volume = retry_with_errors(condition, &[RetryTag::VolumeTaskPending], cancel, || async {
        let volume = client.get_volume(volume_id).await?;
        if volume.is_error() {
            return Err(ExecutorError::ResourceError {
                id: volume.id.clone(),
                message: format!("云盘状态 {}", volume.status),
            });
        }
        if volume.status != expected {
            return Err(ExecutorError::retryable(
                RetryTag::VolumeTaskPending,
                format!("云盘 {} 状态 {}, 期望 {}", volume.id, volume.status, expected),
            ));
        }
        Ok(volume)
    })
    .await?;
    Ok(volume)
}

/// 等待云盘离开过渡状态 (available 或 in-use)
pub async fn wait_volume_ready(
    client: &dyn ControlPlane,
    volume_id: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<Volume> {
    let volume = retry_with_errors(condition, &[RetryTag::VolumeTaskPending], cancel, || async {
        let volume = client.get_volume(volume_id).await?;
        if volume.is_error() {
            return Err(ExecutorError::ResourceError {
                id: volume.id.clone(),
                message: format!("云盘状态 {}", volume.status),
            });
        }
        if volume.is_transitional() {
            return Err(ExecutorError::retryable(
                RetryTag::VolumeTaskPending,
                format!("云盘 {} 处于 {}", volume.id, volume.status),
            ));
        }
        Ok(volume)
    })
    .await?;
    Ok(volume)
}

/// 等待云盘删除完成
pub async fn wait_volume_deleted(
    client: &dyn ControlPlane,
    volume_id: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<()> {
    retry_with_errors(condition, &[RetryTag::ResourceExists], cancel, || async {
        match client.get_volume(volume_id).await {
            Ok(volume) => Err(ExecutorError::retryable(
                RetryTag::ResourceExists,
                format!("云盘 {} 仍存在 ({})", volume.id, volume.status),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
    .await?;
    Ok(())
}

/// 等待快照可用
pub async fn wait_snapshot_available(
    client: &dyn ControlPlane,
    snapshot_id: &str,
    condition: &RetryCondition,
    cancel: &CancellationToken,
) -> Result<Snapshot> {
    let snapshot = retry_with_errors(condition, &[RetryTag::SnapshotNotReady], cancel, || async {
        let snapshot = client.get_snapshot(snapshot_id).await?;
        if snapshot.is_error() {
            return Err(ExecutorError::ResourceError {
                id: snapshot.id.clone(),
                message: format!("快照状态 {}", snapshot.status),
            });
        }
        if !snapshot.is_available() {
            return Err(ExecutorError::retryable(
                RetryTag::SnapshotNotReady,
                format!("快照 {} 状态 {}", snapshot.id, snapshot.status),
            ));
        }
        Ok(snapshot)
    })
    .await?;
    Ok(snapshot)
}

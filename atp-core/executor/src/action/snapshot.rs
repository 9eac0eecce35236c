//! 系统盘快照回滚

use async_trait::async_trait;
use tracing::{info, warn};

use super::ServerAction;
use crate::context::ServerActionTest;
use crate::waiter;
use crate::{ExecutorError, Result};

/// 对系统盘打快照, 关机后回滚到该快照再开机
#[derive(Default)]
pub struct RevertSystem {
    snapshot: Option<String>,
}

impl RevertSystem {
    /// 系统盘: 设备名等于根设备的挂载, 否则取第一块
    async fn root_volume(ctx: &ServerActionTest) -> Result<String> {
        let attachments = ctx.client.list_volume_attachments(&ctx.server.id).await?;
        attachments
            .iter()
            .find(|a| a.is_root_of(&ctx.server))
            .or_else(|| attachments.first())
            .map(|a| a.volume_id.clone())
            .ok_or_else(|| ExecutorError::assertion(format!("云主机 {} 找不到系统盘", ctx.server.id)))
    }
}

#[async_trait]
impl ServerAction for RevertSystem {
    fn name(&self) -> &'static str {
        "revert_system"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if !ctx.server.is_boot_from_volume() {
            return Some("云主机不是从云盘启动".to_string());
        }
        if !ctx.server.is_active() && !ctx.server.is_shutoff() {
            return Some(format!("云主机状态为 {}", ctx.server.status));
        }
        None
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let id = ctx.server.id.clone();
        let client = ctx.client.clone();
        let condition = ctx.config.task_condition();
        let root = Self::root_volume(ctx).await?;

        let name = ctx.resource_name("snapshot");
        info!("云主机 {} 系统盘 {} 创建快照 {}", id, root, name);
        let snapshot = client.create_snapshot(&root, &name, true).await?;
        self.snapshot = Some(snapshot.id.clone());
        waiter::wait_snapshot_available(client.as_ref(), &snapshot.id, &condition, &ctx.cancel).await?;

        if !ctx.server.is_shutoff() {
            client.stop_server(&id).await?;
            ctx.wait_task_done().await?;
            ctx.assert_stopped().await?;
        }

        info!("云盘 {} 回滚到快照 {}", root, snapshot.id);
        client.revert_volume_to_snapshot(&root, &snapshot.id).await?;
        waiter::wait_volume_ready(client.as_ref(), &root, &condition, &ctx.cancel).await?;

        client.start_server(&id).await?;
        ctx.wait_task_done().await?;
        ctx.assert_active().await
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let Some(snapshot_id) = self.snapshot.take() else {
            return Ok(());
        };
        match ctx.client.delete_snapshot(&snapshot_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!("删除快照 {} 失败: {}", snapshot_id, e);
                Err(ExecutorError::Cleanup(vec![format!("快照 {}: {}", snapshot_id, e)]))
            }
        }
    }
}

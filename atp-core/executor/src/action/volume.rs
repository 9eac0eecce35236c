//! 云盘挂载/卸载/热插拔/扩容

use async_trait::async_trait;
use atp_cloudplatform::{CreateVolumeRequest, VolumeAttachment};
use tracing::{info, warn};

use super::ServerAction;
use crate::context::ServerActionTest;
use crate::waiter;
use crate::{ExecutorError, Result};

/// 新建数据盘并挂载, 云盘 id 立即记入 `created`
async fn attach_new_volume(ctx: &mut ServerActionTest, created: &mut Vec<String>) -> Result<String> {
    let req = CreateVolumeRequest {
        size: ctx.config.volume_size,
        name: Some(ctx.resource_name("volume")),
        volume_type: ctx.config.volume_type.clone(),
        availability_zone: ctx.server.availability_zone.clone(),
        ..Default::default()
    };
    let volume = ctx.client.create_volume(&req).await?;
    created.push(volume.id.clone());

    let condition = ctx.config.task_condition();
    waiter::wait_volume_status(ctx.client.as_ref(), &volume.id, "available", &condition, &ctx.cancel)
        .await?;

    info!("云主机 {} 挂载云盘 {}", ctx.server.id, volume.id);
    ctx.client.attach_volume(&ctx.server.id, &volume.id).await?;
    ctx.wait_task_done().await?;

    let report = ctx
        .checkers()
        .makesure_volume_exist(&ctx.server, &volume.id)
        .await?;
    ctx.record(report);
    Ok(volume.id)
}

/// 卸载云盘并确认消失
async fn detach_and_check(ctx: &mut ServerActionTest, volume_id: &str) -> Result<()> {
    info!("云主机 {} 卸载云盘 {}", ctx.server.id, volume_id);
    ctx.client.detach_volume(&ctx.server.id, volume_id).await?;
    ctx.wait_task_done().await?;

    let report = ctx
        .checkers()
        .makesure_volume_not_exist(&ctx.server, volume_id)
        .await?;
    ctx.record(report);
    Ok(())
}

/// 清理单块云盘: 必要时卸载, 等待可用后删除
async fn release_volume(ctx: &ServerActionTest, volume_id: &str) -> Result<()> {
    let volume = match ctx.client.get_volume(volume_id).await {
        Ok(volume) => volume,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let condition = ctx.config.teardown_condition();
    if volume.is_in_use() {
        ctx.client.detach_volume(&ctx.server.id, volume_id).await?;
    }
    if !volume.is_error() {
        waiter::wait_volume_status(
            ctx.client.as_ref(),
            volume_id,
            "available",
            &condition,
            ctx.teardown_token(),
        )
        .await?;
    }

    match ctx.client.delete_volume(volume_id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    waiter::wait_volume_deleted(ctx.client.as_ref(), volume_id, &condition, ctx.teardown_token()).await
}

/// 逐个清理云盘, 单个失败不影响其余
async fn release_volumes(ctx: &ServerActionTest, volumes: &[String]) -> Vec<String> {
    let mut failures = Vec::new();
    for volume_id in volumes {
        if let Err(e) = release_volume(ctx, volume_id).await {
            warn!("清理云盘 {} 失败: {}", volume_id, e);
            failures.push(format!("云盘 {}: {}", volume_id, e));
        }
    }
    failures
}

fn cleanup_result(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ExecutorError::Cleanup(failures))
    }
}

/// 数据盘数量 (不含系统盘)
fn data_volume_count(ctx: &ServerActionTest) -> usize {
    let root = usize::from(ctx.server.is_boot_from_volume());
    ctx.server.volumes_attached.len().saturating_sub(root)
}

/// 挂载记录中的数据盘 (设备名不是根设备)
fn data_attachments<'a>(
    ctx: &ServerActionTest,
    attachments: &'a [VolumeAttachment],
) -> Vec<&'a VolumeAttachment> {
    attachments.iter().filter(|a| !a.is_root_of(&ctx.server)).collect()
}

/// 新建数据盘并挂载; 成功后云盘保留在云主机上
#[derive(Default)]
pub struct AttachVolume {
    created: Vec<String>,
    attached: bool,
}

#[async_trait]
impl ServerAction for AttachVolume {
    fn name(&self) -> &'static str {
        "attach_volume"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.is_active() || ctx.server.is_shutoff() {
            None
        } else {
            Some(format!("云主机状态为 {}", ctx.server.status))
        }
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        attach_new_volume(ctx, &mut self.created).await?;
        self.attached = true;
        Ok(())
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        if self.attached {
            return Ok(());
        }
        let created = std::mem::take(&mut self.created);
        cleanup_result(release_volumes(ctx, &created).await)
    }
}

/// 卸载最后一块数据盘; 由本工具创建的云盘随后删除
pub struct DetachVolume;

#[async_trait]
impl ServerAction for DetachVolume {
    fn name(&self) -> &'static str {
        "detach_volume"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if data_volume_count(ctx) == 0 {
            return Some("云主机没有数据盘".to_string());
        }
        None
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let attachments = ctx.client.list_volume_attachments(&ctx.server.id).await?;
        let Some(last) = data_attachments(ctx, &attachments).last().map(|a| a.volume_id.clone()) else {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 没有可卸载的数据盘",
                ctx.server.id
            )));
        };

        detach_and_check(ctx, &last).await?;

        let volume = ctx.client.get_volume(&last).await?;
        if volume.name.as_deref().is_some_and(|name| ctx.owns(name)) {
            release_volume(ctx, &last).await?;
        }
        Ok(())
    }
}

/// N 次挂载后 N 次卸载并删除
#[derive(Default)]
pub struct VolumeHotplug {
    /// 已创建但尚未删除的云盘
    created: Vec<String>,
}

#[async_trait]
impl ServerAction for VolumeHotplug {
    fn name(&self) -> &'static str {
        "volume_hotplug"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.is_active() {
            None
        } else {
            Some(format!("云主机状态为 {}", ctx.server.status))
        }
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let times = ctx.config.volume_hotplug_times;
        let mut attached = Vec::new();
        for i in 0..times {
            info!("云盘热插拔: 挂载 {}/{}", i + 1, times);
            attached.push(attach_new_volume(ctx, &mut self.created).await?);
        }

        for (i, volume_id) in attached.iter().enumerate() {
            info!("云盘热插拔: 卸载 {}/{}", i + 1, times);
            detach_and_check(ctx, volume_id).await?;
            release_volume(ctx, volume_id).await?;
            self.created.retain(|id| id != volume_id);
        }
        Ok(())
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        if self.created.is_empty() {
            return Ok(());
        }
        info!("清理 {} 块残留云盘", self.created.len());
        let remaining = std::mem::take(&mut self.created);
        cleanup_result(release_volumes(ctx, &remaining).await)
    }
}

/// 第一块数据盘 (没有则系统盘) 扩容 1 GB
pub struct ExtendVolume;

#[async_trait]
impl ServerAction for ExtendVolume {
    fn name(&self) -> &'static str {
        "extend_volume"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.volumes_attached.is_empty() {
            return Some("云主机没有挂载云盘".to_string());
        }
        if !ctx.server.is_active() && !ctx.server.is_shutoff() {
            return Some(format!("云主机状态为 {}", ctx.server.status));
        }
        None
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let attachments = ctx.client.list_volume_attachments(&ctx.server.id).await?;
        let target = data_attachments(ctx, &attachments)
            .first()
            .map(|a| a.volume_id.clone())
            .or_else(|| attachments.first().map(|a| a.volume_id.clone()))
            .ok_or_else(|| {
                ExecutorError::assertion(format!("云主机 {} 没有挂载云盘", ctx.server.id))
            })?;

        let volume = ctx.client.get_volume(&target).await?;
        let new_size = volume.size + 1;
        info!("云盘 {} 扩容: {} GB -> {} GB", target, volume.size, new_size);
        ctx.client.extend_volume(&target, new_size).await?;

        let condition = ctx.config.task_condition();
        waiter::wait_volume_ready(ctx.client.as_ref(), &target, &condition, &ctx.cancel).await?;

        let report = ctx
            .checkers()
            .makesure_volume_size(&ctx.server, &target, new_size)
            .await?;
        ctx.record(report);
        Ok(())
    }
}

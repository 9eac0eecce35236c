//! 云主机生命周期动作: 电源、调整规格、重命名、重建、迁移

use async_trait::async_trait;
use atp_cloudplatform::{RebootType, Server};
use tracing::info;

use super::ServerAction;
use crate::config::TargetConfig;
use crate::context::ServerActionTest;
use crate::{ExecutorError, Result};

/// 电源类操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOp {
    Reboot,
    HardReboot,
    Stop,
    Start,
    Pause,
    Unpause,
    TogglePause,
    Suspend,
    Resume,
    ToggleSuspend,
    Shelve,
    Unshelve,
    ToggleShelve,
}

impl PowerOp {
    fn name(self) -> &'static str {
        match self {
            PowerOp::Reboot => "reboot",
            PowerOp::HardReboot => "hard_reboot",
            PowerOp::Stop => "stop",
            PowerOp::Start => "start",
            PowerOp::Pause => "pause",
            PowerOp::Unpause => "unpause",
            PowerOp::TogglePause => "toggle_pause",
            PowerOp::Suspend => "suspend",
            PowerOp::Resume => "resume",
            PowerOp::ToggleSuspend => "toggle_suspend",
            PowerOp::Shelve => "shelve",
            PowerOp::Unshelve => "unshelve",
            PowerOp::ToggleShelve => "toggle_shelve",
        }
    }

    /// 根据当前状态确定实际执行的操作; toggle 类取当前状态的反向操作
    fn resolve(self, server: &Server) -> Option<Step> {
        let active = server.is_active();
        let stopped = server.is_shutoff();
        match self {
            PowerOp::Reboot => active.then_some(Step::Reboot(RebootType::Soft)),
            PowerOp::HardReboot => active.then_some(Step::Reboot(RebootType::Hard)),
            PowerOp::Stop => active.then_some(Step::Stop),
            PowerOp::Start => stopped.then_some(Step::Start),
            PowerOp::Pause => active.then_some(Step::Pause),
            PowerOp::Unpause => server.is_paused().then_some(Step::Unpause),
            PowerOp::Suspend => active.then_some(Step::Suspend),
            PowerOp::Resume => server.is_suspended().then_some(Step::Resume),
            PowerOp::Shelve => (active || stopped).then_some(Step::Shelve),
            PowerOp::Unshelve => server.is_shelved().then_some(Step::Unshelve),
            PowerOp::TogglePause if active => Some(Step::Pause),
            PowerOp::TogglePause => server.is_paused().then_some(Step::Unpause),
            PowerOp::ToggleSuspend if active => Some(Step::Suspend),
            PowerOp::ToggleSuspend => server.is_suspended().then_some(Step::Resume),
            PowerOp::ToggleShelve if active || stopped => Some(Step::Shelve),
            PowerOp::ToggleShelve => server.is_shelved().then_some(Step::Unshelve),
        }
    }
}

/// 实际下发的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reboot(RebootType),
    Stop,
    Start,
    Pause,
    Unpause,
    Suspend,
    Resume,
    Shelve,
    Unshelve,
}

pub struct PowerAction {
    op: PowerOp,
}

impl PowerAction {
    pub fn new(op: PowerOp) -> Self {
        Self { op }
    }
}

#[async_trait]
impl ServerAction for PowerAction {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        match self.op.resolve(&ctx.server) {
            Some(_) => None,
            None => Some(format!("云主机状态为 {}", ctx.server.status)),
        }
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let step = self.op.resolve(&ctx.server).ok_or_else(|| {
            ExecutorError::assertion(format!(
                "云主机状态为 {}, 无法执行 {}",
                ctx.server.status,
                self.op.name()
            ))
        })?;
        let id = ctx.server.id.clone();
        let client = ctx.client.clone();

        info!("云主机 {} 执行 {} ({:?})", id, self.op.name(), step);
        match step {
            Step::Reboot(kind) => client.reboot_server(&id, kind).await?,
            Step::Stop => client.stop_server(&id).await?,
            Step::Start => client.start_server(&id).await?,
            Step::Pause => client.pause_server(&id).await?,
            Step::Unpause => client.unpause_server(&id).await?,
            Step::Suspend => client.suspend_server(&id).await?,
            Step::Resume => client.resume_server(&id).await?,
            Step::Shelve => client.shelve_server(&id).await?,
            Step::Unshelve => client.unshelve_server(&id).await?,
        }
        ctx.wait_task_done().await?;

        match step {
            Step::Stop => ctx.assert_stopped().await,
            Step::Pause => ctx.expect_status(Server::is_paused, "PAUSED"),
            Step::Suspend => ctx.expect_status(Server::is_suspended, "SUSPENDED"),
            Step::Shelve => ctx.expect_status(Server::is_shelved, "SHELVED"),
            Step::Reboot(_) | Step::Start | Step::Unpause | Step::Resume | Step::Unshelve => {
                ctx.assert_active().await
            }
        }
    }
}

/// 按原电源状态断言
async fn assert_power(ctx: &mut ServerActionTest, was_active: bool) -> Result<()> {
    if was_active {
        ctx.assert_active().await
    } else {
        ctx.assert_stopped().await
    }
}

/// 调整规格并确认
pub struct Resize;

#[async_trait]
impl ServerAction for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if !ctx.server.is_active() && !ctx.server.is_shutoff() {
            return Some(format!("云主机状态为 {}", ctx.server.status));
        }
        if !ctx.config.flavors.iter().any(|f| !ctx.server.flavor.matches(f)) {
            return Some("没有与当前不同的规格".to_string());
        }
        None
    }

    fn validate(&self, config: &TargetConfig) -> Result<()> {
        config.require_flavors()
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let was_active = ctx.server.is_active();
        let from = ctx.server.flavor.display_name().to_string();
        let flavor = ctx
            .next_flavor()
            .ok_or_else(|| ExecutorError::Config("没有与当前不同的规格".to_string()))?;
        let id = ctx.server.id.clone();

        info!("云主机 {} 调整规格: {} -> {}", id, from, flavor);
        ctx.client.resize_server(&id, &flavor).await?;
        let server = ctx.wait_task_done().await?;
        if server.status == atp_cloudplatform::ServerStatus::VerifyResize {
            ctx.client.confirm_resize(&id).await?;
            ctx.wait_task_done().await?;
        }

        if !ctx.server.flavor.matches(&flavor) {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 规格为 {}, 期望 {}",
                id,
                ctx.server.flavor.display_name(),
                flavor
            )));
        }
        assert_power(ctx, was_active).await
    }
}

/// 重命名为 `<name>-renamed-<n>`
pub struct Rename;

const RENAME_MARK: &str = "-renamed-";

fn renamed(name: &str, seq: u32) -> String {
    let base = name.split(RENAME_MARK).next().unwrap_or(name);
    format!("{}{}{}", base, RENAME_MARK, seq)
}

#[async_trait]
impl ServerAction for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn skip(&self, _ctx: &ServerActionTest) -> Option<String> {
        None
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let seq = ctx.next_rename_seq();
        let new_name = renamed(&ctx.server.name, seq);
        let id = ctx.server.id.clone();

        info!("云主机 {} 重命名: {} -> {}", id, ctx.server.name, new_name);
        ctx.client.rename_server(&id, &new_name).await?;
        ctx.refresh().await?;

        let report = ctx.checkers().makesure_hostname(&ctx.server, &new_name).await?;
        ctx.record(report);
        Ok(())
    }
}

/// 使用下一个镜像重建
pub struct Rebuild;

#[async_trait]
impl ServerAction for Rebuild {
    fn name(&self) -> &'static str {
        "rebuild"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if !ctx.server.is_active() && !ctx.server.is_shutoff() {
            return Some(format!("云主机状态为 {}", ctx.server.status));
        }
        if ctx.server.is_boot_from_volume() {
            return Some("从云盘启动的云主机不支持重建".to_string());
        }
        if ctx.config.images.is_empty() {
            return Some("未配置可用镜像".to_string());
        }
        None
    }

    fn validate(&self, config: &TargetConfig) -> Result<()> {
        config.require_images()
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let was_active = ctx.server.is_active();
        let image = ctx.next_image()?;
        let id = ctx.server.id.clone();

        info!("云主机 {} 重建, 镜像 {}", id, image);
        ctx.client.rebuild_server(&id, &image).await?;
        ctx.wait_task_done().await?;

        if ctx.server.image_id() != Some(image.as_str()) {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 镜像为 {:?}, 期望 {}",
                id,
                ctx.server.image_id(),
                image
            )));
        }
        assert_power(ctx, was_active).await
    }
}

pub(super) fn host_changed(ctx: &ServerActionTest, before: Option<&str>) -> Result<()> {
    let after = ctx.server.host.as_deref();
    if after.is_none() || after == before {
        return Err(ExecutorError::assertion(format!(
            "云主机 {} 迁移后所在节点未变化: {:?}",
            ctx.server.id, after
        )));
    }
    info!("云主机 {} 已迁移: {:?} -> {:?}", ctx.server.id, before, after);
    Ok(())
}

/// 冷迁移并确认
pub struct Migrate;

#[async_trait]
impl ServerAction for Migrate {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.is_active() || ctx.server.is_shutoff() {
            None
        } else {
            Some(format!("云主机状态为 {}", ctx.server.status))
        }
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let was_active = ctx.server.is_active();
        let before = ctx.server.host.clone();
        let id = ctx.server.id.clone();

        info!("云主机 {} 冷迁移, 当前节点 {:?}", id, before);
        ctx.client.migrate_server(&id, None).await?;
        let server = ctx.wait_task_done().await?;
        if server.status == atp_cloudplatform::ServerStatus::VerifyResize {
            ctx.client.confirm_resize(&id).await?;
            ctx.wait_task_done().await?;
        }

        host_changed(ctx, before.as_deref())?;
        assert_power(ctx, was_active).await
    }
}

/// 热迁移
pub struct LiveMigrate;

#[async_trait]
impl ServerAction for LiveMigrate {
    fn name(&self) -> &'static str {
        "live_migrate"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.is_active() {
            None
        } else {
            Some(format!("云主机状态为 {}", ctx.server.status))
        }
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let before = ctx.server.host.clone();
        let id = ctx.server.id.clone();

        info!("云主机 {} 热迁移, 当前节点 {:?}", id, before);
        ctx.client.live_migrate_server(&id, None).await?;
        ctx.wait_task_done().await?;

        host_changed(ctx, before.as_deref())?;
        ctx.assert_active().await
    }
}

/// 空动作, 用于串联或填充
pub struct Nop;

#[async_trait]
impl ServerAction for Nop {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn skip(&self, _ctx: &ServerActionTest) -> Option<String> {
        None
    }

    async fn start(&mut self, _ctx: &mut ServerActionTest) -> Result<()> {
        Ok(())
    }
}

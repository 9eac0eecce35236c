//! 云主机动作
//!
//! 状态机: `Pending -> Skipped`, 或 `Pending -> Running -> {Succeeded | Failed} -> TornDown`。
//! `tear_down` 在 `start` 之后必定执行一次, 无论成功、失败还是 panic。

mod interface;
mod live_migrate_ping;
mod registry;
mod server_ops;
mod snapshot;
mod volume;

pub use interface::{AttachInterface, DetachInterface, InterfaceHotplug};
pub use live_migrate_ping::LiveMigratePing;
pub use registry::{ActionConstructor, ActionRegistry};
pub use server_ops::{
    LiveMigrate, Migrate, Nop, PowerAction, PowerOp, Rebuild, Rename, Resize,
};
pub use snapshot::RevertSystem;
pub use volume::{AttachVolume, DetachVolume, ExtendVolume, VolumeHotplug};

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::TargetConfig;
use crate::context::ServerActionTest;
use crate::{ExecutorError, Result};

#[async_trait]
pub trait ServerAction: Send {
    fn name(&self) -> &'static str;

    /// 前置条件, 只读取缓存的云主机详情; 返回跳过原因
    fn skip(&self, ctx: &ServerActionTest) -> Option<String>;

    /// 变更云主机, 等待任务结束并检查结果
    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()>;

    /// 释放本动作创建的资源
    async fn tear_down(&mut self, _ctx: &mut ServerActionTest) -> Result<()> {
        Ok(())
    }

    /// 执行前的配置检查
    fn validate(&self, _config: &TargetConfig) -> Result<()> {
        Ok(())
    }
}

/// 动作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Skipped,
    Running,
    Succeeded,
    Failed,
    TornDown,
}

/// 单次动作结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub name: String,
    pub status: ActionStatus,
    /// 无法验证的视角
    pub unverified: Vec<String>,
    /// 清理失败信息
    pub teardown_error: Option<String>,
    pub duration_ms: u64,
    pub final_state: ActionState,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ActionStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ActionStatus::Skipped(_))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

/// 执行一个动作
pub async fn run_action(action: &mut dyn ServerAction, ctx: &mut ServerActionTest) -> ActionOutcome {
    let name = action.name().to_string();
    let started = Instant::now();
    let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

    if let Err(e) = ctx.refresh().await {
        error!("[{}] 刷新云主机 {} 失败: {}", name, ctx.server_id(), e);
        return ActionOutcome {
            name,
            status: ActionStatus::Failed(e.to_string()),
            unverified: Vec::new(),
            teardown_error: None,
            duration_ms: elapsed_ms(started),
            final_state: ActionState::Failed,
        };
    }

    if let Some(reason) = action.skip(ctx) {
        info!("[{}] 跳过: {}", name, reason);
        return ActionOutcome {
            name,
            status: ActionStatus::Skipped(reason),
            unverified: Vec::new(),
            teardown_error: None,
            duration_ms: 0,
            final_state: ActionState::Skipped,
        };
    }

    info!("[{}] 开始执行, 云主机 {}", name, ctx.server_id());
    let result = AssertUnwindSafe(action.start(ctx)).catch_unwind().await;
    let status = match result {
        Ok(Ok(())) => ActionStatus::Success,
        Ok(Err(e)) => {
            error!("[{}] 执行失败: {}", name, e);
            ActionStatus::Failed(e.to_string())
        }
        Err(payload) => {
            let e = ExecutorError::Panicked(panic_message(payload.as_ref()));
            error!("[{}] 执行异常: {}", name, e);
            ActionStatus::Failed(e.to_string())
        }
    };

    let teardown = AssertUnwindSafe(action.tear_down(ctx)).catch_unwind().await;
    let teardown_error = match teardown {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(ExecutorError::Panicked(panic_message(payload.as_ref())).to_string()),
    };

    let status = match &teardown_error {
        Some(e) => {
            warn!("[{}] 清理失败: {}", name, e);
            match status {
                ActionStatus::Success => ActionStatus::Failed(format!("清理失败: {}", e)),
                other => other,
            }
        }
        None => status,
    };
    if status == ActionStatus::Success {
        info!("[{}] 执行成功, 耗时 {} ms", name, elapsed_ms(started));
    }

    ActionOutcome {
        name,
        status,
        unverified: ctx.take_unverified(),
        teardown_error,
        duration_ms: elapsed_ms(started),
        final_state: ActionState::TornDown,
    }
}

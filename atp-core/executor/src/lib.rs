//! ATP 执行器
//!
//! 云主机操作测试框架: 对一批云主机依次执行状态变更动作 (重启、热迁移、搁置、
//! 网卡/云盘热插拔、调整规格、快照回滚……), 分别从控制面 API 和 guest agent
//! 两个视角确认结果, 并汇总每台云主机的通过/跳过/失败情况。

pub mod action;
pub mod action_count;
pub mod bulk;
pub mod case;
pub mod checker;
pub mod config;
pub mod context;
pub mod ping;
pub mod report;
pub mod task_group;
pub mod waiter;

#[cfg(test)]
pub(crate) mod fake;

pub use action::{run_action, ActionOutcome, ActionRegistry, ActionState, ActionStatus, ServerAction};
pub use action_count::{ActionCount, ActionCountList, MergePolicy};
pub use bulk::{BulkFailure, BulkOps, BulkReport};
pub use case::{Case, CaseRunner, TargetPopulation};
pub use checker::{CheckReport, CheckStatus, ServerChecker, ServerCheckers};
pub use config::{FailureStrategy, GuestConfig, LiveMigrateConfig, TargetConfig};
pub use context::ServerActionTest;
pub use ping::PingSummary;
pub use report::{CaseReport, CaseSummary, TaskState, TaskStore, TestTask};
pub use task_group::{ItemOutcome, Progress, TaskGroup};

use std::convert::Infallible;

use atp_cloudplatform::CloudError;
use atp_common::{RetryError, RetryTag, Retryable};
use atp_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("{message}")]
    Retryable { tag: RetryTag, message: String },

    #[error("云主机 {id} 进入错误状态: {message}")]
    ServerError { id: String, message: String },

    #[error("资源 {id} 进入错误状态: {message}")]
    ResourceError { id: String, message: String },

    #[error("检查失败: {0}")]
    Assertion(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("超时: {0}")]
    Timeout(String),

    #[error("操作被取消")]
    Cancelled,

    #[error("清理失败: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    #[error("动作执行异常: {0}")]
    Panicked(String),

    #[error("云平台错误: {0}")]
    Platform(#[from] CloudError),

    #[error("Guest 通道错误: {0}")]
    Guest(#[from] ProtocolError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(String),
}

impl ExecutorError {
    pub fn retryable(tag: RetryTag, message: impl Into<String>) -> Self {
        ExecutorError::Retryable {
            tag,
            message: message.into(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        ExecutorError::Assertion(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ExecutorError::Cancelled | ExecutorError::Guest(ProtocolError::Cancelled)
        )
    }
}

impl Retryable for ExecutorError {
    fn retry_tag(&self) -> Option<RetryTag> {
        match self {
            ExecutorError::Retryable { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

fn timeout_message(elapsed: std::time::Duration, attempts: u32, last: Option<String>) -> String {
    format!(
        "等待 {:?} 共 {} 次仍未满足: {}",
        elapsed,
        attempts,
        last.unwrap_or_else(|| "条件未满足".to_string())
    )
}

impl From<RetryError<ExecutorError>> for ExecutorError {
    fn from(e: RetryError<ExecutorError>) -> Self {
        match e {
            RetryError::Timeout {
                elapsed,
                attempts,
                last,
            } => ExecutorError::Timeout(timeout_message(elapsed, attempts, last)),
            RetryError::Cancelled => ExecutorError::Cancelled,
            RetryError::Aborted(e) => e,
        }
    }
}

impl From<RetryError<Infallible>> for ExecutorError {
    fn from(e: RetryError<Infallible>) -> Self {
        match e {
            RetryError::Timeout {
                elapsed,
                attempts,
                last,
            } => ExecutorError::Timeout(timeout_message(elapsed, attempts, last)),
            RetryError::Cancelled => ExecutorError::Cancelled,
            RetryError::Aborted(never) => match never {},
        }
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(e: serde_json::Error) -> Self {
        ExecutorError::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for ExecutorError {
    fn from(e: serde_yaml::Error) -> Self {
        ExecutorError::Serde(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

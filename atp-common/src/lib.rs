//! ATP 公共组件
//!
//! 此 crate 包含各核心 crate 共享的等待原语:
//! - [`RetryCondition`]: 超时 + 线性递增的轮询间隔
//! - [`retry`] / [`retry_with_errors`]: 唯一的轮询实现，所有等待远端状态变化的地方都复用它
//! - [`RetryTag`]: 可重试错误的分类标签

pub mod retry;

pub use retry::{
    poll_until, retry, retry_with_errors, Attempt, RetryCondition, RetryError, RetryTag,
    Retryable,
};
pub use tokio_util::sync::CancellationToken;

//! 重试引擎
//!
//! 轮询间隔按线性递增并封顶: `min(interval_min + interval_step * attempt, interval_max)`，
//! 累计耗时达到 `timeout` 后返回 [`RetryError::Timeout`]。
//! 最后一次等待会被截断到剩余时间，因此超时返回的时间点落在 `[timeout, timeout + interval_max]` 内。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 重试条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCondition {
    /// 总超时
    pub timeout: Duration,
    /// 最小间隔 (第一次等待)
    pub interval_min: Duration,
    /// 最大间隔
    pub interval_max: Duration,
    /// 每次递增的步长
    pub interval_step: Duration,
}

impl RetryCondition {
    pub fn new(
        timeout: Duration,
        interval_min: Duration,
        interval_max: Duration,
        interval_step: Duration,
    ) -> Self {
        Self {
            timeout,
            interval_min,
            interval_max: interval_max.max(interval_min),
            interval_step,
        }
    }

    /// 固定间隔轮询
    pub fn fixed(timeout: Duration, interval: Duration) -> Self {
        Self::new(timeout, interval, interval, Duration::ZERO)
    }

    /// 第 `attempt` 次 (从 0 开始) 失败后的等待时间
    pub fn interval(&self, attempt: u32) -> Duration {
        self.interval_min
            .saturating_add(self.interval_step.saturating_mul(attempt))
            .min(self.interval_max)
    }

    /// 替换超时时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 可重试错误标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTag {
    /// 云主机仍有进行中的任务 (task_state 非空)
    TaskPending,
    /// 云盘处于过渡状态
    VolumeTaskPending,
    /// 快照尚不可用
    SnapshotNotReady,
    /// 资源仍未删除
    ResourceExists,
    /// Guest 尚未获取到 IP 地址
    GuestNoAddress,
    /// Guest 内设备 (网卡/磁盘) 尚未同步
    GuestDeviceChanging,
    /// Guest agent 尚不可连接
    AgentNotReady,
    /// 控制台尚未输出登录提示
    ConsoleNotReady,
    /// Guest 内进程仍在运行
    ProcessRunning,
    /// ping 存在丢包
    PingLoss,
}

impl Display for RetryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RetryTag::TaskPending => "task_pending",
            RetryTag::VolumeTaskPending => "volume_task_pending",
            RetryTag::SnapshotNotReady => "snapshot_not_ready",
            RetryTag::ResourceExists => "resource_exists",
            RetryTag::GuestNoAddress => "guest_no_address",
            RetryTag::GuestDeviceChanging => "guest_device_changing",
            RetryTag::AgentNotReady => "agent_not_ready",
            RetryTag::ConsoleNotReady => "console_not_ready",
            RetryTag::ProcessRunning => "process_running",
            RetryTag::PingLoss => "ping_loss",
        };
        f.write_str(name)
    }
}

/// 能给出重试标签的错误
pub trait Retryable {
    /// 返回 `None` 表示该错误不可重试
    fn retry_tag(&self) -> Option<RetryTag>;
}

/// 重试失败
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("等待超时 (耗时 {elapsed:?}, 尝试 {attempts} 次): {}", .last.as_deref().unwrap_or("条件未满足"))]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        /// 最后一次可重试错误的描述
        last: Option<String>,
    },

    #[error("等待被取消")]
    Cancelled,

    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }
}

/// 单次探测的结果
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// 条件满足
    Done(T),
    /// 继续轮询
    Pending(String),
    /// 立即终止
    Abort(E),
}

/// 通用轮询循环, [`retry`] 与 [`retry_with_errors`] 都基于它实现
pub async fn poll_until<T, E, F, Fut>(
    condition: &RetryCondition,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        match probe().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(e) => return Err(RetryError::Aborted(e)),
            Attempt::Pending(reason) => {
                debug!("第 {} 次探测未满足: {}", attempts, reason);
                last = Some(reason);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= condition.timeout {
            return Err(RetryError::Timeout {
                elapsed,
                attempts,
                last,
            });
        }

        let wait = condition
            .interval(attempts - 1)
            .min(condition.timeout - elapsed);

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// 轮询直到 `probe` 返回 `true`
pub async fn retry<F, Fut>(
    condition: &RetryCondition,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), RetryError<std::convert::Infallible>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(condition, cancel, || {
        let fut = probe();
        async move {
            if fut.await {
                Attempt::Done(())
            } else {
                Attempt::Pending("条件未满足".to_string())
            }
        }
    })
    .await
}

/// 轮询直到 `probe` 成功
///
/// 错误标签在 `retryable` 中时继续轮询，其他错误立即返回。
pub async fn retry_with_errors<T, E, F, Fut>(
    condition: &RetryCondition,
    retryable: &[RetryTag],
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    poll_until(condition, cancel, || {
        let fut = probe();
        async move {
            match fut.await {
                Ok(value) => Attempt::Done(value),
                Err(e) => match e.retry_tag() {
                    Some(tag) if retryable.contains(&tag) => {
                        Attempt::Pending(format!("[{}] {}", tag, e))
                    }
                    _ => Attempt::Abort(e),
                },
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct ProbeError(Option<RetryTag>);

    impl Display for ProbeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "probe error {:?}", self.0)
        }
    }

    impl Retryable for ProbeError {
        fn retry_tag(&self) -> Option<RetryTag> {
            self.0
        }
    }

    fn condition(timeout: u64, min: u64, max: u64, step: u64) -> RetryCondition {
        RetryCondition::new(
            Duration::from_secs(timeout),
            Duration::from_secs(min),
            Duration::from_secs(max),
            Duration::from_secs(step),
        )
    }

    #[test]
    fn test_interval_grows_linearly_and_caps() {
        let cond = condition(60, 1, 10, 1);
        assert_eq!(cond.interval(0), Duration::from_secs(1));
        assert_eq!(cond.interval(4), Duration::from_secs(5));
        assert_eq!(cond.interval(9), Duration::from_secs(10));
        assert_eq!(cond.interval(500), Duration::from_secs(10));
    }

    #[test]
    fn test_interval_max_never_below_min() {
        let cond = condition(60, 5, 1, 0);
        assert_eq!(cond.interval_max, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_pending() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry(&condition(60, 1, 10, 1), &CancellationToken::new(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { n >= 3 }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout_bounds() {
        let cond = condition(30, 1, 7, 2);
        let started = Instant::now();
        let result = retry(&cond, &CancellationToken::new(), || async { false }).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(RetryError::Timeout { .. })));
        assert!(elapsed >= cond.timeout);
        assert!(elapsed <= cond.timeout + cond.interval_max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout_bounds_with_large_interval() {
        // 间隔远大于超时
        let cond = condition(5, 20, 20, 0);
        let started = Instant::now();
        let result = retry(&cond, &CancellationToken::new(), || async { false }).await;
        let elapsed = started.elapsed();

        assert!(result.unwrap_err().is_timeout());
        assert!(elapsed >= cond.timeout);
        assert!(elapsed <= cond.timeout + cond.interval_max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_tag_keeps_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, _> = retry_with_errors(
            &condition(60, 1, 1, 0),
            &[RetryTag::GuestNoAddress],
            &CancellationToken::new(),
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProbeError(Some(RetryTag::GuestNoAddress)))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untagged_error_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();
        let result: Result<(), _> = retry_with_errors(
            &condition(60, 1, 1, 0),
            &[RetryTag::GuestNoAddress],
            &CancellationToken::new(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProbeError(None)) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted(ProbeError(None)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_outside_set_aborts() {
        let result: Result<(), _> = retry_with_errors(
            &condition(60, 1, 1, 0),
            &[RetryTag::GuestNoAddress],
            &CancellationToken::new(),
            || async { Err(ProbeError(Some(RetryTag::PingLoss))) },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_last_reason() {
        let result: Result<(), _> = retry_with_errors(
            &condition(10, 1, 1, 0),
            &[RetryTag::PingLoss],
            &CancellationToken::new(),
            || async { Err(ProbeError(Some(RetryTag::PingLoss))) },
        )
        .await;

        match result {
            Err(RetryError::Timeout { last, attempts, .. }) => {
                assert!(last.unwrap().contains("ping_loss"));
                assert!(attempts >= 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = retry(&condition(600, 100, 100, 0), &cancel, || async { false }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(100));
    }
}

//! 并发执行一组任务
//!
//! 固定数量的 worker 从共享队列取任务, 每个任务在独立的 tokio 任务中执行,
//! 单个任务 panic 只影响它自己的结果。取消后 worker 不再领取新任务,
//! 未领取的任务结果为 [`ItemOutcome::NotStarted`]。

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use atp_common::CancellationToken;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::Result;

/// 单个任务的结果, 与输入顺序一一对应
#[derive(Debug)]
pub enum ItemOutcome<T> {
    Done(T),
    Failed(String),
    Panicked(String),
    NotStarted,
}

impl<T> ItemOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, ItemOutcome::Done(_))
    }
}

/// 进度显示
pub trait Progress: Send + Sync {
    fn set_total(&self, total: u64);
    fn inc(&self);
    fn finish(&self);
}

pub struct TaskGroup {
    workers: usize,
    cancel: CancellationToken,
    progress: Option<Arc<dyn Progress>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

impl TaskGroup {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 以 `min(workers, items.len())` 个 worker 执行 `f(index, item)`
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, f: F) -> Vec<ItemOutcome<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        if let Some(progress) = &self.progress {
            progress.set_total(total as u64);
        }

        let (tx, rx) = async_channel::bounded(total);
        for entry in items.into_iter().enumerate() {
            // 容量等于任务数, 不会失败
            let _ = tx.try_send(entry);
        }
        tx.close();

        let results: Arc<Mutex<Vec<ItemOutcome<T>>>> =
            Arc::new(Mutex::new((0..total).map(|_| ItemOutcome::NotStarted).collect()));
        let f = Arc::new(f);
        let workers = self.workers.min(total);
        debug!("启动 {} 个 worker 执行 {} 个任务", workers, total);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let rx = rx.clone();
                let f = f.clone();
                let results = results.clone();
                let cancel = self.cancel.clone();
                let progress = self.progress.clone();
                tokio::spawn(async move {
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            next = rx.recv() => next,
                        };
                        let Ok((index, item)) = next else {
                            break;
                        };

                        let outcome = match tokio::spawn(f(index, item)).await {
                            Ok(Ok(value)) => ItemOutcome::Done(value),
                            Ok(Err(e)) => ItemOutcome::Failed(e.to_string()),
                            Err(e) if e.is_panic() => {
                                let message = panic_message(e.into_panic());
                                warn!("worker {} 任务 {} panic: {}", worker, index, message);
                                ItemOutcome::Panicked(message)
                            }
                            Err(e) => ItemOutcome::Failed(e.to_string()),
                        };
                        results.lock().unwrap_or_else(PoisonError::into_inner)[index] = outcome;
                        if let Some(progress) = &progress {
                            progress.inc();
                        }
                    }
                })
            })
            .collect();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!("worker 异常退出: {}", e);
            }
        }
        if let Some(progress) = &self.progress {
            progress.finish();
        }

        let mut guard = results.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }
}

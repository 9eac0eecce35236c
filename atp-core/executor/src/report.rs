//! 测试任务与用例报告

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::action::{ActionOutcome, ActionStatus};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    /// 有跳过或未能完全验证的动作, 没有失败
    Warning,
    Failed,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Warning | TaskState::Failed)
    }
}

/// 一台云主机上的动作序列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestTask {
    pub id: Uuid,
    pub server_id: String,
    pub server_name: String,
    pub state: TaskState,
    /// 已执行 (含跳过) 的动作数
    pub total: usize,
    pub success: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// 成功但有视角未能验证的动作
    pub unverified: Vec<String>,
    pub message: Option<String>,
    /// 最后一个失败动作的错误
    pub error: Option<String>,
    pub outcomes: Vec<ActionOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestTask {
    pub fn new(server_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id: server_id.into(),
            server_name: server_name.into(),
            state: TaskState::Pending,
            total: 0,
            success: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            unverified: Vec::new(),
            message: None,
            error: None,
            outcomes: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn record(&mut self, outcome: &ActionOutcome) {
        self.total += 1;
        match &outcome.status {
            ActionStatus::Success => {
                self.success.push(outcome.name.clone());
                if !outcome.unverified.is_empty() {
                    self.unverified.push(outcome.name.clone());
                }
            }
            ActionStatus::Skipped(_) => self.skipped.push(outcome.name.clone()),
            ActionStatus::Failed(e) => {
                self.failed.push(outcome.name.clone());
                self.error = Some(format!("{}: {}", outcome.name, e));
            }
        }
        self.outcomes.push(outcome.clone());
    }

    /// 任务在执行动作之前就失败 (获取或创建云主机失败等)
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.finalize();
    }

    /// 计算终态
    pub fn finalize(&mut self) {
        self.state = if !self.failed.is_empty() || self.error.is_some() {
            TaskState::Failed
        } else if !self.skipped.is_empty() || !self.unverified.is_empty() {
            TaskState::Warning
        } else {
            TaskState::Success
        };
        self.message = Some(format!(
            "成功 {}, 跳过 {}, 失败 {}, 未验证 {}",
            self.success.len(),
            self.skipped.len(),
            self.failed.len(),
            self.unverified.len()
        ));
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub total: usize,
    pub success: usize,
    pub warning: usize,
    pub failed: usize,
}

impl CaseSummary {
    pub fn from_tasks(tasks: &[TestTask]) -> Self {
        let mut summary = CaseSummary {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.state {
                TaskState::Success => summary.success += 1,
                TaskState::Warning => summary.warning += 1,
                // 未结束的任务按失败计
                TaskState::Failed | TaskState::Pending | TaskState::Running => summary.failed += 1,
            }
        }
        summary
    }
}

/// 用例报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub actions: String,
    pub workers: usize,
    pub duration_ms: u64,
    pub summary: CaseSummary,
    pub tasks: Vec<TestTask>,
}

impl CaseReport {
    pub fn new(name: &str, actions: String, workers: usize, duration_ms: u64, tasks: Vec<TestTask>) -> Self {
        Self {
            name: name.to_string(),
            actions,
            workers,
            duration_ms,
            summary: CaseSummary::from_tasks(&tasks),
            tasks,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

/// 用例运行期间的任务列表
///
/// 每次更新递增版本号, 供长轮询接口等待变化。
#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<Mutex<Vec<TestTask>>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
            version: Arc::new(version),
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    pub fn add(&self, task: TestTask) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        self.bump();
    }

    /// 按 id 替换任务
    pub fn update(&self, task: &TestTask) {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        }
        self.bump();
    }

    pub fn snapshot(&self) -> Vec<TestTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// 等待版本号超过 `since`, 最多等待 `timeout`; 返回当前版本和任务列表
    pub async fn wait_changed(&self, since: u64, timeout: Duration) -> (u64, Vec<TestTask>) {
        let mut rx = self.version.subscribe();
        let _ = tokio::time::timeout(timeout, rx.wait_for(|v| *v > since)).await;
        (self.version(), self.snapshot())
    }
}

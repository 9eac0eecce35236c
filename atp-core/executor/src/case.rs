//! 测试用例
//!
//! 一个用例 = 动作序列 + 目标云主机 + 并发数。不同云主机并发执行,
//! 同一云主机上的动作按顺序执行。

use std::sync::Arc;
use std::time::{Duration, Instant};

use atp_cloudplatform::{
    BlockDeviceMapping, ControlPlane, CreateServerRequest, NetworkRef, SecurityGroupRef, Server,
};
use atp_common::CancellationToken;
use atp_protocol::GuestConnector;
use tracing::{info, info_span, warn, Instrument};

use crate::action::{run_action, ActionRegistry};
use crate::action_count::ActionCountList;
use crate::config::{FailureStrategy, TargetConfig};
use crate::context::ServerActionTest;
use crate::report::{CaseReport, TaskStore, TestTask};
use crate::task_group::{ItemOutcome, Progress, TaskGroup};
use crate::waiter;
use crate::{ExecutorError, Result};

/// 被测云主机来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPopulation {
    /// 已有云主机 id
    Existing(Vec<String>),
    /// 按配置新建 N 台
    Create(usize),
}

impl TargetPopulation {
    pub fn len(&self) -> usize {
        match self {
            TargetPopulation::Existing(ids) => ids.len(),
            TargetPopulation::Create(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub actions: ActionCountList,
    pub population: TargetPopulation,
    pub workers: usize,
}

#[derive(Debug, Clone)]
enum Target {
    Existing(String),
    Create(usize),
}

/// 单个 worker 需要的全部依赖
struct TargetRunner {
    client: Arc<dyn ControlPlane>,
    guest: Option<Arc<dyn GuestConnector>>,
    registry: Arc<ActionRegistry>,
    config: Arc<TargetConfig>,
    cancel: CancellationToken,
    store: TaskStore,
    actions: ActionCountList,
    case_name: String,
}

pub struct CaseRunner {
    client: Arc<dyn ControlPlane>,
    guest: Option<Arc<dyn GuestConnector>>,
    registry: Arc<ActionRegistry>,
    config: Arc<TargetConfig>,
    cancel: CancellationToken,
    store: TaskStore,
    progress: Option<Arc<dyn Progress>>,
}

impl CaseRunner {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        guest: Option<Arc<dyn GuestConnector>>,
        registry: Arc<ActionRegistry>,
        config: Arc<TargetConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            guest,
            registry,
            config,
            cancel,
            store: TaskStore::new(),
            progress: None,
        }
    }

    /// 与 web 接口共享任务列表
    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// 在创建任何资源之前检查配置与动作序列
    pub fn validate(&self, case: &Case) -> Result<()> {
        self.config.validate()?;
        if case.workers == 0 {
            return Err(ExecutorError::Config("并发数必须大于 0".to_string()));
        }
        if case.population.is_empty() {
            return Err(ExecutorError::Config("没有指定被测云主机".to_string()));
        }
        if matches!(case.population, TargetPopulation::Create(_)) {
            self.config.validate_for_create()?;
        }
        self.registry.validate(&case.actions, &self.config)
    }

    pub async fn run(&self, case: &Case) -> Result<CaseReport> {
        self.validate(case)?;
        let started = Instant::now();
        info!(
            "用例 {} 开始: 动作 {} (共 {} 个), 云主机 {} 台, 并发 {}",
            case.name,
            case.actions,
            case.actions.total(),
            case.population.len(),
            case.workers
        );

        let targets: Vec<Target> = match &case.population {
            TargetPopulation::Existing(ids) => ids.iter().cloned().map(Target::Existing).collect(),
            TargetPopulation::Create(n) => (0..*n).map(Target::Create).collect(),
        };
        let tasks: Vec<TestTask> = targets
            .iter()
            .map(|target| match target {
                Target::Existing(id) => TestTask::new(id.clone(), ""),
                Target::Create(_) => TestTask::new("", ""),
            })
            .collect();
        for task in &tasks {
            self.store.add(task.clone());
        }

        let runner = Arc::new(TargetRunner {
            client: self.client.clone(),
            guest: self.guest.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            store: self.store.clone(),
            actions: case.actions.clone(),
            case_name: case.name.clone(),
        });

        let mut group = TaskGroup::new(case.workers, self.cancel.clone());
        if let Some(progress) = &self.progress {
            group = group.with_progress(progress.clone());
        }
        let items: Vec<(Target, TestTask)> = targets.into_iter().zip(tasks.iter().cloned()).collect();
        let outcomes = group
            .run(items, move |_, (target, task)| {
                let runner = runner.clone();
                async move { Ok(runner.run_target(target, task).await) }
            })
            .await;

        let finished: Vec<TestTask> = outcomes
            .into_iter()
            .zip(tasks)
            .map(|(outcome, mut task)| {
                match outcome {
                    ItemOutcome::Done(done) => return done,
                    ItemOutcome::Failed(e) => task.fail(e),
                    ItemOutcome::Panicked(e) => task.fail(format!("任务异常: {}", e)),
                    ItemOutcome::NotStarted => task.fail("用例已取消, 未开始执行"),
                }
                self.store.update(&task);
                task
            })
            .collect();

        let report = CaseReport::new(
            &case.name,
            case.actions.format_actions(),
            case.workers,
            started.elapsed().as_millis() as u64,
            finished,
        );
        info!(
            "用例 {} 结束: 共 {} 台, 成功 {}, 警告 {}, 失败 {}",
            report.name,
            report.summary.total,
            report.summary.success,
            report.summary.warning,
            report.summary.failed
        );
        Ok(report)
    }
}

impl TargetRunner {
    async fn run_target(&self, target: Target, mut task: TestTask) -> TestTask {
        task.start();
        self.store.update(&task);

        let label = match &target {
            Target::Existing(id) => id.clone(),
            Target::Create(index) => format!("new-{}", index + 1),
        };
        let span = info_span!("target", server = %label);
        async move {
            let (server, created) = match self.acquire(&target).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!("获取云主机失败: {}", e);
                    task.fail(e.to_string());
                    self.store.update(&task);
                    return task;
                }
            };
            task.server_id = server.id.clone();
            task.server_name = server.name.clone();
            self.store.update(&task);

            let mut ctx = ServerActionTest::new(
                server,
                self.client.clone(),
                self.guest.clone(),
                self.config.clone(),
                self.cancel.clone(),
            );
            self.run_actions(&mut ctx, &mut task).await;

            if created && self.config.cleanup {
                if let Err(e) = ctx.delete_server_and_wait(&task.server_id).await {
                    warn!("删除云主机 {} 失败: {}", task.server_id, e);
                    task.error = Some(format!("删除云主机失败: {}", e));
                }
            }

            task.finalize();
            self.store.update(&task);
            info!(
                "云主机 {} 测试结束: {:?} ({})",
                task.server_id,
                task.state,
                task.message.as_deref().unwrap_or("")
            );
            task
        }
        .instrument(span)
        .await
    }

    async fn run_actions(&self, ctx: &mut ServerActionTest, task: &mut TestTask) {
        let interval = Duration::from_secs(self.config.action_interval);
        for (i, name) in self.actions.actions().into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                task.error = Some("用例已取消".to_string());
                return;
            }
            if i > 0 && !interval.is_zero() && ctx.sleep(interval).await.is_err() {
                task.error = Some("用例已取消".to_string());
                return;
            }

            let Some(mut action) = self.registry.create(name) else {
                task.error = Some(format!("未知动作: {}", name));
                return;
            };
            let outcome = run_action(action.as_mut(), ctx).await;
            task.record(&outcome);
            self.store.update(task);

            if outcome.is_failed() && self.config.on_failure == FailureStrategy::StopTarget {
                warn!("动作 {} 失败, 停止该云主机后续动作", name);
                return;
            }
        }
    }

    /// 获取已有云主机, 或按配置新建一台并等待其可用
    async fn acquire(&self, target: &Target) -> Result<(Server, bool)> {
        match target {
            Target::Existing(id) => Ok((self.client.get_server(id).await?, false)),
            Target::Create(index) => {
                let req = self.create_request(*index)?;
                info!("新建云主机 {} (规格 {}, 网络 {:?})", req.name, req.flavor_ref, req.networks);
                let server = self.client.create_server(&req).await?;

                let condition = self.config.task_condition();
                match waiter::wait_server_task_done(self.client.as_ref(), &server.id, &condition, &self.cancel)
                    .await
                    .and_then(ensure_active)
                {
                    Ok(server) => Ok((server, true)),
                    Err(e) => {
                        if self.config.cleanup {
                            self.discard(&server.id).await;
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    fn create_request(&self, index: usize) -> Result<CreateServerRequest> {
        let config = &self.config;
        let pick = |pool: &[String], what: &str| {
            if pool.is_empty() {
                return Err(ExecutorError::Config(format!("未配置可用{}", what)));
            }
            Ok(pool[index % pool.len()].clone())
        };
        let image = pick(&config.images, "镜像")?;
        let flavor = pick(&config.flavors, "规格")?;
        let network = pick(&config.networks, "网络")?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let mut req = CreateServerRequest {
            name: format!("{}{}-{}-{}", config.name_prefix, self.case_name, index + 1, &suffix[..6]),
            flavor_ref: flavor,
            networks: vec![NetworkRef::network(network)],
            availability_zone: config.availability_zone.clone(),
            security_groups: config
                .security_group
                .iter()
                .map(|name| SecurityGroupRef { name: name.clone() })
                .collect(),
            ..Default::default()
        };
        if config.boot_from_volume {
            req.block_device_mapping_v2 = vec![BlockDeviceMapping {
                boot_index: 0,
                uuid: image,
                source_type: "image".to_string(),
                destination_type: "volume".to_string(),
                volume_size: config.boot_volume_size,
                volume_type: config.volume_type.clone(),
                delete_on_termination: true,
            }];
        } else {
            req.image_ref = Some(image);
        }
        Ok(req)
    }

    /// 新建失败的云主机尽力删除
    async fn discard(&self, server_id: &str) {
        let teardown = CancellationToken::new();
        if let Err(e) = self.client.delete_server(server_id).await {
            warn!("删除云主机 {} 失败: {}", server_id, e);
            return;
        }
        let condition = self.config.teardown_condition();
        if let Err(e) = waiter::wait_server_deleted(self.client.as_ref(), server_id, &condition, &teardown).await {
            warn!("等待云主机 {} 删除失败: {}", server_id, e);
        }
    }
}

fn ensure_active(server: Server) -> Result<Server> {
    if server.is_active() {
        Ok(server)
    } else {
        Err(ExecutorError::ServerError {
            id: server.id.clone(),
            message: format!("新建后状态为 {}", server.status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCloud;
    use crate::report::TaskState;
    use atp_cloudplatform::ServerStatus;

    fn runner(cloud: &Arc<FakeCloud>, config: TargetConfig) -> CaseRunner {
        CaseRunner::new(
            cloud.clone(),
            None,
            Arc::new(ActionRegistry::builtin()),
            Arc::new(config),
            CancellationToken::new(),
        )
    }

    fn case(actions: &str, population: TargetPopulation) -> Case {
        Case {
            name: "smoke".to_string(),
            actions: actions.parse().unwrap(),
            population,
            workers: 2,
        }
    }

    fn pools() -> TargetConfig {
        TargetConfig {
            images: vec!["img-1".into()],
            flavors: vec!["m1.small".into()],
            networks: vec!["net-a".into()],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_targets_all_pass() {
        let cloud = Arc::new(FakeCloud::new());
        let a = cloud.add_server("vm-a", ServerStatus::Active);
        let b = cloud.add_server("vm-b", ServerStatus::Active);

        let report = runner(&cloud, TargetConfig::default())
            .run(&case("reboot,stop,start", TargetPopulation::Existing(vec![a.clone(), b])))
            .await
            .unwrap();
        assert_eq!(report.summary.success, 2);
        assert!(!report.has_failures());
        assert_eq!(report.actions, "reboot,stop,start");
        let task = report.tasks.iter().find(|t| t.server_id == a).unwrap();
        assert_eq!(task.success, vec!["reboot", "stop", "start"]);
        assert_eq!(task.server_name, "vm-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_give_warning() {
        let cloud = Arc::new(FakeCloud::new());
        let id = cloud.add_server("vm", ServerStatus::Active);

        let report = runner(&cloud, TargetConfig::default())
            .run(&case("unpause,nop", TargetPopulation::Existing(vec![id])))
            .await
            .unwrap();
        assert_eq!(report.tasks[0].state, TaskState::Warning);
        assert_eq!(report.tasks[0].skipped, vec!["unpause"]);
        assert_eq!(report.summary.warning, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_errors_before_creating_anything() {
        let cloud = Arc::new(FakeCloud::new());

        let err = runner(&cloud, pools())
            .run(&case("reboot,fly", TargetPopulation::Create(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)));

        let err = runner(&cloud, TargetConfig::default())
            .run(&case("reboot", TargetPopulation::Create(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)));
        assert!(cloud.calls_matching("create_server").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_targets_are_cleaned_up() {
        let cloud = Arc::new(FakeCloud::new());

        let report = runner(&cloud, pools())
            .run(&case("reboot", TargetPopulation::Create(3)))
            .await
            .unwrap();
        assert_eq!(report.summary.success, 3);
        assert_eq!(cloud.calls_matching("create_server").len(), 3);
        assert_eq!(cloud.calls_matching("delete_server").len(), 3);
        assert_eq!(cloud.server_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_from_volume_targets() {
        let cloud = Arc::new(FakeCloud::new());
        let config = TargetConfig {
            boot_from_volume: true,
            cleanup: false,
            ..pools()
        };

        let report = runner(&cloud, config)
            .run(&case("revert_system", TargetPopulation::Create(1)))
            .await
            .unwrap();
        assert_eq!(report.tasks[0].success, vec!["revert_system"]);
        assert_eq!(cloud.server_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_strategy() {
        let cloud = Arc::new(FakeCloud::new());
        let id = cloud.add_server("vm", ServerStatus::Active);
        cloud.set_migration_stuck(true);

        let report = runner(&cloud, TargetConfig::default())
            .run(&case("live_migrate,reboot", TargetPopulation::Existing(vec![id.clone()])))
            .await
            .unwrap();
        assert_eq!(report.tasks[0].failed, vec!["live_migrate"]);
        assert_eq!(report.tasks[0].success, vec!["reboot"]);

        let config = TargetConfig {
            on_failure: FailureStrategy::StopTarget,
            ..Default::default()
        };
        let report = runner(&cloud, config)
            .run(&case("live_migrate,reboot", TargetPopulation::Existing(vec![id])))
            .await
            .unwrap();
        assert_eq!(report.tasks[0].total, 1);
        assert_eq!(report.tasks[0].state, TaskState::Failed);
        assert!(report.has_failures());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_target_fails_only_itself() {
        let cloud = Arc::new(FakeCloud::new());
        let id = cloud.add_server("vm", ServerStatus::Active);

        let report = runner(&cloud, TargetConfig::default())
            .run(&case("reboot", TargetPopulation::Existing(vec!["missing".into(), id])))
            .await
            .unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.success, 1);
        assert!(report.tasks[0].error.as_deref().unwrap().contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_case_marks_targets_failed() {
        let cloud = Arc::new(FakeCloud::new());
        let id = cloud.add_server("vm", ServerStatus::Active);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = CaseRunner::new(
            cloud.clone(),
            None,
            Arc::new(ActionRegistry::builtin()),
            Arc::new(TargetConfig::default()),
            cancel,
        );

        let report = runner
            .run(&case("reboot", TargetPopulation::Existing(vec![id])))
            .await
            .unwrap();
        assert_eq!(report.tasks[0].state, TaskState::Failed);
        assert!(cloud.calls_matching("reboot_server").is_empty());
        assert_eq!(runner.store().snapshot()[0].state, TaskState::Failed);
    }
}

//! 单台云主机的测试上下文

use std::sync::Arc;
use std::time::Duration;

use atp_cloudplatform::{ControlPlane, Server};
use atp_common::CancellationToken;
use atp_protocol::GuestConnector;
use tracing::warn;

use crate::checker::{ApiChecker, CheckReport, GuestChecker, ServerChecker, ServerCheckers};
use crate::config::TargetConfig;
use crate::waiter;
use crate::{ExecutorError, Result};

/// 一台被测云主机及其依赖
///
/// 由执行它的 worker 独占; 动作通过 `&mut ServerActionTest` 读写云主机缓存。
pub struct ServerActionTest {
    /// 最近一次读取到的云主机详情
    pub server: Server,
    pub client: Arc<dyn ControlPlane>,
    pub guest: Option<Arc<dyn GuestConnector>>,
    pub config: Arc<TargetConfig>,
    /// 整个用例的取消信号
    pub cancel: CancellationToken,
    /// 清理阶段使用, 不会被取消
    teardown: CancellationToken,
    network_cursor: usize,
    image_cursor: usize,
    flavor_cursor: usize,
    rename_seq: u32,
    unverified: Vec<String>,
}

impl ServerActionTest {
    pub fn new(
        server: Server,
        client: Arc<dyn ControlPlane>,
        guest: Option<Arc<dyn GuestConnector>>,
        config: Arc<TargetConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server,
            client,
            guest,
            config,
            cancel,
            teardown: CancellationToken::new(),
            network_cursor: 0,
            image_cursor: 0,
            flavor_cursor: 0,
            rename_seq: 0,
            unverified: Vec::new(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server.id
    }

    /// 清理阶段使用的取消信号
    pub fn teardown_token(&self) -> &CancellationToken {
        &self.teardown
    }

    /// guest 检查是否启用且有连接器
    pub fn guest_enabled(&self) -> bool {
        self.config.guest.enabled && self.guest.is_some()
    }

    pub async fn refresh(&mut self) -> Result<&Server> {
        self.server = self.client.get_server(&self.server.id).await?;
        Ok(&self.server)
    }

    /// 轮流选取网络
    pub fn next_network(&mut self) -> Result<String> {
        self.config.require_networks()?;
        let network = self.config.networks[self.network_cursor % self.config.networks.len()].clone();
        self.network_cursor += 1;
        Ok(network)
    }

    /// 轮流选取镜像
    pub fn next_image(&mut self) -> Result<String> {
        self.config.require_images()?;
        let image = self.config.images[self.image_cursor % self.config.images.len()].clone();
        self.image_cursor += 1;
        Ok(image)
    }

    /// 轮流选取与当前不同的规格
    pub fn next_flavor(&mut self) -> Option<String> {
        let candidates: Vec<&String> = self
            .config
            .flavors
            .iter()
            .filter(|f| !self.server.flavor.matches(f))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let flavor = candidates[self.flavor_cursor % candidates.len()].clone();
        self.flavor_cursor += 1;
        Some(flavor)
    }

    pub fn next_rename_seq(&mut self) -> u32 {
        self.rename_seq += 1;
        self.rename_seq
    }

    /// 以 `name_prefix` 开头的资源由本工具创建
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.config.name_prefix)
    }

    /// 新建资源的名称: `<前缀><类型>-<随机后缀>`
    pub fn resource_name(&self, kind: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}-{}", self.config.name_prefix, kind, &suffix[..8])
    }

    /// 当前启用的检查视角: API 在前, guest 在后
    pub fn checkers(&self) -> ServerCheckers {
        let mut checkers: Vec<Box<dyn ServerChecker>> = vec![Box::new(ApiChecker::new(
            self.client.clone(),
            self.config.task_condition(),
            self.cancel.clone(),
        ))];
        if let (true, Some(connector)) = (self.config.guest.enabled, &self.guest) {
            checkers.push(Box::new(GuestChecker::new(
                connector.clone(),
                self.config.clone(),
                self.cancel.clone(),
            )));
        }
        ServerCheckers::new(checkers)
    }

    /// 等待当前云主机任务结束并刷新缓存
    pub async fn wait_task_done(&mut self) -> Result<&Server> {
        let condition = self.config.task_condition();
        self.server =
            waiter::wait_server_task_done(self.client.as_ref(), &self.server.id, &condition, &self.cancel)
                .await?;
        Ok(&self.server)
    }

    /// 记录某些视角未能验证
    pub fn record(&mut self, report: CheckReport) {
        self.unverified.extend(report.not_applicable);
    }

    pub async fn assert_active(&mut self) -> Result<()> {
        let report = self.checkers().makesure_active(&self.server).await?;
        self.record(report);
        Ok(())
    }

    pub async fn assert_stopped(&mut self) -> Result<()> {
        let report = self.checkers().makesure_stopped(&self.server).await?;
        self.record(report);
        Ok(())
    }

    /// 只经控制面确认的状态 (暂停、挂起、搁置……)
    pub fn expect_status(&self, ok: impl Fn(&Server) -> bool, expected: &str) -> Result<()> {
        if !ok(&self.server) {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 状态为 {}, 期望 {}",
                self.server.id, self.server.status, expected
            )));
        }
        Ok(())
    }

    /// 可被取消的等待
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ExecutorError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// 取出本次动作中未能验证的视角
    pub fn take_unverified(&mut self) -> Vec<String> {
        std::mem::take(&mut self.unverified)
    }

    /// 清理阶段删除云主机并等待完成
    pub async fn delete_server_and_wait(&self, server_id: &str) -> Result<()> {
        match self.client.delete_server(server_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let condition = self.config.teardown_condition();
        if let Err(e) =
            waiter::wait_server_deleted(self.client.as_ref(), server_id, &condition, &self.teardown).await
        {
            warn!("等待云主机 {} 删除失败: {}", server_id, e);
            return Err(e);
        }
        Ok(())
    }
}

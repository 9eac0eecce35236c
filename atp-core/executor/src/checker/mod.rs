//! 状态检查
//!
//! 每个 [`ServerChecker`] 代表一个观察视角 (控制面 API、guest agent)。
//! [`ServerCheckers`] 按顺序执行全部视角, 任一视角失败即返回该失败;
//! 无法判断的视角返回 [`CheckStatus::NotApplicable`], 由调用方记为"未验证"。

mod api;
mod guest;

pub use api::ApiChecker;
pub use guest::GuestChecker;

use async_trait::async_trait;
use atp_cloudplatform::{InterfaceAttachment, Server};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::Result;

/// 单个视角的检查结果 (失败通过 `Err` 返回)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    /// 该视角无法判断 (例如云主机已关机, guest agent 不可用)
    NotApplicable(String),
}

#[async_trait]
pub trait ServerChecker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn makesure_active(&self, server: &Server) -> Result<CheckStatus>;

    async fn makesure_stopped(&self, server: &Server) -> Result<CheckStatus>;

    async fn makesure_interface_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus>;

    async fn makesure_interface_not_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckStatus>;

    async fn makesure_volume_exist(&self, server: &Server, volume_id: &str) -> Result<CheckStatus>;

    async fn makesure_volume_not_exist(&self, server: &Server, volume_id: &str)
        -> Result<CheckStatus>;

    /// 云盘容量为 `size_gb`
    async fn makesure_volume_size(
        &self,
        server: &Server,
        volume_id: &str,
        size_gb: u64,
    ) -> Result<CheckStatus>;

    async fn makesure_hostname(&self, server: &Server, expected: &str) -> Result<CheckStatus>;
}

/// 组合检查的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// 通过检查的视角
    pub verified: Vec<String>,
    /// 无法判断的视角及原因, 形如 `guest: 云主机未运行`
    pub not_applicable: Vec<String>,
}

impl CheckReport {
    pub fn is_fully_verified(&self) -> bool {
        self.not_applicable.is_empty()
    }
}

/// 按顺序组合多个视角
pub struct ServerCheckers {
    checkers: Vec<Box<dyn ServerChecker>>,
}

impl ServerCheckers {
    pub fn new(checkers: Vec<Box<dyn ServerChecker>>) -> Self {
        Self { checkers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }

    async fn run<'a, F>(&'a self, what: &str, check: F) -> Result<CheckReport>
    where
        F: Fn(&'a dyn ServerChecker) -> BoxFuture<'a, Result<CheckStatus>>,
    {
        let mut report = CheckReport::default();

        for checker in &self.checkers {
            match check(checker.as_ref()).await {
                Ok(CheckStatus::Passed) => {
                    debug!("[{}] {} 检查通过", checker.name(), what);
                    report.verified.push(checker.name().to_string());
                }
                Ok(CheckStatus::NotApplicable(reason)) => {
                    warn!("[{}] {} 无法检查: {}", checker.name(), what, reason);
                    report
                        .not_applicable
                        .push(format!("{}: {}", checker.name(), reason));
                }
                Err(e) => {
                    error!("[{}] {} 检查失败: {}", checker.name(), what, e);
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    pub async fn makesure_active(&self, server: &Server) -> Result<CheckReport> {
        self.run("运行状态", |c| c.makesure_active(server)).await
    }

    pub async fn makesure_stopped(&self, server: &Server) -> Result<CheckReport> {
        self.run("关机状态", |c| c.makesure_stopped(server)).await
    }

    pub async fn makesure_interface_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckReport> {
        self.run("网卡存在", |c| c.makesure_interface_exist(server, iface))
            .await
    }

    pub async fn makesure_interface_not_exist(
        &self,
        server: &Server,
        iface: &InterfaceAttachment,
    ) -> Result<CheckReport> {
        self.run("网卡移除", |c| c.makesure_interface_not_exist(server, iface))
            .await
    }

    pub async fn makesure_volume_exist(&self, server: &Server, volume_id: &str) -> Result<CheckReport> {
        self.run("云盘挂载", |c| c.makesure_volume_exist(server, volume_id))
            .await
    }

    pub async fn makesure_volume_not_exist(
        &self,
        server: &Server,
        volume_id: &str,
    ) -> Result<CheckReport> {
        self.run("云盘卸载", |c| c.makesure_volume_not_exist(server, volume_id))
            .await
    }

    pub async fn makesure_volume_size(
        &self,
        server: &Server,
        volume_id: &str,
        size_gb: u64,
    ) -> Result<CheckReport> {
        self.run("云盘容量", |c| c.makesure_volume_size(server, volume_id, size_gb))
            .await
    }

    pub async fn makesure_hostname(&self, server: &Server, expected: &str) -> Result<CheckReport> {
        self.run("主机名", |c| c.makesure_hostname(server, expected))
            .await
    }
}

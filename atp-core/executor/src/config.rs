//! 测试目标配置
//!
//! 对应配置文件中的 `[server_actions]`、`[server_actions.guest]`、
//! `[server_actions.live_migrate]` 三节。所有字段都有默认值,
//! 在一次运行中只读, 由所有并发的 [`ServerActionTest`](crate::ServerActionTest) 共享。

use std::time::Duration;

use atp_common::RetryCondition;
use atp_protocol::QgaConfig;
use serde::{Deserialize, Serialize};

use crate::{ExecutorError, Result};

/// 失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// 继续执行该云主机后续动作 (默认)
    #[default]
    Continue,
    /// 停止该云主机后续动作
    StopTarget,
}

/// 测试目标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// 可选镜像 (id)
    #[serde(default)]
    pub images: Vec<String>,

    /// 可选规格 (id 或名称)
    #[serde(default)]
    pub flavors: Vec<String>,

    /// 可选网络 (id), 新建网卡时轮流使用
    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default)]
    pub security_group: Option<String>,

    #[serde(default)]
    pub availability_zone: Option<String>,

    /// 新建资源的名称前缀
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// 新建云主机是否从云盘启动
    #[serde(default)]
    pub boot_from_volume: bool,

    /// 启动盘容量 (GB)
    #[serde(default = "default_boot_volume_size")]
    pub boot_volume_size: u64,

    /// 数据盘容量 (GB)
    #[serde(default = "default_volume_size")]
    pub volume_size: u64,

    #[serde(default)]
    pub volume_type: Option<String>,

    /// 网卡热插拔次数
    #[serde(default = "default_hotplug_times")]
    pub interface_hotplug_times: u32,

    /// 云盘热插拔次数
    #[serde(default = "default_hotplug_times")]
    pub volume_hotplug_times: u32,

    /// 并发数
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// 两个动作之间的间隔（秒）
    #[serde(default)]
    pub action_interval: u64,

    #[serde(default)]
    pub on_failure: FailureStrategy,

    /// 结束后删除新建的云主机
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,

    /// 等待任务完成的超时（秒）
    #[serde(default = "default_task_timeout")]
    pub task_timeout: u64,

    /// 轮询间隔（秒）
    #[serde(default = "default_interval_min")]
    pub interval_min: u64,

    #[serde(default = "default_interval_max")]
    pub interval_max: u64,

    #[serde(default = "default_interval_step")]
    pub interval_step: u64,

    /// 清理阶段单项等待的超时（秒）
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout: u64,

    #[serde(default)]
    pub guest: GuestConfig,

    #[serde(default)]
    pub live_migrate: LiveMigrateConfig,
}

/// Guest 视角检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub agent: QgaConfig,

    /// 等待 guest agent 可连接的超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// 等待新网卡获取地址的超时（秒）
    #[serde(default = "default_address_timeout")]
    pub address_timeout: u64,

    /// 等待 guest 内设备变化的超时（秒）
    #[serde(default = "default_device_timeout")]
    pub device_timeout: u64,
}

/// 热迁移 ping 检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveMigrateConfig {
    /// 等待探测机控制台出现登录提示的超时（秒）
    #[serde(default = "default_boot_banner_timeout")]
    pub boot_banner_timeout: u64,

    #[serde(default = "default_banner")]
    pub banner: String,

    /// 基线 ping 时长（秒）
    #[serde(default = "default_baseline_duration")]
    pub baseline_duration: u64,

    /// 基线 ping 重试的总超时（秒）
    #[serde(default = "default_baseline_timeout")]
    pub baseline_timeout: u64,

    /// ping 间隔（秒）
    #[serde(default = "default_ping_interval")]
    pub ping_interval: f64,

    /// 允许丢失的包数
    #[serde(default)]
    pub max_loss: u64,
}

fn default_name_prefix() -> String {
    "atp-".to_string()
}

fn default_boot_volume_size() -> u64 {
    10
}

fn default_volume_size() -> u64 {
    1
}

fn default_hotplug_times() -> u32 {
    5
}

fn default_workers() -> usize {
    1
}

fn default_cleanup() -> bool {
    true
}

fn default_task_timeout() -> u64 {
    1200
}

fn default_interval_min() -> u64 {
    1
}

fn default_interval_max() -> u64 {
    10
}

fn default_interval_step() -> u64 {
    1
}

fn default_teardown_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    300
}

fn default_address_timeout() -> u64 {
    300
}

fn default_device_timeout() -> u64 {
    120
}

fn default_boot_banner_timeout() -> u64 {
    600
}

fn default_banner() -> String {
    "login:".to_string()
}

fn default_baseline_duration() -> u64 {
    30
}

fn default_baseline_timeout() -> u64 {
    300
}

fn default_ping_interval() -> f64 {
    0.2
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            flavors: Vec::new(),
            networks: Vec::new(),
            security_group: None,
            availability_zone: None,
            name_prefix: default_name_prefix(),
            boot_from_volume: false,
            boot_volume_size: default_boot_volume_size(),
            volume_size: default_volume_size(),
            volume_type: None,
            interface_hotplug_times: default_hotplug_times(),
            volume_hotplug_times: default_hotplug_times(),
            workers: default_workers(),
            action_interval: 0,
            on_failure: FailureStrategy::default(),
            cleanup: default_cleanup(),
            task_timeout: default_task_timeout(),
            interval_min: default_interval_min(),
            interval_max: default_interval_max(),
            interval_step: default_interval_step(),
            teardown_timeout: default_teardown_timeout(),
            guest: GuestConfig::default(),
            live_migrate: LiveMigrateConfig::default(),
        }
    }
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agent: QgaConfig::default(),
            connect_timeout: default_connect_timeout(),
            address_timeout: default_address_timeout(),
            device_timeout: default_device_timeout(),
        }
    }
}

impl Default for LiveMigrateConfig {
    fn default() -> Self {
        Self {
            boot_banner_timeout: default_boot_banner_timeout(),
            banner: default_banner(),
            baseline_duration: default_baseline_duration(),
            baseline_timeout: default_baseline_timeout(),
            ping_interval: default_ping_interval(),
            max_loss: 0,
        }
    }
}

impl TargetConfig {
    /// 从 TOML 字符串加载 (即 `[server_actions]` 节的内容)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ExecutorError::Config(e.to_string()))
    }

    /// 指定超时, 间隔沿用配置
    pub fn condition(&self, timeout: Duration) -> RetryCondition {
        RetryCondition::new(
            timeout,
            Duration::from_secs(self.interval_min),
            Duration::from_secs(self.interval_max),
            Duration::from_secs(self.interval_step),
        )
    }

    /// 等待云主机/云盘任务完成
    pub fn task_condition(&self) -> RetryCondition {
        self.condition(Duration::from_secs(self.task_timeout))
    }

    /// 清理阶段的等待
    pub fn teardown_condition(&self) -> RetryCondition {
        self.condition(Duration::from_secs(self.teardown_timeout))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ExecutorError::Config("workers 必须大于 0".to_string()));
        }
        if self.interval_min == 0 && self.interval_step == 0 && self.interval_max == 0 {
            return Err(ExecutorError::Config("轮询间隔不能全部为 0".to_string()));
        }
        if self.live_migrate.ping_interval <= 0.0 {
            return Err(ExecutorError::Config("ping_interval 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 需要新建云主机时的检查
    pub fn validate_for_create(&self) -> Result<()> {
        self.require_images()?;
        self.require_flavors()?;
        self.require_networks()
    }

    pub fn require_images(&self) -> Result<()> {
        if self.images.is_empty() {
            return Err(ExecutorError::Config("未配置可用镜像 (images)".to_string()));
        }
        Ok(())
    }

    pub fn require_flavors(&self) -> Result<()> {
        if self.flavors.is_empty() {
            return Err(ExecutorError::Config("未配置可用规格 (flavors)".to_string()));
        }
        Ok(())
    }

    pub fn require_networks(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(ExecutorError::Config("未配置可用网络 (networks)".to_string()));
        }
        Ok(())
    }
}

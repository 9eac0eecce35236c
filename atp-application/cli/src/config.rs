//! CLI 配置管理
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `--config` 参数
//! 2. `ATP_CONFIG` 环境变量指定的路径
//! 3. `./atp.toml` (当前目录)
//! 4. `~/.config/atp/atp.toml` (用户配置目录)
//! 5. `/etc/atp/atp.toml` (系统配置目录)
//!
//! 加载后再用 `ATP_*` 环境变量覆盖登录信息和并发数。

use anyhow::{Context, Result};
use atp_cloudplatform::CloudConfig;
use atp_executor::TargetConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件顶层
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtpConfig {
    /// 云平台认证与端点
    #[serde(default)]
    pub cloud: CloudConfig,

    /// 云主机动作测试
    #[serde(default)]
    pub server_actions: TargetConfig,
}

impl AtpConfig {
    /// 按优先级加载配置, 返回配置和实际使用的文件
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        let mut config = match &path {
            Some(path) => {
                tracing::debug!("加载配置文件: {:?}", path);
                Self::load_from_file(path)?
            }
            None => {
                tracing::debug!("未找到配置文件, 使用默认值");
                Self::default()
            }
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok((config, path))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))
    }

    /// 查找配置文件
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("ATP_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut paths = vec![PathBuf::from("./atp.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/atp/atp.toml"));
        }
        #[cfg(target_os = "linux")]
        paths.push(PathBuf::from("/etc/atp/atp.toml"));

        paths.into_iter().find(|p| p.exists())
    }

    /// 用 `lookup` 提供的变量覆盖配置
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("ATP_AUTH_URL") {
            self.cloud.auth_url = url;
        }
        if let Some(username) = lookup("ATP_USERNAME") {
            self.cloud.username = username;
        }
        if let Some(password) = lookup("ATP_PASSWORD") {
            self.cloud.password = password;
        }
        if let Some(project) = lookup("ATP_PROJECT") {
            self.cloud.project_name = project;
        }
        if let Some(region) = lookup("ATP_REGION") {
            self.cloud.region = Some(region);
        }
        if let Some(workers) = lookup("ATP_WORKERS") {
            self.server_actions.workers = workers
                .parse()
                .with_context(|| format!("无效的 ATP_WORKERS: {}", workers))?;
        }
        Ok(())
    }

    /// 用于 `config show`, 隐藏密码
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.cloud.password.is_empty() {
            config.cloud.password = "******".to_string();
        }
        config
    }
}

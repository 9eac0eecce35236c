//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括：
//! - 云平台客户端创建和认证
//! - Guest Agent 连接器
//! - Ctrl-C 取消

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use atp_cloudplatform::{CloudClient, CloudConfig, ControlPlane};
use atp_common::CancellationToken;
use atp_protocol::{GuestConnector, QgaConnector};
use atp_executor::TargetConfig;
use colored::Colorize;
use tracing::{info, warn};

use crate::config::AtpConfig;

/// 加载配置并打印来源
pub fn load_config(path: Option<&Path>) -> Result<AtpConfig> {
    let (config, source) = AtpConfig::load(path)?;
    match source {
        Some(source) => info!("使用配置文件: {:?}", source),
        None => warn!("未找到配置文件, 使用默认配置"),
    }
    Ok(config)
}

/// 创建并认证云平台客户端
pub async fn connect_cloud(config: &CloudConfig) -> Result<Arc<dyn ControlPlane>> {
    if config.auth_url.is_empty() {
        anyhow::bail!("未配置云平台认证地址 ([cloud] auth_url 或 ATP_AUTH_URL)");
    }
    let client = CloudClient::connect(config.clone())
        .await
        .with_context(|| format!("云平台认证失败: {}", config.auth_url))?;
    info!("已连接云平台 {} (项目 {})", config.auth_url, config.project_name);
    Ok(Arc::new(client))
}

/// 启用 guest 检查时创建 QGA 连接器
pub fn guest_connector(config: &TargetConfig) -> Option<Arc<dyn GuestConnector>> {
    if !config.guest.enabled {
        return None;
    }
    Some(Arc::new(QgaConnector::new(config.guest.agent.clone())))
}

/// Ctrl-C 时取消返回的令牌
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} 收到中断信号, 正在停止并清理...", "!".yellow().bold());
            token.cancel();
        }
    });
    cancel
}

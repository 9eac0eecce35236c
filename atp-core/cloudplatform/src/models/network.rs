//! 网络模型

use serde::{Deserialize, Serialize};

use super::server::FixedIp;

/// 端口详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub network_id: String,

    #[serde(default)]
    pub mac_address: String,

    /// ACTIVE / DOWN / BUILD
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub device_id: String,

    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

/// 创建端口请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePortRequest {
    pub network_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
}

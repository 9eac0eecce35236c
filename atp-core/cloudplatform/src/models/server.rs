//! 云主机模型

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 云主机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Active,
    Build,
    Deleted,
    Error,
    HardReboot,
    Migrating,
    Paused,
    Reboot,
    Rebuild,
    Resize,
    Shelved,
    ShelvedOffloaded,
    Shutoff,
    Suspended,
    VerifyResize,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Active => "ACTIVE",
            ServerStatus::Build => "BUILD",
            ServerStatus::Deleted => "DELETED",
            ServerStatus::Error => "ERROR",
            ServerStatus::HardReboot => "HARD_REBOOT",
            ServerStatus::Migrating => "MIGRATING",
            ServerStatus::Paused => "PAUSED",
            ServerStatus::Reboot => "REBOOT",
            ServerStatus::Rebuild => "REBUILD",
            ServerStatus::Resize => "RESIZE",
            ServerStatus::Shelved => "SHELVED",
            ServerStatus::ShelvedOffloaded => "SHELVED_OFFLOADED",
            ServerStatus::Shutoff => "SHUTOFF",
            ServerStatus::Suspended => "SUSPENDED",
            ServerStatus::VerifyResize => "VERIFY_RESIZE",
            ServerStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// 电源状态码 (0 NOSTATE, 1 RUNNING, 3 PAUSED, 4 SHUTDOWN, 6 CRASHED, 7 SUSPENDED)
pub mod power_state {
    pub const NOSTATE: u8 = 0;
    pub const RUNNING: u8 = 1;
    pub const PAUSED: u8 = 3;
    pub const SHUTDOWN: u8 = 4;
    pub const CRASHED: u8 = 6;
    pub const SUSPENDED: u8 = 7;
}

/// 规格 (microversion >= 2.47 时内嵌在云主机详情中)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flavor {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub original_name: Option<String>,

    #[serde(default)]
    pub vcpus: Option<u32>,

    /// 内存 (MB)
    #[serde(default)]
    pub ram: Option<u64>,

    /// 根盘 (GB)
    #[serde(default)]
    pub disk: Option<u64>,
}

impl Flavor {
    /// 判断规格是否与给定的 id 或名称相同
    pub fn matches(&self, reference: &str) -> bool {
        self.id.as_deref() == Some(reference) || self.original_name.as_deref() == Some(reference)
    }

    pub fn display_name(&self) -> &str {
        self.original_name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("-")
    }
}

/// 云主机地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub addr: String,

    #[serde(default)]
    pub version: u8,

    #[serde(rename = "OS-EXT-IPS-MAC:mac_addr", default)]
    pub mac_addr: Option<String>,

    /// fixed / floating
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub kind: Option<String>,
}

/// 故障信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    #[serde(default)]
    pub code: u16,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub details: Option<String>,
}

/// 已挂载卷的简要信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedVolume {
    pub id: String,

    #[serde(default)]
    pub delete_on_termination: bool,
}

pub const DEFAULT_ROOT_DEVICE: &str = "/dev/vda";

/// 云主机详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,

    pub name: String,

    pub status: ServerStatus,

    #[serde(rename = "OS-EXT-STS:task_state", default)]
    pub task_state: Option<String>,

    #[serde(rename = "OS-EXT-STS:vm_state", default)]
    pub vm_state: Option<String>,

    #[serde(rename = "OS-EXT-STS:power_state", default)]
    pub power_state: u8,

    /// 计算节点
    #[serde(rename = "OS-EXT-SRV-ATTR:host", default)]
    pub host: Option<String>,

    /// libvirt 域名称
    #[serde(rename = "OS-EXT-SRV-ATTR:instance_name", default)]
    pub instance_name: Option<String>,

    #[serde(rename = "OS-EXT-SRV-ATTR:hostname", default)]
    pub hostname: Option<String>,

    #[serde(rename = "OS-EXT-SRV-ATTR:root_device_name", default)]
    pub root_device_name: Option<String>,

    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: Option<String>,

    #[serde(default)]
    pub flavor: Flavor,

    /// 从云盘启动时为空字符串
    #[serde(default)]
    pub image: serde_json::Value,

    #[serde(default)]
    pub addresses: HashMap<String, Vec<Address>>,

    #[serde(rename = "os-extended-volumes:volumes_attached", default)]
    pub volumes_attached: Vec<AttachedVolume>,

    #[serde(default)]
    pub fault: Option<Fault>,

    #[serde(default)]
    pub created: Option<String>,
}

impl Server {
    pub fn is_active(&self) -> bool {
        self.status == ServerStatus::Active
    }

    pub fn is_shutoff(&self) -> bool {
        self.status == ServerStatus::Shutoff
    }

    pub fn is_paused(&self) -> bool {
        self.status == ServerStatus::Paused
    }

    pub fn is_suspended(&self) -> bool {
        self.status == ServerStatus::Suspended
    }

    pub fn is_shelved(&self) -> bool {
        matches!(
            self.status,
            ServerStatus::Shelved | ServerStatus::ShelvedOffloaded
        )
    }

    pub fn is_error(&self) -> bool {
        self.status == ServerStatus::Error
    }

    /// 存在进行中的任务
    pub fn has_pending_task(&self) -> bool {
        self.task_state.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn is_running(&self) -> bool {
        self.power_state == power_state::RUNNING
    }

    /// 根设备名, 控制面未返回时按 virtio 首块盘处理
    pub fn root_device(&self) -> &str {
        self.root_device_name.as_deref().unwrap_or(DEFAULT_ROOT_DEVICE)
    }

    pub fn is_boot_from_volume(&self) -> bool {
        match &self.image {
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image.get("id").and_then(|v| v.as_str())
    }

    /// 所有内网 IPv4 地址, 按网络名称排序
    pub fn fixed_ipv4(&self) -> Vec<&str> {
        let mut networks: Vec<_> = self.addresses.iter().collect();
        networks.sort_by(|a, b| a.0.cmp(b.0));
        networks
            .into_iter()
            .flat_map(|(_, addrs)| addrs.iter())
            .filter(|a| a.version == 4 && a.kind.as_deref() != Some("floating"))
            .map(|a| a.addr.as_str())
            .collect()
    }

    pub fn fault_message(&self) -> String {
        self.fault
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_default()
    }
}

/// 重启类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RebootType {
    Soft,
    Hard,
}

/// 块设备映射
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    pub boot_index: i32,
    pub uuid: String,
    pub source_type: String,
    pub destination_type: String,
    pub volume_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    pub delete_on_termination: bool,
}

/// 网络选择
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRef {
    #[serde(rename = "uuid", skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    #[serde(rename = "port", skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
}

impl NetworkRef {
    pub fn network(id: impl Into<String>) -> Self {
        Self {
            network_id: Some(id.into()),
            port_id: None,
        }
    }
}

/// 安全组引用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupRef {
    pub name: String,
}

/// 创建云主机请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,

    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,

    /// 从云盘启动时为空
    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,

    pub networks: Vec<NetworkRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub security_groups: Vec<SecurityGroupRef>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub block_device_mapping_v2: Vec<BlockDeviceMapping>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

/// 列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct ServerQuery {
    /// 名称 (正则, 服务端匹配)
    pub name: Option<String>,
    pub status: Option<ServerStatus>,
    pub host: Option<String>,
    pub limit: Option<u32>,
}

impl ServerQuery {
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(name) = &self.name {
            params.push(format!("name={}", urlencoding::encode(name)));
        }
        if let Some(status) = &self.status {
            params.push(format!("status={}", status));
        }
        if let Some(host) = &self.host {
            params.push(format!("host={}", urlencoding::encode(host)));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={}", limit));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// 网卡挂载信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceAttachment {
    pub port_id: String,

    pub net_id: String,

    #[serde(default)]
    pub mac_addr: String,

    #[serde(default)]
    pub port_state: Option<String>,

    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

impl InterfaceAttachment {
    pub fn ipv4(&self) -> Option<&str> {
        self.fixed_ips
            .iter()
            .map(|ip| ip.ip_address.as_str())
            .find(|ip| ip.parse::<std::net::Ipv4Addr>().is_ok())
    }
}

/// 固定 IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedIp {
    pub ip_address: String,

    #[serde(default)]
    pub subnet_id: String,
}

/// 云盘挂载信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAttachment {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "volumeId")]
    pub volume_id: String,

    #[serde(rename = "serverId", default)]
    pub server_id: String,

    #[serde(default)]
    pub device: Option<String>,
}

impl VolumeAttachment {
    pub fn is_root_of(&self, server: &Server) -> bool {
        self.device.as_deref() == Some(server.root_device())
    }
}

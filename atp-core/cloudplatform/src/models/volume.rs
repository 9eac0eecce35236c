//! 块存储模型

use serde::{Deserialize, Serialize};

/// 云盘详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// available / in-use / creating / extending / ...
    pub status: String,

    /// 容量 (GB)
    pub size: u64,

    #[serde(default)]
    pub volume_type: Option<String>,

    #[serde(default)]
    pub bootable: Option<String>,

    #[serde(default)]
    pub attachments: Vec<VolumeAttachmentInfo>,
}

impl Volume {
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    pub fn is_in_use(&self) -> bool {
        self.status == "in-use"
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with("error")
    }

    /// 是否处于过渡状态
    pub fn is_transitional(&self) -> bool {
        !matches!(self.status.as_str(), "available" | "in-use") && !self.is_error()
    }

    /// 虚拟磁盘 serial: 取 id 前 20 个字符
    pub fn serial(&self) -> &str {
        volume_serial(&self.id)
    }
}

/// 根据云盘 id 计算 virtio 磁盘 serial
pub fn volume_serial(volume_id: &str) -> &str {
    let end = volume_id
        .char_indices()
        .nth(20)
        .map(|(i, _)| i)
        .unwrap_or(volume_id.len());
    &volume_id[..end]
}

/// 云盘挂载记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAttachmentInfo {
    #[serde(default)]
    pub server_id: String,

    #[serde(default)]
    pub device: Option<String>,
}

/// 创建云盘请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// 快照详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub status: String,

    pub volume_id: String,

    #[serde(default)]
    pub size: u64,
}

impl Snapshot {
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with("error")
    }
}

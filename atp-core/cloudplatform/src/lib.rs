//! 云平台客户端模块
//!
//! 提供与云平台控制面 (计算、块存储、网络) REST API 交互的客户端实现。
//!
//! # 功能
//!
//! - **认证**: 密码认证获取令牌, 从服务目录发现各服务端点
//! - **云主机管理** (`ServerApi`): 生命周期、迁移、网卡/云盘挂载
//! - **块存储** (`VolumeApi`): 云盘、快照、快照回滚
//! - **网络** (`NetworkApi`): 端口
//! - **控制面抽象** (`ControlPlane`): 测试框架依赖的 trait, 便于替换为内存实现
//!
//! # 示例
//!
//! ```ignore
//! use atp_cloudplatform::{CloudClient, CloudConfig, RebootType};
//!
//! let client = CloudClient::connect(CloudConfig {
//!     auth_url: "http://controller:5000/v3".into(),
//!     username: "admin".into(),
//!     password: "secret".into(),
//!     project_name: "admin".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let server = client.server().get("server-id").await?;
//! client.server().reboot(&server.id, RebootType::Soft).await?;
//! ```

pub mod api;
pub mod client;
pub mod control_plane;
pub mod error;
pub mod models;

pub use client::{CloudClient, CloudConfig, ServiceType};
pub use control_plane::ControlPlane;
pub use error::{CloudError, Result};

pub use api::{NetworkApi, ServerApi, VolumeApi};

pub use models::{
    power_state, volume_serial, Address, AttachedVolume, BlockDeviceMapping, CreatePortRequest,
    CreateServerRequest, CreateVolumeRequest, Fault, FixedIp, Flavor, InterfaceAttachment,
    NetworkRef, Port, RebootType, SecurityGroupRef, Server, ServerQuery, ServerStatus, Snapshot,
    Volume, VolumeAttachment, DEFAULT_ROOT_DEVICE,
};

//! 云平台 API 模块
//!
//! - 云主机管理 (ServerApi)
//! - 块存储 (VolumeApi)
//! - 网络 (NetworkApi)

pub mod network;
pub mod server;
pub mod volume;

pub use network::NetworkApi;
pub use server::ServerApi;
pub use volume::VolumeApi;

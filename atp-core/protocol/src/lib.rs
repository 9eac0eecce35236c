//! ATP 协议层
//!
//! 通过 QEMU Guest Agent 从云主机内部观察状态: 执行命令、读取网卡地址、块设备和主机名。
//! 测试框架只依赖 [`GuestConnector`] / [`GuestAgent`] 两个 trait。

pub mod connector;
pub mod qga;
pub mod traits;
pub mod transport;

pub use connector::{QgaConfig, QgaConnector, TransportKind};
pub use qga::{BlockDevice, GuestExecCommand, GuestNetworkInterface, QgaAgent};
pub use traits::{ExecOutput, GuestAgent, GuestConnector};
pub use transport::{AgentTransport, VirshTransport};

use thiserror::Error;

/// 协议层错误
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("协议连接失败: {0}")]
    ConnectionFailed(String),

    #[error("协议解析失败: {0}")]
    ParseError(String),

    #[error("命令执行失败: {0}")]
    CommandFailed(String),

    #[error("QGA 未响应")]
    NoResponse,

    #[error("进程执行超时: {0}")]
    Timeout(String),

    #[error("操作被取消")]
    Cancelled,

    #[error("传输层错误: {0}")]
    TransportError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

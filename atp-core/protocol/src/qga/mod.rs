//! QEMU Guest Agent 协议实现

pub mod agent;
pub mod protocol;

pub use agent::{ExecLimits, QgaAgent};
pub use protocol::{
    parse_lsblk, BlockDevice, GuestExecCommand, GuestExecStatus, GuestIpAddress,
    GuestNetworkInterface, LSBLK_ARGS,
};

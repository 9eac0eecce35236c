//! CLI 命令处理模块

pub mod common; // 公共工具函数
pub mod config;
pub mod output;
pub mod server; // 批量挂载/卸载
pub mod test; // 云主机动作测试

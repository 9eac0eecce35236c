//! 动作注册表

use std::collections::BTreeMap;

use super::interface::{AttachInterface, DetachInterface, InterfaceHotplug};
use super::live_migrate_ping::LiveMigratePing;
use super::server_ops::{LiveMigrate, Migrate, Nop, PowerAction, PowerOp, Rebuild, Rename, Resize};
use super::snapshot::RevertSystem;
use super::volume::{AttachVolume, DetachVolume, ExtendVolume, VolumeHotplug};
use super::ServerAction;
use crate::action_count::ActionCountList;
use crate::config::TargetConfig;
use crate::{ExecutorError, Result};

/// 每次执行都构造一个新的动作实例
pub type ActionConstructor = fn() -> Box<dyn ServerAction>;

/// 名称到构造函数的映射, 启动时显式构建, 之后只读
#[derive(Clone, Default)]
pub struct ActionRegistry {
    constructors: BTreeMap<&'static str, ActionConstructor>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的全部动作
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(&'static str, ActionConstructor); 28] = [
            ("reboot", || Box::new(PowerAction::new(PowerOp::Reboot))),
            ("hard_reboot", || Box::new(PowerAction::new(PowerOp::HardReboot))),
            ("stop", || Box::new(PowerAction::new(PowerOp::Stop))),
            ("start", || Box::new(PowerAction::new(PowerOp::Start))),
            ("pause", || Box::new(PowerAction::new(PowerOp::Pause))),
            ("unpause", || Box::new(PowerAction::new(PowerOp::Unpause))),
            ("toggle_pause", || Box::new(PowerAction::new(PowerOp::TogglePause))),
            ("suspend", || Box::new(PowerAction::new(PowerOp::Suspend))),
            ("resume", || Box::new(PowerAction::new(PowerOp::Resume))),
            ("toggle_suspend", || Box::new(PowerAction::new(PowerOp::ToggleSuspend))),
            ("shelve", || Box::new(PowerAction::new(PowerOp::Shelve))),
            ("unshelve", || Box::new(PowerAction::new(PowerOp::Unshelve))),
            ("toggle_shelve", || Box::new(PowerAction::new(PowerOp::ToggleShelve))),
            ("resize", || Box::new(Resize)),
            ("rename", || Box::new(Rename)),
            ("rebuild", || Box::new(Rebuild)),
            ("migrate", || Box::new(Migrate)),
            ("live_migrate", || Box::new(LiveMigrate)),
            ("live_migrate_ping", || Box::new(LiveMigratePing::default())),
            ("attach_interface", || Box::new(AttachInterface::default())),
            ("detach_interface", || Box::new(DetachInterface)),
            ("interface_hotplug", || Box::new(InterfaceHotplug::default())),
            ("attach_volume", || Box::new(AttachVolume::default())),
            ("detach_volume", || Box::new(DetachVolume)),
            ("volume_hotplug", || Box::new(VolumeHotplug::default())),
            ("extend_volume", || Box::new(ExtendVolume)),
            ("revert_system", || Box::new(RevertSystem::default())),
            ("nop", || Box::new(Nop)),
        ];
        for (name, constructor) in builtin {
            registry.constructors.insert(name, constructor);
        }
        registry
    }

    /// 注册自定义动作, 名称重复时报错
    pub fn register(&mut self, name: &'static str, constructor: ActionConstructor) -> Result<()> {
        if self.constructors.contains_key(name) {
            return Err(ExecutorError::Config(format!("动作已注册: {}", name)));
        }
        self.constructors.insert(name, constructor);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn ServerAction>> {
        self.constructors.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// 检查动作序列: 名称必须已注册, 且各动作所需的配置齐全
    pub fn validate(&self, actions: &ActionCountList, config: &TargetConfig) -> Result<()> {
        if actions.is_empty() {
            return Err(ExecutorError::Config("动作列表为空".to_string()));
        }
        for item in actions.items() {
            let action = self.create(&item.name).ok_or_else(|| {
                ExecutorError::Config(format!(
                    "未知动作: {} (可用: {})",
                    item.name,
                    self.names().join(", ")
                ))
            })?;
            action.validate(config)?;
        }
        Ok(())
    }
}

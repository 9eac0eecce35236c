//! 网卡挂载/卸载/热插拔

use std::collections::BTreeSet;

use async_trait::async_trait;
use atp_cloudplatform::{CreatePortRequest, InterfaceAttachment};
use tracing::{info, warn};

use super::ServerAction;
use crate::config::TargetConfig;
use crate::context::ServerActionTest;
use crate::{ExecutorError, Result};

/// 在下一个网络上新建端口并挂载, 端口 id 立即记入 `created`
async fn attach_new_interface(
    ctx: &mut ServerActionTest,
    created: &mut Vec<String>,
) -> Result<InterfaceAttachment> {
    let network = ctx.next_network()?;
    let req = CreatePortRequest {
        network_id: network.clone(),
        name: Some(ctx.resource_name("port")),
        security_groups: ctx.config.security_group.clone().map(|sg| vec![sg]),
    };
    let port = ctx.client.create_port(&req).await?;
    created.push(port.id.clone());

    info!("云主机 {} 挂载网卡 {} (网络 {})", ctx.server.id, port.id, network);
    let iface = ctx.client.attach_interface(&ctx.server.id, &port.id).await?;
    ctx.wait_task_done().await?;

    let report = ctx
        .checkers()
        .makesure_interface_exist(&ctx.server, &iface)
        .await?;
    ctx.record(report);
    Ok(iface)
}

/// 卸载网卡并确认消失
async fn detach_and_check(ctx: &mut ServerActionTest, iface: &InterfaceAttachment) -> Result<()> {
    info!("云主机 {} 卸载网卡 {}", ctx.server.id, iface.port_id);
    ctx.client
        .detach_interface(&ctx.server.id, &iface.port_id)
        .await?;
    ctx.wait_task_done().await?;

    let report = ctx
        .checkers()
        .makesure_interface_not_exist(&ctx.server, iface)
        .await?;
    ctx.record(report);
    Ok(())
}

async fn delete_port(ctx: &ServerActionTest, port_id: &str) -> Result<()> {
    match ctx.client.delete_port(port_id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 逐个删除端口, 单个失败不影响其余
async fn delete_ports(ctx: &ServerActionTest, ports: &[String]) -> Vec<String> {
    let mut failures = Vec::new();
    for port_id in ports {
        if let Err(e) = delete_port(ctx, port_id).await {
            warn!("删除端口 {} 失败: {}", port_id, e);
            failures.push(format!("端口 {}: {}", port_id, e));
        }
    }
    failures
}

fn skip_unless_active_or_shutoff(ctx: &ServerActionTest) -> Option<String> {
    if ctx.server.is_active() || ctx.server.is_shutoff() {
        None
    } else {
        Some(format!("云主机状态为 {}", ctx.server.status))
    }
}

/// 新建端口并挂载; 成功后端口保留在云主机上
#[derive(Default)]
pub struct AttachInterface {
    created: Vec<String>,
    attached: bool,
}

#[async_trait]
impl ServerAction for AttachInterface {
    fn name(&self) -> &'static str {
        "attach_interface"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        skip_unless_active_or_shutoff(ctx)
    }

    fn validate(&self, config: &TargetConfig) -> Result<()> {
        config.require_networks()
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        attach_new_interface(ctx, &mut self.created).await?;
        self.attached = true;
        Ok(())
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        if self.attached {
            return Ok(());
        }
        let failures = delete_ports(ctx, &self.created).await;
        self.created.clear();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::Cleanup(failures))
        }
    }
}

/// 云主机上不同 MAC 的数量
fn interface_count(ctx: &ServerActionTest) -> usize {
    ctx.server
        .addresses
        .values()
        .flatten()
        .filter_map(|a| a.mac_addr.as_deref())
        .collect::<BTreeSet<_>>()
        .len()
}

/// 卸载最后一块网卡; 由本工具创建的端口随后删除
pub struct DetachInterface;

#[async_trait]
impl ServerAction for DetachInterface {
    fn name(&self) -> &'static str {
        "detach_interface"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if let Some(reason) = skip_unless_active_or_shutoff(ctx) {
            return Some(reason);
        }
        if interface_count(ctx) <= 1 {
            return Some("云主机只有一块网卡".to_string());
        }
        None
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let ifaces = ctx.client.list_interfaces(&ctx.server.id).await?;
        if ifaces.len() <= 1 {
            return Err(ExecutorError::assertion(format!(
                "云主机 {} 只有 {} 块网卡",
                ctx.server.id,
                ifaces.len()
            )));
        }
        let Some(iface) = ifaces.last() else {
            return Ok(());
        };

        detach_and_check(ctx, iface).await?;

        let port = match ctx.client.get_port(&iface.port_id).await {
            Ok(port) => port,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if ctx.owns(&port.name) {
            delete_port(ctx, &port.id).await?;
        }
        Ok(())
    }
}

/// N 次挂载后 N 次卸载并删除
#[derive(Default)]
pub struct InterfaceHotplug {
    /// 已创建但尚未删除的端口
    created: Vec<String>,
}

#[async_trait]
impl ServerAction for InterfaceHotplug {
    fn name(&self) -> &'static str {
        "interface_hotplug"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if ctx.server.is_active() {
            None
        } else {
            Some(format!("云主机状态为 {}", ctx.server.status))
        }
    }

    fn validate(&self, config: &TargetConfig) -> Result<()> {
        config.require_networks()
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let times = ctx.config.interface_hotplug_times;
        let mut attached = Vec::new();
        for i in 0..times {
            info!("网卡热插拔: 挂载 {}/{}", i + 1, times);
            attached.push(attach_new_interface(ctx, &mut self.created).await?);
        }

        for (i, iface) in attached.iter().enumerate() {
            info!("网卡热插拔: 卸载 {}/{}", i + 1, times);
            detach_and_check(ctx, iface).await?;
            delete_port(ctx, &iface.port_id).await?;
            self.created.retain(|id| id != &iface.port_id);
        }
        Ok(())
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        if self.created.is_empty() {
            return Ok(());
        }
        info!("清理 {} 个残留端口", self.created.len());
        let remaining = std::mem::take(&mut self.created);
        let failures = delete_ports(ctx, &remaining).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::Cleanup(failures))
        }
    }
}

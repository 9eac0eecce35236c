//! 热迁移期间的网络中断检测
//!
//! 在目标云主机同网络、同可用区新建一台探测机, 从探测机持续 ping 目标,
//! 统计热迁移期间丢失的包数。流程:
//!
//! 1. 新建探测机, 等待控制台出现登录提示
//! 2. 连接探测机 guest agent, 等待其获取地址
//! 3. 基线 ping, 有丢包则重试, 超时则在迁移前失败
//! 4. 后台启动 ping, 热迁移目标, 确认节点变化
//! 5. SIGINT 结束 ping, 解析统计, 丢包数不得超过 `max_loss`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atp_cloudplatform::{CreateServerRequest, NetworkRef, SecurityGroupRef, Server};
use atp_common::{retry_with_errors, CancellationToken, RetryTag};
use atp_protocol::{GuestAgent, GuestExecCommand, ProtocolError};
use tracing::{info, warn};

use super::server_ops::host_changed;
use super::ServerAction;
use crate::config::TargetConfig;
use crate::context::ServerActionTest;
use crate::ping::{ping_args, PingSummary};
use crate::waiter;
use crate::{ExecutorError, Result};

#[derive(Default)]
pub struct LiveMigratePing {
    /// 探测机 id, 创建后立即记录
    probe: Option<String>,
    agent: Option<Arc<dyn GuestAgent>>,
    /// 后台 ping 在探测机内的 pid
    ping_pid: Option<i64>,
}

fn ping_command(target: &str, interval: f64, count: Option<u64>) -> GuestExecCommand {
    let args = ping_args(target, interval, count);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    GuestExecCommand::simple("ping", &args)
}

fn parse_summary(stdout: &str) -> Result<PingSummary> {
    PingSummary::parse(stdout)
        .ok_or_else(|| ExecutorError::assertion(format!("无法解析 ping 输出: {}", stdout.trim())))
}

impl LiveMigratePing {
    /// 目标的第一块带 IPv4 地址的网卡: (网络 id, 地址)
    async fn target_address(ctx: &ServerActionTest) -> Result<(String, String)> {
        let ifaces = ctx.client.list_interfaces(&ctx.server.id).await?;
        ifaces
            .iter()
            .find_map(|i| i.ipv4().map(|ip| (i.net_id.clone(), ip.to_string())))
            .ok_or_else(|| {
                ExecutorError::assertion(format!("云主机 {} 没有可用的 IPv4 地址", ctx.server.id))
            })
    }

    async fn create_probe(&mut self, ctx: &ServerActionTest, network: &str) -> Result<Server> {
        let config = &ctx.config;
        let (Some(flavor), Some(image)) = (config.flavors.first(), config.images.first()) else {
            return Err(ExecutorError::Config("探测机需要至少一个镜像和规格".to_string()));
        };
        let req = CreateServerRequest {
            name: format!("{}probe-{}", config.name_prefix, ctx.server.name),
            flavor_ref: flavor.clone(),
            image_ref: Some(image.clone()),
            networks: vec![NetworkRef::network(network)],
            availability_zone: ctx.server.availability_zone.clone(),
            security_groups: config
                .security_group
                .iter()
                .map(|name| SecurityGroupRef { name: name.clone() })
                .collect(),
            ..Default::default()
        };

        info!("创建探测机 {} (网络 {})", req.name, network);
        let probe = ctx.client.create_server(&req).await?;
        self.probe = Some(probe.id.clone());

        let condition = config.task_condition();
        let probe = waiter::wait_server_task_done(ctx.client.as_ref(), &probe.id, &condition, &ctx.cancel)
            .await?;
        if !probe.is_active() {
            return Err(ExecutorError::assertion(format!(
                "探测机 {} 状态为 {}",
                probe.id, probe.status
            )));
        }
        Ok(probe)
    }

    /// 轮询控制台输出直到出现登录提示
    async fn wait_boot_banner(ctx: &ServerActionTest, probe: &Server) -> Result<()> {
        let lm = &ctx.config.live_migrate;
        let condition = ctx.config.condition(Duration::from_secs(lm.boot_banner_timeout));
        retry_with_errors(&condition, &[RetryTag::ConsoleNotReady], &ctx.cancel, || async {
            let output = ctx.client.console_output(&probe.id, Some(50)).await?;
            if output.contains(&lm.banner) {
                Ok(())
            } else {
                Err(ExecutorError::retryable(
                    RetryTag::ConsoleNotReady,
                    format!("探测机 {} 控制台尚未出现 {:?}", probe.id, lm.banner),
                ))
            }
        })
        .await?;
        Ok(())
    }

    /// 连接探测机 guest agent 并等待其获取地址
    async fn connect_probe(&mut self, ctx: &ServerActionTest, probe: &Server) -> Result<Arc<dyn GuestAgent>> {
        let connector = ctx
            .guest
            .clone()
            .ok_or_else(|| ExecutorError::Config("未配置 guest agent 连接器".to_string()))?;
        let (Some(host), Some(domain)) = (probe.host.as_deref(), probe.instance_name.as_deref()) else {
            return Err(ExecutorError::assertion(format!(
                "探测机 {} 缺少计算节点或域名称",
                probe.id
            )));
        };

        let guest = &ctx.config.guest;
        let condition = ctx.config.condition(Duration::from_secs(guest.connect_timeout));
        let agent = retry_with_errors(&condition, &[RetryTag::AgentNotReady], &ctx.cancel, || async {
            let agent = connector.connect(host, domain).await.map_err(|e| match e {
                ProtocolError::Cancelled => ExecutorError::Cancelled,
                other => ExecutorError::retryable(RetryTag::AgentNotReady, other.to_string()),
            })?;
            Ok::<_, ExecutorError>(agent)
        })
        .await?;
        self.agent = Some(agent.clone());

        let condition = ctx.config.condition(Duration::from_secs(guest.address_timeout));
        let addresses = retry_with_errors(&condition, &[RetryTag::GuestNoAddress], &ctx.cancel, || async {
            let addresses = agent.ip_addresses().await?;
            if addresses.is_empty() {
                return Err(ExecutorError::retryable(
                    RetryTag::GuestNoAddress,
                    format!("探测机 {} 尚未获取地址", probe.id),
                ));
            }
            Ok(addresses)
        })
        .await?;
        info!("探测机 {} 地址: {:?}", probe.id, addresses);
        Ok(agent)
    }

    /// 基线 ping, 有丢包则继续重试
    async fn baseline(ctx: &ServerActionTest, agent: &dyn GuestAgent, target: &str) -> Result<PingSummary> {
        let lm = &ctx.config.live_migrate;
        let count = ((lm.baseline_duration as f64 / lm.ping_interval).ceil() as u64).max(1);
        let cmd = ping_command(target, lm.ping_interval, Some(count));
        let condition = ctx.config.condition(Duration::from_secs(lm.baseline_timeout));

        let summary = retry_with_errors(&condition, &[RetryTag::PingLoss], &ctx.cancel, || async {
            let output = agent.exec(&cmd, &ctx.cancel).await?;
            let summary = parse_summary(&output.stdout)?;
            if summary.lost() > 0 {
                return Err(ExecutorError::retryable(
                    RetryTag::PingLoss,
                    format!("基线 ping 丢包 {}/{}", summary.lost(), summary.transmitted),
                ));
            }
            Ok(summary)
        })
        .await?;
        info!("基线 ping 正常: {}/{}", summary.received, summary.transmitted);
        Ok(summary)
    }

    /// 结束后台 ping 并取得统计
    async fn stop_ping(
        &mut self,
        ctx: &ServerActionTest,
        agent: &dyn GuestAgent,
        pid: i64,
        cancel: &CancellationToken,
    ) -> Result<String> {
        agent.exec_shell(&format!("kill -INT {}", pid), cancel).await?;

        let condition = ctx
            .config
            .condition(Duration::from_secs(ctx.config.guest.device_timeout));
        let output = retry_with_errors(&condition, &[RetryTag::ProcessRunning], cancel, || async {
            let status = agent.exec_status(pid).await?;
            if !status.exited {
                return Err(ExecutorError::retryable(
                    RetryTag::ProcessRunning,
                    format!("ping 进程 {} 尚未退出", pid),
                ));
            }
            Ok(status)
        })
        .await?;
        self.ping_pid = None;
        Ok(output.stdout)
    }
}

#[async_trait]
impl ServerAction for LiveMigratePing {
    fn name(&self) -> &'static str {
        "live_migrate_ping"
    }

    fn skip(&self, ctx: &ServerActionTest) -> Option<String> {
        if !ctx.server.is_active() {
            return Some(format!("云主机状态为 {}", ctx.server.status));
        }
        if !ctx.guest_enabled() {
            return Some("未启用 guest agent".to_string());
        }
        if ctx.server.fixed_ipv4().is_empty() {
            return Some("云主机没有可用的 IPv4 地址".to_string());
        }
        None
    }

    fn validate(&self, config: &TargetConfig) -> Result<()> {
        config.require_images()?;
        config.require_flavors()
    }

    async fn start(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let (network, target) = Self::target_address(ctx).await?;
        let probe = self.create_probe(ctx, &network).await?;
        Self::wait_boot_banner(ctx, &probe).await?;
        let agent = self.connect_probe(ctx, &probe).await?;

        Self::baseline(ctx, agent.as_ref(), &target).await?;

        let interval = ctx.config.live_migrate.ping_interval;
        let pid = agent.spawn(&ping_command(&target, interval, None)).await?;
        self.ping_pid = Some(pid);
        info!("探测机 {} 后台 ping {} (pid {})", probe.id, target, pid);

        let before = ctx.server.host.clone();
        let id = ctx.server.id.clone();
        info!("云主机 {} 热迁移, 当前节点 {:?}", id, before);
        ctx.client.live_migrate_server(&id, None).await?;
        ctx.wait_task_done().await?;
        host_changed(ctx, before.as_deref())?;
        ctx.assert_active().await?;

        let cancel = ctx.cancel.clone();
        let stdout = self.stop_ping(ctx, agent.as_ref(), pid, &cancel).await?;
        let summary = parse_summary(&stdout)?;
        let max_loss = ctx.config.live_migrate.max_loss;
        info!(
            "热迁移期间 ping: 发送 {}, 接收 {}, 丢失 {} (允许 {})",
            summary.transmitted,
            summary.received,
            summary.lost(),
            max_loss
        );
        if summary.lost() > max_loss {
            return Err(ExecutorError::assertion(format!(
                "热迁移期间丢包 {} 个, 超过允许的 {}",
                summary.lost(),
                max_loss
            )));
        }
        Ok(())
    }

    async fn tear_down(&mut self, ctx: &mut ServerActionTest) -> Result<()> {
        let mut failures = Vec::new();

        if let (Some(pid), Some(agent)) = (self.ping_pid, self.agent.clone()) {
            let teardown = ctx.teardown_token().clone();
            if let Err(e) = self.stop_ping(ctx, agent.as_ref(), pid, &teardown).await {
                warn!("结束探测机 ping 进程 {} 失败: {}", pid, e);
            }
        }
        self.agent = None;

        if let Some(probe) = self.probe.take() {
            info!("删除探测机 {}", probe);
            if let Err(e) = ctx.delete_server_and_wait(&probe).await {
                failures.push(format!("探测机 {}: {}", probe, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::Cleanup(failures))
        }
    }
}

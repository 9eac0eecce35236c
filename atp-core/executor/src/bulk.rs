//! 批量挂载/卸载工具
//!
//! 对单台云主机并发执行 N 个网卡或云盘子操作, 每个子操作的失败只记在它自己身上。

use std::sync::{Arc, Mutex, PoisonError};

use atp_cloudplatform::{ControlPlane, CreatePortRequest, CreateVolumeRequest, Server};
use atp_common::CancellationToken;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::task_group::{ItemOutcome, Progress, TaskGroup};
use crate::waiter;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub item: String,
    pub error: String,
}

/// 一次批量操作的结果
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub operation: String,
    pub server_id: String,
    /// 成功处理的端口或云盘 id
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
    /// 本次新建并保留下来的资源
    pub created: Vec<String>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

struct BulkInner {
    client: Arc<dyn ControlPlane>,
    config: Arc<TargetConfig>,
    cancel: CancellationToken,
    /// 子操作创建的资源, 只在追加时加锁
    created: Mutex<Vec<String>>,
}

impl BulkInner {
    fn take_created(&self) -> Vec<String> {
        std::mem::take(&mut *self.created.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push_created(&self, id: &str) {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
    }

    fn resource_name(&self, kind: &str, server: &str, index: usize) -> String {
        format!("{}{}-{}-{}", self.config.name_prefix, kind, server, index + 1)
    }

    async fn add_interface(&self, server: &Server, index: usize, network: String) -> Result<String> {
        let req = CreatePortRequest {
            network_id: network.clone(),
            name: Some(self.resource_name("port", &server.name, index)),
            security_groups: self.config.security_group.clone().map(|sg| vec![sg]),
        };
        let port = self.client.create_port(&req).await?;
        info!("云主机 {} 挂载网卡 {} (网络 {})", server.id, port.id, network);
        if let Err(e) = self.client.attach_interface(&server.id, &port.id).await {
            if let Err(cleanup) = self.client.delete_port(&port.id).await {
                warn!("删除端口 {} 失败: {}", port.id, cleanup);
            }
            return Err(e.into());
        }
        self.push_created(&port.id);
        Ok(port.id)
    }

    async fn remove_interface(&self, server_id: &str, port_id: String) -> Result<String> {
        info!("云主机 {} 卸载网卡 {}", server_id, port_id);
        self.client.detach_interface(server_id, &port_id).await?;
        match self.client.delete_port(&port_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(port_id)
    }

    async fn attach_volume(&self, server: &Server, index: usize) -> Result<String> {
        let req = CreateVolumeRequest {
            size: self.config.volume_size,
            name: Some(self.resource_name("volume", &server.name, index)),
            volume_type: self.config.volume_type.clone(),
            availability_zone: server.availability_zone.clone(),
            ..Default::default()
        };
        let volume = self.client.create_volume(&req).await?;
        let condition = self.config.task_condition();
        let attached = async {
            waiter::wait_volume_status(self.client.as_ref(), &volume.id, "available", &condition, &self.cancel)
                .await?;
            info!("云主机 {} 挂载云盘 {}", server.id, volume.id);
            self.client.attach_volume(&server.id, &volume.id).await?;
            waiter::wait_volume_status(self.client.as_ref(), &volume.id, "in-use", &condition, &self.cancel)
                .await
        }
        .await;
        if let Err(e) = attached {
            if let Err(cleanup) = self.client.delete_volume(&volume.id).await {
                warn!("删除云盘 {} 失败: {}", volume.id, cleanup);
            }
            return Err(e);
        }
        self.push_created(&volume.id);
        Ok(volume.id)
    }

    async fn detach_volume(&self, server_id: &str, volume_id: String, delete: bool) -> Result<String> {
        info!("云主机 {} 卸载云盘 {}", server_id, volume_id);
        self.client.detach_volume(server_id, &volume_id).await?;
        let condition = self.config.task_condition();
        waiter::wait_volume_status(self.client.as_ref(), &volume_id, "available", &condition, &self.cancel)
            .await?;
        if delete {
            self.client.delete_volume(&volume_id).await?;
        }
        Ok(volume_id)
    }
}

/// 批量工具入口
pub struct BulkOps {
    client: Arc<dyn ControlPlane>,
    config: Arc<TargetConfig>,
    cancel: CancellationToken,
    workers: usize,
    progress: Option<Arc<dyn Progress>>,
}

impl BulkOps {
    pub fn new(client: Arc<dyn ControlPlane>, config: Arc<TargetConfig>, cancel: CancellationToken) -> Self {
        let workers = config.workers;
        Self {
            client,
            config,
            cancel,
            workers,
            progress: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn inner(&self) -> Arc<BulkInner> {
        Arc::new(BulkInner {
            client: self.client.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            created: Mutex::new(Vec::new()),
        })
    }

    fn group(&self) -> TaskGroup {
        let group = TaskGroup::new(self.workers, self.cancel.clone());
        match &self.progress {
            Some(progress) => group.with_progress(progress.clone()),
            None => group,
        }
    }

    fn collect(
        operation: &str,
        server_id: &str,
        inner: &BulkInner,
        labels: Vec<String>,
        outcomes: Vec<ItemOutcome<String>>,
    ) -> BulkReport {
        let mut report = BulkReport {
            operation: operation.to_string(),
            server_id: server_id.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            created: inner.take_created(),
        };
        for (item, outcome) in labels.into_iter().zip(outcomes) {
            let error = match outcome {
                ItemOutcome::Done(id) => {
                    report.succeeded.push(id);
                    continue;
                }
                ItemOutcome::Failed(e) => e,
                ItemOutcome::Panicked(e) => format!("任务异常: {}", e),
                ItemOutcome::NotStarted => "已取消, 未执行".to_string(),
            };
            report.failed.push(BulkFailure { item, error });
        }
        info!(
            "{} 云主机 {}: 成功 {}, 失败 {}",
            operation,
            server_id,
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// 新建 `count` 个端口并挂到云主机上, 网络轮流选取
    pub async fn add_interfaces(&self, server_id: &str, count: usize) -> Result<BulkReport> {
        self.config.require_networks()?;
        let server = Arc::new(self.client.get_server(server_id).await?);
        let networks = &self.config.networks;
        let items: Vec<(usize, String)> = (0..count)
            .map(|i| (i, networks[i % networks.len()].clone()))
            .collect();
        let labels = items.iter().map(|(i, n)| format!("#{} ({})", i + 1, n)).collect();

        let shared = self.inner();
        let inner = shared.clone();
        let outcomes = self
            .group()
            .run(items, move |_, (index, network)| {
                let inner = inner.clone();
                let server = server.clone();
                async move { inner.add_interface(&server, index, network).await }
            })
            .await;
        Ok(Self::collect("add_interfaces", server_id, &shared, labels, outcomes))
    }

    /// 卸载并删除本工具创建的网卡; `all` 为真时卸载首块以外的全部网卡
    pub async fn remove_interfaces(&self, server_id: &str, all: bool) -> Result<BulkReport> {
        let interfaces = self.client.list_interfaces(server_id).await?;
        let mut ports = Vec::new();
        for (i, iface) in interfaces.iter().enumerate() {
            if all {
                if i > 0 {
                    ports.push(iface.port_id.clone());
                }
                continue;
            }
            match self.client.get_port(&iface.port_id).await {
                Ok(port) if port.name.starts_with(&self.config.name_prefix) => ports.push(port.id),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let labels = ports.clone();
        let shared = self.inner();
        let inner = shared.clone();
        let server_id_owned = server_id.to_string();
        let outcomes = self
            .group()
            .run(ports, move |_, port_id| {
                let inner = inner.clone();
                let server_id = server_id_owned.clone();
                async move { inner.remove_interface(&server_id, port_id).await }
            })
            .await;
        Ok(Self::collect("remove_interfaces", server_id, &shared, labels, outcomes))
    }

    /// 新建 `count` 块数据盘并挂到云主机上
    pub async fn attach_volumes(&self, server_id: &str, count: usize) -> Result<BulkReport> {
        let server = Arc::new(self.client.get_server(server_id).await?);
        let labels = (0..count).map(|i| format!("#{}", i + 1)).collect();

        let shared = self.inner();
        let inner = shared.clone();
        let outcomes = self
            .group()
            .run((0..count).collect(), move |_, index| {
                let inner = inner.clone();
                let server = server.clone();
                async move { inner.attach_volume(&server, index).await }
            })
            .await;
        Ok(Self::collect("attach_volumes", server_id, &shared, labels, outcomes))
    }

    /// 卸载全部数据盘 (系统盘除外), `delete` 为真时同时删除
    pub async fn detach_volumes(&self, server_id: &str, delete: bool) -> Result<BulkReport> {
        let server = self.client.get_server(server_id).await?;
        let volumes: Vec<String> = self
            .client
            .list_volume_attachments(server_id)
            .await?
            .into_iter()
            .filter(|a| !a.is_root_of(&server))
            .map(|a| a.volume_id)
            .collect();

        let labels = volumes.clone();
        let shared = self.inner();
        let inner = shared.clone();
        let server_id_owned = server_id.to_string();
        let outcomes = self
            .group()
            .run(volumes, move |_, volume_id| {
                let inner = inner.clone();
                let server_id = server_id_owned.clone();
                async move { inner.detach_volume(&server_id, volume_id, delete).await }
            })
            .await;
        Ok(Self::collect("detach_volumes", server_id, &shared, labels, outcomes))
    }
}

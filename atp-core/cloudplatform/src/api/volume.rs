//! 块存储 API
//!
//! 云盘的创建、扩容、删除, 以及快照和快照回滚。

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::client::{CloudClient, ServiceType};
use crate::error::Result;
use crate::models::{CreateVolumeRequest, Snapshot, Volume};

#[derive(Deserialize)]
struct VolumeBody {
    volume: Volume,
}

#[derive(Deserialize)]
struct SnapshotBody {
    snapshot: Snapshot,
}

/// 块存储 API
pub struct VolumeApi<'a> {
    client: &'a CloudClient,
}

impl<'a> VolumeApi<'a> {
    pub(crate) fn new(client: &'a CloudClient) -> Self {
        Self { client }
    }

    pub async fn create(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        info!("创建云盘: {:?} ({} GB)", req.name, req.size);
        let body: VolumeBody = self
            .client
            .request(
                ServiceType::Volume,
                Method::POST,
                "/volumes",
                Some(json!({ "volume": req })),
            )
            .await?;
        Ok(body.volume)
    }

    pub async fn get(&self, id: &str) -> Result<Volume> {
        let body: VolumeBody = self
            .client
            .request(ServiceType::Volume, Method::GET, &format!("/volumes/{}", id), None::<()>)
            .await?;
        Ok(body.volume)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        info!("删除云盘: {}", id);
        self.client
            .request_empty(ServiceType::Volume, Method::DELETE, &format!("/volumes/{}", id), None::<()>)
            .await
    }

    async fn action(&self, id: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .request_empty(
                ServiceType::Volume,
                Method::POST,
                &format!("/volumes/{}/action", id),
                Some(body),
            )
            .await
    }

    /// 扩容到 `new_size` GB
    pub async fn extend(&self, id: &str, new_size: u64) -> Result<()> {
        info!("扩容云盘: {} -> {} GB", id, new_size);
        self.action(id, json!({ "os-extend": { "new_size": new_size } }))
            .await
    }

    /// 回滚到快照 (需要 volume microversion >= 3.40, 在线扩容需要 3.42)
    pub async fn revert_to_snapshot(&self, id: &str, snapshot_id: &str) -> Result<()> {
        info!("回滚云盘: {} -> 快照 {}", id, snapshot_id);
        self.action(id, json!({ "revert": { "snapshot_id": snapshot_id } }))
            .await
    }

    pub async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<Snapshot> {
        info!("创建快照: {} -> {}", volume_id, name);
        let body: SnapshotBody = self
            .client
            .request(
                ServiceType::Volume,
                Method::POST,
                "/snapshots",
                Some(json!({
                    "snapshot": { "volume_id": volume_id, "name": name, "force": force }
                })),
            )
            .await?;
        Ok(body.snapshot)
    }

    pub async fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        let body: SnapshotBody = self
            .client
            .request(ServiceType::Volume, Method::GET, &format!("/snapshots/{}", id), None::<()>)
            .await?;
        Ok(body.snapshot)
    }

    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        info!("删除快照: {}", id);
        self.client
            .request_empty(
                ServiceType::Volume,
                Method::DELETE,
                &format!("/snapshots/{}", id),
                None::<()>,
            )
            .await
    }
}

//! 云主机管理 API
//!
//! 提供云主机生命周期操作：
//! - 查询、创建、删除
//! - 电源操作：重启、关机、开机、暂停、挂起、搁置
//! - 变更操作：调整规格、重命名、重建、冷迁移、热迁移
//! - 网卡与云盘的挂载/卸载

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::client::{CloudClient, ServiceType};
use crate::error::Result;
use crate::models::{
    CreateServerRequest, InterfaceAttachment, RebootType, Server, ServerQuery, VolumeAttachment,
};

#[derive(Deserialize)]
struct ServerBody {
    server: Server,
}

#[derive(Deserialize)]
struct ServersBody {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

#[derive(Deserialize)]
struct CreatedServerBody {
    server: CreatedServer,
}

#[derive(Deserialize)]
struct ConsoleBody {
    output: String,
}

#[derive(Deserialize)]
struct InterfacesBody {
    #[serde(rename = "interfaceAttachments")]
    interface_attachments: Vec<InterfaceAttachment>,
}

#[derive(Deserialize)]
struct InterfaceBody {
    #[serde(rename = "interfaceAttachment")]
    interface_attachment: InterfaceAttachment,
}

#[derive(Deserialize)]
struct VolumeAttachmentsBody {
    #[serde(rename = "volumeAttachments")]
    volume_attachments: Vec<VolumeAttachment>,
}

#[derive(Deserialize)]
struct VolumeAttachmentBody {
    #[serde(rename = "volumeAttachment")]
    volume_attachment: VolumeAttachment,
}

/// 云主机管理 API
pub struct ServerApi<'a> {
    client: &'a CloudClient,
}

impl<'a> ServerApi<'a> {
    /// 创建新的云主机 API 实例
    pub(crate) fn new(client: &'a CloudClient) -> Self {
        Self { client }
    }

    /// 获取云主机详情
    pub async fn get(&self, id: &str) -> Result<Server> {
        let body: ServerBody = self
            .client
            .request(ServiceType::Compute, Method::GET, &format!("/servers/{}", id), None::<()>)
            .await?;
        Ok(body.server)
    }

    /// 查询云主机列表 (详情)
    pub async fn list(&self, query: &ServerQuery) -> Result<Vec<Server>> {
        let body: ServersBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::GET,
                &format!("/servers/detail{}", query.to_query_string()),
                None::<()>,
            )
            .await?;
        Ok(body.servers)
    }

    /// 创建云主机, 返回新建云主机的 id
    pub async fn create(&self, req: &CreateServerRequest) -> Result<String> {
        info!("创建云主机: {}", req.name);
        let body: CreatedServerBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::POST,
                "/servers",
                Some(json!({ "server": req })),
            )
            .await?;
        Ok(body.server.id)
    }

    /// 删除云主机
    pub async fn delete(&self, id: &str) -> Result<()> {
        info!("删除云主机: {}", id);
        self.client
            .request_empty(ServiceType::Compute, Method::DELETE, &format!("/servers/{}", id), None::<()>)
            .await
    }

    /// 执行云主机 action
    pub async fn action(&self, id: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .request_empty(
                ServiceType::Compute,
                Method::POST,
                &format!("/servers/{}/action", id),
                Some(body),
            )
            .await
    }

    pub async fn reboot(&self, id: &str, kind: RebootType) -> Result<()> {
        info!("重启云主机: {} ({:?})", id, kind);
        self.action(id, json!({ "reboot": { "type": kind } })).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        info!("关闭云主机: {}", id);
        self.action(id, json!({ "os-stop": null })).await
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        info!("启动云主机: {}", id);
        self.action(id, json!({ "os-start": null })).await
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        info!("暂停云主机: {}", id);
        self.action(id, json!({ "pause": null })).await
    }

    pub async fn unpause(&self, id: &str) -> Result<()> {
        info!("恢复暂停的云主机: {}", id);
        self.action(id, json!({ "unpause": null })).await
    }

    pub async fn suspend(&self, id: &str) -> Result<()> {
        info!("挂起云主机: {}", id);
        self.action(id, json!({ "suspend": null })).await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        info!("恢复挂起的云主机: {}", id);
        self.action(id, json!({ "resume": null })).await
    }

    pub async fn shelve(&self, id: &str) -> Result<()> {
        info!("搁置云主机: {}", id);
        self.action(id, json!({ "shelve": null })).await
    }

    pub async fn unshelve(&self, id: &str) -> Result<()> {
        info!("取消搁置云主机: {}", id);
        self.action(id, json!({ "unshelve": null })).await
    }

    pub async fn resize(&self, id: &str, flavor_ref: &str) -> Result<()> {
        info!("调整云主机规格: {} -> {}", id, flavor_ref);
        self.action(id, json!({ "resize": { "flavorRef": flavor_ref } }))
            .await
    }

    pub async fn confirm_resize(&self, id: &str) -> Result<()> {
        info!("确认调整规格: {}", id);
        self.action(id, json!({ "confirmResize": null })).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        info!("重命名云主机: {} -> {}", id, name);
        self.client
            .request_empty(
                ServiceType::Compute,
                Method::PUT,
                &format!("/servers/{}", id),
                Some(json!({ "server": { "name": name } })),
            )
            .await
    }

    pub async fn rebuild(&self, id: &str, image_ref: &str) -> Result<()> {
        info!("重建云主机: {} (镜像 {})", id, image_ref);
        self.action(id, json!({ "rebuild": { "imageRef": image_ref } }))
            .await
    }

    /// 冷迁移
    pub async fn migrate(&self, id: &str, host: Option<&str>) -> Result<()> {
        info!("冷迁移云主机: {}", id);
        let body = match host {
            Some(host) => json!({ "migrate": { "host": host } }),
            None => json!({ "migrate": null }),
        };
        self.action(id, body).await
    }

    /// 热迁移, 块迁移由服务端自动判断
    pub async fn live_migrate(&self, id: &str, host: Option<&str>) -> Result<()> {
        info!("热迁移云主机: {}", id);
        self.action(
            id,
            json!({ "os-migrateLive": { "host": host, "block_migration": "auto" } }),
        )
        .await
    }

    /// 获取控制台日志
    pub async fn console_output(&self, id: &str, length: Option<u32>) -> Result<String> {
        let body: ConsoleBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::POST,
                &format!("/servers/{}/action", id),
                Some(json!({ "os-getConsoleOutput": { "length": length } })),
            )
            .await?;
        Ok(body.output)
    }

    pub async fn list_interfaces(&self, id: &str) -> Result<Vec<InterfaceAttachment>> {
        let body: InterfacesBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::GET,
                &format!("/servers/{}/os-interface", id),
                None::<()>,
            )
            .await?;
        Ok(body.interface_attachments)
    }

    pub async fn attach_interface(&self, id: &str, port_id: &str) -> Result<InterfaceAttachment> {
        info!("挂载网卡: {} <- {}", id, port_id);
        let body: InterfaceBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::POST,
                &format!("/servers/{}/os-interface", id),
                Some(json!({ "interfaceAttachment": { "port_id": port_id } })),
            )
            .await?;
        Ok(body.interface_attachment)
    }

    pub async fn detach_interface(&self, id: &str, port_id: &str) -> Result<()> {
        info!("卸载网卡: {} -> {}", id, port_id);
        self.client
            .request_empty(
                ServiceType::Compute,
                Method::DELETE,
                &format!("/servers/{}/os-interface/{}", id, port_id),
                None::<()>,
            )
            .await
    }

    pub async fn list_volume_attachments(&self, id: &str) -> Result<Vec<VolumeAttachment>> {
        let body: VolumeAttachmentsBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::GET,
                &format!("/servers/{}/os-volume_attachments", id),
                None::<()>,
            )
            .await?;
        Ok(body.volume_attachments)
    }

    pub async fn attach_volume(&self, id: &str, volume_id: &str) -> Result<VolumeAttachment> {
        info!("挂载云盘: {} <- {}", id, volume_id);
        let body: VolumeAttachmentBody = self
            .client
            .request(
                ServiceType::Compute,
                Method::POST,
                &format!("/servers/{}/os-volume_attachments", id),
                Some(json!({ "volumeAttachment": { "volumeId": volume_id } })),
            )
            .await?;
        Ok(body.volume_attachment)
    }

    pub async fn detach_volume(&self, id: &str, volume_id: &str) -> Result<()> {
        info!("卸载云盘: {} -> {}", id, volume_id);
        self.client
            .request_empty(
                ServiceType::Compute,
                Method::DELETE,
                &format!("/servers/{}/os-volume_attachments/{}", id, volume_id),
                None::<()>,
            )
            .await
    }
}

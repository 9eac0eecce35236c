//! 网络 API

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::client::{CloudClient, ServiceType};
use crate::error::Result;
use crate::models::{CreatePortRequest, Port};

#[derive(Deserialize)]
struct PortBody {
    port: Port,
}

/// 网络 API
pub struct NetworkApi<'a> {
    client: &'a CloudClient,
}

impl<'a> NetworkApi<'a> {
    pub(crate) fn new(client: &'a CloudClient) -> Self {
        Self { client }
    }

    pub async fn create_port(&self, req: &CreatePortRequest) -> Result<Port> {
        info!("创建端口: 网络 {}", req.network_id);
        let body: PortBody = self
            .client
            .request(
                ServiceType::Network,
                Method::POST,
                "/ports",
                Some(json!({ "port": req })),
            )
            .await?;
        Ok(body.port)
    }

    pub async fn get_port(&self, id: &str) -> Result<Port> {
        let body: PortBody = self
            .client
            .request(ServiceType::Network, Method::GET, &format!("/ports/{}", id), None::<()>)
            .await?;
        Ok(body.port)
    }

    pub async fn delete_port(&self, id: &str) -> Result<()> {
        info!("删除端口: {}", id);
        self.client
            .request_empty(ServiceType::Network, Method::DELETE, &format!("/ports/{}", id), None::<()>)
            .await
    }
}

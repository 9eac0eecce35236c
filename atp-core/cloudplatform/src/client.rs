//! 云平台客户端核心实现

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::{NetworkApi, ServerApi, VolumeApi};
use crate::error::{CloudError, Result};

/// 云平台客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// 认证服务地址, 如 `http://controller:5000/v3`
    #[serde(default)]
    pub auth_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub project_name: String,

    #[serde(default = "default_domain")]
    pub user_domain_name: String,

    #[serde(default = "default_domain")]
    pub project_domain_name: String,

    /// 区域过滤, 为空时取目录中第一个匹配的端点
    #[serde(default)]
    pub region: Option<String>,

    /// 端点类型 (public / internal / admin)
    #[serde(default = "default_interface")]
    pub interface: String,

    /// 按服务类型覆盖端点 (compute / volumev3 / network)
    #[serde(default)]
    pub endpoint_override: HashMap<String, String>,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// 是否验证 SSL 证书
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    #[serde(default = "default_compute_microversion")]
    pub compute_microversion: String,

    #[serde(default = "default_volume_microversion")]
    pub volume_microversion: String,
}

fn default_domain() -> String {
    "Default".to_string()
}

fn default_interface() -> String {
    "public".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_verify_ssl() -> bool {
    true
}

fn default_compute_microversion() -> String {
    "2.60".to_string()
}

fn default_volume_microversion() -> String {
    "3.42".to_string()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            username: String::new(),
            password: String::new(),
            project_name: String::new(),
            user_domain_name: default_domain(),
            project_domain_name: default_domain(),
            region: None,
            interface: default_interface(),
            endpoint_override: HashMap::new(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            verify_ssl: default_verify_ssl(),
            compute_microversion: default_compute_microversion(),
            volume_microversion: default_volume_microversion(),
        }
    }
}

/// 服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Compute,
    Volume,
    Network,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [ServiceType::Compute, ServiceType::Volume, ServiceType::Network];

    /// 服务目录中的类型名称
    pub fn catalog_type(&self) -> &'static str {
        match self {
            ServiceType::Compute => "compute",
            ServiceType::Volume => "volumev3",
            ServiceType::Network => "network",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.catalog_type())
    }
}

/// 服务目录条目
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,

    #[serde(default)]
    pub region_id: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    pub url: String,
}

/// 从服务目录中选出各服务的端点
pub fn select_endpoints(
    catalog: &[CatalogEntry],
    region: Option<&str>,
    interface: &str,
) -> HashMap<ServiceType, String> {
    let mut endpoints = HashMap::new();

    for service in ServiceType::ALL {
        let found = catalog
            .iter()
            .filter(|entry| entry.service_type == service.catalog_type())
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|ep| ep.interface == interface)
            .find(|ep| match region {
                Some(region) => {
                    ep.region_id.as_deref() == Some(region) || ep.region.as_deref() == Some(region)
                }
                None => true,
            });

        if let Some(ep) = found {
            endpoints.insert(service, ep.url.trim_end_matches('/').to_string());
        }
    }

    endpoints
}

/// 令牌到期前多久主动续期
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// 认证会话
#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    endpoints: HashMap<ServiceType, String>,
}

impl Session {
    fn expiring(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| at - ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) <= now)
            .unwrap_or(false)
    }
}

/// 云平台客户端
pub struct CloudClient {
    /// HTTP 客户端
    http_client: Client,

    /// 认证会话
    session: Arc<RwLock<Option<Session>>>,

    /// 串行化重新认证, 并发 worker 同时遇到过期令牌时只登录一次
    login_lock: Mutex<()>,

    /// 配置
    config: CloudConfig,
}

impl CloudClient {
    /// 创建新的云平台客户端
    pub fn new(config: CloudConfig) -> Result<Self> {
        url::Url::parse(&config.auth_url)
            .map_err(|e| CloudError::ConfigError(format!("无效的认证地址 {}: {}", config.auth_url, e)))?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| CloudError::HttpError(e.to_string()))?;

        Ok(Self {
            http_client,
            session: Arc::new(RwLock::new(None)),
            login_lock: Mutex::new(()),
            config,
        })
    }

    /// 创建客户端并完成认证
    pub async fn connect(config: CloudConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.login().await?;
        Ok(client)
    }

    /// 密码认证, 获取令牌与服务目录
    pub async fn login(&self) -> Result<()> {
        info!("云平台认证: {}@{}", self.config.username, self.config.project_name);

        let auth_url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.user_domain_name },
                            "password": self.config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.config.project_name,
                        "domain": { "name": self.config.project_domain_name },
                    }
                }
            }
        });

        let response = self
            .http_client
            .post(&auth_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CloudError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CloudError::AuthError(format!("认证失败 [{}]: {}", status, text)));
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CloudError::AuthError("未获取到 X-Subject-Token".to_string()))?
            .to_string();

        #[derive(Deserialize)]
        struct TokenBody {
            token: TokenInfo,
        }
        #[derive(Deserialize)]
        struct TokenInfo {
            #[serde(default)]
            expires_at: Option<DateTime<Utc>>,
            #[serde(default)]
            catalog: Vec<CatalogEntry>,
        }

        let body: TokenBody = response
            .json()
            .await
            .map_err(|e| CloudError::ParseError(e.to_string()))?;

        let mut endpoints = select_endpoints(
            &body.token.catalog,
            self.config.region.as_deref(),
            &self.config.interface,
        );
        for service in ServiceType::ALL {
            if let Some(url) = self.config.endpoint_override.get(service.catalog_type()) {
                endpoints.insert(service, url.trim_end_matches('/').to_string());
            }
            match endpoints.get(&service) {
                Some(url) => debug!("服务端点 {}: {}", service, url),
                None => warn!("服务目录中没有 {} 端点", service),
            }
        }

        let expires_at = body.token.expires_at;
        *self.session.write().await = Some(Session {
            token,
            expires_at,
            endpoints,
        });

        match expires_at {
            Some(at) => info!("云平台认证成功, 令牌有效期至 {}", at),
            None => info!("云平台认证成功"),
        }
        Ok(())
    }

    /// 获取云主机 API
    pub fn server(&self) -> ServerApi<'_> {
        ServerApi::new(self)
    }

    /// 获取块存储 API
    pub fn volume(&self) -> VolumeApi<'_> {
        VolumeApi::new(self)
    }

    /// 获取网络 API
    pub fn network(&self) -> NetworkApi<'_> {
        NetworkApi::new(self)
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// 当前会话仍持有 `stale` 令牌时重新认证; 其他 worker 已续期则直接返回
    async fn reauthenticate(&self, stale: &str) -> Result<()> {
        let _guard = self.login_lock.lock().await;
        let current = self.session.read().await.as_ref().map(|s| s.token.clone());
        if current.as_deref() != Some(stale) {
            return Ok(());
        }
        self.login().await
    }

    async fn session_for(&self, service: ServiceType) -> Result<(String, String)> {
        let (token, base, expiring) = {
            let session = self.session.read().await;
            let session = session
                .as_ref()
                .ok_or_else(|| CloudError::AuthError("未认证，请先登录".to_string()))?;
            let base = session
                .endpoints
                .get(&service)
                .cloned()
                .ok_or_else(|| CloudError::EndpointNotFound(service.to_string()))?;
            (session.token.clone(), base, session.expiring(Utc::now()))
        };

        if !expiring {
            return Ok((token, base));
        }

        info!("令牌即将过期, 重新认证");
        self.reauthenticate(&token).await?;
        let session = self.session.read().await;
        let session = session
            .as_ref()
            .ok_or_else(|| CloudError::AuthError("未认证，请先登录".to_string()))?;
        let base = session
            .endpoints
            .get(&service)
            .cloned()
            .ok_or_else(|| CloudError::EndpointNotFound(service.to_string()))?;
        Ok((session.token.clone(), base))
    }

    async fn send<T: Serialize>(
        &self,
        service: ServiceType,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<Response> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CloudError::ParseError(e.to_string()))?;

        let (token, base) = self.session_for(service).await?;
        let response = self
            .send_once(service, method.clone(), &base, path, &token, body.as_ref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(response, path).await;
        }

        // 令牌被服务端提前吊销或已过期: 重新认证后重放一次
        warn!("API 请求返回 401, 重新认证后重试: {} {}", method, path);
        self.reauthenticate(&token).await?;
        let (token, base) = self.session_for(service).await?;
        let response = self
            .send_once(service, method, &base, path, &token, body.as_ref())
            .await?;
        Self::check_status(response, path).await
    }

    async fn send_once(
        &self,
        service: ServiceType,
        method: Method,
        base: &str,
        path: &str,
        token: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = match service {
            ServiceType::Network => {
                format!("{}/v2.0{}", base.trim_end_matches("/v2.0"), path)
            }
            _ => format!("{}{}", base, path),
        };
        debug!("API 请求: {} {}", method, url);

        let mut request = self
            .http_client
            .request(method, &url)
            .header("X-Auth-Token", token)
            .header("Content-Type", "application/json");

        request = match service {
            ServiceType::Compute => request.header(
                "OpenStack-API-Version",
                format!("compute {}", self.config.compute_microversion),
            ),
            ServiceType::Volume => request.header(
                "OpenStack-API-Version",
                format!("volume {}", self.config.volume_microversion),
            ),
            ServiceType::Network => request,
        };

        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| CloudError::HttpError(e.to_string()))
    }

    async fn check_status(response: Response, path: &str) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误响应".to_string());
            warn!("API 请求失败: {} - {}", status, error_text);
            return Err(CloudError::ApiError(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// 发送 HTTP 请求并解析 JSON 响应
    pub(crate) async fn request<T: Serialize, R: DeserializeOwned>(
        &self,
        service: ServiceType,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<R> {
        let response = self.send(service, method, path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| CloudError::ParseError(e.to_string()))
    }

    /// 发送 HTTP 请求, 忽略响应体 (202/204)
    pub(crate) async fn request_empty<T: Serialize>(
        &self,
        service: ServiceType,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<()> {
        self.send(service, method, path, body).await?;
        Ok(())
    }
}

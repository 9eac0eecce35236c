//! 用例运行状态接口
//!
//! - `GET /api/tasks?version=N`: 等到任务列表版本超过 N (最多 30 秒) 后返回
//! - `GET /api/report`: 当前汇总

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atp_common::CancellationToken;
use atp_executor::{CaseSummary, TaskStore, TestTask};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct WebState {
    pub case_name: Arc<str>,
    pub store: TaskStore,
    pub poll_timeout: Duration,
}

impl WebState {
    pub fn new(case_name: &str, store: TaskStore) -> Self {
        Self {
            case_name: Arc::from(case_name),
            store,
            poll_timeout: LONG_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    /// 客户端已看到的版本
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TasksResponse {
    pub version: u64,
    pub tasks: Vec<TestTask>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub name: String,
    pub version: u64,
    pub summary: CaseSummary,
}

async fn list_tasks(State(state): State<WebState>, Query(query): Query<TasksQuery>) -> Json<TasksResponse> {
    let (version, tasks) = state.store.wait_changed(query.version, state.poll_timeout).await;
    Json(TasksResponse { version, tasks })
}

async fn report(State(state): State<WebState>) -> Json<ReportResponse> {
    let tasks = state.store.snapshot();
    Json(ReportResponse {
        name: state.case_name.to_string(),
        version: state.store.version(),
        summary: CaseSummary::from_tasks(&tasks),
    })
}

pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/api/tasks", get(list_tasks))
        .route("/api/report", get(report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 后台运行的状态接口
///
/// 与用例的取消令牌相互独立: Ctrl-C 只停止用例, 接口继续服务,
/// 直到最终报告发布后由调用方 [`shutdown`](WebServer::shutdown)。
pub struct WebServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl WebServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接收新连接, 等待进行中的请求返回
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        match self.handle.await {
            Ok(Ok(())) => info!("任务状态接口已停止"),
            Ok(Err(e)) => warn!("任务状态接口异常退出: {}", e),
            Err(e) => warn!("任务状态接口任务异常: {}", e),
        }
    }
}

/// 在后台启动接口
pub async fn spawn(addr: SocketAddr, state: WebState) -> Result<WebServer> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    let local_addr = listener.local_addr().context("读取监听地址失败")?;
    info!("任务状态接口: http://{}/api/tasks", local_addr);

    let app = create_router(state);
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    Ok(WebServer {
        local_addr,
        shutdown,
        handle,
    })
}

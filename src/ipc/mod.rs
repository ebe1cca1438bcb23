use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::protocol::{self, Envelope, ModuleInfo, ModuleList, ProtocolError};
use crate::registry::ModuleStatus;
use crate::supervisor::{ModuleRequest, Supervisor, SupervisorError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleListResponse {
    pub modules: Vec<ModuleInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleStatusResponse {
    pub success: bool,
    pub name: String,
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeLockRequest {
    pub enabled: bool,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(supervisor: Arc<Supervisor>, listen_addr: &str) -> Self {
        Self {
            supervisor,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/modules", get(list_modules))
            .route("/api/modules/wire", get(module_list_wire))
            .route("/api/module/:name", get(get_module))
            .route("/api/module/:name/status", get(check_module_status))
            .route("/api/module/:name/start", post(start_module_handler))
            .route("/api/module/:name/stop", post(stop_module_handler))
            .route("/api/requests", post(enqueue_request))
            .route("/api/wire", post(wire_request))
            .route("/api/running", get(running_state))
            .route("/api/config/wake-lock", put(set_wake_lock))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.clone())
    }

    /// `shutdown` 이 끝나면 진행 중인 요청을 마치고 반환
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// GET /api/modules - 알려진 모든 모듈과 상태
async fn list_modules(State(state): State<IPCServer>) -> impl IntoResponse {
    let modules = state
        .supervisor
        .modules()
        .iter()
        .map(ModuleInfo::from)
        .collect();
    Json(ModuleListResponse { modules })
}

/// GET /api/modules/wire - 모듈 목록 envelope (application/octet-stream)
async fn module_list_wire(State(state): State<IPCServer>) -> impl IntoResponse {
    match encode_module_list(&state) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => encode_failure(e),
    }
}

fn encode_module_list(state: &IPCServer) -> Result<Vec<u8>, ProtocolError> {
    let modules = state.supervisor.modules();
    ModuleList::from(modules.as_slice())
        .to_envelope()
        .and_then(|env| env.encode())
}

fn encode_failure(e: ProtocolError) -> axum::response::Response {
    tracing::error!("[IPC] Failed to encode module list: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

/// GET /api/module/:name - 기록된 상태 (재확인하지 않음)
async fn get_module(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> Result<Json<ModuleInfo>, SupervisorError> {
    state
        .supervisor
        .module(&name)
        .map(|m| Json(ModuleInfo::from(&m)))
        .ok_or(SupervisorError::ModuleNotFound(name))
}

/// GET /api/module/:name/status - pid 파일/프로세스를 즉시 재확인
async fn check_module_status(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> Result<Json<ModuleStatusResponse>, SupervisorError> {
    let status = state.supervisor.check_status(&name).await?;
    Ok(Json(ModuleStatusResponse {
        success: true,
        name,
        status,
    }))
}

/// POST /api/module/:name/start - 처리 완료까지 대기
async fn start_module_handler(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> Result<Json<ModuleStatusResponse>, SupervisorError> {
    let status = state.supervisor.start_module(&name).await?;
    Ok(Json(ModuleStatusResponse {
        success: status == ModuleStatus::Running,
        name,
        status,
    }))
}

/// POST /api/module/:name/stop - 처리 완료까지 대기
async fn stop_module_handler(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> Result<Json<ModuleStatusResponse>, SupervisorError> {
    let status = state.supervisor.stop_module(&name).await?;
    Ok(Json(ModuleStatusResponse {
        success: status == ModuleStatus::Stopped,
        name,
        status,
    }))
}

/// POST /api/requests - `{"action":"start","module":"iotrace"}` 를 큐에 넣고 바로 202
async fn enqueue_request(
    State(state): State<IPCServer>,
    Json(request): Json<ModuleRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    state.supervisor.request(request.clone()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "queued": request })),
    ))
}

/// POST /api/wire - 바이너리 envelope 로 된 시작/정지 요청을 큐에 넣고 모듈 목록 envelope 로 응답
async fn wire_request(State(state): State<IPCServer>, body: Bytes) -> impl IntoResponse {
    let request = match Envelope::decode(&body).and_then(|env| protocol::decode_request(&env)) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("[IPC] Rejected wire request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response();
        }
    };

    if let Err(e) = state.supervisor.request(request).await {
        return e.into_response();
    }
    // 응답은 현재 모듈 목록 envelope
    match encode_module_list(&state) {
        Ok(bytes) => (
            StatusCode::ACCEPTED,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => encode_failure(e),
    }
}

/// GET /api/running - 실행 카운터, 타이머, wake lock, 워커 상태
async fn running_state(State(state): State<IPCServer>) -> impl IntoResponse {
    let snapshot = state.supervisor.running_snapshot();
    let worker = state.supervisor.worker_status().await;
    Json(json!({
        "running": snapshot,
        "worker": worker,
    }))
}

/// PUT /api/config/wake-lock - wake lock 사용 여부 변경 (즉시 반영)
async fn set_wake_lock(
    State(state): State<IPCServer>,
    Json(req): Json<WakeLockRequest>,
) -> impl IntoResponse {
    state.supervisor.set_wake_lock_enabled(req.enabled);
    tracing::info!("[IPC] Wake lock {}", if req.enabled { "enabled" } else { "disabled" });
    Json(json!({ "success": true, "enabled": req.enabled }))
}

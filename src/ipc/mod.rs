use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::events::{EventFeed, SystemEvent};
use crate::supervisor::error::SupervisorError;
use crate::supervisor::TunnelSupervisor;

/// IPC 요청/응답 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelActionResponse {
    pub success: bool,
    pub port: Option<u16>,
}

/// 플랫폼 알림 글루/진단 도구가 이벤트를 주입할 때 쓰는 페이로드
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    /// "mount" | "sleep" | "wake"
    pub kind: String,
    /// mount 이벤트의 볼륨 경로
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<TunnelSupervisor>,
    pub feed: EventFeed,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(supervisor: Arc<TunnelSupervisor>, feed: EventFeed, listen_addr: &str) -> Self {
        Self {
            supervisor,
            feed,
            listen_addr: listen_addr.to_string(),
        }
    }

    /// Router 생성 (테스트에서 oneshot으로 직접 구동 가능)
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health))
            .route("/api/status", get(get_status))
            .route("/api/tunnel/start", post(start_tunnel))
            .route("/api/tunnel/stop", post(stop_tunnel))
            .route("/api/event", post(inject_event))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// GET /api/health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /api/status - 현재 상태 스냅샷
async fn get_status(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(state.supervisor.status())
}

/// POST /api/tunnel/start - 수동 시작
async fn start_tunnel(
    State(state): State<IPCServer>,
) -> Result<Json<TunnelActionResponse>, SupervisorError> {
    state.supervisor.start().await?;
    Ok(Json(TunnelActionResponse {
        success: true,
        port: Some(state.supervisor.config().local_port),
    }))
}

/// POST /api/tunnel/stop - 수동 정지 (idempotent)
async fn stop_tunnel(State(state): State<IPCServer>) -> impl IntoResponse {
    state.supervisor.stop(true).await;
    Json(TunnelActionResponse {
        success: true,
        port: None,
    })
}

/// POST /api/event - 시스템 이벤트 주입 (플랫폼 글루, 진단용)
async fn inject_event(
    State(state): State<IPCServer>,
    Json(req): Json<EventRequest>,
) -> impl IntoResponse {
    let event = match req.kind.as_str() {
        "mount" => match req.path {
            Some(path) => SystemEvent::VolumeMounted(path),
            None => {
                let error = json!({ "error": "mount event requires 'path'" });
                return (StatusCode::BAD_REQUEST, Json(error)).into_response();
            }
        },
        "sleep" => SystemEvent::WillSleep,
        "wake" => SystemEvent::DidWake,
        other => {
            let error = json!({ "error": format!("unknown event kind: {}", other) });
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    state.feed.emit(event);
    (StatusCode::OK, Json(json!({ "success": true }))).into_response()
}

//! Supervisor 전용 에러 타입 — 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

/// start()/stop() 경로에서 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Helper executable '{0}' not found")]
    HelperNotFound(String),

    #[error("No target device connected")]
    NoDeviceConnected,

    #[error("Another start is already in progress")]
    StartInProgress,

    #[error("Failed to spawn helper: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// 일시적 실패 여부 — 예약된 2차 재시도 대상인지 결정.
    /// HelperNotFound는 설치/패키징 문제라 재시도해도 해결되지 않습니다.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceConnected | Self::StartInProgress | Self::SpawnFailed(_)
        )
    }

    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HelperNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoDeviceConnected | Self::StartInProgress => StatusCode::CONFLICT,
            Self::SpawnFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HelperNotFound(_) => "HELPER_NOT_FOUND",
            Self::NoDeviceConnected => "NO_DEVICE_CONNECTED",
            Self::StartInProgress => "START_IN_PROGRESS",
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

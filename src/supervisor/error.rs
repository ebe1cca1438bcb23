//! Supervisor 전용 에러 타입: 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

use super::pid_file::PidFileError;

/// 모듈 시작/정지 요청 처리 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Module '{0}' is not running")]
    NotRunning(String),

    #[error("Pid file of module '{module}' unusable: {source}")]
    PidFile {
        module: String,
        #[source]
        source: PidFileError,
    },

    #[error("Script for module '{module}' failed with exit code {exit_code}")]
    CommandFailed { module: String, exit_code: i32 },

    #[error("Request queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidModuleName(_) => StatusCode::BAD_REQUEST,
            Self::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotRunning(_) => StatusCode::CONFLICT,
            Self::PidFile { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CommandFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
            Self::InvalidModuleName(_) => "INVALID_MODULE_NAME",
            Self::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            Self::NotRunning(_) => "NOT_RUNNING",
            Self::PidFile { .. } => "PID_FILE_ERROR",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::QueueClosed => "QUEUE_CLOSED",
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

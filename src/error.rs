use std::io;
use std::path::PathBuf;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::exec::ExecutionLog;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to start process:\n{log}")]
    Spawn { log: ExecutionLog },
    #[error("Process I/O failed:\n{log}")]
    Io { log: ExecutionLog },
    #[error("Process exited with failure code {code}:\n{log}")]
    FailureCode { code: i32, log: ExecutionLog },
    #[error("Process terminated without an exit code:\n{log}")]
    Terminated {
        signal: Option<i32>,
        log: ExecutionLog,
    },
}

impl ExecError {
    pub fn log(&self) -> &ExecutionLog {
        match self {
            ExecError::Spawn { log }
            | ExecError::Io { log }
            | ExecError::FailureCode { log, .. }
            | ExecError::Terminated { log, .. } => log,
        }
    }

    pub fn into_log(self) -> ExecutionLog {
        match self {
            ExecError::Spawn { log }
            | ExecError::Io { log }
            | ExecError::FailureCode { log, .. }
            | ExecError::Terminated { log, .. } => log,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Pin not found: {0}")]
    NotFoundPin(u32),
    #[error("Task not found: {0}")]
    NotFoundTask(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unparsable pin value in {}: {content:?}", path.display())]
    Parse { path: PathBuf, content: String },
    #[error("Task {task} failed. See {}", log_path.display())]
    TaskFailed { task: String, log_path: PathBuf },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundPin(_) | AppError::NotFoundTask(_) => StatusCode::NOT_FOUND,
            AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                StatusCode::FORBIDDEN
            }
            AppError::Io { .. }
            | AppError::Parse { .. }
            | AppError::TaskFailed { .. }
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

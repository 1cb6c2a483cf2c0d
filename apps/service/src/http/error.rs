use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::error::EngineError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Engine(EngineError::UnknownPushToken)
            | AppError::Engine(EngineError::TargetNotFound(_))
            | AppError::Engine(EngineError::NotRunning(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::InvalidConfig { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Engine(EngineError::AlreadyRunning(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let msg = match self {
            // an inactive push target looks the same as an unknown one to the caller
            AppError::Engine(EngineError::NotRunning(_)) => "Target not found or not active".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "ok": false, "msg": msg }))
    }
}

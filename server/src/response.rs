//! Uniform JSON envelopes for every API answer.
//!
//! Success: `{"status": "success", "message": ..., "data": ...}`
//! Failure: `{"status": "failed", "message": ...}`

use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub message: String,
}

pub fn success<T: Serialize>(data: T, message: impl Into<String>, status: StatusCode) -> HttpResponse {
    HttpResponse::build(status).json(SuccessEnvelope {
        status: STATUS_SUCCESS,
        message: message.into(),
        data,
    })
}

pub fn error(message: impl Into<String>, status: StatusCode) -> HttpResponse {
    HttpResponse::build(status).json(ErrorEnvelope {
        status: STATUS_FAILED,
        message: message.into(),
    })
}

pub fn unauthorized(reason: &str) -> HttpResponse {
    error(format!("Unauthorized: {reason}"), StatusCode::UNAUTHORIZED)
}

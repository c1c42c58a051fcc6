use serde::Serialize;

use crate::{
    auth_token::now_secs,
    dispatch::{HandlerContext, HandlerResponse},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: u64,
}

/// Liveness only; does not touch the database.
pub async fn check(_ctx: HandlerContext) -> Result<HandlerResponse> {
    let response = HealthCheckResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now_secs(),
    };

    HandlerResponse::ok(response, "Service is healthy")
}

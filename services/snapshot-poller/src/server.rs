//! Scheduler-facing HTTP surface

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::driver::{PollDriver, PollState};
use crate::error::{PollError, PollFailure};
use crate::models::{ContinuationToken, PollOutcome, ResourceSnapshot, ScanUnit};

/// What the scheduler receives for a submitted unit
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub resources: Vec<ResourceSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<ContinuationToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub state: String,
    /// Resubmit from here, or from scratch when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ContinuationToken>,
}

impl From<PollOutcome> for PollResponse {
    fn from(outcome: PollOutcome) -> Self {
        Self {
            resources: outcome.resources,
            next_token: outcome.next_token,
            error: None,
        }
    }
}

impl From<PollFailure> for PollResponse {
    fn from(failure: PollFailure) -> Self {
        Self {
            resources: Vec::new(),
            next_token: None,
            error: Some(ErrorBody {
                message: failure.to_string(),
                state: failure.state.to_string(),
                resume_token: failure.resume_token,
            }),
        }
    }
}

impl From<Result<PollOutcome, PollFailure>> for PollResponse {
    fn from(result: Result<PollOutcome, PollFailure>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(failure) => failure.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePollRequest {
    pub unit: ScanUnit,
    #[serde(alias = "resource_arn")]
    pub resource_arn: String,
}

pub fn router(driver: Arc<PollDriver>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/poll", post(poll))
        .route("/api/poll/resource", post(poll_resource))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snapshot-poller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn poll(
    State(driver): State<Arc<PollDriver>>,
    Json(unit): Json<ScanUnit>,
) -> (StatusCode, Json<PollResponse>) {
    respond(driver.poll(&unit).await)
}

async fn poll_resource(
    State(driver): State<Arc<PollDriver>>,
    Json(req): Json<ResourcePollRequest>,
) -> (StatusCode, Json<PollResponse>) {
    respond(driver.poll_resource(&req.unit, &req.resource_arn).await)
}

fn respond(result: Result<PollOutcome, PollFailure>) -> (StatusCode, Json<PollResponse>) {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(failure) => match (&failure.error, failure.state) {
            (PollError::InvalidUnit(_), _) => StatusCode::BAD_REQUEST,
            (PollError::Auth(_), PollState::Init) => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_GATEWAY,
        },
    };
    (status, Json(result.into()))
}

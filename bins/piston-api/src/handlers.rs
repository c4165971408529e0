// HTTP route handlers for the Piston API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use piston_common::types::{ExecuteRequest, ExecuteResponse};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

/// POST /execute - Run a submission and return its result
pub async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed request");
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    let (language, code) = match request.into_submission() {
        Ok(submission) => submission,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    info!(language = %language, source_size = code.len(), "Executing submission");

    let _in_flight = metrics::InFlight::start();
    let timer = metrics::JOB_DURATION.start_timer();

    // Own task: a dropped connection must not abort the job mid-run,
    // and a panic stays contained to this submission
    let executor = state.executor.clone();
    let task_language = language.clone();
    let joined = tokio::spawn(async move { executor.execute(&task_language, &code).await }).await;
    timer.observe_duration();

    match joined {
        Ok(Ok(result)) => {
            let outcome = if result.timed_out {
                "timeout"
            } else if result.exit_status == 0 {
                "success"
            } else {
                "failure"
            };
            metrics::record_outcome(outcome);
            (StatusCode::OK, Json(ExecuteResponse::new(language, result))).into_response()
        }
        Ok(Err(e)) if e.is_client_error() => {
            metrics::record_outcome("unsupported");
            info!(language = %language, "Unsupported language");
            error_response(StatusCode::BAD_REQUEST, "Unsupported language")
        }
        Ok(Err(e)) => {
            metrics::record_outcome("error");
            error!(language = %language, error = %e, "Execution failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            metrics::record_outcome("error");
            error!(language = %language, error = %e, "Execution task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Execution aborted")
        }
    }
}

/// GET /runtimes - List supported languages
pub async fn list_runtimes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.executor.registry().runtimes())
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn export_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

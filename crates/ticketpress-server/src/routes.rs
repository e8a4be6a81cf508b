// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP surface: print ingress, printer settings, and read-only job
// inspection.  Handlers stay thin; everything goes through `AppServices`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{error, info};

use ticketpress_core::error::TicketpressError;
use ticketpress_core::types::{JobId, JobStatus, PrinterSettingsUpdate};

use crate::services::app_services::AppServices;

/// Jobs returned by the list endpoint when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Upper bound on a single list page.
pub const MAX_LIST_LIMIT: usize = 500;

pub fn router(services: AppServices) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/print-jobs", post(create_print_job).get(list_print_jobs))
        .route("/api/print-jobs/stats", get(print_job_stats))
        .route("/api/print-jobs/:id", get(get_print_job))
        .route(
            "/api/printer-settings",
            get(get_printer_settings).put(put_printer_settings),
        )
        .layer(Extension(services))
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "ok": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn service_error(err: TicketpressError) -> Response {
    if err.is_client_error() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_payload", err.to_string());
    }
    error!(error = %err, "request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "persistence_error",
        err.to_string(),
    )
}

/// Parse a JSON body ourselves so malformed input gets the same error
/// shape as a semantically invalid one.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_payload",
            format!("malformed JSON body: {e}"),
        )
    })
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

pub async fn create_print_job(
    Extension(services): Extension<AppServices>,
    body: Bytes,
) -> Response {
    let body: Value = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.blocking(move |svc| svc.submit(body)).await {
        Ok(id) => Json(json!({ "ok": true, "id": id })).into_response(),
        Err(e) => service_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_print_jobs(
    Extension(services): Extension<AppServices>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(label) => match JobStatus::parse(label) {
            Some(status) => Some(status),
            None => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    "status must be one of: queued, printing, done, failed",
                );
            }
        },
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match services
        .blocking(move |svc| svc.list_jobs(status, limit))
        .await
    {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(e) => service_error(e),
    }
}

pub async fn get_print_job(
    Extension(services): Extension<AppServices>,
    Path(raw_id): Path<String>,
) -> Response {
    let Ok(id) = raw_id.parse::<i64>() else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("job id must be an integer, got {raw_id:?}"),
        );
    };

    match services.blocking(move |svc| svc.get_job(JobId(id))).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(e) => service_error(e),
    }
}

pub async fn print_job_stats(Extension(services): Extension<AppServices>) -> Response {
    match services.blocking(|svc| svc.stats()).await {
        Ok(stats) => Json(json!({
            "queued": stats.queued,
            "printing": stats.printing,
            "done": stats.done,
            "failed": stats.failed,
            "total": stats.total(),
        }))
        .into_response(),
        Err(e) => service_error(e),
    }
}

pub async fn get_printer_settings(Extension(services): Extension<AppServices>) -> Response {
    match services.blocking(|svc| svc.printer_settings()).await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => service_error(e),
    }
}

pub async fn put_printer_settings(
    Extension(services): Extension<AppServices>,
    body: Bytes,
) -> Response {
    let update: PrinterSettingsUpdate = match parse_body(&body) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match services
        .blocking(move |svc| svc.update_printer_settings(&update))
        .await
    {
        Ok(settings) => {
            info!(printer = %settings.address(), "printer settings changed via API");
            Json(settings).into_response()
        }
        Err(e) => service_error(e),
    }
}

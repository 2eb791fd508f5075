//! # System Handlers
//!
//! Liveness/readiness and Prometheus exposition.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use shared::database;

use crate::api::dto::HealthResponse;
use crate::AppState;

/// Health check with dependency states.
///
/// # Route
///
/// `GET /health`
///
/// # Responses
///
/// - **200 OK**: both stores reachable
/// - **503 Service Unavailable**: either store is down; the body names
///   which
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database_up = database::health_check(&state.db_pool).await.is_ok();
    let store_up = state.store.ping().await.is_ok();

    let response = HealthResponse {
        status: if database_up && store_up { "healthy" } else { "degraded" }.to_string(),
        service: state.service_name.clone(),
        database: if database_up { "up" } else { "down" }.to_string(),
        ephemeral_store: if store_up { "up" } else { "down" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };

    if database_up && store_up {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// Prometheus text exposition.
///
/// # Route
///
/// `GET /metrics`
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(state.metrics.export())
}

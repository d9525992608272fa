use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::analysis::AnalyticsEngine;
use crate::types::ExperimentResource;

/// Routes of the analytics service: the assessment endpoint and a health
/// probe.
pub fn router(engine: Arc<AnalyticsEngine>) -> Router {
    Router::new()
        .route("/assessment", post(assessment))
        .route("/health_check", get(health_check))
        .with_state(engine)
}

/// Assess one experiment iteration and return the resource with
/// `status.analysis` populated.
async fn assessment(
    State(engine): State<Arc<AnalyticsEngine>>,
    Json(expr): Json<ExperimentResource>,
) -> Json<ExperimentResource> {
    info!(
        "assessment requested for {:?} experiment",
        expr.spec.strategy.testing_pattern
    );
    Json(engine.assess(expr).await)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "Ok"}))
}

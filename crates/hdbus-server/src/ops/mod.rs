//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 when draining)
//! - `/metrics` : Prometheus text format
//! - `/devices` : address table, group membership and running processes

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let extra = state.metrics_extra();
    let body = state.metrics().render(&extra);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub address: Option<String>,
    pub status: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DevicesView {
    pub devices: BTreeMap<String, DeviceView>,
    pub groups: BTreeMap<String, Vec<String>>,
    /// `alias:process` of every running process.
    pub running: Vec<String>,
}

pub async fn devices(State(state): State<AppState>) -> Json<DevicesView> {
    let registry = state.registry();
    let devices = registry
        .devices()
        .iter()
        .map(|d| {
            let view = DeviceView {
                address: d.address(),
                status: d.status(),
                tags: d.tags().iter().cloned().collect(),
            };
            (d.alias().to_string(), view)
        })
        .collect();
    let mut running: Vec<String> = state
        .supervisor()
        .running()
        .into_iter()
        .map(|k| format!("{}:{}", k.alias, k.process))
        .collect();
    running.sort();

    Json(DevicesView {
        devices,
        groups: registry.group_table(),
        running,
    })
}

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::observability::logging::timestamp_now;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessStatus {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, &'static str>,
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        service: state.service_name.to_string(),
        timestamp: timestamp_now(),
    })
}

pub async fn readyz() -> Json<ReadinessStatus> {
    Json(ReadinessStatus {
        status: "ready",
        checks: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_healthz_reports_service() {
        let state = AppState {
            service_name: Arc::from("test-service"),
        };
        let Json(status) = healthz(State(state)).await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.service, "test-service");
        assert!(!status.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_readyz_has_no_checks() {
        let Json(status) = readyz().await;
        assert_eq!(status.status, "ready");
        assert!(status.checks.is_empty());
    }
}

//! Health check HTTP server for container orchestration
//!
//! Reports the connection lifecycle of one role over warp.

use crate::lifecycle::{ConnectionManager, ConnectionState};
use crate::observability::metrics::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP health check server
pub struct HealthServer {
    role: String,
    port: u16,
    manager: Arc<ConnectionManager>,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    role: String,
    connection: ConnectionState,
    reconnect_pending: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: DateTime<Utc>,
}

impl HealthServer {
    pub fn new(role: impl Into<String>, port: u16, manager: Arc<ConnectionManager>) -> Self {
        Self {
            role: role.into(),
            port,
            manager,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn status(&self) -> HealthStatus {
        let connection = self.manager.state();
        HealthStatus {
            status: if connection == ConnectionState::Connected {
                "healthy"
            } else {
                "degraded"
            },
            role: self.role.clone(),
            connection,
            reconnect_pending: self.manager.reconnect_pending(),
            timestamp: Utc::now(),
        }
    }

    fn status_code(ready: bool) -> StatusCode {
        if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    /// `/health`, `/ready`, `/live` and `/metrics`
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .map(|server: Arc<HealthServer>| {
                let status = server.status();
                let code = Self::status_code(status.connection == ConnectionState::Connected);
                warp::reply::with_status(warp::reply::json(&status), code)
            });

        let ready = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server)
            .map(|server: Arc<HealthServer>| {
                let ready = server.manager.state() == ConnectionState::Connected;
                let response = ReadinessResponse {
                    ready,
                    timestamp: Utc::now(),
                };
                warp::reply::with_status(warp::reply::json(&response), Self::status_code(ready))
            });

        let live = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: Utc::now(),
                })
            });

        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().snapshot()));

        health
            .or(ready)
            .unify()
            .or(live.map(|reply| warp::reply::with_status(reply, StatusCode::OK)))
            .unify()
            .or(metrics_route.map(|reply| warp::reply::with_status(reply, StatusCode::OK)))
            .unify()
    }

    /// Serve until the task is dropped
    pub async fn start(self: Arc<Self>) {
        tracing::info!(role = %self.role, "Starting health server on port {}", self.port);
        warp::serve(self.routes()).run(([0, 0, 0, 0], self.port)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrokerClient;
    use crate::transport::ConnectOptions;
    use std::time::Duration;

    fn server() -> Arc<HealthServer> {
        let client = Arc::new(MockBrokerClient::new());
        let manager = Arc::new(ConnectionManager::new(
            client,
            ConnectOptions::default(),
            Duration::from_millis(3000),
        ));
        Arc::new(HealthServer::new("publisher", 8080, manager))
    }

    #[tokio::test]
    async fn test_health_reports_disconnected() {
        let server = server();
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["role"], "publisher");
        assert_eq!(body["connection"], "disconnected");
        assert_eq!(body["reconnect_pending"], false);
    }

    #[tokio::test]
    async fn test_health_reports_connected() {
        let server = server();
        server.manager.initialize().await.unwrap();

        let response = warp::test::request()
            .path("/health")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request()
            .path("/ready")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_and_live() {
        let server = server();

        let ready = warp::test::request()
            .path("/ready")
            .reply(&server.routes())
            .await;
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let live = warp::test::request()
            .path("/live")
            .reply(&server.routes())
            .await;
        assert_eq!(live.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(live.body()).unwrap();
        assert_eq!(body["alive"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = warp::test::request()
            .path("/metrics")
            .reply(&server().routes())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["connection"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() {
        let response = warp::test::request()
            .path("/nope")
            .reply(&server().routes())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

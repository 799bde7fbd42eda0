// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP gateway of a networked agent node.
//!
//! | Route | Method | Description |
//! |-------|--------|-------------|
//! | `/messages` | POST | Inbound envelope from any agent, fed to the local broker |
//! | `/health` | GET | Liveness, signature and uptime |
//! | `/formation` | GET | Diagnostics: formation, gap and arbitration state |

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::member::Member;
use crate::domain::message::Envelope;
use crate::domain::signature::Signature;
use crate::infrastructure::message_bus::InMemoryBroker;

/// Snapshot reported on `GET /formation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub signature: Signature,
    pub formation: Vec<Member>,
    pub gap: f64,
    pub global_action: Option<serde_json::Value>,
    pub verified: bool,
    pub local_actions: Vec<String>,
}

#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status(&self) -> AgentStatus;
}

pub struct GatewayState {
    pub signature: Signature,
    pub broker: InMemoryBroker,
    pub status: Arc<dyn StatusProvider>,
    pub start_time: Instant,
}

pub fn app(
    signature: Signature,
    broker: InMemoryBroker,
    status: Arc<dyn StatusProvider>,
) -> Router {
    let state = Arc::new(GatewayState {
        signature,
        broker,
        status,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/messages", post(receive_message))
        .route("/health", get(health_handler))
        .route("/formation", get(formation_handler))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Gateway listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn receive_message(State(state): State<Arc<GatewayState>>, body: Bytes) -> impl IntoResponse {
    if let Err(e) = Envelope::decode(&body) {
        metrics::counter!("parknet_decode_errors_total").increment(1);
        warn!(error = %e, "Rejecting malformed message");
        return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})));
    }

    let receivers = state.broker.deliver(Arc::from(body.as_ref()));
    (StatusCode::ACCEPTED, Json(json!({"delivered": receivers})))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "signature": state.signature,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn formation_handler(State(state): State<Arc<GatewayState>>) -> Json<AgentStatus> {
    Json(state.status.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct FixedStatus;

    #[async_trait]
    impl StatusProvider for FixedStatus {
        async fn status(&self) -> AgentStatus {
            AgentStatus {
                signature: Signature::from("a"),
                formation: vec![Member::new("a", 50.0)],
                gap: 13.0,
                global_action: None,
                verified: false,
                local_actions: vec![],
            }
        }
    }

    fn router(broker: &InMemoryBroker) -> Router {
        app(Signature::from("a"), broker.clone(), Arc::new(FixedStatus))
    }

    #[tokio::test]
    async fn test_post_message_feeds_broker() {
        let broker = InMemoryBroker::new(8);
        let mut inbox = broker.subscribe();

        let body = r#"{"sender":"b","topic":"action/completed-global","content":null,"timestamp":5.0}"#;
        let response = router(&broker)
            .oneshot(
                Request::post("/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let envelope = inbox.recv().await.unwrap();
        assert_eq!(envelope.sender, Signature::from("b"));
    }

    #[tokio::test]
    async fn test_post_malformed_message_is_rejected() {
        let broker = InMemoryBroker::new(8);
        let response = router(&broker)
            .oneshot(
                Request::post("/messages")
                    .body(Body::from(r#"{"sender":"b","topic":"formation"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_formation() {
        let broker = InMemoryBroker::new(8);
        let health = router(&broker)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let formation = router(&broker)
            .oneshot(Request::get("/formation").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(formation.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(formation.into_body(), usize::MAX).await.unwrap();
        let status: AgentStatus = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status.gap, 13.0);
        assert_eq!(status.formation.len(), 1);
    }
}

use axum::{extract::State, response::Json, routing::get, Router};
use anyhow::{Context, Result};
use feed_core::SupervisorState;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Liveness endpoint for the hosting platform.
#[derive(Debug, Clone)]
pub struct ApiServer {
    bind_address: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub time: i64,
}

pub fn router(state: watch::Receiver<SupervisorState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/_ah/warmup", get(handle_warmup))
        .with_state(state)
}

impl ApiServer {
    pub fn new(bind_address: String) -> Self {
        Self { bind_address }
    }

    pub async fn start(
        &self,
        state: watch::Receiver<SupervisorState>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.bind_address))?;

        info!("Liveness endpoint listening on {}", self.bind_address);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .with_context(|| "API server error")?;

        Ok(())
    }
}

async fn handle_health(State(state): State<watch::Receiver<SupervisorState>>) -> Json<HealthResponse> {
    let current = *state.borrow();
    Json(HealthResponse {
        status: "ok".to_string(),
        state: current.as_str().to_string(),
        time: chrono::Utc::now().timestamp(),
    })
}

async fn handle_warmup() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    async fn serve(state: watch::Receiver<SupervisorState>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn health_reports_stream_state() {
        let (tx, rx) = watch::channel(SupervisorState::Connecting);
        let addr = serve(rx).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["state"], "connecting");

        tx.send_replace(SupervisorState::Streaming);
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["state"], "streaming");
    }

    #[tokio::test]
    async fn warmup_answers_ok() {
        let (_tx, rx) = watch::channel(SupervisorState::Disconnected);
        let addr = serve(rx).await;

        let text = reqwest::get(format!("http://{addr}/_ah/warmup"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
}

//! Metrics endpoint
//!
//! The parent serves `/metrics`; each scrape asks every running child to
//! gather its registry and concatenates the text expositions. `/healthz`
//! answers as soon as the supervisor loop is alive.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, oneshot};

use skewer_config::MetricsConfig;

use crate::supervisor::Control;

#[derive(Clone)]
struct AppState {
    control: mpsc::UnboundedSender<Control>,
}

pub async fn run(config: MetricsConfig, control: mpsc::UnboundedSender<Control>) {
    let addr = format!("{}:{}", config.listen_addr, config.port);
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok\n" }))
        .with_state(AppState { control });

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr, error = %e, "metrics endpoint could not bind");
            return;
        }
    };
    tracing::info!(addr, "metrics endpoint listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "metrics endpoint failed");
    }
}

async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .control
        .send(Control::Gather(reply_tx))
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    reply_rx
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

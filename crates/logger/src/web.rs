use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(panel))
        .route("/api/status", get(api_status))
        .with_state(state)
}

/// The display panel as plain text, one line per row.
async fn panel(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    let mut body = st.panel.join("\n");
    body.push('\n');
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status api on {addr}"))?;

    tracing::info!("status api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("status api server error")
}

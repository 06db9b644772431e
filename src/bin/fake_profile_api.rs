//! Stand-in for the profile and device-registration services, for local testing.
//!
//! `off@example.com` has ActiveSync disabled, `vip@example.com` is pinned to a
//! dedicated host, everyone else is enabled and sharded.

use activesync_router::utils::logger;
use anyhow::Context;
use axum::extract::Path;
use axum::routing::post;
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
struct ProfileQuery {
    email: String,
}

async fn profile(Json(query): Json<ProfileQuery>) -> Json<Value> {
    tracing::info!(email = %query.email, "received profile request");

    let response = match query.email.as_str() {
        "off@example.com" => json!({
            "full_name": "Sem acesso",
            "email": query.email,
            "activesync_enabled": false,
        }),
        "vip@example.com" => json!({
            "full_name": "Com host definido",
            "email": query.email,
            "activesync_enabled": true,
            "activesync_host": std::env::var("FAKE_DEDICATED_HOST")
                .unwrap_or_else(|_| "127.0.0.1:9000".to_string()),
        }),
        _ => json!({
            "full_name": "Default",
            "email": query.email,
            "activesync_enabled": true,
        }),
    };
    Json(response)
}

async fn register_device(
    Path(email): Path<String>,
    Form(fields): Form<HashMap<String, String>>,
) -> Json<Value> {
    tracing::info!(email = %email, fields = ?fields, "received device registration");
    Json(json!({"result": {"success": 1}}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init_logger(false, false);

    let port: u16 = std::env::var("FAKE_API_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081);

    let app = Router::new()
        .route("/api/profile", post(profile))
        .route("/api/devices/{email}", post(register_device));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!(address = %addr, "fake profile API listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

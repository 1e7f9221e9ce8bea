//! Route handlers

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiState;
use crate::coordinator::{Command, Reply};

/// Body of `POST /api/v1/commands`
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub cmd: String,

    /// JSON payload, passed to the handler as encoded bytes
    #[serde(default)]
    pub data: Value,
}

/// Reply envelope as JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Reply> for ReplyResponse {
    fn from(reply: Reply) -> Self {
        let data = reply.data.as_deref().map(|data| payload_value(&reply.cmd, data));
        Self {
            cmd: reply.cmd,
            data,
            error: reply.error,
        }
    }
}

/// Reply payloads are JSON as a rule; anything else is passed on as a string
fn payload_value(cmd: &str, data: &[u8]) -> Value {
    match serde_json::from_slice(data) {
        Ok(value) => value,
        Err(e) => {
            warn!("{cmd} reply payload is not JSON ({e}), returning it as text");
            Value::String(String::from_utf8_lossy(data).into_owned())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// GET /api/v1/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> Json<HashMap<String, String>> {
    Json(state.handler.status().await)
}

/// POST /api/v1/commands
pub async fn handle_command(
    State(state): State<ApiState>,
    Json(request): Json<CommandRequest>,
) -> Json<ReplyResponse> {
    debug!("received {} command", request.cmd);

    // re-encoding a parsed Value cannot fail
    let data = serde_json::to_vec(&request.data).unwrap_or_default();
    let reply = state.handler.handle(Command::new(request.cmd, data)).await;

    Json(reply.into())
}

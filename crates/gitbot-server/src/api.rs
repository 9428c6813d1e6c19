use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use gitbot_core::collab::ResourceRegistry;
use gitbot_core::resource::TrackedResource;
use gitbot_github::TickReport;

use crate::commands::Command;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostCommandBody {
    pub channel: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandReply {
    pub reply: String,
}

/// POST /api/v1/commands: run a chat command for a channel.
pub async fn post_command(
    State(state): State<AppState>,
    Json(body): Json<PostCommandBody>,
) -> Result<Json<CommandReply>, AppError> {
    let channel = body.channel.trim();
    if channel.is_empty() {
        return Err(AppError::BadRequest("channel must not be empty".to_string()));
    }
    if channel.len() > 128 {
        return Err(AppError::BadRequest("channel exceeds 128 chars".to_string()));
    }

    let command = Command::parse(&body.text);
    tracing::debug!(channel, ?command, "Command received");
    let reply = state.commands.execute(channel, command).await;
    Ok(Json(CommandReply { reply }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub resources: usize,
    pub last_tick: Option<TickReport>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        resources: state.registry.len().await,
        last_tick: state.last_tick(),
    })
}

/// GET /api/v1/resources
pub async fn get_resources(State(state): State<AppState>) -> Json<Vec<TrackedResource>> {
    Json(state.registry.list_resources().await)
}

/// GET /api/v1/resources/{owner}/{name}
pub async fn get_resource(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<TrackedResource>, AppError> {
    state
        .registry
        .list_resources()
        .await
        .into_iter()
        .find(|r| r.same_feed(&owner, &name))
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{owner}/{name} is not tracked")))
}

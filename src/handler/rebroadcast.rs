use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use media_relay::FFmpegInput;
use serde::Deserialize;

use crate::{
    handler::{ApiError, ApiJsonResult},
    hub::SharedHub,
    manager::RebroadcastStatus,
};

pub fn rebroadcast_router() -> Router<SharedHub> {
    Router::new()
        .route("/list", get(list_rebroadcasts))
        .route("/add", post(add_rebroadcast))
        .route("/remove/{id}", get(remove_rebroadcast))
        .route("/status/{id}", get(rebroadcast_status))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RebroadcastRequest {
    id: String,
    input: FFmpegInput,
    timeout_ms: Option<u64>,
    #[serde(default)]
    replace: bool,
}

async fn list_rebroadcasts(State(hub): State<SharedHub>) -> Json<Vec<String>> {
    Json(hub.rebroadcasts.ids().await)
}

async fn add_rebroadcast(
    State(hub): State<SharedHub>,
    Json(req): Json<RebroadcastRequest>,
) -> ApiJsonResult<RebroadcastStatus> {
    let options = hub.rebroadcast_options(req.timeout_ms.map(Duration::from_millis));
    hub.rebroadcasts
        .add(&req.id, &req.input, options, req.replace)
        .await?;
    let status = hub
        .rebroadcasts
        .status(&req.id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("rebroadcast {}", req.id)))?;
    Ok(Json(status))
}

async fn remove_rebroadcast(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
) -> Json<bool> {
    Json(hub.rebroadcasts.remove(&id).await)
}

async fn rebroadcast_status(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
) -> ApiJsonResult<RebroadcastStatus> {
    let status = hub
        .rebroadcasts
        .status(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("rebroadcast {}", id)))?;
    Ok(Json(status))
}

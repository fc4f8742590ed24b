use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use media_relay::{FFmpegInput, mime, rtc::RtcMessage};

use crate::{
    device::RtspCamera,
    handler::{ApiError, ApiJsonResult, ApiResult},
    hub::SharedHub,
};

pub fn camera_router() -> Router<SharedHub> {
    Router::new()
        .route("/add", post(add_camera))
        .route("/list", get(list_cameras))
        .route("/{id}/remove", get(remove_camera))
        .route("/{id}/stream", get(camera_stream))
        .route("/{id}/snapshot", get(camera_snapshot))
        .route("/{id}/rtc/offer", post(camera_offer))
        .route("/{id}/rtc/answer", post(camera_answer))
}

async fn find_camera(hub: &SharedHub, id: &str) -> ApiResult<RtspCamera> {
    hub.cameras
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("camera {}", id)))
}

async fn add_camera(
    State(hub): State<SharedHub>,
    Json(mut camera): Json<RtspCamera>,
) -> Json<RtspCamera> {
    if camera.id.is_empty() {
        camera.id = uuid::Uuid::new_v4().to_string();
    }
    log::info!("camera {} added: {}", camera.id, camera.url);
    hub.cameras.add(camera.clone()).await;
    Json(camera)
}

async fn list_cameras(State(hub): State<SharedHub>) -> Json<Vec<RtspCamera>> {
    Json(hub.cameras.list().await)
}

async fn remove_camera(State(hub): State<SharedHub>, Path(id): Path<String>) -> Json<bool> {
    hub.rebroadcasts.remove(&stream_id(&id)).await;
    Json(hub.cameras.remove(&id).await.is_some())
}

fn stream_id(camera_id: &str) -> String {
    format!("camera-{}", camera_id)
}

/// Input reading the camera's shared rebroadcast.
async fn camera_stream(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
) -> ApiJsonResult<FFmpegInput> {
    let camera = find_camera(&hub, &id).await?;
    let session = hub
        .rebroadcasts
        .get_or_start(
            &stream_id(&id),
            &camera.ffmpeg_input(),
            hub.rebroadcast_options(None),
        )
        .await?;
    Ok(Json(session.ffmpeg_input()))
}

async fn camera_snapshot(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let camera = find_camera(&hub, &id).await?;
    let media = hub.media.create_ffmpeg_media_object(&camera.ffmpeg_input())?;
    let jpeg = hub.media.convert_to_buffer(media, mime::JPEG).await?;
    Ok(([(header::CONTENT_TYPE, mime::JPEG)], jpeg).into_response())
}

async fn camera_offer(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
) -> ApiJsonResult<RtcMessage> {
    let camera = find_camera(&hub, &id).await?;
    let media = hub.media.create_ffmpeg_media_object(&camera.ffmpeg_input())?;
    let offer = hub.media.convert_to_buffer(media, mime::RTC_OFFER).await?;
    Ok(Json(RtcMessage::from_bytes(&offer)?))
}

/// One answer round; the reply carries whatever local candidates are ready.
async fn camera_answer(
    State(hub): State<SharedHub>,
    Path(id): Path<String>,
    Json(answer): Json<RtcMessage>,
) -> ApiJsonResult<RtcMessage> {
    log::debug!("camera {} answer round for session {}", id, answer.id);
    let media = hub
        .media
        .create_media_object(answer.to_bytes()?, mime::RTC_ANSWER);
    let reply = hub.media.convert_to_buffer(media, mime::RTC_OFFER).await?;
    Ok(Json(RtcMessage::from_bytes(&reply)?))
}

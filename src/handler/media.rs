use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::{handler::ApiResult, hub::SharedHub};

pub fn media_router() -> Router<SharedHub> {
    Router::new()
        .route("/", get(index))
        .route("/convert", post(convert))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertRequest {
    mime_type: String,
    data: String,
    to_mime_type: String,
}

async fn index() -> &'static str {
    "media route!"
}

async fn convert(
    State(hub): State<SharedHub>,
    Json(req): Json<ConvertRequest>,
) -> ApiResult<Response> {
    let media = hub.media.create_media_object(req.data, &req.mime_type);
    let converted = hub.media.convert(media, &req.to_mime_type).await?;
    let data = converted.data().await?;
    Ok((
        [(header::CONTENT_TYPE, converted.mime_type().to_string())],
        data,
    )
        .into_response())
}

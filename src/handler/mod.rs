use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use media_relay::MediaError;

pub mod camera;
pub mod media;
pub mod rebroadcast;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

#[derive(Debug)]
pub struct ApiError {
    error: anyhow::Error,
    status: Option<StatusCode>,
}

impl ApiError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self {
            error: anyhow::anyhow!("{} not found", what),
            status: Some(StatusCode::NOT_FOUND),
        }
    }

    pub fn status(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        match self.error.downcast_ref::<MediaError>() {
            Some(MediaError::ConversionUnsupported { .. }) => StatusCode::BAD_REQUEST,
            Some(MediaError::InvalidPayload(_)) => StatusCode::BAD_REQUEST,
            Some(MediaError::UnknownSession(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("api error: {:#}", self.error);
        } else {
            log::debug!("api error: {:#}", self.error);
        }
        (status, format!("{:#}", self.error)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            error: err.into(),
            status: None,
        }
    }
}

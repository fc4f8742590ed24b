use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    handler::{camera::camera_router, media::media_router, rebroadcast::rebroadcast_router},
    hub::SharedHub,
};

pub fn app_router(hub: SharedHub) -> Router {
    Router::new()
        .route("/", get(index))
        .nest("/media", media_router())
        .nest("/rebroadcast", rebroadcast_router())
        .nest("/camera", camera_router())
        .with_state(hub)
}

pub(crate) fn start_api_server(hub: SharedHub, addr: String, cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = app_router(hub);

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server failed to bind {}: {}", addr, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

async fn index() -> &'static str {
    "media hub"
}

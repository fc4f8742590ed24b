use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod device;
mod handler;
mod hub;
mod manager;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("media_relay", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    log::info!("transcoder: {}", config.ffmpeg_path());

    let hub = Arc::new(hub::Hub::from_config(config));
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    api::start_api_server(Arc::clone(&hub), config.api_addr().to_string(), cancel_clone);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    hub.rebroadcasts.shutdown().await;
    std::process::exit(0);
}

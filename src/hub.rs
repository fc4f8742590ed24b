use std::{sync::Arc, time::Duration};

use media_relay::{MediaManager, RebroadcastOptions};

use crate::{config::HubConfig, device::CameraTable, manager::RebroadcastManager};

/// Everything the handlers share.
pub struct Hub {
    pub media: MediaManager,
    pub rebroadcasts: RebroadcastManager,
    pub cameras: CameraTable,
    pub rebroadcast_idle: Duration,
}

pub type SharedHub = Arc<Hub>;

impl Hub {
    pub fn new(media: MediaManager, rebroadcast_idle: Duration) -> Self {
        let rebroadcasts = RebroadcastManager::new(Arc::clone(media.transcoder()));
        Self {
            media,
            rebroadcasts,
            cameras: CameraTable::new(),
            rebroadcast_idle,
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        let media = MediaManager::ffmpeg(config.ffmpeg_path());
        #[cfg(feature = "webrtc")]
        let media = media.with_rtc(
            Arc::new(media_relay::rtc::WebRtcPeerFactory::new()),
            media_relay::rtc::BridgeOptions {
                configuration: config.rtc_configuration(),
                ..Default::default()
            },
        );
        Self::new(media, config.rebroadcast_idle())
    }

    /// Rebroadcast options with the configured idle timeout, unless the
    /// caller asks for another.
    pub fn rebroadcast_options(&self, timeout: Option<Duration>) -> RebroadcastOptions {
        RebroadcastOptions {
            timeout: Some(timeout.unwrap_or(self.rebroadcast_idle)),
            ..Default::default()
        }
    }
}

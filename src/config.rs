use std::{sync::LazyLock, time::Duration};

use media_relay::{default_ffmpeg_path, rtc::RtcConfiguration};

pub struct HubConfig {
    api_addr: String,
    ffmpeg_path: String,
    rebroadcast_idle: Duration,
    turn_urls: Vec<String>,
    turn_username: Option<String>,
    turn_credential: Option<String>,
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Missing or unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let idle_ms = non_empty("HUB_REBROADCAST_IDLE_MS").map(|v| v.trim().parse::<u64>());
        let idle_ms = match idle_ms {
            Some(Ok(ms)) => ms,
            Some(Err(e)) => {
                log::warn!("HUB_REBROADCAST_IDLE_MS ignored: {}", e);
                30_000
            }
            None => 30_000,
        };

        Self {
            api_addr: non_empty("HUB_API_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            ffmpeg_path: non_empty("HUB_FFMPEG_PATH")
                .unwrap_or_else(|| default_ffmpeg_path().to_string()),
            rebroadcast_idle: Duration::from_millis(idle_ms),
            turn_urls: non_empty("HUB_TURN_URLS")
                .map(|urls| {
                    urls.split(',')
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            turn_username: non_empty("HUB_TURN_USERNAME"),
            turn_credential: non_empty("HUB_TURN_CREDENTIAL"),
        }
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn rebroadcast_idle(&self) -> Duration {
        self.rebroadcast_idle
    }

    /// ICE configuration handed to every peer, with the relay entry if any.
    pub fn rtc_configuration(&self) -> RtcConfiguration {
        RtcConfiguration::default().with_relay(
            self.turn_urls.clone(),
            self.turn_username.clone(),
            self.turn_credential.clone(),
        )
    }
}

pub fn config() -> &'static HubConfig {
    static CONFIG: LazyLock<HubConfig> = LazyLock::new(HubConfig::from_env);
    &CONFIG
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

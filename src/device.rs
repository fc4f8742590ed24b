use std::{collections::HashMap, sync::Arc};

use media_relay::FFmpegInput;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// An RTSP camera as registered through the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtspCamera {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Interleave RTP over the RTSP connection instead of UDP.
    #[serde(default)]
    pub tcp: bool,
}

impl RtspCamera {
    /// Inputs with generous probing so that slow-starting streams still
    /// report their codecs.
    pub fn ffmpeg_input(&self) -> FFmpegInput {
        let mut args: Vec<String> = [
            "-analyzeduration",
            "15000000",
            "-probesize",
            "100000000",
            "-reorder_queue_size",
            "1024",
            "-max_delay",
            "20000000",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        if self.tcp {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend(["-i".to_string(), self.authenticated_url()]);
        FFmpegInput::new(args)
    }

    /// `url` with the credentials placed in its authority. A url that already
    /// carries credentials is left alone.
    pub fn authenticated_url(&self) -> String {
        let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) else {
            return self.url.clone();
        };
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.contains('@') {
            return self.url.clone();
        }
        match self.password.as_deref() {
            Some(password) => format!("{}://{}:{}@{}", scheme, username, password, rest),
            None => format!("{}://{}@{}", scheme, username, rest),
        }
    }
}

#[derive(Clone, Default)]
pub struct CameraTable {
    cameras: Arc<RwLock<HashMap<String, RtspCamera>>>,
}

impl CameraTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any camera with the same id.
    pub async fn add(&self, camera: RtspCamera) -> Option<RtspCamera> {
        let mut cameras = self.cameras.write().await;
        cameras.insert(camera.id.clone(), camera)
    }

    pub async fn get(&self, id: &str) -> Option<RtspCamera> {
        self.cameras.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<RtspCamera> {
        self.cameras.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<RtspCamera> {
        let mut cameras: Vec<RtspCamera> = self.cameras.read().await.values().cloned().collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        cameras
    }
}

#[cfg(test)]
#[path = "device_test.rs"]
mod device_test;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// Arguments placed before the outputs of a transcoder invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FFmpegInput {
    pub input_arguments: Vec<String>,
}

impl FFmpegInput {
    pub fn new(input_arguments: Vec<String>) -> Self {
        Self { input_arguments }
    }

    /// `-i <url>`
    pub fn from_url(url: &str) -> Self {
        Self::new(vec!["-i".to_string(), url.to_string()])
    }

    /// Input reading an mpegts stream from a local tcp port.
    pub fn mpegts_tcp(port: u16) -> Self {
        Self::new(vec![
            "-f".to_string(),
            "mpegts".to_string(),
            "-i".to_string(),
            format!("tcp://127.0.0.1:{}", port),
        ])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| MediaError::InvalidPayload(format!("ffmpeg input: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

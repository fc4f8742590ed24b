//! Edges that exist no matter which collaborators are registered.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    convert::{Converter, ConverterRef},
    error::MediaError,
    ffmpeg_input::FFmpegInput,
    mime,
    transcoder::{Diagnostics, Transcoder},
};

pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// `text/x-uri` -> `x-media/x-ffmpeg-input`, i.e. `-i <url>`.
pub struct UrlConverter;

#[async_trait]
impl Converter for UrlConverter {
    fn from_mime_type(&self) -> &str {
        mime::URL
    }

    fn to_mime_type(&self) -> &str {
        mime::FFMPEG_INPUT
    }

    async fn convert(&self, data: Bytes, _from_mime_type: &str) -> anyhow::Result<Bytes> {
        let url = std::str::from_utf8(&data)
            .map_err(|e| MediaError::InvalidPayload(format!("url: {}", e)))?
            .trim();
        if url.is_empty() {
            return Err(MediaError::InvalidPayload("empty url".to_string()).into());
        }
        Ok(FFmpegInput::from_url(url).to_bytes()?)
    }
}

/// `x-media/x-ffmpeg-input` -> `image/jpeg`: grabs one early frame.
pub struct ThumbnailConverter {
    transcoder: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl ThumbnailConverter {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            timeout: THUMBNAIL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub fn thumbnail_arguments(input: &FFmpegInput, output: &str) -> Vec<String> {
    let mut args = input.input_arguments.clone();
    args.extend(
        ["-y", "-vf", "select=eq(n\\,1)", "-vframes", "1", "-f", "image2", output]
            .into_iter()
            .map(str::to_string),
    );
    args
}

#[async_trait]
impl Converter for ThumbnailConverter {
    fn from_mime_type(&self) -> &str {
        mime::FFMPEG_INPUT
    }

    fn to_mime_type(&self) -> &str {
        mime::JPEG
    }

    async fn convert(&self, data: Bytes, _from_mime_type: &str) -> anyhow::Result<Bytes> {
        let input = FFmpegInput::from_bytes(&data)?;
        // removed when dropped
        let output = tempfile::Builder::new()
            .prefix("thumbnail-")
            .suffix(".jpg")
            .tempfile()?;
        let path = output.path().to_string_lossy().into_owned();

        let process = self
            .transcoder
            .spawn(thumbnail_arguments(&input, &path), Diagnostics::Ignore)?;
        let code = match tokio::time::timeout(self.timeout, process.wait()).await {
            Ok(code) => code,
            Err(_) => {
                process.kill();
                return Err(MediaError::Timeout(format!(
                    "thumbnail not ready after {:?}",
                    self.timeout
                ))
                .into());
            }
        };
        if code != Some(0) {
            return Err(
                MediaError::Transcoder(format!("thumbnail exited with {:?}", code)).into(),
            );
        }

        let jpeg = tokio::fs::read(&path).await?;
        if jpeg.is_empty() {
            return Err(MediaError::Transcoder("thumbnail output is empty".to_string()).into());
        }
        log::debug!("thumbnail: {} bytes", jpeg.len());
        Ok(Bytes::from(jpeg))
    }
}

/// The url and thumbnail edges.
pub fn builtin_converters(transcoder: Arc<dyn Transcoder>) -> Vec<ConverterRef> {
    let url: ConverterRef = Arc::new(UrlConverter);
    let thumbnail: ConverterRef = Arc::new(ThumbnailConverter::new(transcoder));
    vec![url, thumbnail]
}

#[cfg(test)]
#[path = "builtins_test.rs"]
mod builtins_test;

use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use bytes::Bytes;

use crate::{
    builtins::builtin_converters,
    convert::{self, ConverterProvider, ConverterRef, ConverterRegistry},
    error::Result,
    ffmpeg_input::FFmpegInput,
    media_object::MediaObject,
    mime,
    rtc::{BridgeOptions, PeerConnectionFactory, RtcSessionTable, rtc_converters},
    transcoder::{FfmpegTranscoder, Transcoder},
};

/// Anything a conversion can start from.
#[derive(Clone, Debug)]
pub enum MediaSource {
    Media(MediaObject),
    Url(String),
}

impl From<MediaObject> for MediaSource {
    fn from(media: MediaObject) -> Self {
        Self::Media(media)
    }
}

impl From<String> for MediaSource {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<&str> for MediaSource {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

/// Entry point for conversions. Owns the registry collaborators add edges to,
/// plus the built-in edges that are always available.
pub struct MediaManager {
    registry: Arc<ConverterRegistry>,
    providers: Mutex<Vec<Arc<dyn ConverterProvider>>>,
    builtins: Vec<ConverterRef>,
    transcoder: Arc<dyn Transcoder>,
    ffmpeg_path: String,
    rtc_sessions: Option<RtcSessionTable>,
}

impl MediaManager {
    pub fn new(transcoder: Arc<dyn Transcoder>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(ConverterRegistry::new()),
            providers: Mutex::new(Vec::new()),
            builtins: builtin_converters(Arc::clone(&transcoder)),
            transcoder,
            ffmpeg_path: ffmpeg_path.into(),
            rtc_sessions: None,
        }
    }

    /// Manager launching the real transcoder binary at `path`.
    pub fn ffmpeg(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(Arc::new(FfmpegTranscoder::new(path.clone())), path)
    }

    /// Adds the real-time bridge edges.
    pub fn with_rtc(
        mut self,
        factory: Arc<dyn PeerConnectionFactory>,
        options: BridgeOptions,
    ) -> Self {
        let sessions = RtcSessionTable::new();
        self.builtins.extend(rtc_converters(
            Arc::clone(&self.transcoder),
            factory,
            sessions.clone(),
            options,
        ));
        self.rtc_sessions = Some(sessions);
        self
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    pub fn add_provider(&self, provider: Arc<dyn ConverterProvider>) {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn rtc_sessions(&self) -> Option<&RtcSessionTable> {
        self.rtc_sessions.as_ref()
    }

    /// Live edge set: registered edges, then extra providers, then the
    /// built-ins. Taken fresh on every call.
    pub fn converters(&self) -> Vec<ConverterRef> {
        let mut edges = self.registry.converters();
        for provider in self
            .providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            edges.extend(provider.converters());
        }
        edges.extend(self.builtins.iter().cloned());
        edges
    }

    pub fn create_media_object(&self, data: impl Into<Bytes>, mime_type: &str) -> MediaObject {
        MediaObject::new(mime_type, data)
    }

    pub fn create_media_object_lazy<F>(&self, fetch: F, mime_type: &str) -> MediaObject
    where
        F: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        MediaObject::lazy(mime_type, fetch)
    }

    pub fn create_ffmpeg_media_object(&self, input: &FFmpegInput) -> Result<MediaObject> {
        Ok(MediaObject::new(mime::FFMPEG_INPUT, input.to_bytes()?))
    }

    /// Bare strings become url media objects.
    pub fn ensure_media_object(&self, source: impl Into<MediaSource>) -> MediaObject {
        match source.into() {
            MediaSource::Media(media) => media,
            MediaSource::Url(url) => MediaObject::new(mime::URL, url),
        }
    }

    pub async fn convert(
        &self,
        source: impl Into<MediaSource>,
        to_mime_type: &str,
    ) -> anyhow::Result<MediaObject> {
        let media = self.ensure_media_object(source);
        convert::convert(&self.converters(), media, to_mime_type).await
    }

    pub async fn convert_to_buffer(
        &self,
        source: impl Into<MediaSource>,
        to_mime_type: &str,
    ) -> anyhow::Result<Bytes> {
        self.convert(source, to_mime_type).await?.data().await
    }

    pub async fn convert_to_url(
        &self,
        source: impl Into<MediaSource>,
        to_mime_type: &str,
    ) -> anyhow::Result<String> {
        self.convert_via(source, to_mime_type, mime::URL).await
    }

    pub async fn convert_to_local_url(
        &self,
        source: impl Into<MediaSource>,
        to_mime_type: &str,
    ) -> anyhow::Result<String> {
        self.convert_via(source, to_mime_type, mime::LOCAL_URL).await
    }

    pub async fn convert_to_insecure_local_url(
        &self,
        source: impl Into<MediaSource>,
        to_mime_type: &str,
    ) -> anyhow::Result<String> {
        self.convert_via(source, to_mime_type, mime::INSECURE_LOCAL_URL)
            .await
    }

    /// Converts to `intermediate`, then publishes that result as `url_mime_type`.
    async fn convert_via(
        &self,
        source: impl Into<MediaSource>,
        intermediate: &str,
        url_mime_type: &str,
    ) -> anyhow::Result<String> {
        let converted = self.convert(source, intermediate).await?;
        let url = self.convert(converted, url_mime_type).await?;
        url.data_string().await
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;

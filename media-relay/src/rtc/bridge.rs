//! Bridges a transcoder's raw decoded output into the send-only tracks of a
//! peer connection.
//!
//! The transcoder writes s16le audio and yuv420p video into two private
//! loopback sinks. Frame geometry and sample format are only known once the
//! transcoder prints its stream banner, so each sink waits for its marker
//! before it starts slicing the byte stream into frames.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;

use super::{
    diagnostics::{AudioFormat, Resolution, watch_markers},
    peer::{
        AudioChunk, AudioTrack, PeerConnectionFactory, PeerEvent, PeerHandle, PeerState,
        VideoFrame, VideoTrack,
    },
    session::{RtcSession, RtcSessionTable},
    signaling::{RtcConfiguration, RtcMessage, SessionDescription},
};
use crate::{
    error::{MediaError, Result},
    ffmpeg_input::FFmpegInput,
    listener::SingleAccept,
    transcoder::{Diagnostics, Transcoder, TranscoderProcess},
};

/// A session that has not reached "connected" by then is torn down.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Bound on waiting for the resolution and sample format banners.
pub const MARKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct BridgeOptions {
    pub configuration: RtcConfiguration,
    pub connect_timeout: Duration,
    pub marker_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            configuration: RtcConfiguration::default(),
            connect_timeout: CONNECT_TIMEOUT,
            marker_timeout: MARKER_TIMEOUT,
        }
    }
}

/// Transcoder arguments: audio to the first sink, video to the second.
pub fn bridge_arguments(input: &FFmpegInput, audio_url: String, video_url: String) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    args.extend(input.input_arguments.iter().cloned());
    args.extend(
        ["-vn", "-acodec", "pcm_s16le", "-f", "s16le"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(audio_url);
    args.extend(
        ["-an", "-vcodec", "rawvideo", "-pix_fmt", "yuv420p", "-f", "rawvideo"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(video_url);
    args
}

/// Reads fixed-size frames, buffering partial reads.
pub struct FrameReader<R> {
    reader: R,
    frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, frame_size: usize) -> Self {
        Self {
            reader,
            frame_size: frame_size.max(1),
        }
    }

    /// `None` at end of stream. A trailing partial frame is dropped.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let mut frame = BytesMut::zeroed(self.frame_size);
        match self.reader.read_exact(&mut frame).await {
            Ok(_) => Ok(Some(frame.freeze())),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct RtcBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    session: Arc<RtcSession>,
    sessions: RtcSessionTable,
    process: TranscoderProcess,
    cancel: CancellationToken,
    torn_down: AtomicBool,
    options: BridgeOptions,
}

impl RtcBridge {
    /// Creates the peer connection and the transcoder, registers the session
    /// and returns the offer with the ICE configuration.
    pub async fn start(
        transcoder: &dyn Transcoder,
        factory: &dyn PeerConnectionFactory,
        sessions: &RtcSessionTable,
        input: &FFmpegInput,
        options: BridgeOptions,
    ) -> Result<(Self, RtcMessage)> {
        let video_sink = SingleAccept::bind().await?;
        let audio_sink = SingleAccept::bind().await?;

        let PeerHandle {
            connection,
            video,
            audio,
            events,
        } = factory.create(&options.configuration).await?;

        let args = bridge_arguments(input, audio_sink.url(), video_sink.url());
        let mut process = match transcoder.spawn(args, Diagnostics::Capture) {
            Ok(process) => process,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };
        let lines = process
            .take_diagnostics()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        let markers = watch_markers(lines);

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(RtcSession::new(id.clone(), connection));
        sessions.insert(Arc::clone(&session));
        log::info!("rtc session {} created", id);

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                cancel: session.close_token(),
                session,
                sessions: sessions.clone(),
                process,
                torn_down: AtomicBool::new(false),
                options: options.clone(),
            }),
        };

        tokio::spawn(bridge.clone().watch_peer(events));
        tokio::spawn(bridge.clone().watch_process());
        tokio::spawn(bridge.clone().connect_timer());
        tokio::spawn(bridge.clone().run_video(video_sink, markers.resolution, video));
        tokio::spawn(bridge.clone().run_audio(audio_sink, markers.audio, audio));

        let offer = match bridge.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                bridge.teardown(&format!("offer failed: {}", e));
                return Err(e);
            }
        };

        let message = RtcMessage {
            id,
            description: Some(offer),
            candidates: Vec::new(),
            configuration: Some(options.configuration),
        };
        Ok((bridge, message))
    }

    pub fn id(&self) -> &str {
        self.inner.session.id()
    }

    pub fn session(&self) -> &Arc<RtcSession> {
        &self.inner.session
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Every way a session ends goes through here; only the first call acts.
    pub fn teardown(&self, reason: &str) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.id().to_string();
        log::info!("rtc session {} torn down: {}", id, reason);

        self.inner.session.close();
        self.inner.process.kill();
        self.inner.sessions.remove(&id);

        let connection = Arc::clone(self.inner.session.connection());
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = connection.close().await {
                    log::warn!("rtc session {} close failed: {}", id, e);
                }
            });
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let connection = self.inner.session.connection();
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    async fn watch_peer(self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        let cancel = self.inner.cancel.clone();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            match event {
                PeerEvent::LocalCandidate(candidate) => {
                    log::debug!(
                        "rtc session {} local candidate {}",
                        self.id(),
                        candidate.candidate
                    );
                    self.inner.session.push_local_candidate(candidate);
                }
                PeerEvent::GatheringComplete => {
                    log::debug!("rtc session {} gathering complete", self.id());
                    self.inner.session.gathering_complete();
                }
                PeerEvent::ConnectionState(state) | PeerEvent::IceConnectionState(state) => {
                    log::info!("rtc session {} state {:?}", self.id(), state);
                    match state {
                        PeerState::Failed => self.teardown("peer connection failed"),
                        PeerState::Closed => self.teardown("peer connection closed"),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn watch_process(self) {
        let cancel = self.inner.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => self.teardown("session closed"),
            code = self.inner.process.wait() => {
                self.teardown(&format!("transcoder exited (code {:?})", code));
            }
        }
    }

    async fn connect_timer(self) {
        let cancel = self.inner.cancel.clone();
        let timeout = self.inner.options.connect_timeout;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(timeout) => {}
        }
        if self.inner.session.connection().connection_state() != PeerState::Connected {
            self.teardown(&format!("not connected within {:?}", timeout));
        }
    }

    async fn run_video(
        self,
        sink: SingleAccept,
        resolution: watch::Receiver<Option<Resolution>>,
        track: Arc<dyn VideoTrack>,
    ) {
        let cancel = self.inner.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = self.video_loop(sink, resolution, track) => result,
        };
        if let Err(e) = result {
            log::warn!("rtc session {} video stopped: {}", self.id(), e);
        }
    }

    async fn video_loop(
        &self,
        sink: SingleAccept,
        mut resolution: watch::Receiver<Option<Resolution>>,
        track: Arc<dyn VideoTrack>,
    ) -> Result<()> {
        let Some(socket) = self.accept_sink(sink).await? else {
            return Ok(());
        };
        let resolution = self.wait_marker(&mut resolution, "video resolution").await?;
        let mut frames = FrameReader::new(socket, resolution.frame_size());

        let mut delivered = 0u64;
        while let Some(data) = frames.next_frame().await? {
            let frame = VideoFrame {
                width: resolution.width,
                height: resolution.height,
                data,
            };
            if let Err(e) = track.write_frame(frame).await {
                self.teardown(&format!("video track: {}", e));
                return Ok(());
            }
            delivered += 1;
        }
        log::info!("rtc session {} video sink closed after {} frames", self.id(), delivered);
        Ok(())
    }

    async fn run_audio(
        self,
        sink: SingleAccept,
        format: watch::Receiver<Option<AudioFormat>>,
        track: Arc<dyn AudioTrack>,
    ) {
        let cancel = self.inner.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = self.audio_loop(sink, format, track) => result,
        };
        if let Err(e) = result {
            log::warn!("rtc session {} audio stopped: {}", self.id(), e);
        }
    }

    async fn audio_loop(
        &self,
        sink: SingleAccept,
        mut format: watch::Receiver<Option<AudioFormat>>,
        track: Arc<dyn AudioTrack>,
    ) -> Result<()> {
        let Some(socket) = self.accept_sink(sink).await? else {
            return Ok(());
        };
        let format = self.wait_marker(&mut format, "audio format").await?;
        let mut chunks = FrameReader::new(socket, format.chunk_size());

        while let Some(samples) = chunks.next_frame().await? {
            let chunk = AudioChunk {
                sample_rate: format.sample_rate,
                channels: format.channels,
                samples,
            };
            if let Err(e) = track.write_audio(chunk).await {
                self.teardown(&format!("audio track: {}", e));
                return Ok(());
            }
        }
        log::info!("rtc session {} audio sink closed", self.id());
        Ok(())
    }

    async fn accept_sink(&self, sink: SingleAccept) -> Result<Option<tokio::net::TcpStream>> {
        sink.accept_until(&self.inner.cancel, self.inner.options.connect_timeout)
            .await
    }

    async fn wait_marker<T: Copy>(
        &self,
        marker: &mut watch::Receiver<Option<T>>,
        what: &str,
    ) -> Result<T> {
        let timeout = self.inner.options.marker_timeout;
        match tokio::time::timeout(timeout, marker.wait_for(|value| value.is_some())).await {
            Ok(Ok(value)) => (*value)
                .ok_or_else(|| MediaError::Transcoder(format!("{} missing", what))),
            Ok(Err(_)) => Err(MediaError::Transcoder(format!(
                "transcoder output ended before the {}",
                what
            ))),
            Err(_) => Err(MediaError::Timeout(format!("{} not reported", what))),
        }
    }
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod bridge_test;

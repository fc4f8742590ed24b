//! Peer connections backed by the `webrtc` crate.
//!
//! Audio goes out as PCMU. Video goes out as H.264 when built with the
//! `h264` feature; otherwise frames are dropped and counted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::{
    api::{
        APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_H264, MIME_TYPE_PCMU, MediaEngine},
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_connection_state::RTCIceConnectionState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{
        RTCRtpTransceiverInit, rtp_codec::RTCRtpCodecCapability,
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
    },
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

use super::{
    codec::{PCMU_SAMPLE_RATE, encode_pcmu},
    peer::{
        AudioChunk, AudioTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle,
        PeerState, VideoFrame, VideoTrack,
    },
    signaling::{IceCandidate, RtcConfiguration, SdpType, SessionDescription},
};
use crate::error::{MediaError, Result};

fn peer_error(what: &'static str) -> impl Fn(webrtc::Error) -> MediaError {
    move |e| MediaError::PeerConnection(format!("{}: {}", what, e))
}

#[derive(Default)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self, configuration: &RtcConfiguration) -> Result<PeerHandle> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(peer_error("register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(peer_error("register interceptors"))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = configuration
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(peer_error("create peer connection"))?,
        );

        let stream_id = format!("bridge-{}", uuid::Uuid::new_v4());
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            stream_id.clone(),
        ));
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            stream_id,
        ));
        for track in [
            Arc::clone(&video) as Arc<dyn TrackLocal + Send + Sync>,
            Arc::clone(&audio) as Arc<dyn TrackLocal + Send + Sync>,
        ] {
            pc.add_transceiver_from_track(
                track,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(peer_error("add track"))?;
        }

        let (events, rx) = mpsc::unbounded_channel();
        register_callbacks(&pc, events);

        Ok(PeerHandle {
            connection: Arc::new(WebRtcPeer { pc }),
            video: Arc::new(H264VideoTrack::new(video)),
            audio: Arc::new(PcmuAudioTrack { track: audio }),
            events: rx,
        })
    }
}

fn register_callbacks(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<PeerEvent>) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let event = match candidate {
            None => Some(PeerEvent::GatheringComplete),
            Some(candidate) => match candidate.to_json() {
                Ok(init) => Some(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => {
                    log::warn!("local candidate not serializable: {}", e);
                    None
                }
            },
        };
        if let Some(event) = event {
            let _ = tx.send(event);
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        if let Some(state) = peer_state(state) {
            let _ = tx.send(PeerEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if let Some(state) = ice_state(state) {
            let _ = tx.send(PeerEvent::IceConnectionState(state));
        }
        Box::pin(async {})
    }));
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    Some(match state {
        RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => return None,
    })
}

fn ice_state(state: RTCIceConnectionState) -> Option<PeerState> {
    Some(match state {
        RTCIceConnectionState::New => PeerState::New,
        RTCIceConnectionState::Checking => PeerState::Checking,
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            PeerState::Connected
        }
        RTCIceConnectionState::Disconnected => PeerState::Disconnected,
        RTCIceConnectionState::Failed => PeerState::Failed,
        RTCIceConnectionState::Closed => PeerState::Closed,
        _ => return None,
    })
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(MediaError::InvalidPayload(
                "rollback is not supported".to_string(),
            ));
        }
    };
    parsed.map_err(|e| MediaError::InvalidPayload(format!("sdp: {}", e)))
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(peer_error("create offer"))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(peer_error("set local description"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(peer_error("set remote description"))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(peer_error("add ice candidate"))
    }

    fn connection_state(&self) -> PeerState {
        peer_state(self.pc.connection_state()).unwrap_or(PeerState::New)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(peer_error("close"))
    }
}

pub struct PcmuAudioTrack {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl AudioTrack for PcmuAudioTrack {
    async fn write_audio(&self, chunk: AudioChunk) -> Result<()> {
        let data = encode_pcmu(&chunk.samples, chunk.sample_rate, chunk.channels);
        let sample = Sample {
            data,
            duration: Duration::from_millis(10),
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(peer_error("write audio sample"))
    }
}

pub struct H264VideoTrack {
    track: Arc<TrackLocalStaticSample>,
    frames: AtomicU64,
    #[cfg(feature = "h264")]
    encoder: tokio::sync::Mutex<Option<h264::FrameEncoder>>,
}

impl H264VideoTrack {
    fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            frames: AtomicU64::new(0),
            #[cfg(feature = "h264")]
            encoder: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl VideoTrack for H264VideoTrack {
    #[cfg(feature = "h264")]
    async fn write_frame(&self, frame: VideoFrame) -> Result<()> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed);
        let (data, duration) = {
            let mut encoder = self.encoder.lock().await;
            if encoder.is_none() {
                log::info!("h264 encoder for {}x{}", frame.width, frame.height);
                *encoder = Some(h264::FrameEncoder::new()?);
            }
            match encoder.as_mut() {
                Some(encoder) => encoder.encode(&frame)?,
                None => return Ok(()),
            }
        };
        if data.is_empty() {
            log::trace!("encoder skipped frame {}", count);
            return Ok(());
        }
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(peer_error("write video sample"))
    }

    #[cfg(not(feature = "h264"))]
    async fn write_frame(&self, frame: VideoFrame) -> Result<()> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed);
        if count == 0 {
            log::warn!(
                "built without h264, dropping {}x{} video on track {}",
                frame.width,
                frame.height,
                self.track.id()
            );
        }
        Ok(())
    }
}

#[cfg(feature = "h264")]
mod h264 {
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use openh264::{encoder::Encoder, formats::YUVSource};

    use crate::{
        error::{MediaError, Result},
        rtc::peer::VideoFrame,
    };

    /// Borrowed planar 4:2:0 frame.
    struct I420<'a> {
        width: usize,
        height: usize,
        data: &'a [u8],
    }

    impl I420<'_> {
        fn chroma_len(&self) -> usize {
            self.width.div_ceil(2) * self.height.div_ceil(2)
        }
    }

    impl YUVSource for I420<'_> {
        fn dimensions(&self) -> (usize, usize) {
            (self.width, self.height)
        }

        fn strides(&self) -> (usize, usize, usize) {
            let chroma = self.width.div_ceil(2);
            (self.width, chroma, chroma)
        }

        fn y(&self) -> &[u8] {
            &self.data[..self.width * self.height]
        }

        fn u(&self) -> &[u8] {
            let start = self.width * self.height;
            &self.data[start..start + self.chroma_len()]
        }

        fn v(&self) -> &[u8] {
            let start = self.width * self.height + self.chroma_len();
            &self.data[start..start + self.chroma_len()]
        }
    }

    pub struct FrameEncoder {
        encoder: Encoder,
        last: Option<Instant>,
    }

    impl FrameEncoder {
        pub fn new() -> Result<Self> {
            let encoder = Encoder::new()
                .map_err(|e| MediaError::PeerConnection(format!("h264 encoder: {}", e)))?;
            Ok(Self {
                encoder,
                last: None,
            })
        }

        /// Annex B bitstream and the time since the previous frame.
        pub fn encode(&mut self, frame: &VideoFrame) -> Result<(Bytes, Duration)> {
            let source = I420 {
                width: frame.width as usize,
                height: frame.height as usize,
                data: &frame.data,
            };
            let bitstream = self
                .encoder
                .encode(&source)
                .map_err(|e| MediaError::PeerConnection(format!("h264 encode: {}", e)))?;
            let now = Instant::now();
            let duration = self
                .last
                .map(|last| now - last)
                .unwrap_or(Duration::from_millis(33));
            self.last = Some(now);
            Ok((Bytes::from(bitstream.to_vec()), duration))
        }
    }
}

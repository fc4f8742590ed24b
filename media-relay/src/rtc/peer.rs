//! Seam between the bridge and a WebRTC stack.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::signaling::{IceCandidate, RtcConfiguration, SessionDescription};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    New,
    Checking,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    /// No more local candidates will be produced.
    GatheringComplete,
    ConnectionState(PeerState),
    IceConnectionState(PeerState),
}

/// One planar 4:2:0 frame.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// 10 ms of interleaved signed 16-bit little-endian PCM.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Bytes,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Send-only offer; receiving is disabled for both kinds.
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    fn connection_state(&self) -> PeerState;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait VideoTrack: Send + Sync {
    async fn write_frame(&self, frame: VideoFrame) -> Result<()>;
}

#[async_trait]
pub trait AudioTrack: Send + Sync {
    async fn write_audio(&self, chunk: AudioChunk) -> Result<()>;
}

/// A fresh connection with exactly one audio and one video track attached.
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub video: Arc<dyn VideoTrack>,
    pub audio: Arc<dyn AudioTrack>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, configuration: &RtcConfiguration) -> Result<PeerHandle>;
}

//! In-process stand-ins for the external transcoder.

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::{
    error::Result,
    rtc::{
        peer::{
            AudioChunk, AudioTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle,
            PeerState, VideoFrame, VideoTrack,
        },
        signaling::{IceCandidate, RtcConfiguration, SessionDescription},
    },
    transcoder::{Diagnostics, ProcessControl, Transcoder, TranscoderProcess},
};

type Script = dyn Fn(Vec<String>, ProcessControl) -> BoxFuture<'static, ()> + Send + Sync;

/// Runs `script` as a task in place of a real process. The process counts as
/// exited when the script returns.
pub struct ScriptedTranscoder {
    script: Box<Script>,
    spawned: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTranscoder {
    pub fn new<F, Fut>(script: F) -> Arc<Self>
    where
        F: Fn(Vec<String>, ProcessControl) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            script: Box::new(
                move |args: Vec<String>, control: ProcessControl| -> BoxFuture<'static, ()> {
                    Box::pin(script(args, control))
                },
            ),
            spawned: Mutex::new(Vec::new()),
        })
    }

    pub fn spawned(&self) -> Vec<Vec<String>> {
        self.spawned.lock().unwrap().clone()
    }
}

impl Transcoder for ScriptedTranscoder {
    fn spawn(&self, args: Vec<String>, diagnostics: Diagnostics) -> Result<TranscoderProcess> {
        self.spawned.lock().unwrap().push(args.clone());
        let (process, control) = TranscoderProcess::new(diagnostics);
        tokio::spawn((self.script)(args, control));
        Ok(process)
    }
}

/// Ports of every `tcp://127.0.0.1:<port>` output, in argument order.
pub fn tcp_ports(args: &[String]) -> Vec<u16> {
    args.iter()
        .filter_map(|arg| arg.strip_prefix("tcp://127.0.0.1:"))
        .filter_map(|port| port.parse().ok())
        .collect()
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Peer connection that only records what the bridge asks of it.
#[derive(Default)]
pub struct FakePeer {
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicUsize,
    pub configuration: Mutex<Option<RtcConfiguration>>,
    pub state: Mutex<Option<PeerState>>,
}

impl FakePeer {
    pub fn set_state(&self, state: PeerState) {
        *self.state.lock().unwrap() = Some(state);
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\na=sendonly\r\n"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().unwrap().is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn connection_state(&self) -> PeerState {
        if self.closed() > 0 {
            PeerState::Closed
        } else {
            self.state.lock().unwrap().unwrap_or(PeerState::New)
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTracks {
    pub frames: Mutex<Vec<VideoFrame>>,
    pub chunks: Mutex<Vec<AudioChunk>>,
}

impl RecordingTracks {
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoTrack for RecordingTracks {
    async fn write_frame(&self, frame: VideoFrame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

#[async_trait]
impl AudioTrack for RecordingTracks {
    async fn write_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakePeerParts {
    pub peer: Arc<FakePeer>,
    pub tracks: Arc<RecordingTracks>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

#[derive(Default)]
pub struct FakePeerFactory {
    created: Mutex<Vec<FakePeerParts>>,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<FakePeerParts> {
        self.created.lock().unwrap().clone()
    }

    pub fn last(&self) -> FakePeerParts {
        self.created().pop().expect("no peer created")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, configuration: &RtcConfiguration) -> Result<PeerHandle> {
        let peer = Arc::new(FakePeer::default());
        *peer.configuration.lock().unwrap() = Some(configuration.clone());
        let tracks = Arc::new(RecordingTracks::default());
        let (events, rx) = mpsc::unbounded_channel();
        self.created.lock().unwrap().push(FakePeerParts {
            peer: Arc::clone(&peer),
            tracks: Arc::clone(&tracks),
            events,
        });
        Ok(PeerHandle {
            connection: peer,
            video: tracks.clone(),
            audio: tracks,
            events: rx,
        })
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host", n, 50000 + n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

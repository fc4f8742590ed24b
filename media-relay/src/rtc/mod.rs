//! Real-time bridge: a transcoder input played out over a WebRTC peer.

pub mod bridge;
pub mod codec;
pub mod converter;
pub mod diagnostics;
pub mod peer;
pub mod session;
pub mod signaling;
#[cfg(feature = "webrtc")]
pub mod webrtc_peer;

pub use bridge::{BridgeOptions, CONNECT_TIMEOUT, MARKER_TIMEOUT, RtcBridge};
pub use converter::{AnswerConverter, OfferConverter, continue_signaling, rtc_converters};
pub use peer::{PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle, PeerState};
pub use session::{RtcSession, RtcSessionTable};
pub use signaling::{IceCandidate, IceServer, RtcConfiguration, RtcMessage, SessionDescription};
#[cfg(feature = "webrtc")]
pub use webrtc_peer::WebRtcPeerFactory;

//! Mime types understood by the built-in converters.

pub const URL: &str = "text/x-uri";
pub const LOCAL_URL: &str = "text/x-uri;local";
pub const INSECURE_LOCAL_URL: &str = "text/x-uri;insecure-local";

/// JSON [`crate::ffmpeg_input::FFmpegInput`].
pub const FFMPEG_INPUT: &str = "x-media/x-ffmpeg-input";

/// JSON [`crate::rtc::signaling::RtcMessage`] carrying an offer or queued candidates.
pub const RTC_OFFER: &str = "x-media/x-rtc-av-offer";
/// JSON [`crate::rtc::signaling::RtcMessage`] carrying an answer or remote candidates.
pub const RTC_ANSWER: &str = "x-media/x-rtc-av-answer";

pub const JPEG: &str = "image/jpeg";

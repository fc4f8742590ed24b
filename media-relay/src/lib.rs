pub mod builtins;
pub mod convert;
pub mod error;
pub mod ffmpeg_input;
pub mod listener;
pub mod manager;
pub mod media_object;
pub mod mime;
pub mod rebroadcast;
pub mod rtc;
pub mod transcoder;

#[cfg(test)]
mod test_support;

pub use convert::{
    Converter, ConverterId, ConverterProvider, ConverterRef, ConverterRegistry, FnConverter,
};
pub use error::{MediaError, Result};
pub use ffmpeg_input::FFmpegInput;
pub use manager::{MediaManager, MediaSource};
pub use media_object::MediaObject;
pub use rebroadcast::{RebroadcastEvent, RebroadcastOptions, RebroadcastSession};
pub use transcoder::{FfmpegTranscoder, Transcoder, default_ffmpeg_path};

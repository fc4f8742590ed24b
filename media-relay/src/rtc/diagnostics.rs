//! Stream format markers scraped from the transcoder's banner output.

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::{mpsc, watch};

static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{2,5})x([0-9]{2,5})\b").expect("valid regex"));
static SAMPLE_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([0-9]+) Hz\b").expect("valid regex"));
static LAYOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Audio:.*\b(stereo|mono)\b").expect("valid regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Bytes in one planar 4:2:0 frame; chroma planes round odd sizes up.
    pub fn frame_size(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Bytes in 10 ms of 16-bit samples.
    pub fn chunk_size(&self) -> usize {
        (self.sample_rate / 100) as usize * self.channels as usize * 2
    }
}

/// `WxH` from a video stream line.
pub fn parse_resolution(line: &str) -> Option<Resolution> {
    if !line.contains("Video:") {
        return None;
    }
    let caps = RESOLUTION.captures(line)?;
    let width = caps.get(1)?.as_str().parse().ok()?;
    let height = caps.get(2)?.as_str().parse().ok()?;
    Some(Resolution { width, height })
}

/// Sample rate and mono/stereo layout from an audio stream line.
pub fn parse_audio_format(line: &str) -> Option<AudioFormat> {
    let layout = LAYOUT.captures(line)?;
    let rate = SAMPLE_RATE.captures(line)?;
    let sample_rate: u32 = rate.get(1)?.as_str().parse().ok()?;
    if sample_rate < 100 {
        return None;
    }
    let channels = if layout.get(1)?.as_str() == "mono" { 1 } else { 2 };
    Some(AudioFormat {
        sample_rate,
        channels,
    })
}

/// First occurrence of each marker, published once.
pub struct StreamMarkers {
    pub resolution: watch::Receiver<Option<Resolution>>,
    pub audio: watch::Receiver<Option<AudioFormat>>,
}

/// Scans diagnostic lines until the channel closes.
pub fn watch_markers(mut lines: mpsc::UnboundedReceiver<String>) -> StreamMarkers {
    let (resolution_tx, resolution) = watch::channel(None);
    let (audio_tx, audio) = watch::channel(None);
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            log::trace!("transcoder: {}", line);
            if resolution_tx.borrow().is_none() {
                if let Some(found) = parse_resolution(&line) {
                    log::debug!("video resolution {}x{}", found.width, found.height);
                    let _ = resolution_tx.send(Some(found));
                }
            }
            if audio_tx.borrow().is_none() {
                if let Some(found) = parse_audio_format(&line) {
                    log::debug!("audio {} Hz, {} channels", found.sample_rate, found.channels);
                    let _ = audio_tx.send(Some(found));
                }
            }
        }
    });
    StreamMarkers { resolution, audio }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_IN: &str = "  Stream #0:0: Video: h264 (Main), yuv420p(progressive), 1920x1080 [SAR 1:1 DAR 16:9], 25 fps, 25 tbr, 90k tbn";
    const VIDEO_OUT: &str = "  Stream #1:0: Video: rawvideo (I420 / 0x30323449), yuv420p(progressive), 640x360, q=2-31, 69120 kb/s";
    const AUDIO_IN: &str = "  Stream #0:1: Audio: aac (LC), 48000 Hz, stereo, fltp";
    const AUDIO_MONO: &str = "  Stream #0:1: Audio: pcm_mulaw, 8000 Hz, mono, s16, 64 kb/s";

    #[test]
    fn test_resolution_from_banner() {
        assert_eq!(
            parse_resolution(VIDEO_IN),
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(
            parse_resolution(VIDEO_OUT),
            Some(Resolution {
                width: 640,
                height: 360
            })
        );
        assert_eq!(parse_resolution(AUDIO_IN), None);
        assert_eq!(parse_resolution("Input #0, rtsp, from 'rtsp://10.0.0.5/live':"), None);
    }

    #[test]
    fn test_audio_format_from_banner() {
        assert_eq!(
            parse_audio_format(AUDIO_IN),
            Some(AudioFormat {
                sample_rate: 48000,
                channels: 2
            })
        );
        assert_eq!(
            parse_audio_format(AUDIO_MONO),
            Some(AudioFormat {
                sample_rate: 8000,
                channels: 1
            })
        );
        assert_eq!(parse_audio_format(VIDEO_IN), None);
        assert_eq!(
            parse_audio_format("  Stream #0:1: Audio: ac3, 48000 Hz, 5.1(side), fltp"),
            None
        );
    }

    #[test]
    fn test_sizes() {
        let hd = Resolution {
            width: 1920,
            height: 1080,
        };
        assert_eq!(hd.frame_size(), 1920 * 1080 * 3 / 2);
        let odd = Resolution {
            width: 3,
            height: 3,
        };
        assert_eq!(odd.frame_size(), 9 + 2 * 4);

        let stereo = AudioFormat {
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(stereo.chunk_size(), 1920);
        let mono = AudioFormat {
            sample_rate: 8000,
            channels: 1,
        };
        assert_eq!(mono.chunk_size(), 160);
    }

    #[tokio::test]
    async fn test_markers_published_once() -> anyhow::Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut markers = watch_markers(rx);
        tx.send("ffmpeg version 6.1".to_string())?;
        tx.send(VIDEO_IN.to_string())?;
        tx.send(AUDIO_IN.to_string())?;
        tx.send(VIDEO_OUT.to_string())?;

        let resolution = *markers.resolution.wait_for(|r| r.is_some()).await?;
        assert_eq!(resolution.map(|r| r.width), Some(1920));
        let audio = *markers.audio.wait_for(|a| a.is_some()).await?;
        assert_eq!(audio.map(|a| a.sample_rate), Some(48000));

        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(markers.resolution.borrow().map(|r| r.width), Some(1920));
        Ok(())
    }
}

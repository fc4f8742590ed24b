use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;

use super::{MediaManager, MediaSource};
use crate::{
    convert::{ConverterProvider, ConverterRef, FnConverter},
    error::MediaError,
    ffmpeg_input::FFmpegInput,
    media_object::MediaObject,
    mime,
    rtc::{BridgeOptions, RtcMessage},
    test_support::{FakePeerFactory, ScriptedTranscoder},
};

fn manager() -> MediaManager {
    let transcoder = ScriptedTranscoder::new(|args: Vec<String>, control| async move {
        if let Some(output) = args.last().filter(|arg| arg.ends_with(".jpg")) {
            tokio::fs::write(output, b"jpeg").await.unwrap();
            control.exit(Some(0));
        } else {
            control.killed().await;
        }
    });
    MediaManager::new(transcoder, "ffmpeg")
}

/// Publishes jpegs at a fake address.
fn jpeg_publisher(to: &str, prefix: &'static str) -> ConverterRef {
    FnConverter::new(mime::JPEG, to, move |data: Bytes, _from: String| async move {
        Ok(Bytes::from(format!("{}{}", prefix, data.len())))
    })
    .into_ref()
}

#[tokio::test]
async fn test_ensure_media_object() -> anyhow::Result<()> {
    let manager = manager();
    let url = manager.ensure_media_object("rtsp://camera.local/stream");
    assert_eq!(url.mime_type(), mime::URL);
    assert_eq!(url.data_string().await?, "rtsp://camera.local/stream");

    let jpeg = manager.create_media_object(Bytes::from_static(b"x"), mime::JPEG);
    let same = manager.ensure_media_object(MediaSource::from(jpeg.clone()));
    assert_eq!(same.mime_type(), mime::JPEG);
    assert_eq!(same.data().await?, jpeg.data().await?);
    Ok(())
}

#[tokio::test]
async fn test_create_objects() -> anyhow::Result<()> {
    let manager = manager();
    let input = FFmpegInput::from_url("rtsp://camera.local/stream");
    let media = manager.create_ffmpeg_media_object(&input)?;
    assert_eq!(media.mime_type(), mime::FFMPEG_INPUT);
    assert_eq!(FFmpegInput::from_bytes(&media.data().await?)?, input);

    let lazy =
        manager.create_media_object_lazy(async { Ok(Bytes::from_static(b"late")) }, "text/plain");
    assert!(!lazy.is_resolved());
    assert_eq!(lazy.data().await?, Bytes::from_static(b"late"));
    Ok(())
}

#[tokio::test]
async fn test_convert_url_to_thumbnail() -> anyhow::Result<()> {
    let manager = manager();
    let jpeg = manager
        .convert_to_buffer("rtsp://camera.local/stream", mime::JPEG)
        .await?;
    assert_eq!(jpeg, Bytes::from_static(b"jpeg"));
    Ok(())
}

#[tokio::test]
async fn test_convert_to_url_is_two_stage() -> anyhow::Result<()> {
    let manager = manager();
    manager
        .registry()
        .register(jpeg_publisher(mime::URL, "http://hub/jpeg/"));
    manager
        .registry()
        .register(jpeg_publisher(mime::LOCAL_URL, "http://127.0.0.1/jpeg/"));

    let url = manager
        .convert_to_url("rtsp://camera.local/stream", mime::JPEG)
        .await?;
    assert_eq!(url, "http://hub/jpeg/4");
    let local = manager
        .convert_to_local_url("rtsp://camera.local/stream", mime::JPEG)
        .await?;
    assert_eq!(local, "http://127.0.0.1/jpeg/4");

    let err = manager
        .convert_to_insecure_local_url("rtsp://camera.local/stream", mime::JPEG)
        .await
        .unwrap_err();
    match err.downcast_ref::<MediaError>() {
        Some(MediaError::ConversionUnsupported { from, to }) => {
            assert_eq!(from, mime::JPEG);
            assert_eq!(to, mime::INSECURE_LOCAL_URL);
        }
        other => panic!("unexpected error {:?}", other),
    }
    Ok(())
}

struct Toggle {
    enabled: AtomicBool,
}

impl ConverterProvider for Toggle {
    fn converters(&self) -> Vec<ConverterRef> {
        if self.enabled.load(Ordering::SeqCst) {
            let upper = |data: Bytes, _from: String| async move {
                Ok(Bytes::from(String::from_utf8_lossy(&data).to_uppercase()))
            };
            vec![FnConverter::new("text/plain", "text/upper", upper).into_ref()]
        } else {
            Vec::new()
        }
    }
}

#[tokio::test]
async fn test_edges_are_recomputed_per_call() -> anyhow::Result<()> {
    let manager = manager();
    let toggle = Arc::new(Toggle {
        enabled: AtomicBool::new(false),
    });
    manager.add_provider(toggle.clone());
    let text = || MediaObject::new("text/plain", "hi");

    assert!(manager.convert(text(), "text/upper").await.is_err());
    toggle.enabled.store(true, Ordering::SeqCst);
    let upper = manager.convert(text(), "text/upper").await?;
    assert_eq!(upper.data_string().await?, "HI");

    // registered edges come before the built-ins
    let edges = manager.converters();
    let targets: Vec<String> = edges.iter().map(|e| e.to_mime_type().to_string()).collect();
    assert_eq!(targets.first().map(String::as_str), Some("text/upper"));
    assert_eq!(targets.last().map(String::as_str), Some(mime::JPEG));

    let id = manager
        .registry()
        .register(jpeg_publisher(mime::URL, "http://hub/"));
    assert_eq!(manager.converters().len(), edges.len() + 1);
    assert!(manager.registry().unregister(id));
    assert_eq!(manager.converters().len(), edges.len());
    Ok(())
}

#[tokio::test]
async fn test_with_rtc_adds_signaling_edges() -> anyhow::Result<()> {
    let manager = manager().with_rtc(FakePeerFactory::new(), BridgeOptions::default());
    assert_eq!(manager.ffmpeg_path(), "ffmpeg");

    let offer = manager
        .convert_to_buffer("rtsp://camera.local/stream", mime::RTC_OFFER)
        .await?;
    let offer = RtcMessage::from_bytes(&offer)?;
    let sessions = manager.rtc_sessions().expect("rtc enabled");
    let session = sessions.get(&offer.id).expect("session registered");
    assert!(offer.description.is_some());
    session.close();
    Ok(())
}

use std::{sync::Arc, time::Duration};

use super::{continue_signaling, rtc_converters};
use crate::{
    convert::{ConverterRef, convert},
    error::MediaError,
    ffmpeg_input::FFmpegInput,
    media_object::MediaObject,
    mime,
    rtc::{
        bridge::BridgeOptions,
        peer::PeerEvent,
        session::RtcSessionTable,
        signaling::{RtcMessage, SessionDescription},
    },
    test_support::{FakePeerFactory, ScriptedTranscoder, candidate},
};

struct Harness {
    factory: Arc<FakePeerFactory>,
    sessions: RtcSessionTable,
    edges: Vec<ConverterRef>,
}

fn harness() -> Harness {
    let transcoder = ScriptedTranscoder::new(|_args, control| async move {
        control.killed().await;
    });
    let factory = FakePeerFactory::new();
    let sessions = RtcSessionTable::new();
    let edges = rtc_converters(
        transcoder,
        factory.clone(),
        sessions.clone(),
        BridgeOptions::default(),
    );
    Harness {
        factory,
        sessions,
        edges,
    }
}

async fn offer(harness: &Harness) -> anyhow::Result<RtcMessage> {
    let input = FFmpegInput::from_url("rtsp://camera.local/stream").to_bytes()?;
    let media = MediaObject::new(mime::FFMPEG_INPUT, input);
    let converted = convert(&harness.edges, media, mime::RTC_OFFER).await?;
    Ok(RtcMessage::from_bytes(&converted.data().await?)?)
}

async fn answer(harness: &Harness, message: &RtcMessage) -> anyhow::Result<RtcMessage> {
    let media = MediaObject::new(mime::RTC_ANSWER, message.to_bytes()?);
    let converted = convert(&harness.edges, media, mime::RTC_OFFER).await?;
    Ok(RtcMessage::from_bytes(&converted.data().await?)?)
}

fn close_all(harness: &Harness) {
    for id in harness.sessions.ids() {
        if let Some(session) = harness.sessions.get(&id) {
            session.close();
        }
    }
}

#[tokio::test]
async fn test_offer_edge_registers_session() -> anyhow::Result<()> {
    let harness = harness();
    let offer = offer(&harness).await?;

    assert!(harness.sessions.get(&offer.id).is_some());
    assert!(offer.description.is_some());
    assert!(offer.configuration.is_some());
    close_all(&harness);
    Ok(())
}

#[tokio::test]
async fn test_answer_rounds() -> anyhow::Result<()> {
    let harness = harness();
    let offer = offer(&harness).await?;
    let parts = harness.factory.last();

    // first round: remote description only
    let reply = answer(
        &harness,
        &RtcMessage {
            id: offer.id.clone(),
            description: Some(SessionDescription::answer("v=0\r\n")),
            ..Default::default()
        },
    )
    .await?;
    assert!(reply.candidates.is_empty());
    assert!(reply.description.is_none());
    assert_eq!(
        parts.peer.remote.lock().unwrap().clone(),
        Some(SessionDescription::answer("v=0\r\n"))
    );

    // second round: nothing queued, so the call waits
    let waiting = {
        let edges = harness.edges.clone();
        let id = offer.id.clone();
        tokio::spawn(async move {
            let message = RtcMessage {
                id,
                ..Default::default()
            };
            let media = MediaObject::new(mime::RTC_ANSWER, message.to_bytes()?);
            let converted = convert(&edges, media, mime::RTC_OFFER).await?;
            anyhow::Ok(RtcMessage::from_bytes(&converted.data().await?)?)
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    parts.events.send(PeerEvent::LocalCandidate(candidate(1)))?;
    let reply = tokio::time::timeout(Duration::from_secs(2), waiting).await???;
    assert_eq!(reply.id, offer.id);
    assert_eq!(reply.candidates, vec![candidate(1)]);

    let session = harness.sessions.get(&offer.id).expect("session");
    assert_eq!(session.pending_len(), 0);

    // later candidates are returned immediately and only once
    parts.events.send(PeerEvent::LocalCandidate(candidate(2)))?;
    parts.events.send(PeerEvent::LocalCandidate(candidate(3)))?;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let reply = answer(
        &harness,
        &RtcMessage {
            id: offer.id.clone(),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(reply.candidates, vec![candidate(2), candidate(3)]);
    assert_eq!(session.pending_len(), 0);

    close_all(&harness);
    Ok(())
}

#[tokio::test]
async fn test_remote_candidates_are_applied() -> anyhow::Result<()> {
    let harness = harness();
    let offer = offer(&harness).await?;
    let parts = harness.factory.last();

    answer(
        &harness,
        &RtcMessage {
            id: offer.id.clone(),
            description: Some(SessionDescription::answer("v=0\r\n")),
            ..Default::default()
        },
    )
    .await?;
    let reply = answer(
        &harness,
        &RtcMessage {
            id: offer.id.clone(),
            candidates: vec![candidate(8), candidate(9)],
            ..Default::default()
        },
    )
    .await?;

    assert!(reply.candidates.is_empty());
    assert_eq!(parts.peer.remote_candidates(), vec![candidate(8), candidate(9)]);
    close_all(&harness);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session() {
    let harness = harness();
    let err = answer(
        &harness,
        &RtcMessage {
            id: "gone".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    match err.downcast_ref::<MediaError>() {
        Some(MediaError::UnknownSession(id)) => assert_eq!(id, "gone"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_first_round_needs_description() -> anyhow::Result<()> {
    let harness = harness();
    let offer = offer(&harness).await?;

    let result = continue_signaling(
        &harness.sessions,
        RtcMessage {
            id: offer.id.clone(),
            candidates: vec![candidate(1)],
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(MediaError::InvalidPayload(_))));
    close_all(&harness);
    Ok(())
}

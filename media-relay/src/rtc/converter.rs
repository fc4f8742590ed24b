//! Signaling exposed as converter edges: a transcoder input converts to an
//! offer, and every answer round converts to the next batch of candidates.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    bridge::{BridgeOptions, RtcBridge},
    peer::PeerConnectionFactory,
    session::RtcSessionTable,
    signaling::RtcMessage,
};
use crate::{
    convert::{Converter, ConverterRef},
    error::{MediaError, Result},
    ffmpeg_input::FFmpegInput,
    mime,
    transcoder::Transcoder,
};

/// `x-media/x-ffmpeg-input` -> `x-media/x-rtc-av-offer`
pub struct OfferConverter {
    transcoder: Arc<dyn Transcoder>,
    factory: Arc<dyn PeerConnectionFactory>,
    sessions: RtcSessionTable,
    options: BridgeOptions,
}

impl OfferConverter {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        factory: Arc<dyn PeerConnectionFactory>,
        sessions: RtcSessionTable,
        options: BridgeOptions,
    ) -> Self {
        Self {
            transcoder,
            factory,
            sessions,
            options,
        }
    }
}

#[async_trait]
impl Converter for OfferConverter {
    fn from_mime_type(&self) -> &str {
        mime::FFMPEG_INPUT
    }

    fn to_mime_type(&self) -> &str {
        mime::RTC_OFFER
    }

    async fn convert(&self, data: Bytes, _from_mime_type: &str) -> anyhow::Result<Bytes> {
        let input = FFmpegInput::from_bytes(&data)?;
        let (_bridge, offer) = RtcBridge::start(
            self.transcoder.as_ref(),
            self.factory.as_ref(),
            &self.sessions,
            &input,
            self.options.clone(),
        )
        .await?;
        Ok(offer.to_bytes()?)
    }
}

/// `x-media/x-rtc-av-answer` -> `x-media/x-rtc-av-offer`
pub struct AnswerConverter {
    sessions: RtcSessionTable,
}

impl AnswerConverter {
    pub fn new(sessions: RtcSessionTable) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Converter for AnswerConverter {
    fn from_mime_type(&self) -> &str {
        mime::RTC_ANSWER
    }

    fn to_mime_type(&self) -> &str {
        mime::RTC_OFFER
    }

    async fn convert(&self, data: Bytes, _from_mime_type: &str) -> anyhow::Result<Bytes> {
        let message = RtcMessage::from_bytes(&data)?;
        let reply = continue_signaling(&self.sessions, message).await?;
        Ok(reply.to_bytes()?)
    }
}

/// One round of the answer exchange.
///
/// The first round applies the remote description, later rounds either
/// apply remote candidates or wait for local ones. Only the waiting round
/// returns candidates.
pub async fn continue_signaling(
    sessions: &RtcSessionTable,
    message: RtcMessage,
) -> Result<RtcMessage> {
    let session = sessions
        .get(&message.id)
        .ok_or_else(|| MediaError::UnknownSession(message.id.clone()))?;
    let connection = session.connection();

    let candidates = if !connection.has_remote_description().await {
        let description = message.description.ok_or_else(|| {
            MediaError::InvalidPayload(format!(
                "session {} has no remote description yet",
                message.id
            ))
        })?;
        connection.set_remote_description(description).await?;
        Vec::new()
    } else if !message.candidates.is_empty() {
        for candidate in message.candidates {
            log::debug!(
                "rtc session {} remote candidate {}",
                message.id,
                candidate.candidate
            );
            connection.add_ice_candidate(candidate).await?;
        }
        Vec::new()
    } else {
        session.next_candidates().await
    };

    Ok(RtcMessage {
        id: message.id,
        description: None,
        candidates,
        configuration: None,
    })
}

/// Both signaling edges sharing one session table.
pub fn rtc_converters(
    transcoder: Arc<dyn Transcoder>,
    factory: Arc<dyn PeerConnectionFactory>,
    sessions: RtcSessionTable,
    options: BridgeOptions,
) -> Vec<ConverterRef> {
    let offer: ConverterRef = Arc::new(OfferConverter::new(
        transcoder,
        factory,
        sessions.clone(),
        options,
    ));
    let answer: ConverterRef = Arc::new(AnswerConverter::new(sessions));
    vec![offer, answer]
}

#[cfg(test)]
#[path = "converter_test.rs"]
mod converter_test;

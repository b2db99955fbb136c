//! WhatsApp Cloud API webhook payload: envelope types and normalization
//! into `InboundMessage`. Parsing is lenient; a payload we cannot use is the
//! platform's problem to have sent, not a reason to reply non-200 (non-200
//! triggers redelivery, which only amplifies duplicates).

use crate::message::{InboundMessage, MediaRef, MessageKind};
use serde::Deserialize;

/// Top-level webhook POST body: `entry[].changes[].value.messages[]`.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

/// One message as delivered in the payload. Exactly one of the kind-specific
/// objects is normally present, matching the `type` field.
#[derive(Debug, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    /// Unix timestamp, delivered as a decimal string.
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<TextBody>,
    pub image: Option<RawMedia>,
    pub video: Option<RawMedia>,
    pub audio: Option<RawMedia>,
    pub document: Option<RawMedia>,
    pub sticker: Option<RawMedia>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct RawMedia {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    pub file_size: Option<u64>,
    pub filename: Option<String>,
    pub caption: Option<String>,
}

fn default_mime() -> String {
    "unknown".to_string()
}

impl RawMessage {
    fn media_for_kind(&self, kind: MessageKind) -> Option<&RawMedia> {
        match kind {
            MessageKind::Image => self.image.as_ref(),
            MessageKind::Video => self.video.as_ref(),
            MessageKind::Audio => self.audio.as_ref(),
            MessageKind::Document => self.document.as_ref(),
            MessageKind::Sticker => self.sticker.as_ref(),
            _ => None,
        }
    }
}

/// Normalize every message in the envelope. Messages whose declared media
/// kind has no matching media object are kept as media-less records so they
/// still show up in dedup and task history.
pub fn parse_envelope(envelope: &WebhookEnvelope) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    for entry in &envelope.entry {
        for change in &entry.changes {
            for raw in &change.value.messages {
                out.push(normalize(raw));
            }
        }
    }
    out
}

fn normalize(raw: &RawMessage) -> InboundMessage {
    let kind = MessageKind::parse(&raw.kind);
    let timestamp = raw.timestamp.parse::<i64>().unwrap_or(0);
    let media = raw.media_for_kind(kind).map(|m| MediaRef {
        media_id: m.id.clone(),
        mime_type: m.mime_type.clone(),
        declared_size: m.file_size,
        filename: m.filename.clone(),
        caption: m.caption.clone(),
    });
    let text = match kind {
        MessageKind::Text => raw.text.as_ref().map(|t| t.body.clone()),
        _ => media.as_ref().and_then(|m| m.caption.clone()),
    };
    InboundMessage {
        message_id: raw.id.clone(),
        sender: raw.from.clone(),
        timestamp,
        kind,
        text,
        media,
    }
}

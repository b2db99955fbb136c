//! Inbound message from the webhook layer: normalized once, then handed to
//! the pipeline for dedup and (for media kinds) background processing.

use serde::{Deserialize, Serialize};

/// Message kind as reported by the platform payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    /// Any kind the parser does not recognize. Carried through so dedup and
    /// status reporting still work; never fetched.
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Parse the platform's `type` field. Unrecognized values map to Unknown.
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "document" => MessageKind::Document,
            "sticker" => MessageKind::Sticker,
            _ => MessageKind::Unknown,
        }
    }
}

/// Reference to a media object on the platform side. The actual bytes are
/// fetched later by the worker, never on the webhook path.
#[derive(Debug, Clone)]
pub struct MediaRef {
    /// Platform media id used for the metadata lookup.
    pub media_id: String,
    /// MIME type as declared in the webhook payload.
    pub mime_type: String,
    /// Declared size in bytes, when the payload carries one.
    pub declared_size: Option<u64>,
    /// Original filename (documents usually have one, images rarely do).
    pub filename: Option<String>,
    pub caption: Option<String>,
}

/// A normalized inbound message. Built by the webhook parser, consumed once
/// by `Pipeline::enqueue`, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message id (e.g. "wamid.XXXX").
    pub message_id: String,
    /// Sender phone number as given by the platform.
    pub sender: String,
    /// Unix timestamp from the payload.
    pub timestamp: i64,
    pub kind: MessageKind,
    /// Text body for text messages, caption text otherwise (may be empty).
    pub text: Option<String>,
    /// Present for media kinds; None for text and unknown kinds.
    pub media: Option<MediaRef>,
}

impl InboundMessage {
    /// Convenience constructor for a plain text message.
    pub fn text(
        message_id: impl Into<String>,
        sender: impl Into<String>,
        timestamp: i64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender: sender.into(),
            timestamp,
            kind: MessageKind::Text,
            text: Some(body.into()),
            media: None,
        }
    }
}

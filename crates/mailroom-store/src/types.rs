//! Records shared by the queue, outbox, history and wire layers.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Identifier of a queue message or outbox entry.
///
/// Allocated from each document's high-water mark, so ids only ever grow.
pub type MessageId = u64;

/// Which way a message travels relative to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound instruction waiting for (or handled by) the worker.
    In,
    /// Outbound report produced by the worker.
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// The content type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Photo,
    Document,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }
}

/// The body of a message. Photos and documents always carry a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Photo {
        path: String,
        caption: Option<String>,
    },
    Document {
        path: String,
        caption: Option<String>,
    },
}

impl Payload {
    /// Convenience constructor for a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Photo { .. } => MessageKind::Photo,
            Self::Document { .. } => MessageKind::Document,
        }
    }

    /// Reject empty text and empty file paths.
    pub fn validate(&self) -> StoreResult<()> {
        match self {
            Self::Text(text) if text.trim().is_empty() => {
                Err(StoreError::InvalidArgument("text is required".into()))
            }
            Self::Photo { path, .. } | Self::Document { path, .. } if path.trim().is_empty() => {
                Err(StoreError::InvalidArgument("file_path is required".into()))
            }
            _ => Ok(()),
        }
    }

    /// Split into the flat `(kind, text, file_path, caption)` storage shape.
    fn into_parts(self) -> (MessageKind, Option<String>, Option<String>, Option<String>) {
        match self {
            Self::Text(text) => (MessageKind::Text, Some(text.trim().to_owned()), None, None),
            Self::Photo { path, caption } => (MessageKind::Photo, None, Some(path), caption),
            Self::Document { path, caption } => (MessageKind::Document, None, Some(path), caption),
        }
    }
}

/// Current time as an RFC 3339 UTC string with microseconds.
///
/// Fixed precision keeps lexicographic order equal to chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// URL under which the HTTP surface serves an artifact path.
pub fn file_url(path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("/api/files/{}", encoded.join("/"))
}

fn inbound() -> Direction {
    Direction::In
}

fn outbound() -> Direction {
    Direction::Out
}

// ═══════════════════════════════════════════════════════════════════════
//  Queue message
// ═══════════════════════════════════════════════════════════════════════

/// An inbound unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default = "inbound")]
    pub direction: Direction,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub processed: bool,
}

/// Everything a producer supplies when enqueuing.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub payload: Payload,
    pub chat_id: Option<i64>,
    pub user: Option<String>,
}

impl NewMessage {
    /// A text message with no chat or user attribution.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::text(text),
            chat_id: None,
            user: None,
        }
    }

    pub fn with_chat(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl Message {
    pub(crate) fn build(id: MessageId, new: NewMessage, timestamp: String) -> Self {
        let (kind, text, file_path, caption) = new.payload.into_parts();
        Self {
            id,
            direction: Direction::In,
            kind,
            text,
            file_path,
            caption,
            chat_id: new.chat_id,
            user: new.user,
            timestamp,
            processed: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Outbox entry
// ═══════════════════════════════════════════════════════════════════════

/// An outbound report. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: MessageId,
    /// The queue message this entry reports on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default = "outbound")]
    pub direction: Direction,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub timestamp: String,
}

impl OutboxEntry {
    pub(crate) fn build(
        id: MessageId,
        reply_to: Option<MessageId>,
        payload: Payload,
        chat_id: Option<i64>,
        timestamp: String,
    ) -> Self {
        let (kind, text, file_path, caption) = payload.into_parts();
        Self {
            id,
            reply_to,
            direction: Direction::Out,
            kind,
            text,
            file_path,
            caption,
            chat_id,
            timestamp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Timeline item
// ═══════════════════════════════════════════════════════════════════════

/// One display-ready entry of the merged timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: MessageId,
    pub direction: Direction,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub timestamp: String,
    /// Only meaningful for inbound items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
}

impl TimelineItem {
    /// The text a viewer shows: body text, else caption, else file path.
    pub fn display_text(&self) -> &str {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.caption.as_deref())
            .or(self.file_path.as_deref())
            .unwrap_or("")
    }
}

impl From<&Message> for TimelineItem {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            direction: Direction::In,
            kind: m.kind,
            text: m.text.clone(),
            caption: m.caption.clone(),
            file_path: m.file_path.clone(),
            file_url: m.file_path.as_deref().map(file_url),
            chat_id: m.chat_id,
            user: m.user.clone(),
            reply_to: None,
            timestamp: m.timestamp.clone(),
            processed: Some(m.processed),
        }
    }
}

impl From<&OutboxEntry> for TimelineItem {
    fn from(e: &OutboxEntry) -> Self {
        Self {
            id: e.id,
            direction: Direction::Out,
            kind: e.kind,
            text: e.text.clone(),
            caption: e.caption.clone(),
            file_path: e.file_path.clone(),
            file_url: e.file_path.as_deref().map(file_url),
            chat_id: e.chat_id,
            user: None,
            reply_to: e.reply_to,
            timestamp: e.timestamp.clone(),
            processed: None,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_rejected() {
        assert!(Payload::text("   ").validate().is_err());
        assert!(Payload::text("ping").validate().is_ok());
    }

    #[test]
    fn photo_requires_path() {
        let photo = Payload::Photo {
            path: String::new(),
            caption: None,
        };
        assert!(photo.validate().is_err());
    }

    #[test]
    fn file_url_encodes_segments() {
        assert_eq!(file_url("out/my file.png"), "/api/files/out/my%20file.png");
        assert_eq!(file_url("report.txt"), "/api/files/report.txt");
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_timestamp();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn message_serializes_lowercase_enums() {
        let msg = Message::build(1, NewMessage::text(" ping "), "2026-01-01T00:00:00.000000Z".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["direction"], "in");
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "ping");
        assert_eq!(json["processed"], false);
        assert!(json.get("file_path").is_none());
    }

    #[test]
    fn display_text_falls_back_to_caption() {
        let entry = OutboxEntry::build(
            1,
            Some(3),
            Payload::Document {
                path: "a.txt".into(),
                caption: Some("result".into()),
            },
            None,
            now_timestamp(),
        );
        let item = TimelineItem::from(&entry);
        assert_eq!(item.display_text(), "result");
        assert_eq!(item.file_url.as_deref(), Some("/api/files/a.txt"));
        assert_eq!(item.reply_to, Some(3));
    }
}

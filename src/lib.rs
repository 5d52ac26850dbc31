//! Discode: bridges AI coding-assistant CLIs to group-chat platforms.

pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod fallback;
pub mod handlers;
pub mod hooks;
pub mod messaging;
pub mod pipeline;
pub mod router;
pub mod runtime;
pub mod state;
pub mod streaming;
#[cfg(feature = "metrics")]
pub mod telemetry;
pub mod tracker;

pub use error::{Error, Result};
pub use event::{Event, EventContext};
pub use state::{Instance, ProjectState};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a single agent instance within a project: the project name plus
/// the instance's channel/session slot. Keys every per-instance piece of
/// state (pending turn, streaming entry, timers, fallback watchdog).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub project: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(project: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.project, self.instance_id)
    }
}

/// Inbound message from any messaging platform, destined for the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub source: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Set by the router after resolving a conversation to a project/instance.
    pub instance_key: Option<InstanceKey>,
    pub content: MessageContent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Platform-formatted author display (e.g. "Alice (<@123>)" for Discord).
    pub formatted_author: Option<String>,
}

/// Message content variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Media {
        text: Option<String>,
        attachments: Vec<Attachment>,
    },
    /// A platform interactive component was actioned (button click, select menu).
    Interaction {
        action_id: String,
        block_id: Option<String>,
        values: Vec<String>,
        label: Option<String>,
        message_ts: Option<String>,
    },
}

impl std::fmt::Display for MessageContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageContent::Text(text) => write!(f, "{}", text),
            MessageContent::Media { text, .. } => {
                if let Some(t) = text {
                    write!(f, "{}", t)
                } else {
                    write!(f, "[media]")
                }
            }
            MessageContent::Interaction {
                action_id, label, ..
            } => match label {
                Some(l) => write!(f, "[interaction: {} -> {}]", action_id, l),
                None => write!(f, "[interaction: {}]", action_id),
            },
        }
    }
}

/// File attachment metadata (from an inbound message or downloaded to disk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub url: String,
    pub size_bytes: Option<u64>,
}

/// A channel/message-id-addressed rich card (maps to a Discord Embed).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Card {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub url: Option<String>,
    #[serde(default)]
    pub fields: Vec<CardField>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// A button offered alongside a question posted via `send_question_with_buttons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub custom_id: Option<String>,
    pub style: ButtonStyle,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
    Link,
}

/// MIME type from a file extension, covering the image / PDF / text family
/// the router accepts for inbound downloads and the idle handler re-attaches
/// for outbound agent-produced files. Falls back to a generic octet stream
/// for anything unrecognized rather than rejecting it outright.
pub fn guess_mime_type(path: &std::path::Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Whether `mime_type` belongs to the image / PDF / text family the router
/// accepts for inbound attachment downloads (§4.7 step 4).
pub fn is_supported_attachment_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf" || mime_type.starts_with("text/")
}

/// Serde helper for encoding `Vec<u8>` as base64 in JSON.
pub mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

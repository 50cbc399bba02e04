//! Chat message model and inbound event types
//!
//! - ChatEvent: normalized upstream events (arrival, delete, timeout, clear)
//! - ChatMessage: the payload carried through hold → pending → active
//! - Segment: what the host actually renders after visibility toggles

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::config::Settings;

// ============================================================================
// Inbound events
// ============================================================================

/// Inline emote annotation. `start`/`end` are char offsets into the text, end exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emote {
    pub name: String,
    pub image_ref: String,
    pub start: usize,
    pub end: usize,
}

/// A chat message as delivered by the event source.
///
/// `id` and `text` default to empty so a payload missing them still
/// deserializes and gets rejected at intake rather than in the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub emotes: Vec<Emote>,
}

impl ChatMessage {
    /// Plain text message with no emotes, badges or color
    pub fn new(id: impl Into<String>, username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            text: text.into(),
            color: None,
            badges: Vec::new(),
            emotes: Vec::new(),
        }
    }

    /// Username key used by the geometry index
    pub fn user_key(&self) -> String {
        fold_username(&self.username)
    }
}

/// Case-fold a username for lookup
pub fn fold_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Events consumed by the overlay core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    ChatMessageArrived(ChatMessage),
    MessageDeleted { id: String },
    UserTimedOut { username: String },
    ChatCleared,
}

impl ChatEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::ChatMessageArrived(_) => "ChatMessageArrived",
            ChatEvent::MessageDeleted { .. } => "MessageDeleted",
            ChatEvent::UserTimedOut { .. } => "UserTimedOut",
            ChatEvent::ChatCleared => "ChatCleared",
        }
    }
}

// ============================================================================
// Render segments
// ============================================================================

/// One renderable piece of a message, in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Username { name: String, color: Option<String> },
    Text { text: String },
    Emote { name: String, image_ref: String },
}

/// Build the segments the host should render, honoring visibility toggles.
///
/// Emotes with out-of-range or overlapping offsets are treated as plain text.
pub fn render_segments(msg: &ChatMessage, settings: &Settings) -> Vec<Segment> {
    let mut out = Vec::new();

    if settings.show_usernames && !msg.username.trim().is_empty() {
        out.push(Segment::Username {
            name: msg.username.clone(),
            color: msg.color.clone(),
        });
    }

    let chars: Vec<char> = msg.text.chars().collect();
    let mut emotes: Vec<&Emote> = msg.emotes.iter().collect();
    emotes.sort_by_key(|e| e.start);

    let mut cursor = 0usize;
    for emote in emotes {
        if emote.start < cursor || emote.start >= emote.end || emote.end > chars.len() {
            trace!(id = %msg.id, name = %emote.name, start = emote.start, end = emote.end, "Skipping invalid emote range");
            continue;
        }
        push_text(&mut out, &chars[cursor..emote.start], settings);
        if settings.show_emotes {
            out.push(Segment::Emote {
                name: emote.name.clone(),
                image_ref: emote.image_ref.clone(),
            });
        }
        cursor = emote.end;
    }
    push_text(&mut out, &chars[cursor..], settings);

    out
}

/// True if any segment besides the username prefix would be drawn
pub fn has_visible_content(segments: &[Segment]) -> bool {
    segments
        .iter()
        .any(|s| !matches!(s, Segment::Username { .. }))
}

fn push_text(out: &mut Vec<Segment>, chars: &[char], settings: &Settings) {
    if !settings.show_text || chars.is_empty() {
        return;
    }

    let text: String = if settings.show_emojis {
        chars.iter().collect()
    } else {
        chars.iter().filter(|c| !is_emoji(**c)).collect()
    };

    if text.trim().is_empty() {
        return;
    }

    // Merge with a preceding text run (happens when a hidden emote separated them)
    if let Some(Segment::Text { text: prev }) = out.last_mut() {
        prev.push_str(&text);
    } else {
        out.push(Segment::Text { text });
    }
}

/// Rough emoji classification: pictographic planes plus joiners/selectors
fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B00..=0x2BFF | 0xFE0F | 0x200D | 0x1F1E6..=0x1F1FF
    )
}

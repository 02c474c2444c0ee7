//! Chat channel messages and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event name for newly posted messages.
pub const MESSAGE_NEW: &str = "message.new";
/// Event name for in-place message edits.
pub const MESSAGE_UPDATED: &str = "message.updated";
/// Event name for AI status indicators.
pub const AI_INDICATOR_UPDATE: &str = "ai_indicator.update";

/// A message as stored by the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    /// Channel id (`type:id`) the message belongs to.
    pub cid: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of a message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub ai_generated: bool,
}

impl NewMessage {
    /// A message authored by the agent.
    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ai_generated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_DONE")]
    Done,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

impl AiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiState::Thinking => "AI_STATE_THINKING",
            AiState::Done => "AI_STATE_DONE",
            AiState::Error => "AI_STATE_ERROR",
        }
    }

    /// DONE and ERROR end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AiState::Done | AiState::Error)
    }
}

/// Out-of-band status signal, optionally tied to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorEvent {
    pub ai_state: AiState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl IndicatorEvent {
    /// Indicator keyed by the message's `cid` and `id`.
    pub fn for_message(ai_state: AiState, message: &ChannelMessage) -> Self {
        Self {
            ai_state,
            cid: Some(message.cid.clone()),
            message_id: Some(message.id.clone()),
        }
    }

    /// Indicator with no message attached.
    pub fn bare(ai_state: AiState) -> Self {
        Self {
            ai_state,
            cid: None,
            message_id: None,
        }
    }

    pub fn refers_to(&self, message: &ChannelMessage) -> bool {
        self.cid.as_deref() == Some(message.cid.as_str())
            && self.message_id.as_deref() == Some(message.id.as_str())
    }
}

/// Events delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "message.new")]
    MessageNew {
        cid: String,
        #[serde(default)]
        message: Option<ChannelMessage>,
    },
    #[serde(rename = "message.updated")]
    MessageUpdated { cid: String, message: ChannelMessage },
    #[serde(rename = "ai_indicator.update")]
    AiIndicator(IndicatorEvent),
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::MessageNew { .. } => MESSAGE_NEW,
            ChannelEvent::MessageUpdated { .. } => MESSAGE_UPDATED,
            ChannelEvent::AiIndicator(_) => AI_INDICATOR_UPDATE,
        }
    }
}

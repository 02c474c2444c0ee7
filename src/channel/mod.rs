//! Chat channel collaborator.
//!
//! The transport (connect, auth, persistence, fan-out) lives outside this
//! crate. Agents only see a [`ChatSession`]: a connected user bound to one
//! channel, able to post, edit, signal, and deliver events.

mod memory;
mod types;

pub use memory::{MemoryChannel, Operation};
pub use types::{
    AI_INDICATOR_UPDATE, AiState, ChannelEvent, ChannelMessage, IndicatorEvent, MESSAGE_NEW,
    MESSAGE_UPDATED, NewMessage,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Session is disconnected")]
    Disconnected,

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A connected chat session scoped to one channel.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Channel id (`cid`) this session is bound to.
    fn channel_id(&self) -> &str;

    /// Post a new message and return it as stored.
    async fn send_message(&self, message: NewMessage) -> Result<ChannelMessage, ChannelError>;

    /// Publish an indicator. No acknowledgement beyond transport success.
    async fn send_event(&self, event: IndicatorEvent) -> Result<(), ChannelError>;

    /// Overwrite the text of an existing message in place.
    async fn update_message(&self, id: &str, text: &str) -> Result<ChannelMessage, ChannelError>;

    /// Start receiving channel events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Tear down the session.
    async fn disconnect(&self) -> Result<(), ChannelError>;
}

//! In-process channel used by the CLI and tests.

use super::types::{ChannelEvent, ChannelMessage, IndicatorEvent, NewMessage};
use super::{ChannelError, ChatSession};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Outbound call made through [`ChatSession`], in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SendMessage(ChannelMessage),
    SendEvent(IndicatorEvent),
    UpdateMessage { id: String, text: String },
    Disconnect,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<ChannelMessage>,
    operations: Vec<Operation>,
    disconnected: bool,
}

/// A channel that keeps history in memory and fans events out over a
/// broadcast channel.
#[derive(Debug)]
pub struct MemoryChannel {
    cid: String,
    /// User id stamped on messages sent through the session.
    user_id: String,
    state: Mutex<State>,
    events: broadcast::Sender<ChannelEvent>,
}

impl MemoryChannel {
    pub fn new(cid: impl Into<String>, user_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cid: cid.into(),
            user_id: user_id.into(),
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Simulate another participant posting a message.
    pub fn post_user_message(&self, user_id: &str, text: &str) -> ChannelMessage {
        let message = ChannelMessage {
            id: uuid::Uuid::new_v4().to_string(),
            cid: self.cid.clone(),
            text: text.to_string(),
            ai_generated: false,
            user_id: Some(user_id.to_string()),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.lock().messages.push(message.clone());
        self.publish(ChannelEvent::MessageNew {
            cid: self.cid.clone(),
            message: Some(message.clone()),
        });
        message
    }

    /// Deliver a raw event to subscribers without touching history.
    pub fn publish(&self, event: ChannelEvent) {
        // No subscribers is not an error for a broadcast.
        let _ = self.events.send(event);
    }

    /// Stored messages in posting order.
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.lock().messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<ChannelMessage> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Outbound calls made through the session so far.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    fn ensure_connected(state: &State) -> Result<(), ChannelError> {
        if state.disconnected {
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatSession for MemoryChannel {
    fn channel_id(&self) -> &str {
        &self.cid
    }

    async fn send_message(&self, message: NewMessage) -> Result<ChannelMessage, ChannelError> {
        let stored = {
            let mut state = self.lock();
            Self::ensure_connected(&state)?;
            let stored = ChannelMessage {
                id: uuid::Uuid::new_v4().to_string(),
                cid: self.cid.clone(),
                text: message.text,
                ai_generated: message.ai_generated,
                user_id: Some(self.user_id.clone()),
                created_at: Utc::now(),
                updated_at: None,
            };
            state.messages.push(stored.clone());
            state.operations.push(Operation::SendMessage(stored.clone()));
            stored
        };
        self.publish(ChannelEvent::MessageNew {
            cid: self.cid.clone(),
            message: Some(stored.clone()),
        });
        Ok(stored)
    }

    async fn send_event(&self, event: IndicatorEvent) -> Result<(), ChannelError> {
        {
            let mut state = self.lock();
            Self::ensure_connected(&state)?;
            state.operations.push(Operation::SendEvent(event.clone()));
        }
        self.publish(ChannelEvent::AiIndicator(event));
        Ok(())
    }

    async fn update_message(&self, id: &str, text: &str) -> Result<ChannelMessage, ChannelError> {
        let updated = {
            let mut state = self.lock();
            Self::ensure_connected(&state)?;
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| ChannelError::MessageNotFound(id.to_string()))?;
            message.text = text.to_string();
            message.updated_at = Some(Utc::now());
            let updated = message.clone();
            state.operations.push(Operation::UpdateMessage {
                id: id.to_string(),
                text: text.to_string(),
            });
            updated
        };
        self.publish(ChannelEvent::MessageUpdated {
            cid: self.cid.clone(),
            message: updated.clone(),
        });
        Ok(updated)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.disconnected = true;
        state.operations.push(Operation::Disconnect);
        Ok(())
    }
}

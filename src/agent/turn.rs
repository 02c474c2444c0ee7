//! One inbound message answered end to end.

use super::prompt::{assistant_prompt, compose_prompt, current_date};
use crate::channel::{AiState, ChannelError, ChannelMessage, ChatSession, IndicatorEvent, NewMessage};
use crate::provider::{self, ProviderClient};
use thiserror::Error;
use tracing::{debug, error};

/// Text of the stand-in message posted before generation starts.
pub const PLACEHOLDER_TEXT: &str = "🤖 Thinking...";
/// Prefix of the message posted when a turn fails.
pub const ERROR_PREFIX: &str = "❌ Sorry, I encountered an error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Thinking,
    Done,
    Error,
}

#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Provider(#[from] provider::Error),
}

impl TurnError {
    fn user_message(&self) -> String {
        match self {
            TurnError::Channel(e) => e.to_string(),
            TurnError::Provider(e) => e.user_message(),
        }
    }
}

/// Working state of a single turn. Never persisted.
#[derive(Debug)]
pub struct Turn {
    pub text: String,
    pub cid: String,
    pub placeholder: Option<ChannelMessage>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn new(text: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cid: cid.into(),
            placeholder: None,
            status: TurnStatus::Thinking,
        }
    }

    /// Run the turn to a terminal status. Failures are reported into the
    /// channel, never returned.
    pub(crate) async fn run(mut self, session: &dyn ChatSession, provider: &ProviderClient) -> Self {
        match self.respond(session, provider).await {
            Ok(()) => {
                self.status = TurnStatus::Done;
                debug!(cid = %self.cid, "Turn done");
            }
            Err(e) => self.fail(session, &e).await,
        }
        self
    }

    async fn respond(
        &mut self,
        session: &dyn ChatSession,
        provider: &ProviderClient,
    ) -> Result<(), TurnError> {
        let placeholder = session
            .send_message(NewMessage::ai(PLACEHOLDER_TEXT))
            .await?;
        self.placeholder = Some(placeholder.clone());

        session
            .send_event(IndicatorEvent::for_message(AiState::Thinking, &placeholder))
            .await?;

        let preamble = assistant_prompt(provider.name(), current_date());
        let prompt = compose_prompt(&preamble, &self.text);
        debug!(cid = %self.cid, message_id = %placeholder.id, "Generating reply");

        let reply = provider.generate(&prompt).await?;

        session.update_message(&placeholder.id, &reply).await?;
        session
            .send_event(IndicatorEvent::for_message(AiState::Done, &placeholder))
            .await?;
        Ok(())
    }

    /// Post a fresh error message and an ERROR indicator. The placeholder is
    /// left as it was. Failures here are logged and dropped.
    async fn fail(&mut self, session: &dyn ChatSession, err: &TurnError) {
        self.status = TurnStatus::Error;
        error!(cid = %self.cid, error = %err, "Error processing message");

        let text = format!("{ERROR_PREFIX}{}", err.user_message());
        if let Err(e) = session.send_message(NewMessage::ai(text)).await {
            error!(cid = %self.cid, error = %e, "Failed to post error message");
        }

        // ERROR goes out without cid/message_id, unlike THINKING and DONE.
        if let Err(e) = session
            .send_event(IndicatorEvent::bare(AiState::Error))
            .await
        {
            error!(cid = %self.cid, error = %e, "Failed to send error indicator");
        }
    }
}

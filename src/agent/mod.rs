//! Channel agent: answers every new user message in one channel.
//!
//! An [`Agent`] moves through `Uninitialized → Ready → Disposed`. While ready
//! it listens for `message.new` events and runs one [`Turn`] per qualifying
//! message, each in its own task. Turns are not serialized against each other.

mod prompt;
mod registry;
mod turn;

#[cfg(test)]
mod tests;

pub use registry::{AgentKey, AgentRegistry, spawn_idle_sweep};
pub use turn::{ERROR_PREFIX, PLACEHOLDER_TEXT, Turn, TurnStatus};

use crate::channel::{ChannelEvent, ChatSession};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::ProviderClient;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

struct Subscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready {
        provider: ProviderClient,
        subscription: Subscription,
    },
    Disposed,
}

struct AgentInner {
    session: Arc<dyn ChatSession>,
    config: Config,
    lifecycle: Mutex<Lifecycle>,
    /// Unix millis of the last message that passed the filter.
    last_interaction_ms: AtomicI64,
}

impl AgentInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ready_provider(&self) -> Option<ProviderClient> {
        match &*self.lifecycle() {
            Lifecycle::Ready { provider, .. } => Some(provider.clone()),
            _ => None,
        }
    }
}

/// AI responder bound to one chat session and channel.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("channel", &self.channel_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Agent {
    /// Create an uninitialized agent. Nothing is subscribed until [`Agent::init`].
    pub fn new(session: Arc<dyn ChatSession>, config: Config) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                session,
                config,
                lifecycle: Mutex::new(Lifecycle::Uninitialized),
                last_interaction_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            }),
        }
    }

    pub fn channel_id(&self) -> &str {
        self.inner.session.channel_id()
    }

    pub fn state(&self) -> AgentState {
        match &*self.inner.lifecycle() {
            Lifecycle::Uninitialized => AgentState::Uninitialized,
            Lifecycle::Initializing => AgentState::Initializing,
            Lifecycle::Ready { .. } => AgentState::Ready,
            Lifecycle::Disposed => AgentState::Disposed,
        }
    }

    /// Time the last qualifying message arrived (creation time before that).
    pub fn last_interaction(&self) -> DateTime<Utc> {
        let ms = self.inner.last_interaction_ms.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    fn touch(&self) {
        self.inner
            .last_interaction_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Connect the provider and start listening.
    ///
    /// A missing key or failed probe leaves the agent uninitialized with no
    /// subscription. A second call is rejected.
    pub async fn init(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle();
            match *lifecycle {
                Lifecycle::Uninitialized => *lifecycle = Lifecycle::Initializing,
                Lifecycle::Initializing | Lifecycle::Ready { .. } => {
                    return Err(Error::AlreadyInitialized);
                }
                Lifecycle::Disposed => return Err(Error::Disposed),
            }
        }

        let settings = self.inner.config.provider_settings();
        let provider = match ProviderClient::initialize(&settings).await {
            Ok(provider) => provider,
            Err(e) => {
                let mut lifecycle = self.inner.lifecycle();
                if matches!(*lifecycle, Lifecycle::Initializing) {
                    *lifecycle = Lifecycle::Uninitialized;
                }
                return Err(e.into());
            }
        };

        let mut lifecycle = self.inner.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Initializing) {
            // Disposed while the probe was in flight.
            return Err(Error::Disposed);
        }
        let token = CancellationToken::new();
        let events = self.inner.session.subscribe();
        let task = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            events,
            token.clone(),
        ));
        *lifecycle = Lifecycle::Ready {
            provider,
            subscription: Subscription { token, task },
        };
        drop(lifecycle);

        info!(
            channel = %self.channel_id(),
            backend = %settings.provider.name(),
            "Agent ready"
        );
        Ok(())
    }

    /// Unsubscribe, then disconnect the session.
    ///
    /// Safe before `init` and safe to repeat; only the first call disconnects.
    pub async fn dispose(&self) -> Result<()> {
        if !self.detach().await {
            return Ok(());
        }
        self.inner.session.disconnect().await?;
        info!(channel = %self.channel_id(), "Agent disposed");
        Ok(())
    }

    /// Stop listening and mark the agent disposed, leaving the session
    /// connected. Returns false if it was already disposed.
    pub(crate) async fn detach(&self) -> bool {
        let previous = std::mem::replace(&mut *self.inner.lifecycle(), Lifecycle::Disposed);
        match previous {
            Lifecycle::Disposed => return false,
            Lifecycle::Ready { subscription, .. } => {
                subscription.token.cancel();
                if let Err(e) = subscription.task.await {
                    warn!(error = %e, "Agent listener ended abnormally");
                }
            }
            Lifecycle::Uninitialized | Lifecycle::Initializing => {}
        }
        true
    }

    /// Handle one channel event. Returns the finished turn, or `None` when
    /// the event was ignored.
    pub async fn handle_event(&self, event: ChannelEvent) -> Option<Turn> {
        let ChannelEvent::MessageNew { cid, message } = event else {
            return None;
        };
        let Some(provider) = self.inner.ready_provider() else {
            debug!(channel = %self.channel_id(), "Agent not ready, ignoring message");
            return None;
        };
        let message = message?;
        if message.ai_generated || message.text.is_empty() {
            return None;
        }

        self.touch();

        let turn = Turn::new(message.text, cid);
        Some(turn.run(self.inner.session.as_ref(), &provider).await)
    }
}

/// Forward `message.new` events to fresh turn tasks until cancelled.
async fn listen(
    agent: Weak<AgentInner>,
    mut events: broadcast::Receiver<ChannelEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = token.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event @ ChannelEvent::MessageNew { .. }) => {
                let Some(inner) = agent.upgrade() else { break };
                let agent = Agent { inner };
                tokio::spawn(async move {
                    agent.handle_event(event).await;
                });
            }
            Ok(other) => debug!(event = other.name(), "Agent skipping event"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Agent fell behind channel events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Agent listener stopped");
}

//! Host-side bookkeeping: one agent per (session, channel).

use super::{Agent, AgentState};
use crate::channel::ChatSession;
use crate::config::Config;
use crate::error::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    pub session_id: String,
    pub channel_id: String,
}

impl AgentKey {
    pub fn new(session_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.session_id, self.channel_id)
    }
}

/// Running agents, owned by the hosting process.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<AgentKey, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an agent for `key`, or return the one already running there.
    ///
    /// `init` runs without holding the registry lock. A failed `init`
    /// registers nothing and leaves `session` connected. An entry whose
    /// agent was disposed directly is replaced.
    pub async fn start(
        &self,
        key: AgentKey,
        session: Arc<dyn ChatSession>,
        config: Config,
    ) -> Result<Agent> {
        if let Some(agent) = self.running(&key).await {
            return Ok(agent);
        }

        let agent = Agent::new(session, config);
        agent.init().await?;

        let mut agents = self.agents.lock().await;
        if let Some(existing) = agents.get(&key).filter(|a| is_live(a)).cloned() {
            drop(agents);
            // Another start for this key finished first; keep theirs.
            agent.detach().await;
            return Ok(existing);
        }
        info!(%key, "Agent started");
        agents.insert(key, agent.clone());
        Ok(agent)
    }

    async fn running(&self, key: &AgentKey) -> Option<Agent> {
        self.agents
            .lock()
            .await
            .get(key)
            .filter(|a| is_live(a))
            .cloned()
    }

    pub async fn get(&self, key: &AgentKey) -> Option<Agent> {
        self.agents.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.lock().await.is_empty()
    }

    /// Dispose and forget the agent for `key`. Returns false if none was running.
    pub async fn stop(&self, key: &AgentKey) -> Result<bool> {
        let Some(agent) = self.agents.lock().await.remove(key) else {
            return Ok(false);
        };
        agent.dispose().await?;
        info!(%key, "Agent stopped");
        Ok(true)
    }

    /// Dispose agents with no qualifying message for longer than `max_idle`.
    pub async fn dispose_idle(&self, max_idle: Duration) -> Vec<AgentKey> {
        let now = Utc::now();
        let idle: Vec<(AgentKey, Agent)> = {
            let mut agents = self.agents.lock().await;
            let keys: Vec<AgentKey> = agents
                .iter()
                .filter(|(_, agent)| {
                    (now - agent.last_interaction())
                        .to_std()
                        .is_ok_and(|elapsed| elapsed > max_idle)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| agents.remove(&key).map(|agent| (key, agent)))
                .collect()
        };

        dispose_all(&idle).await;
        idle.into_iter().map(|(key, _)| key).collect()
    }

    /// Dispose every agent.
    pub async fn shutdown(&self) {
        let all: Vec<(AgentKey, Agent)> = self.agents.lock().await.drain().collect();
        dispose_all(&all).await;
    }
}

fn is_live(agent: &Agent) -> bool {
    agent.state() != AgentState::Disposed
}

async fn dispose_all(agents: &[(AgentKey, Agent)]) {
    let results = futures::future::join_all(agents.iter().map(|(_, a)| a.dispose())).await;
    for ((key, _), result) in agents.iter().zip(results) {
        match result {
            Ok(()) => info!(%key, "Agent disposed"),
            Err(e) => error!(%key, error = %e, "Failed to dispose agent"),
        }
    }
}

/// Periodically dispose idle agents until `token` is cancelled.
pub fn spawn_idle_sweep(
    registry: Arc<AgentRegistry>,
    max_idle: Duration,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let disposed = registry.dispose_idle(max_idle).await;
                    if !disposed.is_empty() {
                        info!(count = disposed.len(), "Disposed idle agents");
                    }
                }
            }
        }
    })
}

//! Lifecycle and turn tests against an in-memory channel and a mock Gemini.

use super::*;
use crate::channel::{
    AiState, ChannelError, ChannelMessage, IndicatorEvent, MemoryChannel, NewMessage, Operation,
};
use crate::provider::Provider;
use async_trait::async_trait;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CID: &str = "messaging:general";
const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    }))
}

/// Every call, probe included, answers `text`.
async fn gemini_answering(text: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(gemini_reply(text))
        .mount(&server)
        .await;
    server
}

/// The probe succeeds, every later call gets `failure`.
async fn gemini_failing_after_probe(failure: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(gemini_reply("probe ok"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(failure)
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> Config {
    Config {
        provider: Provider::Google,
        google_api_key: Some("test-key".into()),
        base_url: Some(server.uri()),
        ..Config::default()
    }
}

fn channel() -> Arc<MemoryChannel> {
    Arc::new(MemoryChannel::new(CID, "ai-bot"))
}

fn user_message(text: &str, ai_generated: bool) -> ChannelEvent {
    ChannelEvent::MessageNew {
        cid: CID.into(),
        message: Some(ChannelMessage {
            id: uuid::Uuid::new_v4().to_string(),
            cid: CID.into(),
            text: text.into(),
            ai_generated,
            user_id: Some("alice".into()),
            created_at: Utc::now(),
            updated_at: None,
        }),
    }
}

async fn ready_agent(channel: &Arc<MemoryChannel>, server: &MockServer) -> Agent {
    let agent = Agent::new(channel.clone(), config_for(server));
    agent.init().await.expect("agent init");
    agent
}

/// Wait for the next DONE or ERROR indicator on the channel.
async fn next_terminal(rx: &mut broadcast::Receiver<ChannelEvent>) -> IndicatorEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ChannelEvent::AiIndicator(event)) = rx.recv().await
                && event.ai_state.is_terminal()
            {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for a terminal indicator")
}

fn sent_messages(ops: &[Operation]) -> Vec<ChannelMessage> {
    ops.iter()
        .filter_map(|op| match op {
            Operation::SendMessage(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn sent_events(ops: &[Operation]) -> Vec<IndicatorEvent> {
    ops.iter()
        .filter_map(|op| match op {
            Operation::SendEvent(e) => Some(e.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_successful_turn() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let turn = agent
        .handle_event(user_message("Hello", false))
        .await
        .expect("turn should run");
    assert_eq!(turn.status, TurnStatus::Done);

    let placeholder = turn.placeholder.expect("placeholder");
    assert_eq!(placeholder.text, PLACEHOLDER_TEXT);
    assert!(placeholder.ai_generated);

    assert_eq!(
        channel.operations(),
        vec![
            Operation::SendMessage(placeholder.clone()),
            Operation::SendEvent(IndicatorEvent::for_message(AiState::Thinking, &placeholder)),
            Operation::UpdateMessage {
                id: placeholder.id.clone(),
                text: "Hi there!".into(),
            },
            Operation::SendEvent(IndicatorEvent::for_message(AiState::Done, &placeholder)),
        ]
    );
    assert_eq!(channel.message(&placeholder.id).unwrap().text, "Hi there!");
}

#[tokio::test]
async fn test_reply_is_committed_verbatim() {
    let reply = "  Line one\n\n```rust\nfn main() {}\n```\n";
    let server = gemini_answering(reply).await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let turn = agent.handle_event(user_message("code?", false)).await.unwrap();
    let id = turn.placeholder.unwrap().id;
    assert_eq!(channel.message(&id).unwrap().text, reply);
}

#[tokio::test]
async fn test_prompt_has_preamble_date_and_user_text() {
    let server = gemini_answering("ok").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    agent
        .handle_event(user_message("What day is it?", false))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "probe plus one turn");
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();

    let today = chrono::Local::now().date_naive().format("%B %-d, %Y").to_string();
    assert!(prompt.contains("powered by Gemini"));
    assert!(prompt.contains(&today));
    assert!(prompt.ends_with("\n\nUser: What day is it?"));
}

#[tokio::test]
async fn test_provider_failure_posts_error_message() {
    let server = gemini_failing_after_probe(ResponseTemplate::new(500).set_body_json(
        serde_json::json!({ "error": { "message": "Internal error", "status": "INTERNAL" } }),
    ))
    .await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let turn = agent.handle_event(user_message("Hello", false)).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Error);

    let ops = channel.operations();
    assert!(
        !ops.iter().any(|op| matches!(op, Operation::UpdateMessage { .. })),
        "placeholder must not be edited on failure"
    );

    let messages = sent_messages(&ops);
    assert_eq!(messages.len(), 2);
    let placeholder = &messages[0];
    assert_eq!(placeholder.text, PLACEHOLDER_TEXT);
    assert_eq!(channel.message(&placeholder.id).unwrap().text, PLACEHOLDER_TEXT);

    let error_message = &messages[1];
    assert_ne!(error_message.id, placeholder.id);
    assert!(error_message.ai_generated);
    assert_eq!(
        error_message.text,
        "❌ Sorry, I encountered an error: HTTP 500 Internal Server Error: Internal error (status: INTERNAL)"
    );

    assert_eq!(
        sent_events(&ops),
        vec![
            IndicatorEvent::for_message(AiState::Thinking, placeholder),
            IndicatorEvent::bare(AiState::Error),
        ]
    );
}

#[tokio::test]
async fn test_empty_generation_is_reported() {
    let server = gemini_failing_after_probe(
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } })),
    )
    .await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let turn = agent.handle_event(user_message("Hello", false)).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Error);

    let messages = sent_messages(&channel.operations());
    assert_eq!(
        messages.last().unwrap().text,
        format!("{ERROR_PREFIX}No response generated from Gemini")
    );
}

#[tokio::test]
async fn test_ignored_events_make_no_calls() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    assert!(agent.handle_event(user_message("Hello", true)).await.is_none());
    assert!(agent.handle_event(user_message("", false)).await.is_none());
    assert!(
        agent
            .handle_event(ChannelEvent::MessageNew {
                cid: CID.into(),
                message: None,
            })
            .await
            .is_none()
    );
    assert!(
        agent
            .handle_event(ChannelEvent::AiIndicator(IndicatorEvent::bare(AiState::Done)))
            .await
            .is_none()
    );

    assert!(channel.operations().is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1, "probe only");
}

#[tokio::test]
async fn test_ignored_events_do_not_touch_last_interaction() {
    let server = gemini_answering("Hi").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;
    let before = agent.last_interaction();

    tokio::time::sleep(Duration::from_millis(5)).await;
    agent.handle_event(user_message("bot says", true)).await;
    assert_eq!(agent.last_interaction(), before);

    agent.handle_event(user_message("Hello", false)).await;
    assert!(agent.last_interaction() > before);
}

#[tokio::test]
async fn test_init_without_key_subscribes_nothing() {
    let channel = channel();
    let agent = Agent::new(channel.clone(), Config::default());

    let err = agent.init().await.unwrap_err();
    assert!(err.is_configuration(), "unexpected error: {err}");
    assert_eq!(agent.state(), AgentState::Uninitialized);
    assert_eq!(channel.subscriber_count(), 0);

    channel.post_user_message("alice", "Hello");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(agent.handle_event(user_message("Hello", false)).await.is_none());
    assert!(channel.operations().is_empty());
}

#[tokio::test]
async fn test_failed_probe_leaves_agent_uninitialized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;
    let channel = channel();
    let agent = Agent::new(channel.clone(), config_for(&server));

    let err = agent.init().await.unwrap_err();
    assert!(err.is_provider_unavailable(), "unexpected error: {err}");
    assert_eq!(agent.state(), AgentState::Uninitialized);
    assert_eq!(channel.subscriber_count(), 0);
    assert!(channel.operations().is_empty());
}

#[tokio::test]
async fn test_init_can_be_retried_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(gemini_reply("ok"))
        .mount(&server)
        .await;
    let channel = channel();
    let agent = Agent::new(channel.clone(), config_for(&server));

    assert!(agent.init().await.is_err());
    agent.init().await.unwrap();
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(channel.subscriber_count(), 1);
}

#[tokio::test]
async fn test_double_init_is_rejected() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    assert!(matches!(agent.init().await, Err(Error::AlreadyInitialized)));
    assert_eq!(channel.subscriber_count(), 1);

    let mut rx = channel.subscribe();
    channel.post_user_message("alice", "Hello");
    next_terminal(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sent_messages(&channel.operations()).len(), 1, "one placeholder");
}

#[tokio::test]
async fn test_dispose_before_init() {
    let channel = channel();
    let agent = Agent::new(channel.clone(), Config::default());

    agent.dispose().await.unwrap();
    assert_eq!(agent.state(), AgentState::Disposed);
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(channel.operations(), vec![Operation::Disconnect]);

    agent.dispose().await.unwrap();
    assert_eq!(channel.operations(), vec![Operation::Disconnect]);
    assert!(matches!(agent.init().await, Err(Error::Disposed)));
}

#[tokio::test]
async fn test_event_driven_turn() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;
    let mut rx = channel.subscribe();

    channel.post_user_message("alice", "Hello");
    let done = next_terminal(&mut rx).await;
    assert_eq!(done.ai_state, AiState::Done);

    let placeholder_id = done.message_id.expect("DONE carries the placeholder id");
    assert_eq!(done.cid.as_deref(), Some(CID));
    assert_eq!(channel.message(&placeholder_id).unwrap().text, "Hi there!");

    agent.dispose().await.unwrap();
}

#[tokio::test]
async fn test_agent_ignores_its_own_messages() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let _agent = ready_agent(&channel, &server).await;
    let mut rx = channel.subscribe();

    channel.post_user_message("alice", "Hello");
    next_terminal(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The placeholder went out as message.new; it must not start another turn.
    assert_eq!(sent_messages(&channel.operations()).len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_dispose_unsubscribes_then_disconnects() {
    let server = gemini_answering("Hi there!").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;
    assert_eq!(channel.subscriber_count(), 1);

    agent.dispose().await.unwrap();
    assert_eq!(channel.subscriber_count(), 0);
    assert!(channel.is_disconnected());

    channel.post_user_message("alice", "Hello?");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(channel.operations(), vec![Operation::Disconnect]);
    assert!(agent.handle_event(user_message("Hello", false)).await.is_none());
}

#[tokio::test]
async fn test_concurrent_turns_keep_their_own_placeholders() {
    let server = gemini_answering("answer").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let (a, b) = tokio::join!(
        agent.handle_event(user_message("first", false)),
        agent.handle_event(user_message("second", false)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    let (pa, pb) = (a.placeholder.unwrap(), b.placeholder.unwrap());
    assert_ne!(pa.id, pb.id);

    let events = sent_events(&channel.operations());
    for placeholder in [&pa, &pb] {
        let mine: Vec<_> = events.iter().filter(|e| e.refers_to(placeholder)).collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].ai_state, AiState::Thinking);
        assert_eq!(mine[1].ai_state, AiState::Done);
    }
}

/// Wraps a [`MemoryChannel`] and fails the `n`th `send_message` call.
struct FlakySession {
    inner: MemoryChannel,
    fail_on: usize,
    sends: AtomicUsize,
}

#[async_trait]
impl ChatSession for FlakySession {
    fn channel_id(&self) -> &str {
        self.inner.channel_id()
    }

    async fn send_message(&self, message: NewMessage) -> std::result::Result<ChannelMessage, ChannelError> {
        if self.sends.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(ChannelError::Transport("connection reset".into()));
        }
        self.inner.send_message(message).await
    }

    async fn send_event(&self, event: IndicatorEvent) -> std::result::Result<(), ChannelError> {
        self.inner.send_event(event).await
    }

    async fn update_message(
        &self,
        id: &str,
        text: &str,
    ) -> std::result::Result<ChannelMessage, ChannelError> {
        self.inner.update_message(id, text).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.subscribe()
    }

    async fn disconnect(&self) -> std::result::Result<(), ChannelError> {
        self.inner.disconnect().await
    }
}

fn flaky(fail_on: usize) -> Arc<FlakySession> {
    Arc::new(FlakySession {
        inner: MemoryChannel::new(CID, "ai-bot"),
        fail_on,
        sends: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn test_failed_error_report_is_swallowed() {
    let server = gemini_failing_after_probe(ResponseTemplate::new(500)).await;
    let session = flaky(2);
    let agent = Agent::new(session.clone(), config_for(&server));
    agent.init().await.unwrap();

    let turn = agent.handle_event(user_message("Hello", false)).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Error);

    let ops = session.inner.operations();
    assert_eq!(sent_messages(&ops).len(), 1, "only the placeholder landed");
    assert_eq!(
        sent_events(&ops).last(),
        Some(&IndicatorEvent::bare(AiState::Error))
    );
    assert_eq!(agent.state(), AgentState::Ready);
}

#[tokio::test]
async fn test_placeholder_failure_takes_error_path() {
    let server = gemini_answering("never used").await;
    let session = flaky(1);
    let agent = Agent::new(session.clone(), config_for(&server));
    agent.init().await.unwrap();

    let turn = agent.handle_event(user_message("Hello", false)).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Error);
    assert!(turn.placeholder.is_none());

    let ops = session.inner.operations();
    let messages = sent_messages(&ops);
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].text,
        format!("{ERROR_PREFIX}Transport error: connection reset")
    );
    assert_eq!(sent_events(&ops), vec![IndicatorEvent::bare(AiState::Error)]);
    assert_eq!(server.received_requests().await.unwrap().len(), 1, "probe only");
}

#[tokio::test]
async fn test_registry_reuses_running_agent() {
    let server = gemini_answering("Hi").await;
    let registry = AgentRegistry::new();
    let key = AgentKey::new("s1", CID);
    let channel = channel();

    registry
        .start(key.clone(), channel.clone(), config_for(&server))
        .await
        .unwrap();
    registry
        .start(key.clone(), channel.clone(), config_for(&server))
        .await
        .unwrap();

    assert_eq!(registry.len().await, 1);
    assert_eq!(channel.subscriber_count(), 1);

    assert!(registry.stop(&key).await.unwrap());
    assert!(registry.get(&key).await.is_none());
    assert!(channel.is_disconnected());
}

#[tokio::test]
async fn test_registry_disposes_only_idle_agents() {
    let server = gemini_answering("Hi").await;
    let registry = AgentRegistry::new();
    let idle_channel = channel();
    let busy_channel = Arc::new(MemoryChannel::new("messaging:random", "ai-bot"));
    let idle_key = AgentKey::new("s1", CID);
    let busy_key = AgentKey::new("s1", "messaging:random");

    registry
        .start(idle_key.clone(), idle_channel.clone(), config_for(&server))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let busy = registry
        .start(busy_key.clone(), busy_channel.clone(), config_for(&server))
        .await
        .unwrap();
    busy.handle_event(user_message("Hello", false)).await.unwrap();

    let disposed = registry.dispose_idle(Duration::from_millis(100)).await;
    assert_eq!(disposed, vec![idle_key]);
    assert!(idle_channel.is_disconnected());
    assert!(!busy_channel.is_disconnected());
    assert_eq!(registry.len().await, 1);

    registry.shutdown().await;
    assert!(registry.is_empty().await);
    assert!(busy_channel.is_disconnected());
}

#[tokio::test]
async fn test_registry_stays_usable_while_an_agent_starts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(gemini_reply("Hi").set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let registry = Arc::new(AgentRegistry::new());

    let starting = {
        let registry = registry.clone();
        let config = config_for(&server);
        tokio::spawn(async move {
            registry
                .start(AgentKey::new("s1", CID), channel(), config)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let len = tokio::time::timeout(Duration::from_millis(500), registry.len())
        .await
        .expect("registry locked during another agent's init");
    assert_eq!(len, 0);
    assert!(
        !tokio::time::timeout(
            Duration::from_millis(500),
            registry.stop(&AgentKey::new("s2", "messaging:random"))
        )
        .await
        .expect("stop blocked during another agent's init")
        .unwrap()
    );

    starting.await.unwrap().unwrap();
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_registry_replaces_directly_disposed_agent() {
    let server = gemini_answering("Hi").await;
    let registry = AgentRegistry::new();
    let key = AgentKey::new("s1", CID);

    let first = registry
        .start(key.clone(), channel(), config_for(&server))
        .await
        .unwrap();
    first.dispose().await.unwrap();

    let fresh_channel = channel();
    let second = registry
        .start(key.clone(), fresh_channel.clone(), config_for(&server))
        .await
        .unwrap();

    assert_eq!(second.state(), AgentState::Ready);
    assert_eq!(first.state(), AgentState::Disposed);
    assert_eq!(fresh_channel.subscriber_count(), 1);
    assert_eq!(registry.len().await, 1);
    assert_eq!(
        registry.get(&key).await.map(|a| a.state()),
        Some(AgentState::Ready)
    );
}

#[tokio::test]
async fn test_idle_sweep_disposes_past_configured_timeout() {
    let server = gemini_answering("Hi").await;
    let config = Config {
        idle_timeout_secs: 1,
        ..config_for(&server)
    };
    let registry = Arc::new(AgentRegistry::new());
    let idle_channel = channel();
    let busy_channel = Arc::new(MemoryChannel::new("messaging:random", "ai-bot"));

    registry
        .start(AgentKey::new("s1", CID), idle_channel.clone(), config.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let busy = registry
        .start(
            AgentKey::new("s1", "messaging:random"),
            busy_channel.clone(),
            config.clone(),
        )
        .await
        .unwrap();
    busy.handle_event(user_message("Hello", false)).await.unwrap();

    let token = CancellationToken::new();
    let sweep = spawn_idle_sweep(
        registry.clone(),
        config.idle_timeout(),
        Duration::from_millis(50),
        token.clone(),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    sweep.await.unwrap();

    assert!(idle_channel.is_disconnected());
    assert!(!busy_channel.is_disconnected());
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_whitespace_reply_is_committed() {
    let server = gemini_answering("  ").await;
    let channel = channel();
    let agent = ready_agent(&channel, &server).await;

    let turn = agent.handle_event(user_message("Hello", false)).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Done);

    let placeholder = turn.placeholder.unwrap();
    assert_eq!(channel.message(&placeholder.id).unwrap().text, "  ");
    assert_eq!(
        sent_events(&channel.operations()).last(),
        Some(&IndicatorEvent::for_message(AiState::Done, &placeholder))
    );
}

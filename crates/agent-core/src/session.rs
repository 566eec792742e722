//! Session Management
//!
//! One conversation per dialog participant, kept in memory for the life of
//! the process.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::dialog::InboundMessage;
use crate::error::Result;
use crate::message::Conversation;
use crate::provider::StreamEvent;
use crate::reasoning::Agent;

/// Commands that wipe the sender's history
pub const RESET_COMMANDS: &[&str] = &["/reset", "/clear"];

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Identifier for a participant of a dialog source
    pub fn for_sender(inbound: &InboundMessage) -> Self {
        Self(format!("{}:{}", inbound.source, inbound.sender_id))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant's conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history
    pub conversation: Conversation,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            conversation: Conversation::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Wipe the history, keeping the session
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.touch();
    }

    /// Message count
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }
}

/// Routes inbound messages to per-sender sessions and runs the agent
pub struct SessionManager {
    agent: Agent,
    sessions: HashMap<SessionId, Session>,
}

impl SessionManager {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            sessions: HashMap::new(),
        }
    }

    /// Handle one inbound message.
    ///
    /// Returns the text to show the sender; an empty string means there is
    /// nothing to display (the reset commands).
    pub async fn handle(&mut self, inbound: &InboundMessage) -> Result<String> {
        self.handle_observed(inbound, &CancellationToken::new(), |_| {}).await
    }

    /// Handle one inbound message, streaming the turn's events to `observer`.
    ///
    /// Cancelling `cancel` aborts the turn with [`AgentError::Cancelled`];
    /// the user message stays in the history, the interrupted round does not.
    ///
    /// [`AgentError::Cancelled`]: crate::error::AgentError::Cancelled
    pub async fn handle_observed<F>(
        &mut self,
        inbound: &InboundMessage,
        cancel: &CancellationToken,
        observer: F,
    ) -> Result<String>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let id = SessionId::for_sender(inbound);
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id));
        session.touch();

        let text = inbound.text.trim();
        if RESET_COMMANDS.contains(&text) {
            tracing::info!(session = %session.id, "conversation reset");
            session.reset();
            return Ok(String::new());
        }

        let outcome = self
            .agent
            .send_observed(&mut session.conversation, &inbound.text, cancel, observer)
            .await?;
        tracing::debug!(
            session = %session.id,
            rounds = outcome.rounds,
            terminated = outcome.terminated,
            messages = session.message_count(),
            "turn finished"
        );
        Ok(outcome.text)
    }

    /// Look up a session
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::DialogSource;
    use crate::provider::StreamEvent;
    use crate::reasoning::tests::ScriptedProvider;
    use crate::reasoning::AgentBuilder;
    use std::sync::Arc;

    fn manager(reply: &str) -> SessionManager {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            StreamEvent::TextDelta(reply.to_string()),
            StreamEvent::Done,
        ]]));
        SessionManager::new(AgentBuilder::new().provider(provider).build().unwrap())
    }

    #[tokio::test]
    async fn test_messages_are_routed_per_sender() {
        let mut sessions = manager("ok");
        let alice = InboundMessage::new(DialogSource::Telegram, "alice", "hi");
        let bob = InboundMessage::new(DialogSource::Telegram, "bob", "hey");

        assert_eq!(sessions.handle(&alice).await.unwrap(), "ok");
        assert_eq!(sessions.handle(&alice).await.unwrap(), "ok");
        assert_eq!(sessions.handle(&bob).await.unwrap(), "ok");

        assert_eq!(sessions.len(), 2);
        let alice_session = sessions.session(&SessionId::for_sender(&alice)).unwrap();
        assert_eq!(alice_session.message_count(), 4);
    }

    #[tokio::test]
    async fn test_reset_clears_history_silently() {
        let mut sessions = manager("ok");
        let hello = InboundMessage::new(DialogSource::Cli, "local", "hello");
        sessions.handle(&hello).await.unwrap();

        let reset = InboundMessage::new(DialogSource::Cli, "local", " /reset ");
        assert_eq!(sessions.handle(&reset).await.unwrap(), "");

        let id = SessionId::for_sender(&hello);
        assert_eq!(sessions.session(&id).unwrap().message_count(), 0);
    }

    #[tokio::test]
    async fn test_observed_turn_streams_and_cancels() {
        let mut sessions = manager("streamed");
        let inbound = InboundMessage::new(DialogSource::Cli, "local", "hi");

        let mut seen = Vec::new();
        let text = sessions
            .handle_observed(&inbound, &CancellationToken::new(), |event| seen.push(event.clone()))
            .await
            .unwrap();
        assert_eq!(text, "streamed");
        assert_eq!(seen[0], StreamEvent::TextDelta("streamed".into()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sessions.handle_observed(&inbound, &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, crate::error::AgentError::Cancelled));

        let id = SessionId::for_sender(&inbound);
        assert_eq!(sessions.session(&id).unwrap().message_count(), 3);
    }

    #[test]
    fn test_session_id_format() {
        let inbound = InboundMessage::new(DialogSource::Telegram, "42", "x");
        assert_eq!(SessionId::for_sender(&inbound).as_str(), "telegram:42");
    }
}

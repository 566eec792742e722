//! Dialog Boundary
//!
//! Where user text comes from and where answers go. The engine only sees
//! [`InboundMessage`]s and hands back text; transports such as a terminal or
//! a chat bot implement [`Dialog`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::provider::StreamEvent;
use crate::session::SessionManager;

/// Which transport a message arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogSource {
    Cli,
    Telegram,
}

impl std::fmt::Display for DialogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogSource::Cli => f.write_str("cli"),
            DialogSource::Telegram => f.write_str("telegram"),
        }
    }
}

/// A user message as delivered by a transport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub source: DialogSource,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        source: DialogSource,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sender_id: sender_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A transport carrying a conversation with users
#[async_trait]
pub trait Dialog: Send {
    /// Wait for the next message; `None` once the transport is closed
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;

    /// Show a final response to the sender of `to`
    async fn deliver(&mut self, to: &InboundMessage, text: &str) -> Result<()>;

    /// Show a piece of reply text as it streams in.
    ///
    /// The complete reply still goes through [`Dialog::deliver`]; transports
    /// that cannot show partial text keep this no-op.
    async fn deliver_partial(&mut self, _to: &InboundMessage, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Tell the sender their turn failed
    async fn report_failure(&mut self, to: &InboundMessage, error: &AgentError) -> Result<()> {
        self.deliver(to, &error.user_message()).await
    }
}

/// Pump messages from `dialog` through `sessions` until the dialog closes.
///
/// A failed turn is reported to its sender and the loop carries on; only
/// transport errors end it.
pub async fn serve<D>(dialog: &mut D, sessions: &mut SessionManager) -> Result<()>
where
    D: Dialog + ?Sized,
{
    serve_interruptible(dialog, sessions, std::future::pending::<()>).await
}

/// [`serve`], cancelling the turn in progress whenever `interrupt` resolves.
///
/// Text deltas are relayed to [`Dialog::deliver_partial`] while the turn runs.
pub async fn serve_interruptible<D, I, F>(
    dialog: &mut D,
    sessions: &mut SessionManager,
    mut interrupt: I,
) -> Result<()>
where
    D: Dialog + ?Sized,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    while let Some(inbound) = dialog.next_message().await? {
        let (result, relayed) = {
            let cancel = CancellationToken::new();
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let observer = move |event: &StreamEvent| {
                if let StreamEvent::TextDelta(text) = event {
                    // The receiver outlives the turn.
                    let _ = tx.send(text.clone());
                }
            };

            let turn = sessions.handle_observed(&inbound, &cancel, observer);
            let relay = async {
                while let Some(text) = rx.recv().await {
                    dialog.deliver_partial(&inbound, &text).await?;
                }
                Ok::<(), AgentError>(())
            };
            let both = async { tokio::join!(turn, relay) };
            tokio::pin!(both);

            tokio::select! {
                biased;
                () = interrupt() => {
                    tracing::info!(sender = %inbound.sender_id, "turn interrupted");
                    cancel.cancel();
                    both.await
                }
                out = &mut both => out,
            }
        };
        relayed?;

        match result {
            Ok(text) if text.is_empty() => {}
            Ok(text) => dialog.deliver(&inbound, &text).await?,
            Err(e) => {
                tracing::error!(
                    source = %inbound.source,
                    sender = %inbound.sender_id,
                    error = %e,
                    "turn failed"
                );
                dialog.report_failure(&inbound, &e).await?;
            }
        }
    }
    tracing::info!("dialog closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StreamEvent;
    use crate::reasoning::tests::ScriptedProvider;
    use crate::reasoning::AgentBuilder;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Default)]
    struct ScriptedDialog {
        inbox: VecDeque<InboundMessage>,
        outbox: Vec<String>,
        partials: Vec<String>,
    }

    #[async_trait]
    impl Dialog for ScriptedDialog {
        async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
            Ok(self.inbox.pop_front())
        }

        async fn deliver(&mut self, _to: &InboundMessage, text: &str) -> Result<()> {
            self.outbox.push(text.to_string());
            Ok(())
        }

        async fn deliver_partial(&mut self, _to: &InboundMessage, text: &str) -> Result<()> {
            self.partials.push(text.to_string());
            Ok(())
        }
    }

    fn sessions(rounds: Vec<Vec<StreamEvent>>) -> SessionManager {
        let provider = Arc::new(ScriptedProvider::new(rounds));
        SessionManager::new(AgentBuilder::new().provider(provider).build().unwrap())
    }

    #[tokio::test]
    async fn test_serve_skips_empty_and_reports_failures() {
        let mut sessions = sessions(vec![
            vec![StreamEvent::TextDelta("Hi".into()), StreamEvent::Done],
            vec![StreamEvent::Error("rate limited".into())],
        ]);

        let mut dialog = ScriptedDialog::default();
        for text in ["hello", "/clear", "again"] {
            dialog.inbox.push_back(InboundMessage::new(DialogSource::Cli, "me", text));
        }

        serve(&mut dialog, &mut sessions).await.unwrap();

        assert_eq!(dialog.outbox.len(), 2);
        assert_eq!(dialog.outbox[0], "Hi");
        assert!(dialog.outbox[1].contains("rate limited"));
        assert_eq!(dialog.partials, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_turn_and_keeps_serving() {
        let mut sessions = sessions(vec![vec![
            StreamEvent::TextDelta("never shown".into()),
            StreamEvent::Done,
        ]]);
        let mut dialog = ScriptedDialog::default();
        for text in ["first", "second"] {
            dialog.inbox.push_back(InboundMessage::new(DialogSource::Cli, "me", text));
        }

        serve_interruptible(&mut dialog, &mut sessions, || async {}).await.unwrap();

        assert_eq!(dialog.outbox, vec!["The request was cancelled."; 2]);
        assert!(dialog.partials.is_empty());
        let sender = InboundMessage::new(DialogSource::Cli, "me", "");
        let id = crate::session::SessionId::for_sender(&sender);
        assert_eq!(sessions.session(&id).unwrap().message_count(), 2);
    }

    #[test]
    fn test_inbound_wire_names() {
        let inbound = InboundMessage::new(DialogSource::Telegram, "7", "hi");
        let json = serde_json::to_value(&inbound).unwrap();
        assert_eq!(json["senderId"], "7");
        assert_eq!(json["source"], "telegram");
    }
}

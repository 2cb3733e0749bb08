//! Single-page-app navigation detection
//!
//! One watcher task. It wakes on location changes and on the root
//! observer's batches, which catch a conversation id derived from the
//! title changing without any history update.

use super::capture::{conversation_id, conversation_title};
use super::engine::SaveChatEngine;
use super::events::EngineEvent;
use crate::dom::Document;
use tokio::sync::watch;

/// Which conversation the page is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationIdentity {
    pub url: String,
    pub id: String,
}

impl ConversationIdentity {
    pub fn capture(document: &Document) -> Self {
        let url = document.location();
        let page_title = document.title();
        let title = document.read(|tree| conversation_title(tree, &page_title));
        let id = conversation_id(&url, &title);
        Self { url, id }
    }

    /// A switch happened when the URL or the conversation id changed.
    pub fn differs(&self, other: &Self) -> bool {
        self.url != other.url || self.id != other.id
    }
}

/// Run until shutdown: tear down and re-scan on every conversation switch.
pub(crate) async fn watch_navigation(engine: SaveChatEngine, mut location: watch::Receiver<String>) {
    let shutdown = engine.shutdown_token();
    let mut current = ConversationIdentity::capture(engine.document());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = location.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = engine.identity_check().notified() => {}
        }
        let next = ConversationIdentity::capture(engine.document());
        if !next.differs(&current) {
            continue;
        }
        tracing::info!(from = %current.url, to = %next.url, conversation = %next.id, "navigation detected");
        engine.emit(EngineEvent::NavigationDetected {
            from: current.url.clone(),
            to: next.url.clone(),
            conversation: next.id.clone(),
        });
        current = next;
        engine.handle_navigation().await;
    }
    tracing::debug!("navigation watcher stopped");
}

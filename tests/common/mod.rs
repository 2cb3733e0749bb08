//! Common test utilities for SaveChat integration tests
//!
//! Page fixtures shaped like a chat conversation, an engine wired to an
//! in-memory store, and helpers for inspecting controls.

#![allow(dead_code)]

use savechat::dom::El;
use savechat::engine::attach::find_affordances;
use savechat::{Document, EngineConfig, EngineEvent, MemoryStore, NodeId, SaveChatEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const CONVERSATION_URL: &str = "https://chat.openai.com/c/first";

/// An assistant turn with its own action tray.
pub fn assistant_turn(text: &str) -> El {
    El::new("div")
        .author("assistant")
        .child(El::new("div").class("markdown prose").child(El::new("p").text(text)))
        .child(
            El::new("div")
                .testid("message-actions")
                .child(El::new("button").attr("aria-label", "Copy"))
                .child(El::new("button").attr("aria-label", "Regenerate")),
        )
}

/// An assistant turn the page has not given a tray.
pub fn bare_assistant_turn(text: &str) -> El {
    El::new("div")
        .author("assistant")
        .child(El::new("div").class("markdown prose").child(El::new("p").text(text)))
}

pub fn user_turn(text: &str) -> El {
    El::new("div")
        .author("user")
        .child(El::new("div").class("whitespace-pre-wrap").text(text))
}

/// A message without role markers, recognizable only by its content region.
pub fn unmarked_turn(text: &str) -> El {
    El::new("article")
        .child(El::new("div").class("markdown").child(El::new("p").text(text)))
        .child(
            El::new("div")
                .class("flex items-center gap-2")
                .child(El::new("button").attr("aria-label", "Copy")),
        )
}

/// A page with a `main` chat container.
pub struct Page {
    pub doc: Arc<Document>,
    pub main: NodeId,
}

impl Page {
    pub fn new(url: &str) -> Self {
        let doc = Arc::new(Document::new(url));
        let main = doc.append(doc.body(), El::new("main")).unwrap();
        Self { doc, main }
    }

    pub fn add(&self, el: El) -> NodeId {
        self.doc.append(self.main, el).unwrap()
    }
}

pub struct Harness {
    pub page: Page,
    pub store: Arc<MemoryStore>,
    pub engine: SaveChatEngine,
    pub events: broadcast::Receiver<EngineEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::at(CONVERSATION_URL, config)
    }

    /// A harness whose page starts at `url`.
    pub fn at(url: &str, config: EngineConfig) -> Self {
        let page = Page::new(url);
        let store = Arc::new(MemoryStore::new());
        let engine = SaveChatEngine::new(page.doc.clone(), store.clone(), config).unwrap();
        let events = engine.subscribe();
        Self {
            page,
            store,
            engine,
            events,
        }
    }

    pub fn doc(&self) -> &Arc<Document> {
        &self.page.doc
    }

    pub fn controls(&self, host: NodeId) -> Vec<NodeId> {
        controls(&self.page.doc, host)
    }

    /// Events received so far, without waiting.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Save controls in the subtree of `host`.
pub fn controls(doc: &Document, host: NodeId) -> Vec<NodeId> {
    doc.read(|tree| {
        tree.element(host)
            .map(|el| find_affordances(&el))
            .unwrap_or_default()
    })
}

/// Let spawned tasks run their pending work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Advance paused time by `ms`, running everything that comes due.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

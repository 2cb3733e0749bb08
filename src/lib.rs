//! SaveChat: per-message save controls for a foreign chat page
//!
//! Observes a page it does not own, decides which rendered nodes are
//! assistant messages, and attaches exactly one save control to each. The
//! control survives the page re-rendering around it and is torn down and
//! re-attached when the page switches conversations. Activating a control
//! captures the message text into a response store.
//!
//! # Core Concepts
//!
//! - **Document**: an arena model of the host page with mutation observers
//! - **Host node**: an element the classifier decides is an assistant message
//! - **Tray**: the action container the control is inserted into, located
//!   on the page or synthesized
//! - **Session**: the per-host watcher that heals the control after re-renders
//!
//! # Example
//!
//! ```
//! use savechat::{Document, EngineConfig, MemoryStore, SaveChatEngine};
//! use std::sync::Arc;
//!
//! let document = Arc::new(Document::new("https://chat.openai.com/"));
//! let engine = SaveChatEngine::new(
//!     document,
//!     Arc::new(MemoryStore::new()),
//!     EngineConfig::default(),
//! )
//! .unwrap();
//! // Call `engine.start().await` inside a tokio runtime
//! # let _ = engine;
//! ```

pub mod config;
pub mod dom;
pub mod engine;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use dom::{Document, DomError, DomResult, El, ElementRef, NodeId, Tree};
pub use engine::{
    ControlStatus, EngineError, EngineEvent, ProcessOutcome, SaveChatEngine, SaveError,
    ScanReport, TerminationReason,
};
pub use store::{
    ExportBundle, ImportSummary, MemoryStore, OpenStore, Record, RecordContext, ResponseStore,
    SqliteStore, StoreError, StoreResult, StoreStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

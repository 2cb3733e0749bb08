//! Engine error types

use crate::config::ConfigError;
use crate::dom::DomError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors from engine lifecycle operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from activating a save control
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Nothing to save: response text is empty")]
    EmptyText,

    #[error("Save already in progress")]
    Busy,

    #[error("Document is gone")]
    DocumentGone,

    #[error("Tree error: {0}")]
    Dom(#[from] DomError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

//! Classification and attachment reconciliation
//!
//! Decides which host nodes are assistant messages, resolves or fabricates
//! an attachment point for each, inserts exactly one save control, and
//! keeps it attached while the host page re-renders and navigates.

pub mod attach;
pub mod capture;
pub mod classify;
pub mod discover;
#[allow(clippy::module_inception)]
mod engine;
mod error;
pub mod events;
pub mod locate;
pub mod markers;
mod navigation;
pub mod reconcile;
pub mod schedule;

mod cancel;

pub use attach::{control_status, AttachOutcome, Attacher, ControlStatus};
pub use cancel::CancellationToken;
pub use classify::{Classification, Classifier, Confidence, Signal};
pub use discover::discover;
pub use engine::{ProcessOutcome, SaveChatEngine, ScanReport};
pub use error::{EngineError, SaveError};
pub use events::{EngineEvent, HealOutcome, TerminationReason, TraySource};
pub use locate::{locate, looks_like_tray, synthesize_tray, Located, TrayStrategy, TRAY_STRATEGIES};
pub use navigation::ConversationIdentity;
pub use reconcile::{Reconciler, SessionRegistry, SessionState};
pub use schedule::{
    poll, wait_until, wait_until_ready, AbandonReason, Abandoned, Ceiling, Polled, RetryPolicy,
    WaitOutcome,
};

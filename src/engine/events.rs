//! Engine lifecycle events
//!
//! Broadcast to any number of subscribers. Nothing in the engine depends on
//! events being received; a send with no subscribers is not an error.

use super::schedule::Abandoned;
use crate::dom::NodeId;

/// How the attachment point for a control was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraySource {
    /// A host tray found by the named strategy
    Located(&'static str),
    /// A tray the engine created at the tail of the container
    Synthesized,
    /// No tray could be found or created; the host node itself
    HostFallback,
}

impl std::fmt::Display for TraySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Located(strategy) => write!(f, "located:{}", strategy),
            Self::Synthesized => write!(f, "synthesized"),
            Self::HostFallback => write!(f, "host"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The host node left the document
    Disconnected,
    /// The page navigated to another conversation
    Navigation,
    /// The engine was shut down
    Shutdown,
}

/// What a heal pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// One control, at tail
    Intact,
    /// Extra controls were removed
    Deduplicated(usize),
    /// The control or its tray was moved back to the tail
    Repositioned,
    /// The control was missing and has been attached again
    Reattached,
    /// The host no longer qualifies; its control was removed
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    AffordanceAttached {
        host: NodeId,
        button: NodeId,
        source: TraySource,
    },
    CandidateAbandoned {
        host: NodeId,
        abandoned: Abandoned,
    },
    SessionStarted {
        host: NodeId,
    },
    SessionHealed {
        host: NodeId,
        outcome: HealOutcome,
    },
    SessionTerminated {
        host: NodeId,
        reason: TerminationReason,
    },
    NavigationDetected {
        from: String,
        to: String,
        /// Conversation id now shown
        conversation: String,
    },
    SessionsTornDown {
        count: usize,
    },
    ResponseSaved {
        host: NodeId,
        record_id: String,
    },
    SaveFailed {
        host: NodeId,
        error: String,
    },
}

//! Synthetic host tree
//!
//! The engine never touches a live browser. It runs against `Document`, an
//! arena-backed model of the foreign page with mutation observers, click
//! listeners and a navigable location.

mod builder;
mod document;
mod node;
mod observer;

#[cfg(test)]
mod tests;

pub use builder::{El, AUTHOR_ROLE_ATTR};
pub use document::{ClickListener, Document, DomError, DomResult};
pub use node::{Descendants, ElementData, ElementRef, NodeId, NodeKind, Tree};
pub use observer::{MutationObserver, MutationRecord, ObserveOptions, ObserverId};

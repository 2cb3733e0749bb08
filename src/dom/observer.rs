//! Mutation observation
//!
//! Records are pushed into a per-registration channel the moment the tree
//! changes. A consumer task pulls them with `next_batch()`, which coalesces
//! everything queued since its last poll, the same batching a page script
//! sees from a microtask-delivered observer callback.

use super::node::NodeId;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One change to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRecord {
    /// Children of `target` were added and/or removed
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    /// Attribute `name` of `target` was set or removed
    Attributes { target: NodeId, name: String },
    /// Text node `target` changed
    CharacterData { target: NodeId },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            Self::ChildList { target, .. }
            | Self::Attributes { target, .. }
            | Self::CharacterData { target } => *target,
        }
    }
}

/// Which records a registration wants.
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
    /// Restrict attribute records to these names
    pub attribute_filter: Option<Vec<String>>,
    pub character_data: bool,
}

impl ObserveOptions {
    /// Child list changes anywhere in the subtree.
    pub fn subtree() -> Self {
        Self {
            child_list: true,
            subtree: true,
            ..Default::default()
        }
    }

    pub fn with_attributes(mut self, filter: &[&str]) -> Self {
        self.attributes = true;
        self.attribute_filter = Some(filter.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_character_data(mut self) -> Self {
        self.character_data = true;
        self
    }

    pub(crate) fn wants(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { .. } => self.child_list,
            MutationRecord::CharacterData { .. } => self.character_data,
            MutationRecord::Attributes { name, .. } => {
                self.attributes
                    && self
                        .attribute_filter
                        .as_ref()
                        .map(|f| f.iter().any(|n| n == name))
                        .unwrap_or(true)
            }
        }
    }
}

/// Document-side half of a registration.
#[derive(Debug)]
pub(crate) struct Registration {
    pub target: NodeId,
    pub options: ObserveOptions,
    pub tx: mpsc::UnboundedSender<Vec<MutationRecord>>,
}

/// Consumer half of a registration.
///
/// Dropping the handle closes the channel; the document prunes the
/// registration on its next delivery attempt.
#[derive(Debug)]
pub struct MutationObserver {
    id: ObserverId,
    target: NodeId,
    rx: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
}

impl MutationObserver {
    pub(crate) fn new(
        id: ObserverId,
        target: NodeId,
        rx: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
    ) -> Self {
        Self { id, target, rx }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Wait for the next batch of records.
    ///
    /// Returns `None` once the registration has been disconnected.
    pub async fn next_batch(&mut self) -> Option<Vec<MutationRecord>> {
        let mut batch = self.rx.recv().await?;
        while let Ok(more) = self.rx.try_recv() {
            batch.extend(more);
        }
        Some(batch)
    }

    /// Drain whatever is queued without waiting.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut out = Vec::new();
        while let Ok(more) = self.rx.try_recv() {
            out.extend(more);
        }
        out
    }
}

//! Managed control insertion and activation
//!
//! Uniqueness is enforced by checking for an existing control before every
//! insert. There is no lock: attach, heal and activation may interleave on
//! the event loop, and each re-reads the tree before acting.

use super::capture::capture;
use super::error::SaveError;
use super::events::EngineEvent;
use super::locate::synthesize_tray;
use super::markers::{
    is_affordance, is_assistant_marked, is_managed_tray, AFFORDANCE_CLASS, AFFORDANCE_TESTID,
    STATUS_ATTR,
};
use crate::dom::{Document, DomError, DomResult, El, ElementRef, NodeId, Tree};
use crate::store::{Record, ResponseStore};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

const LABEL_CLASS: &str = "savechat-label";
const DISABLED_ATTR: &str = "disabled";

/// Observable state of a control. Not part of any structural invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Idle,
    Success,
    Error,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Save",
            Self::Success => "Saved",
            Self::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Current status of `button`, if it is a control.
pub fn control_status(document: &Document, button: NodeId) -> Option<ControlStatus> {
    document
        .attribute(button, STATUS_ATTR)
        .and_then(|s| ControlStatus::parse(&s))
}

fn set_status(document: &Document, button: NodeId, status: ControlStatus) -> DomResult<()> {
    document.set_attribute(button, STATUS_ATTR, status.as_str())?;
    let label = document.read(|tree| {
        tree.element(button)
            .and_then(|b| b.find(|e| e.has_class(LABEL_CLASS)))
            .map(|l| l.id())
    });
    if let Some(label) = label {
        document.set_text(label, status.label())?;
    }
    Ok(())
}

/// Markup of the save control.
pub fn affordance_el() -> El {
    El::new("button")
        .class(AFFORDANCE_CLASS)
        .testid(AFFORDANCE_TESTID)
        .attr("type", "button")
        .attr("aria-label", "Save response")
        .attr("title", "Save this response")
        .attr(STATUS_ATTR, ControlStatus::Idle.as_str())
        .child(El::new("svg").class("savechat-icon").attr("aria-hidden", "true"))
        .child(El::new("span").class(LABEL_CLASS).text(ControlStatus::Idle.label()))
}

/// Controls in `el`'s subtree, including `el`, in document order.
pub fn find_affordances(el: &ElementRef<'_>) -> Vec<NodeId> {
    std::iter::once(*el)
        .chain(el.descendants())
        .filter(is_affordance)
        .map(|e| e.id())
        .collect()
}

/// The element whose tail a synthesized tray goes to: the enclosing
/// assistant turn, or the host itself.
pub fn logical_container(tree: &Tree, host: NodeId) -> NodeId {
    tree.element(host)
        .and_then(|h| h.closest(is_assistant_marked))
        .map(|c| c.id())
        .unwrap_or(host)
}

/// Whether `point` satisfies the tail invariant for `host`.
///
/// A tray must be the last element child of its parent. When the host
/// container itself is the point, anything may precede the control.
pub fn point_at_tail(tree: &Tree, host: NodeId, point: NodeId) -> bool {
    if point == host || point == logical_container(tree, host) {
        return true;
    }
    tree.element(point)
        .map(|p| p.is_last_element_child())
        .unwrap_or(false)
}

/// The control `button` is where the tail invariant wants it.
pub fn control_at_tail(tree: &Tree, host: NodeId, button: NodeId) -> bool {
    let Some(point) = tree.parent(button) else {
        return false;
    };
    if point == host || point == logical_container(tree, host) {
        return tree
            .element(button)
            .map(|b| b.is_last_element_child())
            .unwrap_or(false);
    }
    point_at_tail(tree, host, point)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Inserted { button: NodeId, point: NodeId },
    AlreadyPresent { button: NodeId },
}

impl AttachOutcome {
    pub fn button(&self) -> NodeId {
        match self {
            Self::Inserted { button, .. } | Self::AlreadyPresent { button } => *button,
        }
    }
}

/// Click handling state, detached from the document to avoid a reference
/// cycle through the listener table.
#[derive(Clone)]
struct Activation {
    document: Weak<Document>,
    store: Arc<dyn ResponseStore>,
    events: broadcast::Sender<EngineEvent>,
    revert_delay: Duration,
}

impl Activation {
    async fn activate(&self, host: NodeId, button: NodeId) -> Result<Record, SaveError> {
        let document = self.document.upgrade().ok_or(SaveError::DocumentGone)?;
        if document.attribute(button, DISABLED_ATTR).is_some() {
            return Err(SaveError::Busy);
        }
        document.set_attribute(button, DISABLED_ATTR, "")?;

        let url = document.location();
        let page_title = document.title();
        let result = match document.read(|tree| capture(tree, host, &url, &page_title)) {
            None => Err(SaveError::EmptyText),
            Some(record) => match self.store.save(record.clone()).await {
                Ok(()) => Ok(record),
                Err(e) => Err(SaveError::Store(e)),
            },
        };

        let status = match &result {
            Ok(record) => {
                tracing::info!(%host, record_id = %record.id, "response saved");
                let _ = self.events.send(EngineEvent::ResponseSaved {
                    host,
                    record_id: record.id.clone(),
                });
                ControlStatus::Success
            }
            Err(e) => {
                tracing::warn!(%host, error = %e, "save failed");
                let _ = self.events.send(EngineEvent::SaveFailed {
                    host,
                    error: e.to_string(),
                });
                ControlStatus::Error
            }
        };
        if let Err(e) = set_status(&document, button, status) {
            tracing::debug!(%button, error = %e, "control vanished during save");
        }
        self.schedule_revert(button);
        result
    }

    fn schedule_revert(&self, button: NodeId) {
        let document = self.document.clone();
        let delay = self.revert_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(document) = document.upgrade() else {
                return;
            };
            let reverted = set_status(&document, button, ControlStatus::Idle)
                .and_then(|_| document.remove_attribute(button, DISABLED_ATTR));
            if let Err(e) = reverted {
                tracing::debug!(%button, error = %e, "control vanished before revert");
            }
        });
    }
}

/// Inserts, removes and wires the save control.
#[derive(Clone)]
pub struct Attacher {
    document: Arc<Document>,
    activation: Activation,
}

impl Attacher {
    pub fn new(
        document: Arc<Document>,
        store: Arc<dyn ResponseStore>,
        events: broadcast::Sender<EngineEvent>,
        revert_delay: Duration,
    ) -> Self {
        let activation = Activation {
            document: Arc::downgrade(&document),
            store,
            events,
            revert_delay,
        };
        Self {
            document,
            activation,
        }
    }

    /// Insert the control for `host` at `point`, unless one exists.
    ///
    /// A point that is not at tail is replaced by a managed tray at the
    /// tail of the host's container; if that fails, the host itself.
    pub fn attach(&self, host: NodeId, point: NodeId) -> DomResult<AttachOutcome> {
        let existing = self.document.read(|tree| {
            let host_el = tree.element(host).ok_or(DomError::NodeNotFound(host))?;
            let found = find_affordances(&host_el).first().copied().or_else(|| {
                tree.element(point)
                    .and_then(|p| find_affordances(&p).first().copied())
            });
            Ok::<_, DomError>(found)
        })?;
        if let Some(button) = existing {
            return Ok(AttachOutcome::AlreadyPresent { button });
        }

        let point = self.tail_point(host, point);
        let button = self.document.build(affordance_el());
        self.document.append_child(point, button)?;
        // Controls lost to a re-render keep their listeners otherwise
        let pruned = self.document.prune_detached_listeners();
        if pruned > 0 {
            tracing::trace!(%host, pruned, "dropped listeners of detached controls");
        }
        self.wire(host, button);
        tracing::debug!(%host, %point, %button, "control inserted");
        Ok(AttachOutcome::Inserted { button, point })
    }

    fn tail_point(&self, host: NodeId, point: NodeId) -> NodeId {
        let (container, ok) = self
            .document
            .read(|tree| (logical_container(tree, host), point_at_tail(tree, host, point)));
        if ok {
            return point;
        }
        match synthesize_tray(&self.document, container) {
            Ok(tray) => tray,
            Err(e) => {
                tracing::debug!(%host, error = %e, "tray synthesis failed, using host");
                host
            }
        }
    }

    fn wire(&self, host: NodeId, button: NodeId) {
        let activation = self.activation.clone();
        self.document.on_click(button, move |button| {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(%button, "click outside a runtime ignored");
                return;
            };
            let activation = activation.clone();
            runtime.spawn(async move {
                let _ = activation.activate(host, button).await;
            });
        });
    }

    /// Run the save flow for `button` directly, as a click would.
    pub async fn activate(&self, host: NodeId, button: NodeId) -> Result<Record, SaveError> {
        self.activation.activate(host, button).await
    }

    /// Remove every control and managed tray from `host`. Returns the
    /// number of controls removed.
    pub fn detach(&self, host: NodeId) -> DomResult<usize> {
        let (controls, trays) = self.document.read(|tree| {
            let Some(host_el) = tree.element(host) else {
                return (Vec::new(), Vec::new());
            };
            let trays: Vec<NodeId> = host_el
                .find_all(is_managed_tray)
                .into_iter()
                .map(|t| t.id())
                .collect();
            (find_affordances(&host_el), trays)
        });
        for node in controls.iter().chain(trays.iter()) {
            self.document.remove(*node)?;
        }
        for button in &controls {
            self.document.off_click(*button);
        }
        Ok(controls.len())
    }
}

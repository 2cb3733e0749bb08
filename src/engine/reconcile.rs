//! Reconciliation sessions
//!
//! One session per attached host node. A session owns a subtree observer
//! and re-runs heal on every batch until the host disconnects or the
//! session is cancelled. The registry is the single source of truth for
//! which hosts are watched; nothing is recorded on the host's own nodes.

use super::attach::{control_at_tail, find_affordances, logical_container, Attacher};
use super::cancel::CancellationToken;
use super::classify::{Classifier, Confidence};
use super::events::{EngineEvent, HealOutcome, TerminationReason};
use super::locate::{locate, synthesize_tray};
use super::markers::is_managed_tray;
use crate::dom::{Document, DomError, DomResult, NodeId, ObserveOptions, Tree, AUTHOR_ROLE_ATTR};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle of a session. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Watching,
    Terminated,
}

/// Registry entry for one watched host.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Terminated
        } else {
            SessionState::Watching
        }
    }
}

/// Host node → session, plus hosts whose attach pipeline is in flight.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<NodeId, SessionHandle>,
    preparing: DashMap<NodeId, ()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, host: NodeId) -> bool {
        self.sessions.contains_key(&host)
    }

    pub fn hosts(&self) -> Vec<NodeId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn state(&self, host: NodeId) -> Option<SessionState> {
        self.sessions.get(&host).map(|h| h.state())
    }

    pub fn preparing_count(&self) -> usize {
        self.preparing.len()
    }

    /// Whether `node` is, contains, or sits inside a watched or preparing host.
    pub fn covers(&self, tree: &Tree, node: NodeId) -> bool {
        let overlaps = |host: NodeId| {
            tree.is_inclusive_ancestor(host, node) || tree.is_inclusive_ancestor(node, host)
        };
        self.sessions.iter().any(|e| overlaps(*e.key()))
            || self.preparing.iter().any(|e| overlaps(*e.key()))
    }

    /// Claim `host` for an attach pipeline. `None` if it is already watched
    /// or being prepared.
    pub fn begin_preparing(self: &Arc<Self>, host: NodeId) -> Option<PrepareGuard> {
        if self.sessions.contains_key(&host) {
            return None;
        }
        match self.preparing.entry(host) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(PrepareGuard {
                    registry: Arc::clone(self),
                    host,
                })
            }
        }
    }

    fn insert(&self, host: NodeId, handle: SessionHandle) {
        if let Some(old) = self.sessions.insert(host, handle) {
            old.cancel.cancel();
        }
    }

    /// Remove `host` if its entry still belongs to `session`.
    fn remove_if_current(&self, host: NodeId, session: Uuid) -> bool {
        self.sessions
            .remove_if(&host, |_, handle| handle.id == session)
            .is_some()
    }

    /// Cancel and remove the session for `host`.
    pub fn terminate(&self, host: NodeId) -> bool {
        match self.sessions.remove(&host) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every session. Returns the hosts removed.
    pub fn terminate_all(&self) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.sessions.retain(|host, handle| {
            handle.cancel.cancel();
            removed.push(*host);
            false
        });
        removed
    }

    /// Cancel and remove sessions whose host has left the document.
    pub fn sweep(&self, tree: &Tree) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.sessions.retain(|host, handle| {
            if tree.is_connected(*host) {
                return true;
            }
            handle.cancel.cancel();
            removed.push(*host);
            false
        });
        removed
    }
}

/// Releases a `begin_preparing` claim on drop.
#[derive(Debug)]
pub struct PrepareGuard {
    registry: Arc<SessionRegistry>,
    host: NodeId,
}

impl Drop for PrepareGuard {
    fn drop(&mut self) {
        self.registry.preparing.remove(&self.host);
    }
}

/// Starts sessions and heals their hosts.
#[derive(Clone)]
pub struct Reconciler {
    document: Arc<Document>,
    attacher: Attacher,
    classifier: Classifier,
    registry: Arc<SessionRegistry>,
    events: broadcast::Sender<EngineEvent>,
}

impl Reconciler {
    pub fn new(
        document: Arc<Document>,
        attacher: Attacher,
        classifier: Classifier,
        registry: Arc<SessionRegistry>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            document,
            attacher,
            classifier,
            registry,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start watching `host`. Returns false if it is already watched or
    /// no longer connected.
    pub fn start_session(&self, host: NodeId) -> bool {
        if self.registry.contains(host) || !self.document.is_connected(host) {
            return false;
        }
        let observer = self.document.observe(
            host,
            ObserveOptions::subtree()
                .with_attributes(&[AUTHOR_ROLE_ATTR, "contenteditable"])
                .with_character_data(),
        );
        let handle = SessionHandle::new();
        let session = handle.id;
        let cancel = handle.cancel.clone();
        self.registry.insert(host, handle);
        tracing::debug!(%host, %session, "session started");
        let _ = self.events.send(EngineEvent::SessionStarted { host });

        let this = self.clone();
        tokio::spawn(async move {
            let mut observer = observer;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = observer.next_batch() => {
                        let Some(records) = batch else { break };
                        if cancel.is_cancelled() {
                            break;
                        }
                        if !this.document.is_connected(host) {
                            cancel.cancel();
                            if this.registry.remove_if_current(host, session) {
                                tracing::debug!(%host, %session, "host disconnected");
                                let _ = this.events.send(EngineEvent::SessionTerminated {
                                    host,
                                    reason: TerminationReason::Disconnected,
                                });
                            }
                            break;
                        }
                        tracing::trace!(%host, records = records.len(), "session batch");
                        this.heal_and_report(host);
                    }
                }
            }
            this.document.disconnect(observer.id());
        });
        true
    }

    fn heal_and_report(&self, host: NodeId) {
        match self.heal(host) {
            Ok(HealOutcome::Intact) => {}
            Ok(outcome) => {
                tracing::debug!(%host, ?outcome, "session healed");
                let _ = self.events.send(EngineEvent::SessionHealed { host, outcome });
            }
            Err(e) => tracing::debug!(%host, error = %e, "heal skipped"),
        }
    }

    /// Restore the single-control, tail-positioned state for `host`.
    pub fn heal(&self, host: NodeId) -> DomResult<HealOutcome> {
        let snapshot = self.document.read(|tree| {
            let host_el = tree.element(host).ok_or(DomError::NodeNotFound(host))?;
            let classification = self.classifier.classify(&host_el);
            let controls = find_affordances(&host_el);
            let at_tail = controls
                .first()
                .map(|b| control_at_tail(tree, host, *b))
                .unwrap_or(false);
            Ok::<_, DomError>((classification, controls, at_tail, logical_container(tree, host)))
        })?;
        let (classification, controls, at_tail, container) = snapshot;

        if !classification.is_assistant() && classification.confidence == Confidence::Explicit {
            let removed = self.attacher.detach(host)?;
            return Ok(if removed > 0 {
                HealOutcome::Detached
            } else {
                HealOutcome::Intact
            });
        }

        let Some(&button) = controls.first() else {
            let located = self.document.read(|tree| tree.element(host).and_then(|h| locate(&h)));
            let point = match located {
                Some(found) => found.point,
                None => synthesize_tray(&self.document, container).unwrap_or(host),
            };
            self.attacher.attach(host, point)?;
            return Ok(HealOutcome::Reattached);
        };

        let mut outcome = HealOutcome::Intact;
        if controls.len() > 1 {
            for extra in &controls[1..] {
                self.document.remove(*extra)?;
                self.document.off_click(*extra);
            }
            outcome = HealOutcome::Deduplicated(controls.len() - 1);
        }
        if !at_tail {
            self.reposition(host, container, button)?;
            outcome = HealOutcome::Repositioned;
        }
        Ok(outcome)
    }

    /// Move the control, or its managed tray, back to the tail.
    fn reposition(&self, host: NodeId, container: NodeId, button: NodeId) -> DomResult<()> {
        let (point, point_parent, managed) = self.document.read(|tree| {
            let point = tree.parent(button);
            let point_parent = point.and_then(|p| tree.parent(p));
            let managed = point
                .and_then(|p| tree.element(p))
                .map(|p| is_managed_tray(&p))
                .unwrap_or(false);
            (point, point_parent, managed)
        });
        match (point, point_parent) {
            (Some(p), _) if p == host || p == container => self.document.append_child(p, button),
            (Some(p), Some(parent)) if managed => self.document.append_child(parent, p),
            _ => {
                let tray = synthesize_tray(&self.document, container)?;
                self.document.append_child(tray, button)
            }
        }
    }

    /// End the session for `host`, if any.
    pub fn terminate(&self, host: NodeId, reason: TerminationReason) -> bool {
        if !self.registry.terminate(host) {
            return false;
        }
        tracing::debug!(%host, ?reason, "session terminated");
        let _ = self.events.send(EngineEvent::SessionTerminated { host, reason });
        true
    }

    /// Cancel every session and clear the registry.
    pub fn terminate_all(&self, reason: TerminationReason) -> usize {
        let hosts = self.registry.terminate_all();
        for host in &hosts {
            let _ = self
                .events
                .send(EngineEvent::SessionTerminated { host: *host, reason });
        }
        hosts.len()
    }

    /// Drop sessions whose host left the document.
    pub fn sweep(&self) -> usize {
        let hosts = self.document.read(|tree| self.registry.sweep(tree));
        for host in &hosts {
            tracing::debug!(%host, "swept disconnected host");
            let _ = self.events.send(EngineEvent::SessionTerminated {
                host: *host,
                reason: TerminationReason::Disconnected,
            });
        }
        hosts.len()
    }
}

//! Document: the host page the engine observes and patches

use super::builder::{Child, El};
use super::node::{ElementData, NodeData, NodeId, NodeKind, Tree};
use super::observer::{MutationObserver, MutationRecord, ObserveOptions, ObserverId, Registration};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Errors from tree operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Not an element: {0}")]
    NotAnElement(NodeId),

    #[error("Hierarchy request error: cannot insert {child} into {parent}")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
}

/// Result type for tree operations
pub type DomResult<T> = Result<T, DomError>;

/// Callback run when a node is clicked.
pub type ClickListener = Arc<dyn Fn(NodeId) + Send + Sync>;

struct DocState {
    tree: Tree,
    body: NodeId,
    title: String,
    observers: HashMap<ObserverId, Registration>,
    listeners: HashMap<NodeId, Vec<ClickListener>>,
}

impl DocState {
    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::new();
        self.tree.nodes.insert(id, NodeData::new(kind));
        id
    }

    fn build(&mut self, el: El) -> NodeId {
        let mut data = ElementData::new(el.tag);
        data.attributes.extend(el.attributes);
        let id = self.alloc(NodeKind::Element(data));
        for child in el.children {
            let child_id = match child {
                Child::El(el) => self.build(el),
                Child::Text(text) => self.alloc(NodeKind::Text(text)),
            };
            self.link(id, child_id, None);
        }
        id
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut NodeData> {
        self.tree.nodes.get_mut(&id).ok_or(DomError::NodeNotFound(id))
    }

    fn element_mut(&mut self, id: NodeId) -> DomResult<&mut ElementData> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(data) => Ok(data),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let parent_kind = self.tree.kind(parent).ok_or(DomError::NodeNotFound(parent))?;
        let child_kind = self.tree.kind(child).ok_or(DomError::NodeNotFound(child))?;
        let bad_parent = matches!(parent_kind, NodeKind::Text(_));
        let bad_child = matches!(child_kind, NodeKind::Root);
        if bad_parent || bad_child || self.tree.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        Ok(())
    }

    /// Unlink `child` from its parent, returning the record to deliver.
    fn unlink(&mut self, child: NodeId) -> Option<MutationRecord> {
        let parent = self.tree.parent(child)?;
        if let Some(p) = self.tree.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.tree.nodes.get_mut(&child) {
            c.parent = None;
        }
        Some(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
        })
    }

    fn link(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        if let Some(p) = self.tree.nodes.get_mut(&parent) {
            match index {
                Some(i) if i <= p.children.len() => p.children.insert(i, child),
                _ => p.children.push(child),
            }
        }
        if let Some(c) = self.tree.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    fn notify(&mut self, record: MutationRecord) {
        let target = record.target();
        let DocState {
            tree, observers, ..
        } = self;
        observers.retain(|_, reg| {
            if reg.tx.is_closed() {
                return false;
            }
            let in_scope = reg.target == target
                || (reg.options.subtree && tree.is_inclusive_ancestor(reg.target, target));
            if in_scope && reg.options.wants(&record) {
                return reg.tx.send(vec![record.clone()]).is_ok();
            }
            true
        });
    }
}

/// A mutable host tree with observers, click listeners and a location.
///
/// Every method takes `&self`; the document is shared behind an `Arc`
/// between the page simulation and the engine's tasks. The internal lock is
/// never held while user callbacks run.
pub struct Document {
    state: Mutex<DocState>,
    location: watch::Sender<String>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("location", &*self.location.borrow())
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Create an empty page (`html > body`) at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let mut state = DocState {
            tree: Tree::new(),
            body: NodeId::new(),
            title: String::new(),
            observers: HashMap::new(),
            listeners: HashMap::new(),
        };
        let root = state.tree.root();
        let html = state.alloc(NodeKind::Element(ElementData::new("html")));
        let body = state.alloc(NodeKind::Element(ElementData::new("body")));
        state.link(root, html, None);
        state.link(html, body, None);
        state.body = body;

        let (location, _) = watch::channel(url.into());
        Self {
            state: Mutex::new(state),
            location,
        }
    }

    fn state(&self) -> MutexGuard<'_, DocState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn body(&self) -> NodeId {
        self.state().body
    }

    /// Run `f` against a consistent snapshot of the tree.
    pub fn read<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        let state = self.state();
        f(&state.tree)
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.state()
            .alloc(NodeKind::Element(ElementData::new(tag)))
    }

    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.state().alloc(NodeKind::Text(text.into()))
    }

    /// Materialize a detached subtree.
    pub fn build(&self, el: El) -> NodeId {
        self.state().build(el)
    }

    /// Build `el` and append it to `parent`.
    pub fn append(&self, parent: NodeId, el: El) -> DomResult<NodeId> {
        let id = self.build(el);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Append `child` as the last child of `parent`, moving it if attached.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let mut state = self.state();
        state.check_insert(parent, child)?;
        if let Some(record) = state.unlink(child) {
            state.notify(record);
        }
        state.link(parent, child, None);
        state.notify(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Insert `child` before `reference`, or at the end when `reference` is `None`.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<()> {
        let Some(reference) = reference else {
            return self.append_child(parent, child);
        };
        if reference == child {
            return Ok(());
        }
        let mut state = self.state();
        state.check_insert(parent, child)?;
        if state.tree.parent(reference) != Some(parent) {
            return Err(DomError::NotAChild {
                parent,
                child: reference,
            });
        }
        if let Some(record) = state.unlink(child) {
            state.notify(record);
        }
        let index = state
            .tree
            .children(parent)
            .iter()
            .position(|c| *c == reference);
        state.link(parent, child, index);
        state.notify(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Detach `node` from its parent. Removing a detached node is a no-op.
    pub fn remove(&self, node: NodeId) -> DomResult<()> {
        let mut state = self.state();
        if !state.tree.contains(node) {
            return Err(DomError::NodeNotFound(node));
        }
        if let Some(record) = state.unlink(node) {
            state.notify(record);
        }
        Ok(())
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let mut state = self.state();
        state
            .element_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        state.notify(MutationRecord::Attributes {
            target: node,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> DomResult<()> {
        let mut state = self.state();
        if state.element_mut(node)?.attributes.remove(name).is_some() {
            state.notify(MutationRecord::Attributes {
                target: node,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.read(|tree| tree.element(node).and_then(|el| el.attr(name).map(str::to_string)))
    }

    /// Replace the text of a text node, or all children of an element with one text node.
    pub fn set_text(&self, node: NodeId, text: impl Into<String>) -> DomResult<()> {
        let text = text.into();
        let mut state = self.state();
        match state.tree.kind(node) {
            None => return Err(DomError::NodeNotFound(node)),
            Some(NodeKind::Root) => return Err(DomError::NotAnElement(node)),
            Some(NodeKind::Text(_)) => {
                if let Ok(NodeData {
                    kind: NodeKind::Text(existing),
                    ..
                }) = state.node_mut(node)
                {
                    *existing = text;
                }
                state.notify(MutationRecord::CharacterData { target: node });
            }
            Some(NodeKind::Element(_)) => {
                let removed = std::mem::take(&mut state.node_mut(node)?.children);
                for child in &removed {
                    if let Some(c) = state.tree.nodes.get_mut(child) {
                        c.parent = None;
                    }
                }
                let text_node = state.alloc(NodeKind::Text(text));
                state.link(node, text_node, None);
                state.notify(MutationRecord::ChildList {
                    target: node,
                    added: vec![text_node],
                    removed,
                });
            }
        }
        Ok(())
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.read(|tree| tree.text_content(node))
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.read(|tree| tree.is_connected(node))
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.read(|tree| tree.parent(node))
    }

    /// Register an observer on `target`.
    pub fn observe(&self, target: NodeId, options: ObserveOptions) -> MutationObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ObserverId::new();
        self.state().observers.insert(
            id,
            Registration {
                target,
                options,
                tx,
            },
        );
        MutationObserver::new(id, target, rx)
    }

    /// Drop a registration; its observer's `next_batch()` then yields `None`.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.state().observers.remove(&id).is_some()
    }

    /// Live observer registrations.
    pub fn observer_count(&self) -> usize {
        let mut state = self.state();
        state.observers.retain(|_, reg| !reg.tx.is_closed());
        state.observers.len()
    }

    pub fn on_click(&self, node: NodeId, listener: impl Fn(NodeId) + Send + Sync + 'static) {
        self.state()
            .listeners
            .entry(node)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Drop every listener on `node`. Returns how many were removed.
    pub fn off_click(&self, node: NodeId) -> usize {
        self.state()
            .listeners
            .remove(&node)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Drop the listeners of nodes no longer in the document.
    pub fn prune_detached_listeners(&self) -> usize {
        let mut state = self.state();
        let DocState {
            tree, listeners, ..
        } = &mut *state;
        let before = listeners.len();
        listeners.retain(|node, _| tree.is_connected(*node));
        before - listeners.len()
    }

    /// Nodes with at least one click listener.
    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Dispatch a click to `node`'s listeners.
    ///
    /// A `disabled` element swallows the click. Returns whether any
    /// listener ran.
    pub fn click(&self, node: NodeId) -> bool {
        let listeners = {
            let state = self.state();
            let disabled = state
                .tree
                .element(node)
                .map(|el| el.has_attr("disabled"))
                .unwrap_or(true);
            if disabled {
                return false;
            }
            state.listeners.get(&node).cloned().unwrap_or_default()
        };
        for listener in &listeners {
            listener(node);
        }
        !listeners.is_empty()
    }

    pub fn title(&self) -> String {
        self.state().title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.state().title = title.into();
    }

    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    /// Change the page URL the way `history.pushState`/`replaceState` do.
    ///
    /// Subscribers are woken even when the URL is unchanged, so a
    /// conversation switch that keeps the URL is still observable.
    pub fn navigate(&self, url: impl Into<String>) {
        self.location.send_replace(url.into());
    }

    pub fn subscribe_location(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }
}

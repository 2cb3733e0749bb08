//! Node representation in the host tree

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Stable identity token for a node.
///
/// Survives moves within the tree; a host re-render that replaces a
/// subtree produces new ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a NodeId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag name and attributes of an element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementData {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
}

impl ElementData {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
        }
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace())
            .into_iter()
            .flatten()
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The document node; never has a parent
    Root,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl NodeData {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Arena holding every node a document has ever created.
///
/// Detached nodes stay in the arena so they can be re-inserted, the way a
/// page script can hold on to a removed element.
#[derive(Debug)]
pub struct Tree {
    pub(crate) nodes: HashMap<NodeId, NodeData>,
    root: NodeId,
}

impl Tree {
    pub(crate) fn new() -> Self {
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(root, NodeData::new(NodeKind::Root));
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|n| &n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// View a node as an element, if it is one.
    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::Element(data) => Some(ElementRef {
                tree: self,
                id,
                data,
            }),
            _ => None,
        }
    }

    /// True when walking up from `id` reaches the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// True when `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Concatenated text of every text node under `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out, &keep_all);
        out
    }

    /// Indented, markup-like rendering of the subtree at `id`. Text is
    /// whitespace-collapsed; empty text nodes are omitted.
    pub fn outline(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_outline(id, 0, &mut out);
        out
    }

    fn write_outline(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        match &node.kind {
            NodeKind::Root => {
                for child in &node.children {
                    self.write_outline(*child, depth, out);
                }
            }
            NodeKind::Text(text) => {
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !text.is_empty() {
                    out.push_str(&format!("{indent}\"{text}\"\n"));
                }
            }
            NodeKind::Element(data) => {
                out.push_str(&indent);
                out.push('<');
                out.push_str(&data.tag);
                for (name, value) in &data.attributes {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                out.push_str(">\n");
                for child in &node.children {
                    self.write_outline(*child, depth + 1, out);
                }
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String, skip: &dyn Fn(&ElementRef<'_>) -> bool) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                if let Some(el) = self.element(id) {
                    if skip(&el) {
                        return;
                    }
                }
                for child in &node.children {
                    self.collect_text(*child, out, skip);
                }
            }
            NodeKind::Root => {
                for child in &node.children {
                    self.collect_text(*child, out, skip);
                }
            }
        }
    }
}

fn keep_all(_: &ElementRef<'_>) -> bool {
    false
}

/// Read-only view of an element inside a locked tree.
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    tree: &'a Tree,
    id: NodeId,
    data: &'a ElementData,
}

impl std::fmt::Debug for ElementRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementRef")
            .field("id", &self.id)
            .field("tag", &self.data.tag)
            .field("attributes", &self.data.attributes)
            .finish()
    }
}

impl PartialEq for ElementRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<'a> ElementRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn tag(&self) -> &'a str {
        &self.data.tag
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.data.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.data.attributes.contains_key(name)
    }

    /// Attribute value equals `value`, ASCII case-insensitively.
    pub fn attr_is(&self, name: &str, value: &str) -> bool {
        self.attr(name)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }

    pub fn classes(&self) -> impl Iterator<Item = &'a str> {
        self.data.classes()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Some class token starts with `prefix` (e.g. `gap` matches `gap-2`).
    pub fn has_class_prefix(&self, prefix: &str) -> bool {
        self.classes().any(|c| c.starts_with(prefix))
    }

    pub fn parent_element(&self) -> Option<ElementRef<'a>> {
        self.tree.parent(self.id).and_then(|p| self.tree.element(p))
    }

    /// Element children, in order.
    pub fn children(&self) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        let tree = self.tree;
        tree.children(self.id)
            .iter()
            .filter_map(move |c| tree.element(*c))
    }

    pub fn child_element_count(&self) -> usize {
        self.children().count()
    }

    pub fn last_element_child(&self) -> Option<ElementRef<'a>> {
        self.children().last()
    }

    /// This element is the last element child of its parent.
    pub fn is_last_element_child(&self) -> bool {
        self.parent_element()
            .and_then(|p| p.last_element_child())
            .map(|last| last.id == self.id)
            .unwrap_or(false)
    }

    /// Element descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'a> {
        let mut stack: Vec<NodeId> = self.tree.children(self.id).to_vec();
        stack.reverse();
        Descendants {
            tree: self.tree,
            stack,
        }
    }

    /// First descendant matching `pred`, in document order.
    pub fn find(&self, pred: impl Fn(&ElementRef<'a>) -> bool) -> Option<ElementRef<'a>> {
        self.descendants().find(|el| pred(el))
    }

    pub fn find_all(&self, pred: impl Fn(&ElementRef<'a>) -> bool) -> Vec<ElementRef<'a>> {
        self.descendants().filter(|el| pred(el)).collect()
    }

    /// Ancestor elements, nearest first, excluding `self`.
    pub fn ancestors(&self) -> impl Iterator<Item = ElementRef<'a>> {
        std::iter::successors(self.parent_element(), |el| el.parent_element())
    }

    /// Nearest inclusive ancestor matching `pred`.
    pub fn closest(&self, pred: impl Fn(&ElementRef<'a>) -> bool) -> Option<ElementRef<'a>> {
        if pred(self) {
            return Some(*self);
        }
        self.ancestors().find(|el| pred(el))
    }

    pub fn contains(&self, other: NodeId) -> bool {
        self.tree.is_inclusive_ancestor(self.id, other)
    }

    pub fn is_connected(&self) -> bool {
        self.tree.is_connected(self.id)
    }

    pub fn text_content(&self) -> String {
        self.tree.text_content(self.id)
    }

    /// Text content, skipping whole subtrees whose root matches `skip`.
    pub fn text_excluding(&self, skip: impl Fn(&ElementRef<'_>) -> bool) -> String {
        let mut out = String::new();
        for child in self.tree.children(self.id) {
            self.tree.collect_text(*child, &mut out, &skip);
        }
        out
    }
}

/// Pre-order walk over element descendants.
pub struct Descendants<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = ElementRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(el) = self.tree.element(id) {
                self.stack
                    .extend(self.tree.children(id).iter().rev().copied());
                return Some(el);
            }
        }
        None
    }
}

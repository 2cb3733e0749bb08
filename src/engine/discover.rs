//! Candidate discovery
//!
//! Turns a scope (the body on a full scan, an added or changed node on a
//! mutation) into the outermost host nodes that classify positively.

use super::classify::Classifier;
use super::markers::{is_assistant_marked, is_content_region, is_landmark, is_role_marked};
use crate::dom::{ElementRef, NodeId, Tree};
use std::collections::HashSet;

/// Host nodes touched by `scope`, outermost only, in document order.
pub fn discover(tree: &Tree, scope: NodeId, classifier: &Classifier) -> Vec<NodeId> {
    let Some(scope) = tree.element(scope) else {
        return Vec::new();
    };
    if !scope.is_connected() {
        return Vec::new();
    }

    let mut found: Vec<NodeId> = Vec::new();

    // Explicit roles: the enclosing turn, then turns inside the scope
    if let Some(turn) = outermost_assistant(&scope) {
        found.push(turn.id());
    }
    found.extend(
        scope
            .descendants()
            .filter(|el| is_assistant_marked(el) && !el.ancestors().any(|a| is_assistant_marked(&a)))
            .map(|el| el.id()),
    );

    // Heuristic: unmarked content regions, resolved to their message wrapper
    let regions = std::iter::once(scope)
        .chain(scope.ancestors())
        .filter(is_content_region)
        .last()
        .into_iter()
        .chain(scope.descendants().filter(is_content_region));
    for region in regions {
        if region.closest(is_role_marked).is_some() {
            continue;
        }
        if let Some(host) = heuristic_host(&region, classifier) {
            found.push(host);
        }
    }

    let mut seen = HashSet::new();
    found.retain(|id| seen.insert(*id));
    found.retain(|id| {
        tree.element(*id)
            .map(|el| classifier.classify(&el).is_assistant())
            .unwrap_or(false)
    });
    let nested: HashSet<NodeId> = found
        .iter()
        .copied()
        .filter(|id| {
            found
                .iter()
                .any(|other| other != id && tree.is_inclusive_ancestor(*other, *id))
        })
        .collect();
    found.retain(|id| !nested.contains(id));

    document_order(tree, found)
}

fn outermost_assistant<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    std::iter::once(*el)
        .chain(el.ancestors())
        .filter(is_assistant_marked)
        .last()
}

/// Nearest ancestor of `region` that classifies positively, stopping at
/// page landmarks.
fn heuristic_host(region: &ElementRef<'_>, classifier: &Classifier) -> Option<NodeId> {
    region
        .ancestors()
        .take_while(|a| !is_landmark(a))
        .find(|a| classifier.classify(a).is_assistant())
        .map(|a| a.id())
}

fn document_order(tree: &Tree, ids: Vec<NodeId>) -> Vec<NodeId> {
    if ids.len() < 2 {
        return ids;
    }
    let wanted: HashSet<NodeId> = ids.into_iter().collect();
    tree.children(tree.root())
        .iter()
        .filter_map(|id| tree.element(*id))
        .flat_map(|top| std::iter::once(top).chain(top.descendants()))
        .map(|el| el.id())
        .filter(|id| wanted.contains(id))
        .collect()
}

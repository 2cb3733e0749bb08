//! Attachment point resolution
//!
//! Tray detection is an ordered list of named strategies. Each strategy
//! nominates containers; a nominee is accepted only if `looks_like_tray`
//! agrees, so a stray row of buttons elsewhere in a message is never
//! mistaken for the action tray.

use super::markers::{has_row_layout, is_affordance, is_control, is_managed_tray, TRAY_CLASS};
use crate::dom::{Document, DomResult, El, ElementRef, NodeId};

/// Labels of the host's own per-message actions.
pub const ACTION_KEYWORDS: &[&str] = &[
    "copy",
    "edit",
    "regenerate",
    "continue",
    "read aloud",
    "read-aloud",
    "canvas",
];

/// Test ids the host has used for its action region.
const TRAY_TESTIDS: &[&str] = &["message-actions", "message-actions-toolbar"];

/// A named structural heuristic for finding the action tray.
#[derive(Debug, Clone, Copy)]
pub struct TrayStrategy {
    pub name: &'static str,
    pub matches: fn(&ElementRef<'_>) -> bool,
}

/// Strategies in strict priority order.
pub const TRAY_STRATEGIES: &[TrayStrategy] = &[
    TrayStrategy {
        name: "test-id",
        matches: has_tray_testid,
    },
    TrayStrategy {
        name: "row-layout",
        matches: has_row_layout,
    },
    TrayStrategy {
        name: "action-button",
        matches: holds_action_control,
    },
];

fn has_tray_testid(el: &ElementRef<'_>) -> bool {
    el.attr("data-testid")
        .map(|id| TRAY_TESTIDS.iter().any(|t| id.eq_ignore_ascii_case(t)))
        .unwrap_or(false)
}

fn holds_action_control(el: &ElementRef<'_>) -> bool {
    el.children().any(|c| is_action_control(&c))
}

/// A host control whose label names a known action.
pub fn is_action_control(el: &ElementRef<'_>) -> bool {
    if !is_control(el) || is_affordance(el) {
        return false;
    }
    let mut label = String::new();
    for name in ["aria-label", "data-testid", "title"] {
        if let Some(v) = el.attr(name) {
            label.push_str(v);
            label.push(' ');
        }
    }
    label.push_str(&el.text_content());
    let label = label.to_lowercase();
    ACTION_KEYWORDS.iter().any(|k| label.contains(k))
}

/// Scorer: interactive, and recognizably an action region.
pub fn looks_like_tray(el: &ElementRef<'_>) -> bool {
    let controls = el.find_all(is_control);
    if controls.is_empty() {
        return false;
    }
    controls.iter().any(is_action_control)
        || (has_row_layout(el) && el.find(|e| e.tag() == "svg").is_some())
}

/// A resolved attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub point: NodeId,
    /// Name of the strategy that found it
    pub strategy: &'static str,
}

/// Find the host's action tray inside `host`.
pub fn locate(host: &ElementRef<'_>) -> Option<Located> {
    for strategy in TRAY_STRATEGIES {
        if let Some(found) = host
            .descendants()
            .find(|el| (strategy.matches)(el) && looks_like_tray(el))
        {
            tracing::trace!(host = %host.id(), strategy = strategy.name, "tray located");
            return Some(Located {
                point: found.id(),
                strategy: strategy.name,
            });
        }
    }
    None
}

/// Markup of a tray the engine creates.
pub fn tray_el() -> El {
    El::new("div")
        .class("flex items-center gap-2 mt-2")
        .class(TRAY_CLASS)
}

/// Return a managed tray at the tail of `container`.
///
/// An existing managed tray among the container's children is reused and
/// moved to the tail if needed. Otherwise a new one is appended.
pub fn synthesize_tray(document: &Document, container: NodeId) -> DomResult<NodeId> {
    let existing = document.read(|tree| {
        tree.element(container).map(|c| {
            c.children()
                .find(|e| is_managed_tray(e))
                .map(|t| (t.id(), t.is_last_element_child()))
        })
    });
    match existing {
        None => Err(crate::dom::DomError::NotAnElement(container)),
        Some(Some((tray, true))) => Ok(tray),
        Some(Some((tray, false))) => {
            document.append_child(container, tray)?;
            Ok(tray)
        }
        Some(None) => document.append(container, tray_el()),
    }
}

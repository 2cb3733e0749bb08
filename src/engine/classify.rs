//! Anchor classification
//!
//! Pure function of the current tree. Rules are evaluated in priority
//! order: explicit negatives, explicit positives, then the heuristic
//! bundle. Results are never cached; the host can restructure a node
//! without changing its identity.

use super::markers::{
    is_assistant_marked, is_content_region, is_control, is_editable, is_engine_owned,
    is_landmark, is_role_marked, is_user_marked,
};
use crate::dom::ElementRef;

/// The rule that decided a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Node or an ancestor is marked user-authored
    UserAuthored,
    /// Node is or contains a text input surface
    EditableRegion,
    /// Node is the injected control, its tray, or inside one
    ManagedAffordance,
    /// Node is, or sits inside, a clickable control
    ClickableControl,
    /// Node, or its single role-marked descendant, is marked assistant-authored
    AssistantAuthored,
    /// Heuristic bundle matched
    HeuristicMatch,
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Explicit,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub signal: Signal,
    pub confidence: Confidence,
}

impl Classification {
    fn explicit(signal: Signal) -> Self {
        Self {
            signal,
            confidence: Confidence::Explicit,
        }
    }

    fn heuristic(signal: Signal) -> Self {
        Self {
            signal,
            confidence: Confidence::Heuristic,
        }
    }

    /// Positive classification: the node represents an assistant message.
    pub fn is_assistant(&self) -> bool {
        matches!(self.signal, Signal::AssistantAuthored | Signal::HeuristicMatch)
    }
}

/// Decides whether a host node represents an assistant message.
#[derive(Debug, Clone)]
pub struct Classifier {
    min_text_chars: usize,
}

impl Classifier {
    pub fn new(min_text_chars: usize) -> Self {
        Self { min_text_chars }
    }

    pub fn min_text_chars(&self) -> usize {
        self.min_text_chars
    }

    pub fn classify(&self, el: &ElementRef<'_>) -> Classification {
        if el.closest(is_user_marked).is_some() {
            return Classification::explicit(Signal::UserAuthored);
        }
        if is_editable(el) || el.find(is_editable).is_some() {
            return Classification::explicit(Signal::EditableRegion);
        }
        if is_engine_owned(el) {
            return Classification::explicit(Signal::ManagedAffordance);
        }

        if is_assistant_marked(el) {
            return Classification::explicit(Signal::AssistantAuthored);
        }
        let marked = el.find_all(is_role_marked);
        if let [only] = marked.as_slice() {
            if is_assistant_marked(only) {
                return Classification::explicit(Signal::AssistantAuthored);
            }
        }
        if !marked.is_empty() {
            // Spans several turns, or only non-assistant ones
            return Classification::heuristic(Signal::NoMatch);
        }

        if el.closest(is_control).is_some() {
            return Classification::heuristic(Signal::ClickableControl);
        }
        if is_landmark(el) {
            return Classification::heuristic(Signal::NoMatch);
        }
        if self.matches_heuristics(el) {
            return Classification::heuristic(Signal::HeuristicMatch);
        }
        Classification::heuristic(Signal::NoMatch)
    }

    fn matches_heuristics(&self, el: &ElementRef<'_>) -> bool {
        let outermost_regions = el
            .find_all(is_content_region)
            .into_iter()
            .filter(|region| {
                !region
                    .ancestors()
                    .take_while(|a| a.id() != el.id())
                    .any(|a| is_content_region(&a))
            })
            .count();
        outermost_regions == 1 && el.text_content().trim().chars().count() >= self.min_text_chars
    }
}

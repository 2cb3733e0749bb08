//! Structural predicates shared by classification, discovery and attachment

use crate::dom::{ElementRef, AUTHOR_ROLE_ATTR};

/// Class of the injected save control.
pub const AFFORDANCE_CLASS: &str = "savechat-button";
/// Class of a tray the engine synthesized.
pub const TRAY_CLASS: &str = "savechat-button-container";
/// Test id carried by the injected save control.
pub const AFFORDANCE_TESTID: &str = "savechat-save-button";
/// Attribute reflecting the control's status.
pub const STATUS_ATTR: &str = "data-savechat-status";

/// Class tokens the host uses for rendered message bodies.
pub const CONTENT_REGION_CLASSES: &[&str] = &["markdown", "prose", "whitespace-pre-wrap"];

/// Explicit author role of a message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Assistant,
    User,
    Other,
}

/// Role declared on this element, if it carries the role marker.
pub fn role(el: &ElementRef<'_>) -> Option<Role> {
    el.attr(AUTHOR_ROLE_ATTR).map(|value| match value.trim() {
        v if v.eq_ignore_ascii_case("assistant") => Role::Assistant,
        v if v.eq_ignore_ascii_case("user") => Role::User,
        _ => Role::Other,
    })
}

pub fn is_assistant_marked(el: &ElementRef<'_>) -> bool {
    role(el) == Some(Role::Assistant)
}

pub fn is_user_marked(el: &ElementRef<'_>) -> bool {
    role(el) == Some(Role::User)
}

pub fn is_role_marked(el: &ElementRef<'_>) -> bool {
    el.has_attr(AUTHOR_ROLE_ATTR)
}

pub fn is_affordance(el: &ElementRef<'_>) -> bool {
    el.has_class(AFFORDANCE_CLASS)
}

pub fn is_managed_tray(el: &ElementRef<'_>) -> bool {
    el.has_class(TRAY_CLASS)
}

/// The injected control, its synthesized tray, or anything inside either.
pub fn is_engine_owned(el: &ElementRef<'_>) -> bool {
    el.closest(|e| is_affordance(e) || is_managed_tray(e)).is_some()
}

pub fn is_content_region(el: &ElementRef<'_>) -> bool {
    CONTENT_REGION_CLASSES.iter().any(|c| el.has_class(c))
}

/// Text input surfaces: composers, inline editors.
pub fn is_editable(el: &ElementRef<'_>) -> bool {
    matches!(el.tag(), "textarea" | "input")
        || el.attr_is("contenteditable", "true")
        || el.attr_is("contenteditable", "")
        || el.attr_is("role", "textbox")
}

/// Something a user clicks: buttons and button-like elements.
pub fn is_control(el: &ElementRef<'_>) -> bool {
    el.tag() == "button" || el.attr_is("role", "button") || el.has_class("button")
}

/// Page landmarks never hold a single message.
pub fn is_landmark(el: &ElementRef<'_>) -> bool {
    matches!(
        el.tag(),
        "html" | "body" | "main" | "nav" | "header" | "footer" | "aside" | "form"
    ) || el
        .attr("role")
        .map(|r| {
            matches!(
                r.to_ascii_lowercase().as_str(),
                "main" | "navigation" | "banner" | "contentinfo" | "complementary" | "form"
            )
        })
        .unwrap_or(false)
}

/// Whether the class list describes a horizontal flex row with spacing.
pub fn has_row_layout(el: &ElementRef<'_>) -> bool {
    el.has_class("flex")
        && el.has_class("items-center")
        && (el.has_class_prefix("gap") || el.has_class_prefix("space-x"))
}

/// Collapse runs of whitespace to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

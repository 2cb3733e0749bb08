//! Record capture from a host node

use super::markers::{
    is_assistant_marked, is_content_region, is_control, is_engine_owned, normalize_whitespace,
};
use crate::dom::{ElementRef, NodeId, Tree};
use crate::store::{Record, RecordContext, DEFAULT_TITLE};

/// Where the host shows the conversation title, most specific first.
const TITLE_PROBES: &[fn(&ElementRef<'_>) -> bool] =
    &[is_heading, is_large_text, is_medium_text, is_title_testid];

fn is_heading(e: &ElementRef<'_>) -> bool {
    e.tag() == "h1"
}

fn is_large_text(e: &ElementRef<'_>) -> bool {
    e.has_class("text-2xl")
}

fn is_medium_text(e: &ElementRef<'_>) -> bool {
    e.has_class("text-xl")
}

fn is_title_testid(e: &ElementRef<'_>) -> bool {
    e.attr("data-testid") == Some("conversation-title")
}

/// Message text of `host`, controls excluded, whitespace collapsed.
pub fn extract_text(host: &ElementRef<'_>) -> String {
    let source = host.find(is_content_region).unwrap_or(*host);
    normalize_whitespace(&source.text_excluding(|e| is_control(e) || is_engine_owned(e)))
}

/// Conversation title from page headings, else `page_title`, else a default.
pub fn conversation_title(tree: &Tree, page_title: &str) -> String {
    let all: Vec<ElementRef<'_>> = tree
        .children(tree.root())
        .iter()
        .filter_map(|id| tree.element(*id))
        .flat_map(|top| std::iter::once(top).chain(top.descendants()))
        .collect();
    for probe in TITLE_PROBES {
        let found = all
            .iter()
            .filter(|e| probe(e))
            .map(|e| normalize_whitespace(&e.text_content()))
            .find(|t| !t.is_empty());
        if let Some(title) = found {
            return title;
        }
    }
    let page_title = page_title.trim();
    if page_title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        page_title.to_string()
    }
}

/// 1-based position of `host`'s turn among assistant turns.
pub fn message_index(tree: &Tree, host: NodeId) -> Option<usize> {
    let turn = tree.element(host)?.closest(is_assistant_marked)?.id();
    tree.children(tree.root())
        .iter()
        .filter_map(|id| tree.element(*id))
        .flat_map(|top| std::iter::once(top).chain(top.descendants()))
        .filter(is_assistant_marked)
        .position(|e| e.id() == turn)
        .map(|i| i + 1)
}

/// Conversation identity: the `/c/<id>` path segment, else the title,
/// else the whole URL.
pub fn conversation_id(url: &str, title: &str) -> String {
    if let Some(pos) = url.find("/c/") {
        let id: String = url[pos + 3..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if !id.is_empty() {
            return id;
        }
    }
    let title = title.trim();
    if title.is_empty() {
        url.to_string()
    } else {
        title.to_string()
    }
}

/// Build the record for `host`. `None` when there is no text to save.
pub fn capture(tree: &Tree, host: NodeId, url: &str, page_title: &str) -> Option<Record> {
    let el = tree.element(host)?;
    let text = extract_text(&el);
    if text.is_empty() {
        return None;
    }
    let title = conversation_title(tree, page_title);
    let mut context = RecordContext::new(title.clone()).with_conversation_id(conversation_id(url, &title));
    context.message_index = message_index(tree, host);
    Some(Record::new(text, url, context))
}

//! Declarative subtree builder

/// Attribute carrying the author role of a message turn.
pub const AUTHOR_ROLE_ATTR: &str = "data-message-author-role";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Child {
    El(El),
    Text(String),
}

/// Description of an element subtree, materialized by `Document::build`.
///
/// ```
/// use savechat::dom::El;
///
/// let turn = El::new("div")
///     .author("assistant")
///     .child(El::new("div").class("markdown prose").text("Hello there, how can I help?"));
/// assert_eq!(turn.tag(), "div");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct El {
    pub(crate) tag: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) children: Vec<Child>,
}

impl El {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Set an attribute, replacing an earlier value of the same name.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    /// Append space-separated class tokens.
    pub fn class(self, classes: &str) -> Self {
        let merged = match self.attributes.iter().find(|(n, _)| n == "class") {
            Some((_, existing)) if !existing.is_empty() => format!("{} {}", existing, classes),
            _ => classes.to_string(),
        };
        self.attr("class", merged)
    }

    pub fn testid(self, id: &str) -> Self {
        self.attr("data-testid", id)
    }

    /// Mark the element with an explicit author role.
    pub fn author(self, role: &str) -> Self {
        self.attr(AUTHOR_ROLE_ATTR, role)
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Child::Text(text.into()));
        self
    }

    pub fn child(mut self, child: El) -> Self {
        self.children.push(Child::El(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = El>) -> Self {
        self.children.extend(children.into_iter().map(Child::El));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_tokens_accumulate() {
        let el = El::new("div").class("flex").class("items-center gap-2");
        assert_eq!(
            el.attributes,
            vec![("class".to_string(), "flex items-center gap-2".to_string())]
        );
    }

    #[test]
    fn attr_replaces_existing_value() {
        let el = El::new("div").author("user").author("assistant");
        assert_eq!(el.attributes.len(), 1);
        assert_eq!(el.attributes[0].1, "assistant");
    }
}

//! Parsed markup tree

/// One node of parsed section markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    /// A macro block that survived preprocessing; never rendered
    Macro(String),
    /// A table block that survived preprocessing; never rendered
    Table(String),
    /// `[[target]]` or `[[target|text]]`
    Link {
        target: String,
        text: Option<Vec<Node>>,
    },
    /// `[url title]`, `[url]` or a bare URL
    ExternalLink {
        url: String,
        title: Option<Vec<Node>>,
    },
    /// Raw entity including `&` and `;`
    HtmlEntity(String),
    /// HTML or extension tag; `contents` is `None` for void and self-closing tags
    Tag {
        name: String,
        attributes: Vec<(String, String)>,
        contents: Option<Vec<Node>>,
    },
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text(value.into())
    }

    /// Value of a tag attribute (names compare case-insensitively)
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match self {
            Node::Tag { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// A section heading line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub title: Vec<Node>,
}

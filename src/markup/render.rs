//! Rendering parsed nodes to linear text with link spans

use super::entity::unescape_html;
use super::node::Node;
use super::parser::IGNORED_TAGS;
use crate::title::{normalize_page_title, normalize_section_id};
use regex::Regex;
use std::sync::OnceLock;

/// Namespaces whose links are invisible content rather than prose
const HIDDEN_NAMESPACES: &[&str] = &["Category", "File", "Image"];

/// A link inside rendered text
///
/// `start..end` is a byte range of the text the span was rendered into;
/// `title` always equals that slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    pub start: usize,
    pub end: usize,
    pub title: String,
    /// Normalized page title of the link target
    pub target_article: String,
    /// Normalized section id, `None` for a whole-article link
    pub target_section: Option<String>,
}

/// Linear text plus the links found in it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedText {
    pub text: String,
    pub links: Vec<LinkSpan>,
}

fn namespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*?):").expect("valid namespace regex"))
}

/// First letter uppercase, the rest lowercase
fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Render nodes into text and link spans.
pub fn render(nodes: &[Node]) -> RenderedText {
    let mut renderer = Renderer::default();
    renderer.render_nodes(nodes);
    renderer.out
}

/// Render nodes and keep only the text.
pub fn plain_text(nodes: &[Node]) -> String {
    render(nodes).text
}

/// `id` attributes of every tag in the tree, in document order
pub fn anchor_ids(nodes: &[Node]) -> Vec<String> {
    let mut ids = Vec::new();
    collect_anchor_ids(nodes, &mut ids);
    ids
}

fn collect_anchor_ids(nodes: &[Node], ids: &mut Vec<String>) {
    for node in nodes {
        if let Some(id) = node.attribute("id") {
            ids.push(id.to_string());
        }
        match node {
            Node::Tag {
                contents: Some(children),
                ..
            } => collect_anchor_ids(children, ids),
            Node::Link {
                text: Some(children),
                ..
            } => collect_anchor_ids(children, ids),
            _ => {}
        }
    }
}

#[derive(Default)]
struct Renderer {
    out: RenderedText,
}

impl Renderer {
    fn render_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::Text(value) => self.push_text(value),
                Node::HtmlEntity(raw) => self.out.text.push_str(&unescape_html(raw)),
                Node::Macro(_) | Node::Table(_) => {}
                Node::ExternalLink { title, .. } => match title {
                    Some(title) => self.out.text.push_str(&plain_text(title)),
                    None => self.out.text.push_str("URL"),
                },
                Node::Tag { name, contents, .. } => self.push_tag(name, contents.as_deref()),
                Node::Link { target, text } => self.push_link(target, text.as_deref()),
            }
        }
    }

    /// Append text, extending a directly preceding link over leading letters.
    fn push_text(&mut self, value: &str) {
        let text_len = self.out.text.len();
        if let Some(last) = self.out.links.last_mut() {
            if last.end == text_len {
                let blended = value.bytes().take_while(u8::is_ascii_alphabetic).count();
                if blended > 0 {
                    last.end += blended;
                    last.title.push_str(&value[..blended]);
                }
            }
        }
        self.out.text.push_str(value);
    }

    fn push_tag(&mut self, name: &str, contents: Option<&[Node]>) {
        if name == "br" {
            self.out.text.push('\n');
            return;
        }
        if IGNORED_TAGS.contains(&name) {
            return;
        }

        let block = name == "p" || name == "blockquote";
        if block {
            self.out.text.push_str("\n\n");
        }
        if let Some(children) = contents {
            self.render_nodes(children);
        }
        if block {
            self.out.text.push_str("\n\n");
        }
    }

    fn push_link(&mut self, target: &str, text: Option<&[Node]>) {
        let mut as_text = false;
        if let Some(caps) = namespace_pattern().captures(target) {
            let namespace = capitalize(&caps[1]);
            if HIDDEN_NAMESPACES.contains(&namespace.as_str()) {
                return;
            }
            as_text = true;
        }

        let mut title = text.map(plain_text).unwrap_or_default();
        if title.is_empty() {
            title = unescape_html(target);
        }

        let core = title.trim();
        let leading = title.len() - title.trim_start().len();

        self.out.text.push_str(&title[..leading]);
        let start = self.out.text.len();
        self.out.text.push_str(core);
        let end = self.out.text.len();
        self.out.text.push_str(&title[leading + core.len()..]);

        if as_text || end <= start {
            return;
        }

        let target = unescape_html(target);
        let (article, section) = match target.split_once('#') {
            Some((article, section)) => (article, Some(normalize_section_id(section.trim()))),
            None => (target.as_str(), None),
        };

        self.out.links.push(LinkSpan {
            start,
            end,
            title: core.to_string(),
            target_article: normalize_page_title(article),
            target_section: section,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parser::parse;

    fn rendered(markup: &str) -> RenderedText {
        render(&parse(markup).unwrap())
    }

    #[test]
    fn piped_link_uses_display_text() {
        let out = rendered("The god [[Mercury (mythology)|Mercury]] ruled.");
        assert_eq!(out.text, "The god Mercury ruled.");
        assert_eq!(out.links.len(), 1);
        let link = &out.links[0];
        assert_eq!(&out.text[link.start..link.end], "Mercury");
        assert_eq!(link.target_article, "Mercury_(mythology)");
        assert_eq!(link.target_section, None);
    }

    #[test]
    fn unpiped_link_renders_target() {
        let out = rendered("see [[mercury (planet)#Orbit and rotation]]");
        assert_eq!(out.text, "see mercury (planet)#Orbit and rotation");
        let link = &out.links[0];
        assert_eq!(link.target_article, "Mercury_(planet)");
        assert_eq!(link.target_section.as_deref(), Some("Orbit_and_rotation"));
    }

    #[test]
    fn hidden_namespaces_vanish_and_others_become_text() {
        let out = rendered("a[[Category:Planets]]b [[File:X.png|thumb|cap]] [[Wiktionary:mercury|mercury]]");
        assert_eq!(out.text, "ab  mercury");
        assert!(out.links.is_empty());
    }

    #[test]
    fn title_blending_extends_link() {
        let out = rendered("two [[planet]]s orbit");
        assert_eq!(out.text, "two planets orbit");
        let link = &out.links[0];
        assert_eq!(link.title, "planets");
        assert_eq!(&out.text[link.start..link.end], "planets");
        assert_eq!(link.target_article, "Planet");
    }

    #[test]
    fn whitespace_around_display_text_stays_outside_span() {
        let out = rendered("x[[Venus| the planet ]]y");
        assert_eq!(out.text, "x the planet y");
        let link = &out.links[0];
        assert_eq!(&out.text[link.start..link.end], "the planet");
    }

    #[test]
    fn tags_entities_and_external_links() {
        let out = rendered("a<br>b &amp; <ref>gone</ref><sup>1</sup> [http://x.org X] http://y.org <p>para</p>");
        assert_eq!(out.text, "a\nb &  X URL \n\npara\n\n");
    }

    #[test]
    fn multibyte_offsets_stay_valid() {
        let out = rendered("Über [[Zürich]]er Stadt");
        let link = &out.links[0];
        assert_eq!(&out.text[link.start..link.end], "Züricher");
        assert_eq!(link.title, "Züricher");
        assert_eq!(link.target_article, "Zürich");
    }

    #[test]
    fn collects_anchor_ids() {
        let nodes = parse("Orbit<span id=\"Orbital\"></span><span id=\"Path\"></span>").unwrap();
        assert_eq!(anchor_ids(&nodes), vec!["Orbital", "Path"]);
    }
}

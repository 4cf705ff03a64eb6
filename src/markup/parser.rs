//! Recursive-descent parser from preprocessed section markup to [`Node`]s
//!
//! Anything that does not form a well-formed construct stays plain text, so
//! parsing only fails when nesting exceeds [`MAX_NESTING_DEPTH`].

use super::entity::{decode_entity, entity_len};
use super::node::{Heading, Node};
use super::{MarkupParseError, MarkupResult};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Deepest allowed nesting of links, tags and link titles
pub const MAX_NESTING_DEPTH: usize = 64;

/// Tags whose contents never reach the rendered text
pub const IGNORED_TAGS: &[&str] = &[
    "ref",
    "gallery",
    "score",
    "math",
    "ce",
    "sub",
    "sup",
    "pre",
    "table",
    "imagemap",
    "timeline",
    "source",
    "syntaxhighlight",
    "onlyinclude",
];

const VOID_TAGS: &[&str] = &["br", "hr", "wbr"];

const KNOWN_TAGS: &[&str] = &[
    "abbr", "b", "bdi", "big", "blockquote", "br", "caption", "center", "chem", "cite", "code",
    "dd", "del", "dfn", "div", "dl", "dt", "em", "font", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "ins", "kbd", "mark", "nowiki", "p", "poem", "q", "rb", "rp", "rt", "ruby", "s", "samp",
    "section", "small", "span", "strike", "strong", "td", "th", "tr", "tt", "u", "var", "wbr",
    "ref", "gallery", "score", "math", "ce", "sub", "sup", "pre", "table", "imagemap", "timeline",
    "source", "syntaxhighlight", "onlyinclude", "references", "mapframe", "templatestyles",
];

const URL_SCHEMES: &[&str] = &[
    "http://", "https://", "ftp://", "ftps://", "irc://", "news:", "mailto:", "//",
];

const FREE_URL_SCHEMES: &[&str] = &["http://", "https://", "ftp://"];

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
            .expect("valid attribute regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminator {
    Eof,
    /// `]]`
    LinkEnd,
    /// `]` on the same line
    ExtLinkEnd,
    /// `</name>`
    TagClose(String),
}

/// Parse a run of section markup.
pub fn parse(text: &str) -> MarkupResult<Vec<Node>> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        depth: 0,
        unclosed: HashSet::new(),
    };
    let (nodes, _) = parser.parse_until(&Terminator::Eof)?;
    Ok(nodes)
}

/// Parse a heading line such as `== Early life ==`.
///
/// Returns `None` when the line is not a heading. The level is the smaller of
/// the two `=` runs, capped at 6; extra `=` on the longer side belong to the
/// title.
pub fn parse_heading(line: &str) -> MarkupResult<Option<Heading>> {
    let trimmed = line.trim_end();
    let leading = trimmed.bytes().take_while(|&b| b == b'=').count();
    let trailing = trimmed.bytes().rev().take_while(|&b| b == b'=').count();

    if leading == 0 || trailing == 0 || leading == trimmed.len() {
        return Ok(None);
    }

    let level = leading.min(trailing).min(6);
    let title = &trimmed[level..trimmed.len() - level];

    Ok(Some(Heading {
        level,
        title: parse(title)?,
    }))
}

/// Byte length of `</name>` (any case, optional whitespace) at the start of `rest`.
fn closing_tag_len(rest: &str, name: &str) -> Option<usize> {
    let after_open = rest.strip_prefix("</")?;
    let trimmed = after_open.trim_start();
    let skipped = after_open.len() - trimmed.len();

    let candidate = trimmed.get(..name.len())?;
    if !candidate.eq_ignore_ascii_case(name) {
        return None;
    }

    let tail = &trimmed[name.len()..];
    let tail_trimmed = tail.trim_start();
    if !tail_trimmed.starts_with('>') {
        return None;
    }

    Some(2 + skipped + name.len() + (tail.len() - tail_trimmed.len()) + 1)
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    attribute_pattern()
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (caps[1].to_lowercase(), value)
        })
        .collect()
}

fn flush(nodes: &mut Vec<Node>, text: &mut String) {
    if !text.is_empty() {
        nodes.push(Node::Text(std::mem::take(text)));
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    /// Offsets of `[[`/`[` openers whose closing bracket was never found
    unclosed: HashSet<usize>,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.src.as_bytes()[self.pos - 1] == b'\n'
    }

    /// Parse nodes until `end`; the flag says whether `end` was actually seen.
    fn parse_until(&mut self, end: &Terminator) -> MarkupResult<(Vec<Node>, bool)> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(MarkupParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
                offset: self.pos,
            });
        }
        let result = self.parse_nodes(end);
        self.depth -= 1;
        result
    }

    fn parse_nodes(&mut self, end: &Terminator) -> MarkupResult<(Vec<Node>, bool)> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        while let Some(ch) = self.rest().chars().next() {
            match end {
                Terminator::LinkEnd if self.rest().starts_with("]]") => {
                    self.pos += 2;
                    flush(&mut nodes, &mut text);
                    return Ok((nodes, true));
                }
                Terminator::ExtLinkEnd if ch == ']' => {
                    self.pos += 1;
                    flush(&mut nodes, &mut text);
                    return Ok((nodes, true));
                }
                Terminator::ExtLinkEnd if ch == '\n' => {
                    flush(&mut nodes, &mut text);
                    return Ok((nodes, false));
                }
                Terminator::TagClose(name) => {
                    if let Some(len) = closing_tag_len(self.rest(), name) {
                        self.pos += len;
                        flush(&mut nodes, &mut text);
                        return Ok((nodes, true));
                    }
                }
                _ => {}
            }

            if let Some(node) = self.parse_construct()? {
                flush(&mut nodes, &mut text);
                nodes.push(node);
                continue;
            }

            text.push(ch);
            self.pos += ch.len_utf8();
        }

        flush(&mut nodes, &mut text);
        Ok((nodes, *end == Terminator::Eof))
    }

    /// Try every construct that can start at the cursor; the cursor is left
    /// untouched when none matches.
    fn parse_construct(&mut self) -> MarkupResult<Option<Node>> {
        let rest = self.rest();
        match rest.as_bytes().first() {
            Some(b'[') if rest.starts_with("[[") => self.parse_wikilink(),
            Some(b'[') => self.parse_external_link(),
            Some(b'{') if rest.starts_with("{{") => Ok(self.parse_macro()),
            Some(b'{') if rest.starts_with("{|") && self.at_line_start() => Ok(self.parse_table()),
            Some(b'&') => Ok(self.parse_entity()),
            Some(b'<') => self.parse_tag(),
            Some(b'h') | Some(b'f') => Ok(self.parse_free_url()),
            _ => Ok(None),
        }
    }

    fn parse_wikilink(&mut self) -> MarkupResult<Option<Node>> {
        let start = self.pos;
        if self.unclosed.contains(&start) {
            return Ok(None);
        }
        let inner = &self.src[start + 2..];

        for (i, b) in inner.bytes().enumerate() {
            match b {
                b']' if inner[i..].starts_with("]]") => {
                    let target = &inner[..i];
                    if target.trim().is_empty() {
                        return Ok(None);
                    }
                    self.pos = start + 2 + i + 2;
                    return Ok(Some(Node::Link {
                        target: target.to_string(),
                        text: None,
                    }));
                }
                b'|' => {
                    let target = inner[..i].to_string();
                    if target.trim().is_empty() {
                        return Ok(None);
                    }
                    self.pos = start + 2 + i + 1;
                    let (text, closed) = self.parse_until(&Terminator::LinkEnd)?;
                    if !closed {
                        self.unclosed.insert(start);
                        self.pos = start;
                        return Ok(None);
                    }
                    return Ok(Some(Node::Link {
                        target,
                        text: Some(text),
                    }));
                }
                b'\n' | b'[' | b']' | b'{' | b'}' => break,
                _ => {}
            }
        }

        Ok(None)
    }

    fn parse_external_link(&mut self) -> MarkupResult<Option<Node>> {
        let start = self.pos;
        if self.unclosed.contains(&start) {
            return Ok(None);
        }
        let inner = &self.src[start + 1..];

        let lowered = inner.get(..8.min(inner.len())).unwrap_or("").to_ascii_lowercase();
        if !URL_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
            return Ok(None);
        }

        let url_len = inner
            .find(|c: char| c.is_whitespace() || matches!(c, ']' | '<' | '"' | '[' | '{'))
            .unwrap_or(inner.len());
        let url = inner[..url_len].to_string();
        let after_url = &inner[url_len..];

        if after_url.starts_with(']') {
            self.pos = start + 1 + url_len + 1;
            return Ok(Some(Node::ExternalLink { url, title: None }));
        }
        if !after_url.starts_with(' ') && !after_url.starts_with('\t') {
            return Ok(None);
        }

        let spaces = after_url.len() - after_url.trim_start_matches([' ', '\t']).len();
        self.pos = start + 1 + url_len + spaces;
        let (title, closed) = self.parse_until(&Terminator::ExtLinkEnd)?;
        if !closed {
            self.unclosed.insert(start);
            self.pos = start;
            return Ok(None);
        }

        let title = if title.is_empty() { None } else { Some(title) };
        Ok(Some(Node::ExternalLink { url, title }))
    }

    fn parse_free_url(&mut self) -> Option<Node> {
        if self.pos > 0 {
            let previous = self.src[..self.pos].chars().next_back();
            if previous.is_some_and(|c| c.is_alphanumeric()) {
                return None;
            }
        }

        let rest = self.rest();
        let scheme = FREE_URL_SCHEMES
            .iter()
            .find(|scheme| rest.starts_with(*scheme))?;

        let mut len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '<' | '>' | '"' | '{' | '}' | '|'))
            .unwrap_or(rest.len());

        let mut url = &rest[..len];
        loop {
            let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'']);
            let trimmed = if trimmed.ends_with(')') && !trimmed.contains('(') {
                &trimmed[..trimmed.len() - 1]
            } else {
                trimmed
            };
            if trimmed.len() == url.len() {
                break;
            }
            url = trimmed;
        }
        len = url.len();

        if len <= scheme.len() {
            return None;
        }

        self.pos += len;
        Some(Node::ExternalLink {
            url: url.to_string(),
            title: None,
        })
    }

    fn parse_entity(&mut self) -> Option<Node> {
        let rest = self.rest();
        let len = entity_len(rest)?;
        decode_entity(&rest[1..len - 1])?;
        self.pos += len;
        Some(Node::HtmlEntity(rest[..len].to_string()))
    }

    fn parse_macro(&mut self) -> Option<Node> {
        let len = balanced_len(self.rest(), "{{", "}}")?;
        let raw = self.rest()[..len].to_string();
        self.pos += len;
        Some(Node::Macro(raw))
    }

    fn parse_table(&mut self) -> Option<Node> {
        let len = balanced_len(self.rest(), "{|", "|}")?;
        let raw = self.rest()[..len].to_string();
        self.pos += len;
        Some(Node::Table(raw))
    }

    fn parse_tag(&mut self) -> MarkupResult<Option<Node>> {
        let start = self.pos;
        let rest = self.rest();

        let name_len = rest[1..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        if name_len == 0 || !rest.as_bytes()[1].is_ascii_alphabetic() {
            return Ok(None);
        }
        let name = rest[1..1 + name_len].to_ascii_lowercase();
        if !KNOWN_TAGS.contains(&name.as_str()) {
            return Ok(None);
        }

        let after_name = &rest[1 + name_len..];
        if !after_name.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            return Ok(None);
        }

        let Some(close) = find_tag_end(after_name) else {
            return Ok(None);
        };
        let raw_attributes = after_name[..close].trim_end();
        let self_closing = raw_attributes.ends_with('/');
        let attributes = parse_attributes(raw_attributes.trim_end_matches('/'));

        self.pos = start + 1 + name_len + close + 1;

        if self_closing || VOID_TAGS.contains(&name.as_str()) {
            return Ok(Some(Node::Tag {
                name,
                attributes,
                contents: None,
            }));
        }

        if name == "nowiki" || IGNORED_TAGS.contains(&name.as_str()) {
            let contents = self.take_raw_contents(&name).map(|raw| vec![Node::Text(raw)]);
            return Ok(Some(Node::Tag {
                name,
                attributes,
                contents,
            }));
        }

        let (contents, _) = self.parse_until(&Terminator::TagClose(name.clone()))?;
        Ok(Some(Node::Tag {
            name,
            attributes,
            contents: Some(contents),
        }))
    }

    /// Consume everything up to and including `</name>` without parsing it.
    fn take_raw_contents(&mut self, name: &str) -> Option<String> {
        let rest = self.rest();
        let mut search = 0;

        while let Some(found) = rest[search..].find("</") {
            let at = search + found;
            if let Some(len) = closing_tag_len(&rest[at..], name) {
                let raw = rest[..at].to_string();
                self.pos += at + len;
                return Some(raw);
            }
            search = at + 2;
        }

        None
    }
}

/// Length of a balanced `open … close` block at the start of `text`.
fn balanced_len(text: &str, open: &str, close: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with(open) {
            depth += 1;
            i += open.len();
        } else if rest.starts_with(close) {
            depth = depth.checked_sub(1)?;
            i += close.len();
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }

    None
}

/// Offset of the `>` ending a tag's attribute list, skipping quoted values.
fn find_tag_end(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, '<') | (None, '\n') => return None,
            _ => {}
        }
    }
    None
}

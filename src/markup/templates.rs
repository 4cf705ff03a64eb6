//! Macro (template) expansion
//!
//! The preprocessor hands every `{{…}}` block to a [`TemplateExpander`].
//! Unknown macros come back as `None` and are replaced by a single space;
//! `Some(String::new())` deletes the macro outright.

use crate::title::normalize_page_title;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Rewrites a named macro block into replacement markup.
///
/// Implementations must be pure: the same `(name, raw_markup)` always yields
/// the same output.
pub trait TemplateExpander: Send + Sync {
    /// `name` is the normalized macro name, `raw_markup` the whole block
    /// including its braces.
    fn expand(&self, name: &str, raw_markup: &str) -> Option<String>;
}

fn template_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{\{\s*(.*?)\s*(?:\||\}\})").expect("valid template name regex")
    })
}

/// Extract the normalized macro name from a `{{name|…}}` block.
pub fn template_name(raw_markup: &str) -> Option<String> {
    template_name_pattern()
        .captures(raw_markup)
        .map(|caps| normalize_page_title(&caps[1]))
}

/// Split the inside of a macro block on top-level `|` separators.
///
/// The first element is the macro name; nested `{{…}}` and `[[…]]` are kept
/// intact inside their parameter.
pub fn template_parameters(raw_markup: &str) -> Vec<String> {
    let inner = raw_markup.strip_prefix("{{").unwrap_or(raw_markup);
    let inner = inner.strip_suffix("}}").unwrap_or(inner);

    let bytes = inner.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let pair = &bytes[i..bytes.len().min(i + 2)];
        if pair == b"{{" || pair == b"[[" {
            depth += 1;
            i += 2;
            continue;
        }
        if (pair == b"}}" || pair == b"]]") && depth > 0 {
            depth -= 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'|' && depth == 0 {
            parts.push(inner[start..i].trim().to_string());
            start = i + 1;
        }
        i += 1;
    }
    parts.push(inner[start..].trim().to_string());

    parts
}

/// Positional parameters (those without `key=`), name excluded.
fn positional(params: &[String]) -> Vec<&str> {
    params
        .iter()
        .skip(1)
        .filter(|p| !p.contains('='))
        .map(String::as_str)
        .collect()
}

fn named<'a>(params: &'a [String], key: &str) -> Option<&'a str> {
    params.iter().skip(1).find_map(|p| {
        let (k, v) = p.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn anchor(id: &str) -> String {
    format!("<span id=\"{}\"></span>", id)
}

/// How one macro name is rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateRule {
    /// Fixed replacement text
    Literal { text: String },
    /// Every positional parameter becomes an invisible anchor
    Anchor,
    /// First parameter is shown, all parameters become anchors
    VisibleAnchor,
    /// The `name` / `1` / first positional parameter is shown
    FirstParameter,
    /// Removed without a trace
    Delete,
}

impl TemplateRule {
    fn apply(&self, raw_markup: &str) -> String {
        match self {
            TemplateRule::Literal { text } => text.clone(),
            TemplateRule::Delete => String::new(),
            TemplateRule::Anchor => {
                let params = template_parameters(raw_markup);
                positional(&params).into_iter().map(anchor).collect()
            }
            TemplateRule::VisibleAnchor => {
                let params = template_parameters(raw_markup);
                let values = positional(&params);
                let mut out: String = values.iter().copied().map(anchor).collect();
                if let Some(first) = values.first() {
                    out.push_str(first);
                }
                out
            }
            TemplateRule::FirstParameter => {
                let params = template_parameters(raw_markup);
                named(&params, "name")
                    .or_else(|| named(&params, "1"))
                    .or_else(|| positional(&params).first().copied())
                    .unwrap_or_default()
                    .to_string()
            }
        }
    }
}

/// Errors loading a rule table
#[derive(Debug, thiserror::Error)]
pub enum TemplateTableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Table-driven expander keyed by normalized macro name
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateExpander {
    rules: HashMap<String, TemplateRule>,
}

impl StaticTemplateExpander {
    /// An expander that knows no macros
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules for the macros that matter most to prose
    pub fn with_defaults() -> Self {
        let literal = |text: &str| TemplateRule::Literal {
            text: text.to_string(),
        };

        Self::new()
            .with_rule("!", literal("&#124;"))
            .with_rule("=", literal("&#61;"))
            .with_rule("Nbsp", literal("&nbsp;"))
            .with_rule("Snd", literal(" &ndash; "))
            .with_rule("Ndash", literal("&ndash;"))
            .with_rule("Mdash", literal("&mdash;"))
            .with_rule("As_of", literal("As of DATE"))
            .with_rule("Convert", literal("MEASUREMENT"))
            .with_rule("Cvt", literal("MEASUREMENT"))
            .with_rule("Anchor", TemplateRule::Anchor)
            .with_rule("Anchors", TemplateRule::Anchor)
            .with_rule("Visible_anchor", TemplateRule::VisibleAnchor)
            .with_rule("Vanchor", TemplateRule::VisibleAnchor)
            .with_rule("Flag", TemplateRule::FirstParameter)
            .with_rule("Flagcountry", TemplateRule::FirstParameter)
            .with_rule("Lang", TemplateRule::Delete)
            .with_rule("Clear", TemplateRule::Delete)
    }

    pub fn with_rule(mut self, name: &str, rule: TemplateRule) -> Self {
        self.rules.insert(normalize_page_title(name), rule);
        self
    }

    /// Built-in rules overlaid with a YAML map of `name: {kind: …}` entries.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateTableError> {
        let raw = std::fs::read_to_string(path)?;
        let table: HashMap<String, TemplateRule> = serde_yaml::from_str(&raw)?;

        let mut expander = Self::with_defaults();
        for (name, rule) in table {
            expander = expander.with_rule(&name, rule);
        }
        Ok(expander)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TemplateExpander for StaticTemplateExpander {
    fn expand(&self, name: &str, raw_markup: &str) -> Option<String> {
        self.rules.get(name).map(|rule| rule.apply(raw_markup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_normalized() {
        assert_eq!(template_name("{{ as of|2020}}").as_deref(), Some("As_of"));
        assert_eq!(template_name("{{!}}").as_deref(), Some("!"));
        assert_eq!(template_name("{{{1}}}").as_deref(), Some("{1"));
        assert_eq!(template_name("not a macro"), None);
    }

    #[test]
    fn parameters_respect_nesting() {
        let params = template_parameters("{{Flag|[[France|FR]]|size={{x|y}}}}");
        assert_eq!(params, vec!["Flag", "[[France|FR]]", "size={{x|y}}"]);
    }

    #[test]
    fn unknown_macro_is_none() {
        let expander = StaticTemplateExpander::with_defaults();
        assert_eq!(expander.expand("Infobox_planet", "{{Infobox planet}}"), None);
    }

    #[test]
    fn anchors_render_as_spans() {
        let expander = StaticTemplateExpander::with_defaults();
        assert_eq!(
            expander.expand("Anchor", "{{Anchor|Early life|Youth}}").as_deref(),
            Some("<span id=\"Early life\"></span><span id=\"Youth\"></span>")
        );
        assert_eq!(
            expander
                .expand("Visible_anchor", "{{Visible anchor|Orbit}}")
                .as_deref(),
            Some("<span id=\"Orbit\"></span>Orbit")
        );
    }

    #[test]
    fn first_parameter_prefers_named() {
        let expander = StaticTemplateExpander::with_defaults();
        assert_eq!(
            expander.expand("Flag", "{{flag|France|name=French Republic}}").as_deref(),
            Some("French Republic")
        );
        assert_eq!(expander.expand("Flag", "{{flag|France}}").as_deref(), Some("France"));
    }

    #[test]
    fn delete_yields_empty() {
        let expander = StaticTemplateExpander::new().with_rule("Sfn", TemplateRule::Delete);
        assert_eq!(expander.expand("Sfn", "{{sfn|Smith|2001}}").as_deref(), Some(""));
    }

    #[test]
    fn loads_yaml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.yaml");
        std::fs::write(
            &path,
            "Sfn:\n  kind: delete\nBirth date:\n  kind: literal\n  text: DATE\n",
        )
        .unwrap();

        let expander = StaticTemplateExpander::load(&path).unwrap();
        assert_eq!(expander.expand("Sfn", "{{sfn}}").as_deref(), Some(""));
        assert_eq!(expander.expand("Birth_date", "{{birth date|1}}").as_deref(), Some("DATE"));
        assert!(expander.expand("Anchor", "{{anchor|x}}").is_some());
    }
}

//! Minimal CSS-like selector matching.
//!
//! Supports compound selectors built from `tag` or `*`, `#id`, `.class`,
//! `[attr]` and `[attr=value]` (value optionally quoted), and comma
//! separated lists of those. Combinators are not supported; a selector that
//! uses one fails to parse.

use regex::Regex;
use std::sync::OnceLock;

use super::NodeInfo;
use crate::error::{Result, SweepError};
use crate::types::ElementRef;

/// Anything a selector can be matched against.
pub trait SelectorTarget {
    fn tag_name(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<&str>;
}

impl SelectorTarget for NodeInfo {
    fn tag_name(&self) -> &str {
        &self.tag
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attr(name)
    }
}

impl SelectorTarget for ElementRef {
    fn tag_name(&self) -> &str {
        &self.tag
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attr(name)
    }
}

fn compound_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"^([a-zA-Z][a-zA-Z0-9-]*|\*)?((?:#[\w-]+|\.[\w-]+|\[[\w-]+(?:=(?:"[^"]*"|'[^']*'|[^\]"'\s]*))?\])*)$"#,
        )
        .expect("static selector pattern")
    })
}

fn part_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"#([\w-]+)|\.([\w-]+)|\[([\w-]+)(?:=(?:"([^"]*)"|'([^']*)'|([^\]"'\s]*)))?\]"#)
            .expect("static selector part pattern")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

impl Compound {
    fn parse(text: &str) -> Option<Compound> {
        let caps = compound_pattern().captures(text)?;

        let mut compound = Compound {
            tag: caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|t| *t != "*")
                .map(|t| t.to_ascii_lowercase()),
            ..Compound::default()
        };

        let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        for part in part_pattern().captures_iter(rest) {
            if let Some(id) = part.get(1) {
                compound.id = Some(id.as_str().to_string());
            } else if let Some(class) = part.get(2) {
                compound.classes.push(class.as_str().to_string());
            } else if let Some(name) = part.get(3) {
                let value = part
                    .get(4)
                    .or_else(|| part.get(5))
                    .or_else(|| part.get(6))
                    .map(|v| v.as_str().to_string());
                compound.attrs.push(AttrMatch {
                    name: name.as_str().to_ascii_lowercase(),
                    value,
                });
            }
        }

        Some(compound)
    }

    fn matches<T: SelectorTarget + ?Sized>(&self, node: &T) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tag_name().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attribute("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes: Vec<&str> = node
                .attribute("class")
                .unwrap_or("")
                .split_whitespace()
                .collect();
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|a| match (&a.value, node.attribute(&a.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        })
    }
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Compound>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Selector> {
        let invalid = || SweepError::InvalidSelector(source.to_string());

        let alternatives = source
            .split(',')
            .map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                Compound::parse(part)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;

        if alternatives.is_empty() {
            return Err(invalid());
        }

        Ok(Selector {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches<T: SelectorTarget + ?Sized>(&self, node: &T) -> bool {
        self.alternatives.iter().any(|c| c.matches(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementHandle;
    use std::collections::BTreeMap;

    fn node(tag: &str, attrs: &[(&str, &str)]) -> NodeInfo {
        NodeInfo {
            handle: ElementHandle(1),
            tag: tag.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            text: String::new(),
            parent: None,
        }
    }

    #[test]
    fn test_tag_and_universal() {
        let button = node("button", &[]);
        assert!(Selector::parse("button").unwrap().matches(&button));
        assert!(Selector::parse("BUTTON").unwrap().matches(&button));
        assert!(Selector::parse("*").unwrap().matches(&button));
        assert!(!Selector::parse("a").unwrap().matches(&button));
    }

    #[test]
    fn test_id_class_and_attributes() {
        let el = node(
            "input",
            &[("id", "email"), ("class", "field wide"), ("type", "text")],
        );
        assert!(Selector::parse("#email").unwrap().matches(&el));
        assert!(Selector::parse("input.field.wide").unwrap().matches(&el));
        assert!(!Selector::parse(".narrow").unwrap().matches(&el));
        assert!(Selector::parse("[type]").unwrap().matches(&el));
        assert!(Selector::parse("input[type=text]").unwrap().matches(&el));
        assert!(Selector::parse(r#"input[type="text"]"#).unwrap().matches(&el));
        assert!(!Selector::parse("input[type=hidden]").unwrap().matches(&el));
        assert!(!Selector::parse("[alt]").unwrap().matches(&el));
    }

    #[test]
    fn test_selector_list() {
        let sel = Selector::parse("a[href], button, [role=button]").unwrap();
        assert!(sel.matches(&node("button", &[])));
        assert!(sel.matches(&node("div", &[("role", "button")])));
        assert!(sel.matches(&node("a", &[("href", "/")])));
        assert!(!sel.matches(&node("a", &[])));
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("div > p").is_err());
        assert!(Selector::parse("div p").is_err());
        assert!(Selector::parse("a,,b").is_err());
        assert!(Selector::parse("[unterminated").is_err());
    }
}

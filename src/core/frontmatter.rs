//! YAML frontmatter of imported markdown notes.

use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value;

lazy_static! {
    static ref FRONTMATTER_RE: Regex = Regex::new(r"(?s)^---\r?\n(.*?)\r?\n---\r?\n?").unwrap();
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
}

impl Frontmatter {
    /// Split `content` into its frontmatter and the remaining body.
    ///
    /// Content without a frontmatter block, or with one that is not valid
    /// YAML, is returned unchanged as the body.
    pub fn split(content: &str) -> (Option<Self>, &str) {
        let Some(caps) = FRONTMATTER_RE.captures(content) else {
            return (None, content);
        };
        let (Some(whole), Some(raw)) = (caps.get(0), caps.get(1)) else {
            return (None, content);
        };
        match serde_yaml::from_str::<Value>(raw.as_str()) {
            Ok(value) => (Some(Self::from_value(&value)), &content[whole.end()..]),
            Err(_) => (None, content),
        }
    }

    fn from_value(value: &Value) -> Self {
        let title = value
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        Self {
            title,
            tags: value.get("tags").map(extract_tags).unwrap_or_default(),
        }
    }
}

/// Tags as a YAML list or a comma-separated string.
fn extract_tags(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Sequence(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Value::String(s) => s.split(',').map(String::from).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|t| t.trim().trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

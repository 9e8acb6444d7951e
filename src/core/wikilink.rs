use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use super::note::NoteId;

lazy_static! {
    // [[title]]; the title never contains ']'
    static ref LINK_RE: Regex = Regex::new(r"\[\[([^\]]+?)\]\]").unwrap();
}

/// A `[[title]]` reference found in a note body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReference {
    pub title: String,
    /// Every note carrying this title; empty while unresolved
    pub resolved: Vec<NoteId>,
}

impl LinkReference {
    pub fn is_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }
}

/// All references in body order, duplicates included.
pub fn extract_links(content: &str) -> Vec<LinkReference> {
    LINK_RE
        .captures_iter(content)
        .map(|c| LinkReference {
            title: c[1].to_string(),
            resolved: Vec::new(),
        })
        .collect()
}

/// Distinct titles in first-seen order.
pub fn unique_titles(links: &[LinkReference]) -> Vec<String> {
    let mut seen = HashSet::new();
    links
        .iter()
        .filter(|l| seen.insert(l.title.as_str()))
        .map(|l| l.title.clone())
        .collect()
}

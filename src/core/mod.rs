//! Core types: notes, identities, link references, configuration, errors.

pub mod config;
pub mod error;
pub mod frontmatter;
pub mod note;
pub mod wikilink;

//! Bidirectional note link graph.

pub mod links;

pub use links::{GraphEdge, GraphNode, GraphResponse, LinkGraphMaintainer, LinkUpdate};

//! Inheritance-graph bookkeeping using `petgraph`.
//!
//! The loader records every include as a node while recursing; a profile
//! that is reached a second time — whether through a diamond or a cycle —
//! is rejected before it is loaded again.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;

use crate::error::{ProfileError, Result};

/// The include graph of one profile load.
#[derive(Debug, Default)]
pub(crate) struct InheritanceGraph {
    graph: petgraph::Graph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl InheritanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile under its identity and links it to the
    /// including profile.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::ConflictingProfiles`] if the identity is
    /// already present, which means the profile is reachable through
    /// more than one path.
    pub fn add_profile(
        &mut self,
        identity: &str,
        display: &str,
        parent: Option<NodeIndex>,
    ) -> Result<NodeIndex> {
        if self.nodes.contains_key(identity) {
            return Err(ProfileError::ConflictingProfiles(format!(
                "profile {display} is included through more than one path \
                 (diamond inheritance is not supported)"
            )));
        }
        let node = self.graph.add_node(identity.to_owned());
        let _ = self.nodes.insert(identity.to_owned(), node);
        if let Some(parent) = parent {
            let _ = self.graph.add_edge(parent, node, ());
        }
        tracing::debug!(identity, "registered profile include");
        Ok(node)
    }
}

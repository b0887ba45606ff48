use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    diagnostics::Diagnostic,
    error::{PowerFlowError, Result},
};

/// Role of a node in the power flow equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Reference node, voltage magnitude and angle fixed.
    Slack,
    /// Active power and voltage magnitude fixed.
    PV,
    /// Active and reactive power fixed.
    PQ,
    /// Reserved marker. Treated as [`NodeType::PQ`] by the classification.
    PQIntermediate,
}

impl NodeType {
    pub const ALL: [NodeType; 4] = [
        NodeType::Slack,
        NodeType::PV,
        NodeType::PQ,
        NodeType::PQIntermediate,
    ];
}

/// Validated node types with cached per-type counts and the slack position.
///
/// The type vector held here is the *effective* one: a single slack node,
/// further slack candidates demoted to [`NodeType::PV`] and reserved markers
/// mapped to [`NodeType::PQ`]. Counts are always derived from that vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeClassification {
    types: Vec<NodeType>,
    counts: HashMap<NodeType, usize>,
    slack: usize,
}

impl NodeClassification {
    /// Classifies `node_types` for a network with `node_count` nodes.
    ///
    /// Returns the classification together with the non-fatal findings.
    pub fn classify(node_types: &[NodeType], node_count: usize) -> Result<(Self, Vec<Diagnostic>)> {
        if node_types.len() != node_count {
            return Err(PowerFlowError::config(format!(
                "The vector of node types ({}) does not match the total amount of nodes ({node_count}).",
                node_types.len()
            )));
        }
        let slacks: Vec<usize> = node_types
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == NodeType::Slack)
            .map(|(i, _)| i)
            .collect();
        let Some((&slack, ignored)) = slacks.split_first() else {
            return Err(PowerFlowError::config("Did not find any slack node."));
        };

        let mut diagnostics = Vec::new();
        if !ignored.is_empty() {
            warn!(
                slack,
                ignored = ?ignored,
                "Found more than one slack node. Take only the first one."
            );
            diagnostics.push(Diagnostic::MultipleSlackNodes {
                chosen: slack,
                ignored: ignored.to_vec(),
            });
        }

        let types: Vec<NodeType> = node_types
            .iter()
            .enumerate()
            .map(|(i, t)| match t {
                NodeType::Slack if i != slack => NodeType::PV,
                NodeType::PQIntermediate => {
                    debug!(node = i, "Reserved node type handled as PQ node.");
                    NodeType::PQ
                }
                other => *other,
            })
            .collect();
        let counts = count_types(&types);
        let classification = Self {
            types,
            counts,
            slack,
        };
        classification.check_invariants()?;
        Ok((classification, diagnostics))
    }

    fn check_invariants(&self) -> Result<()> {
        let total: usize = self.counts.values().sum();
        if total != self.types.len() || self.count(NodeType::Slack) != 1 {
            return Err(PowerFlowError::config(format!(
                "Inconsistent node type counts {:?} for {} nodes.",
                self.counts,
                self.types.len()
            )));
        }
        Ok(())
    }

    /// Effective type of every node.
    pub fn types(&self) -> &[NodeType] {
        &self.types
    }

    pub fn node_type(&self, node: usize) -> NodeType {
        self.types[node]
    }

    /// Number of nodes of the given type.
    pub fn count(&self, node_type: NodeType) -> usize {
        self.counts.get(&node_type).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &HashMap<NodeType, usize> {
        &self.counts
    }

    pub fn slack(&self) -> usize {
        self.slack
    }

    pub fn node_count(&self) -> usize {
        self.types.len()
    }

    pub fn npv(&self) -> usize {
        self.count(NodeType::PV)
    }

    pub fn npq(&self) -> usize {
        self.count(NodeType::PQ)
    }

    /// Indices of all nodes except the slack, in node order.
    pub fn non_slack(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices(|t| t != NodeType::Slack)
    }

    pub fn pq_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices(|t| t == NodeType::PQ)
    }

    pub fn pv_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices(|t| t == NodeType::PV)
    }

    fn indices(&self, f: fn(NodeType) -> bool) -> impl Iterator<Item = usize> + '_ {
        self.types
            .iter()
            .enumerate()
            .filter_map(move |(i, t)| f(*t).then_some(i))
    }
}

fn count_types(types: &[NodeType]) -> HashMap<NodeType, usize> {
    NodeType::ALL
        .iter()
        .map(|k| (*k, types.iter().filter(|t| *t == k).count()))
        .collect()
}

use std::ops::{Index, IndexMut};
use crate::grid::{ArcId, NodeId, VERY_FAR};



/// Node membership tags. Positive values are tree groups assigned while pivoting.
pub mod group {
    pub const UNTOUCHED: i64 = 0;
    pub const ON_TREE: i64 = -1;
    pub const IN_BUCKET: i64 = -2;
    pub const PRUNED: i64 = -3;
    pub const MASKED: i64 = -4;
    pub const BOUNDARY_PTR: i64 = -5;
    pub const BOUNDARY_CANDIDATE: i64 = -6;
    pub const NOT_IN_BUCKET: i64 = -7;
}

pub const BOUNDARY_LEVEL: i64 = i64::MAX;



/// Arc to a node's tree parent; `dir` moves flow from the parent towards the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredArc {
    pub arc: ArcId,
    pub dir: i64
}

impl PredArc {
    pub const NONE: PredArc = PredArc { arc: ArcId(usize::MAX), dir: 0 };

    pub fn reversed(self) -> Self {
        Self { arc: self.arc, dir: -self.dir }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub group: i64,
    pub level: i64,
    pub incost: i64,
    pub outcost: i64,
    pub pred: Option<NodeId>,
    pub pred_arc: PredArc,
    /// Pre-order thread while on the tree, bucket or scan list otherwise
    pub next: NodeId,
    pub prev: NodeId
}

impl Default for Node {
    fn default() -> Self {
        Self {
            group: group::UNTOUCHED,
            level: 0,
            incost: VERY_FAR,
            outcost: VERY_FAR,
            pred: None,
            pred_arc: PredArc::NONE,
            next: NodeId::NONE,
            prev: NodeId::NONE
        }
    }
}

/// Arena of nodes addressed by `NodeId`.
#[derive(Clone, Debug)]
pub struct NodeArena {
    nodes: Vec<Node>
}

impl NodeArena {
    pub fn new(n: usize) -> Self {
        Self { nodes: vec![Node::default(); n] }
    }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    /// Tree parent, or the node itself for a root.
    pub fn parent(&self, node: NodeId) -> NodeId {
        self[node].pred.unwrap_or(node)
    }

    pub fn group(&self, node: NodeId) -> i64 { self[node].group }

    pub fn level(&self, node: NodeId) -> i64 { self[node].level }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, node: NodeId) -> &Node {
        &self.nodes[node.0]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, node: NodeId) -> &mut Node {
        &mut self.nodes[node.0]
    }
}

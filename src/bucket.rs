use crate::grid::{Grid, NodeId};
use crate::node::{group, NodeArena};



/// Bucket priority queue keyed by integer cost. Each bucket is a doubly linked list
/// threaded through the node arena; costs outside `[minind, maxind]` share the two
/// end buckets, which are searched linearly.
#[derive(Clone, Debug)]
pub struct Buckets {
    minind: i64,
    maxind: i64,
    pub curr: i64,
    heads: Vec<NodeId>,
    /// Nodes currently queued
    nlive: usize
}

impl Buckets {
    pub fn new(minind: i64, maxind: i64) -> Self {
        let size = (maxind-minind+1).max(1) as usize;
        Self { minind, maxind, curr: minind, heads: vec![NodeId::NONE; size], nlive: 0 }
    }

    /// Buckets for the tree solver, spanning costs of either sign.
    pub fn for_tree(grid: Grid, max_cost: i64) -> Self {
        let span = (max_cost+1)*(grid.nrow+grid.ncol) as i64;
        Self::new(-span, span)
    }

    /// Buckets for shortest-path distances, which are never negative.
    pub fn for_distances(grid: Grid, max_cost: i64) -> Self {
        Self::new(0, (max_cost+1)*(grid.nrow+grid.ncol+1) as i64)
    }

    pub fn minind(&self) -> i64 { self.minind }

    pub fn maxind(&self) -> i64 { self.maxind }

    pub fn clear(&mut self) {
        self.heads.fill(NodeId::NONE);
        self.curr = self.minind;
        self.nlive = 0;
    }

    pub fn len(&self) -> usize { self.nlive }

    pub fn is_empty(&self) -> bool {
        self.nlive == 0
    }

    pub fn index_for(&self, cost: i64) -> i64 {
        cost.clamp(self.minind, self.maxind)
    }

    fn slot(&self, ind: i64) -> usize {
        (ind-self.minind) as usize
    }

    pub fn head(&self, ind: i64) -> NodeId {
        self.heads[self.slot(ind)]
    }

    pub fn insert(&mut self, nodes: &mut NodeArena, node: NodeId, ind: i64) {
        let slot = self.slot(ind);
        let head = self.heads[slot];

        nodes[node].next = head;
        nodes[node].prev = NodeId::NONE;

        if !head.is_none() {
            nodes[head].prev = node;
        }

        self.heads[slot] = node;
        self.nlive += 1;
    }

    /// Insert at the bucket for `cost`, moving the scan position back if needed.
    pub fn insert_by_cost(&mut self, nodes: &mut NodeArena, node: NodeId, cost: i64) {
        let ind = self.index_for(cost);

        self.insert(nodes, node, ind);

        if ind < self.curr {
            self.curr = ind;
        }
    }

    pub fn remove(&mut self, nodes: &mut NodeArena, node: NodeId, ind: i64) {
        let (prev, next) = (nodes[node].prev, nodes[node].next);

        if prev.is_none() {
            let slot = self.slot(ind);
            self.heads[slot] = next;
        } else {
            nodes[prev].next = next;
        }

        if !next.is_none() {
            nodes[next].prev = prev;
        }

        self.nlive -= 1;
    }

    pub fn remove_by_cost(&mut self, nodes: &mut NodeArena, node: NodeId, cost: i64) {
        let ind = self.index_for(cost);
        self.remove(nodes, node, ind);
    }

    fn advance(&mut self) -> NodeId {
        while self.curr < self.maxind && self.head(self.curr).is_none() {
            self.curr += 1;
        }

        self.head(self.curr)
    }

    /// Remove and return the node with the smallest outcost.
    pub fn pop_min_outcost(&mut self, nodes: &mut NodeArena) -> Option<NodeId> {
        let head = self.advance();

        if head.is_none() {
            return None;
        }

        let best = if self.curr == self.minind || self.curr == self.maxind {
            let mut best = head;
            let mut node = nodes[head].next;

            while !node.is_none() {
                if nodes[node].outcost < nodes[best].outcost {
                    best = node;
                }

                node = nodes[node].next;
            }

            best
        } else {
            head
        };

        self.remove(nodes, best, self.curr);

        Some(best)
    }

    /// Remove the head of the lowest non-empty bucket and mark it on the tree.
    pub fn pop_closest(&mut self, nodes: &mut NodeArena) -> Option<NodeId> {
        let head = self.advance();

        if head.is_none() {
            return None;
        }

        self.remove(nodes, head, self.curr);
        nodes[head].group = group::ON_TREE;

        Some(head)
    }
}

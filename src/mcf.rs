use std::cmp::Reverse;
use std::collections::BinaryHeap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use crate::error::{Result, UnwrapError};



#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McfStatus {
    Optimal,
    /// Some supply could not reach any demand
    Infeasible,
    /// Supplies do not sum to zero
    Unbalanced,
    /// An arc has negative cost
    BadCostRange
}

#[derive(Clone, Copy, Debug)]
struct Residual {
    cap: i64,
    cost: i64
}

/// Min-cost flow over a petgraph network, solved by successive shortest paths with
/// node potentials. Every arc is stored as a forward/reverse residual edge pair.
#[derive(Clone, Debug, Default)]
pub struct MinCostFlow {
    graph: DiGraph<i64, Residual>,
    capacities: Vec<i64>
}

impl MinCostFlow {
    /// Fail early if the network would not fit the graph's 32-bit indices.
    pub fn check_capacity(nodes: usize, arcs: usize) -> Result<()> {
        let limit = u32::MAX as usize;

        if nodes >= limit || arcs >= limit/2 {
            return Err(UnwrapError::McfIndexOverflow { nodes, arcs });
        }

        Ok(())
    }

    pub fn with_capacity(nodes: usize, arcs: usize) -> Result<Self> {
        Self::check_capacity(nodes, arcs)?;

        Ok(Self {
            graph: DiGraph::with_capacity(nodes, 2*arcs),
            capacities: Vec::with_capacity(arcs)
        })
    }

    pub fn add_node(&mut self, supply: i64) -> usize {
        self.graph.add_node(supply).index()
    }

    pub fn set_supply(&mut self, node: usize, supply: i64) {
        self.graph[NodeIndex::new(node)] = supply;
    }

    pub fn n_nodes(&self) -> usize { self.graph.node_count() }

    pub fn n_arcs(&self) -> usize { self.capacities.len() }

    /// Add an arc from `tail` to `head`, returning its index.
    pub fn add_arc(&mut self, tail: usize, head: usize, cap: i64, cost: i64) -> usize {
        let (t, h) = (NodeIndex::new(tail), NodeIndex::new(head));

        self.graph.add_edge(t, h, Residual { cap, cost });
        self.graph.add_edge(h, t, Residual { cap: 0, cost: -cost });
        self.capacities.push(cap);

        self.capacities.len()-1
    }

    pub fn flow(&self, arc: usize) -> i64 {
        self.graph[EdgeIndex::new(2*arc+1)].cap
    }

    pub fn total_cost(&self) -> i64 {
        (0..self.n_arcs())
            .map(|a| self.flow(a)*self.graph[EdgeIndex::new(2*a)].cost)
            .sum()
    }

    pub fn solve(&mut self) -> McfStatus {
        let n = self.graph.node_count();

        if self.graph.node_weights().sum::<i64>() != 0 {
            return McfStatus::Unbalanced;
        }

        if (0..self.n_arcs()).any(|a| self.graph[EdgeIndex::new(2*a)].cost < 0) {
            return McfStatus::BadCostRange;
        }

        let mut excess: Vec<i64> = self.graph.node_weights().copied().collect();
        let mut potential = vec![0i64; n];
        let mut dist = vec![i64::MAX; n];
        let mut pred: Vec<Option<EdgeIndex>> = vec![None; n];
        let mut done = vec![false; n];
        let mut heap = BinaryHeap::new();

        loop {
            if excess.iter().all(|&e| e <= 0) {
                return McfStatus::Optimal;
            }

            dist.fill(i64::MAX);
            pred.fill(None);
            done.fill(false);
            heap.clear();

            for (v, &e) in excess.iter().enumerate() {
                if e > 0 {
                    dist[v] = 0;
                    heap.push(Reverse((0, v)));
                }
            }

            let mut sink = None;

            while let Some(Reverse((d, u))) = heap.pop() {
                if done[u] {
                    continue;
                }

                done[u] = true;

                if excess[u] < 0 {
                    sink = Some(u);
                    break;
                }

                for e in self.graph.edges(NodeIndex::new(u)) {
                    let r = e.weight();

                    if r.cap <= 0 {
                        continue;
                    }

                    let v = e.target().index();
                    let nd = d+r.cost+potential[u]-potential[v];

                    if nd < dist[v] {
                        dist[v] = nd;
                        pred[v] = Some(e.id());
                        heap.push(Reverse((nd, v)));
                    }
                }
            }

            let Some(t) = sink else { return McfStatus::Infeasible };
            let dt = dist[t];

            for v in 0..n {
                potential[v] += dist[v].min(dt);
            }

            let mut delta = -excess[t];
            let mut v = t;

            while let Some(e) = pred[v] {
                delta = delta.min(self.graph[e].cap);
                v = self.graph.edge_endpoints(e).map_or(v, |(s, _)| s.index());
            }

            delta = delta.min(excess[v]);

            let s = v;
            let mut v = t;

            while let Some(e) = pred[v] {
                let rev = EdgeIndex::new(e.index()^1);

                self.graph[e].cap -= delta;
                self.graph[rev].cap += delta;
                v = self.graph.edge_endpoints(e).map_or(v, |(s, _)| s.index());
            }

            excess[s] -= delta;
            excess[t] += delta;
        }
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_supply_over_cheapest_path() {
        let mut mcf = MinCostFlow::with_capacity(4, 4).unwrap();
        let nodes: Vec<_> = [2, 0, 0, -2].iter().map(|&s| mcf.add_node(s)).collect();
        let cheap1 = mcf.add_arc(nodes[0], nodes[1], 1, 1);
        let cheap2 = mcf.add_arc(nodes[1], nodes[3], 5, 1);
        let dear1 = mcf.add_arc(nodes[0], nodes[2], 5, 3);
        let dear2 = mcf.add_arc(nodes[2], nodes[3], 5, 3);

        assert_eq!(mcf.solve(), McfStatus::Optimal);
        assert_eq!(mcf.flow(cheap1), 1);
        assert_eq!(mcf.flow(cheap2), 1);
        assert_eq!(mcf.flow(dear1), 1);
        assert_eq!(mcf.flow(dear2), 1);
        assert_eq!(mcf.total_cost(), 2+6);
    }

    #[test]
    fn reroutes_through_reverse_edges() {
        // Greedy first path 0-1-3 must be partly undone to serve node 2
        let mut mcf = MinCostFlow::with_capacity(4, 4).unwrap();
        let n: Vec<_> = [1, 1, 0, 0].iter().map(|&s| mcf.add_node(s)).collect();
        mcf.set_supply(n[2], -1);
        mcf.set_supply(n[3], -1);
        mcf.add_arc(n[0], n[2], 1, 1);
        mcf.add_arc(n[0], n[3], 1, 10);
        mcf.add_arc(n[1], n[2], 1, 1);
        mcf.add_arc(n[1], n[3], 1, 2);

        assert_eq!(mcf.solve(), McfStatus::Optimal);
        assert_eq!(mcf.total_cost(), 3);
    }

    #[test]
    fn detects_unbalanced_and_infeasible() {
        let mut mcf = MinCostFlow::with_capacity(2, 1).unwrap();
        let a = mcf.add_node(1);
        let b = mcf.add_node(0);
        mcf.add_arc(a, b, 1, 1);

        assert_eq!(mcf.solve(), McfStatus::Unbalanced);

        let mut mcf = MinCostFlow::with_capacity(2, 1).unwrap();
        let a = mcf.add_node(2);
        let b = mcf.add_node(-2);
        mcf.add_arc(a, b, 1, 1);

        assert_eq!(mcf.solve(), McfStatus::Infeasible);
    }

    #[test]
    fn index_limit() {
        assert!(MinCostFlow::check_capacity(10, 10).is_ok());
        assert!(matches!(
            MinCostFlow::check_capacity(u32::MAX as usize, 10),
            Err(UnwrapError::McfIndexOverflow { .. })
        ));
    }
}

use std::sync::atomic::Ordering;
use ndarray::prelude::*;
use crate::bucket::Buckets;
use crate::config::Params;
use crate::cost::{Costs, IncrCosts};
use crate::error::{firewall, Result, UnwrapError};
use crate::grid::{integrate_phase, ArcId, Flows, Grid, MaskView, Neighbor, NodeId, VERY_FAR};
use crate::interrupt::Hooks;
use crate::node::{group, NodeArena, PredArc};
use crate::topology::{GridTopology, Topology};



pub(super) const INIT_ARR_SIZE: usize = 500;



/// Deepest common ancestor of an arc's endpoints, or the arc's relation to the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Apex {
    NonTree,
    Tree,
    At(NodeId)
}

/// Arc with a negative reduced cost waiting to enter the tree. `arcdir` has
/// magnitude 2 for augmenting cycles until the candidates are sorted.
#[derive(Clone, Copy, Debug)]
pub(super) struct Candidate {
    pub violation: i64,
    pub from: NodeId,
    pub to: NodeId,
    pub arc: ArcId,
    pub arcdir: i64
}

/// Rim of a masked region collapsed into the virtual boundary node.
#[derive(Clone, Debug, Default)]
pub(super) struct Boundary {
    pub neighbors: Vec<Neighbor>,
    pub list: Vec<NodeId>
}

impl Boundary {
    pub fn clear(&mut self) {
        self.neighbors.clear();
        self.list.clear();
    }
}



/// Mutable solver state for one tile: node arena, tree bookkeeping and flows.
pub(crate) struct Network<'a> {
    pub(super) grid: Grid,
    pub(super) topo: GridTopology,
    pub(super) mask: MaskView<'a>,
    pub(super) wrapped: ArrayView2<'a, f32>,
    pub(super) costs: &'a Costs,
    pub(super) params: &'a Params,
    pub(super) nodes: NodeArena,
    pub(super) boundary: Boundary,
    pub(super) apexes: Vec<Apex>,
    pub(super) is_candidate: Vec<bool>,
    pub(super) incr: IncrCosts,
    pub(super) bkts: Buckets,
    pub(super) bag: Vec<Candidate>,
    pub(super) list: Vec<Candidate>,
    pub flows: Flows
}

impl<'a> Network<'a> {
    pub fn new(
        wrapped: ArrayView2<'a, f32>,
        mag: ArrayView2<'a, f32>,
        costs: &'a Costs,
        params: &'a Params,
        flows: Flows
    ) -> Result<Self> {
        let grid = costs.grid();

        for (name, found) in [("wrapped", wrapped.dim()), ("magnitude", mag.dim())] {
            if found != grid.dim() {
                return Err(UnwrapError::Shape { name, found, expected: grid.dim() });
            }
        }

        if flows.grid() != grid {
            return Err(UnwrapError::Shape {
                name: "flows",
                found: flows.grid().dim(),
                expected: grid.dim()
            });
        }

        Ok(Self {
            grid,
            topo: GridTopology::new(grid),
            mask: MaskView::new(grid, mag),
            wrapped,
            costs,
            params,
            nodes: NodeArena::new(grid.n_nodes()),
            boundary: Boundary::default(),
            apexes: vec![Apex::NonTree; grid.n_arcs()],
            is_candidate: vec![false; grid.n_arcs()],
            incr: IncrCosts::new(grid.n_arcs()),
            bkts: Buckets::for_tree(grid, params.max_cost),
            bag: Vec::with_capacity(INIT_ARR_SIZE),
            list: Vec::with_capacity(INIT_ARR_SIZE),
            flows
        })
    }

    /// Grid nodes followed by ground; the boundary node is handled separately.
    pub(super) fn real_nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..=self.grid.n_grid_nodes()).map(NodeId)
    }

    pub(super) fn degree(&self, node: NodeId) -> usize {
        if node == self.grid.boundary() {
            self.boundary.neighbors.len()
        } else {
            self.topo.degree(node)
        }
    }

    /// Neighbour lookup that sees rim nodes as the collapsed boundary node.
    pub(super) fn neighbor(&self, node: NodeId, k: usize) -> Option<Neighbor> {
        if node == self.grid.boundary() {
            return self.boundary.neighbors.get(k).copied();
        }

        let mut nb = self.topo.neighbor(node, k)?;

        if self.nodes[nb.node].group == group::BOUNDARY_PTR {
            nb.node = self.grid.boundary();
        }

        Some(nb)
    }

    /// Neighbour lookup over the plain grid.
    pub(super) fn raw_neighbor(&self, node: NodeId, k: usize) -> Option<Neighbor> {
        self.topo.neighbor(node, k)
    }

    pub(super) fn mask_status(&self, node: NodeId) -> i64 {
        let masked = match self.grid.node_rc(node) {
            Some((r, c)) => self.mask.is_masked_node(r, c),
            None => node == self.grid.ground() && self.mask.is_masked_ground()
        };

        if masked { group::MASKED } else { group::UNTOUCHED }
    }

    /// Exclude nodes surrounded by masked pixels from the optimization.
    pub fn mask_nodes(&mut self) {
        for node in self.real_nodes().collect::<Vec<_>>() {
            self.nodes[node].group = self.mask_status(node);
        }
    }

    pub(super) fn reset_boundary_node(&mut self) {
        let b = self.grid.boundary();
        let node = &mut self.nodes[b];

        node.group = group::UNTOUCHED;
        node.level = 0;
        node.incost = VERY_FAR;
        node.outcost = VERY_FAR;
        node.pred = None;
        node.pred_arc = PredArc::NONE;
        node.next = NodeId::NONE;
        node.prev = NodeId::NONE;
        self.boundary.clear();
    }

    /// Reset tree state before a new flow increment; returns the number of live nodes.
    pub fn setup_tree_network(&mut self) -> usize {
        let mut nnodes = 0;

        for node in self.real_nodes().collect::<Vec<_>>() {
            let n = &mut self.nodes[node];

            if n.group != group::MASKED {
                n.group = group::UNTOUCHED;
                nnodes += 1;
            }

            n.incost = VERY_FAR;
            n.outcost = VERY_FAR;
            n.pred = None;
            n.pred_arc = PredArc::NONE;
        }

        self.reset_boundary_node();
        self.apexes.fill(Apex::NonTree);
        self.is_candidate.fill(false);
        self.bag.clear();
        self.list.clear();

        nnodes
    }

    /// Flood fill the region reachable from `start` over region arcs.
    ///
    /// With `setting == ON_TREE` the region is left marked on the tree, as source
    /// selection needs. Otherwise nodes just outside the region are set to `MASKED`
    /// or back to their mask status (for `UNTOUCHED`), and the region is reset.
    pub(super) fn scan_region(&mut self, start: NodeId, setting: i64) -> usize {
        let mut region = vec![start];
        let mut i = 0;

        self.nodes[start].group = group::IN_BUCKET;

        while i < region.len() {
            let node1 = region[i];

            for k in 0..self.topo.degree(node1) {
                let Some(nb) = self.raw_neighbor(node1, k) else { continue };

                if self.nodes[nb.node].group == group::BOUNDARY_PTR {
                    self.nodes[nb.node].group = group::UNTOUCHED;
                }

                if self.mask.is_region_arc(nb.arc) {
                    let g = self.nodes[nb.node].group;

                    if g != group::ON_TREE && g != group::IN_BUCKET {
                        self.nodes[nb.node].group = group::IN_BUCKET;
                        region.push(nb.node);
                    }
                }
            }

            self.nodes[node1].group = group::ON_TREE;

            if setting == group::ON_TREE {
                self.nodes[node1].level = 0;
            }

            i += 1;
        }

        if setting != group::ON_TREE {
            for &node1 in &region {
                for k in 0..self.topo.degree(node1) {
                    let Some(nb) = self.raw_neighbor(node1, k) else { continue };

                    if self.nodes[nb.node].group != group::ON_TREE {
                        self.nodes[nb.node].group = if setting == group::MASKED {
                            group::MASKED
                        } else {
                            self.mask_status(nb.node)
                        };
                    }
                }
            }

            for &node1 in &region {
                self.nodes[node1].group = group::UNTOUCHED;
            }
        }

        region.len()
    }

    /// One source per connected set of unmasked nodes, ground first, with the
    /// number of nodes in each set.
    pub fn select_sources(&mut self) -> Result<Vec<(NodeId, usize)>> {
        let live = |g: i64| g != group::MASKED && g != group::BOUNDARY_PTR;
        let starts: Vec<NodeId> = std::iter::once(self.grid.ground())
            .chain((0..self.grid.n_grid_nodes()).map(NodeId))
            .collect();

        for &node in &starts {
            if live(self.nodes[node].group) {
                self.nodes[node].group = group::UNTOUCHED;
            }
        }

        let mut sources = Vec::new();

        for &start in &starts {
            let g = self.nodes[start].group;

            if g == group::MASKED || g == group::ON_TREE {
                continue;
            }

            let nconnected = self.scan_region(start, group::ON_TREE);

            if nconnected as i64 > self.params.nconn_node_min {
                sources.push((start, nconnected));
            }
        }

        log::info!("Found {} valid set(s) of connected nodes", sources.len());

        for &node in &starts {
            let g = self.nodes[node].group;

            if matches!(g, group::IN_BUCKET | group::NOT_IN_BUCKET | group::BOUNDARY_CANDIDATE | group::PRUNED) {
                return Err(firewall(format!(
                    "Node {:?} left in group {} after source selection", self.grid.node_rc(node), g
                )));
            }

            if live(g) {
                self.nodes[node].group = group::UNTOUCHED;
            }
        }

        Ok(sources)
    }

    /// Recompute the incremental costs of one arc after its flow changed.
    pub(super) fn recalc(&mut self, arc: ArcId, nflow: i64) {
        let flow = self.flows.get(arc);
        self.incr.recalc(self.costs, arc, flow, nflow);
    }

    /// Dump the current solution if asked to, then stop if asked to. A cancelled
    /// solve stops without dumping.
    pub(super) fn check_interrupt(&self, hooks: &mut Hooks) -> Result<()> {
        if hooks.cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
            return Err(UnwrapError::Interrupted);
        }

        let Some(interrupt) = hooks.interrupt else { return Ok(()) };

        if interrupt.take_dump() {
            log::warn!("Dumping current solution");

            let mut phase = integrate_phase(self.wrapped, &self.flows);

            if let Some(est) = hooks.estimate {
                phase += &est;
            }

            hooks.observer.interrupted(phase.view());

            if !interrupt.stop_requested() {
                log::warn!("Solver continuing");
            }
        }

        if interrupt.stop_requested() {
            return Err(UnwrapError::Interrupted);
        }

        Ok(())
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostTag;

    fn network<'a>(
        wrapped: &'a Array2<f32>,
        mag: &'a Array2<f32>,
        costs: &'a Costs,
        params: &'a Params
    ) -> Network<'a> {
        Network::new(wrapped.view(), mag.view(), costs, params, Flows::zeros(costs.grid())).unwrap()
    }

    #[test]
    fn masked_strip_splits_regions() {
        // A masked column and masked rim leave two separate islands
        let mut mag = Array2::<f32>::ones((8, 9));
        mag.row_mut(0).fill(0.);
        mag.row_mut(7).fill(0.);
        mag.column_mut(0).fill(0.);
        mag.column_mut(8).fill(0.);
        mag.column_mut(4).fill(0.);

        let wrapped = Array2::<f32>::zeros((8, 9));
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = network(&wrapped, &mag, &costs, &params);

        net.mask_nodes();

        assert_eq!(net.nodes[net.grid.ground()].group, group::MASKED);

        let sources = net.select_sources().unwrap();

        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|&(s, _)| s != net.grid.ground()));
        assert!(net.real_nodes().all(|n| net.nodes[n].group == group::UNTOUCHED || net.nodes[n].group == group::MASKED));
    }

    #[test]
    fn unmasked_grid_is_one_region_from_ground() {
        let mag = Array2::<f32>::ones((5, 6));
        let wrapped = Array2::<f32>::zeros((5, 6));
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = network(&wrapped, &mag, &costs, &params);

        net.mask_nodes();

        let sources = net.select_sources().unwrap();

        assert_eq!(sources, vec![(net.grid.ground(), 4*5+1)]);
    }

    #[test]
    fn boundary_pointers_redirect() {
        let mag = Array2::<f32>::ones((4, 4));
        let wrapped = Array2::<f32>::zeros((4, 4));
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = network(&wrapped, &mag, &costs, &params);
        let g = net.grid;

        net.nodes[g.node(1, 1)].group = group::BOUNDARY_PTR;

        let nb = net.neighbor(g.node(1, 0), 0).unwrap();
        let raw = net.raw_neighbor(g.node(1, 0), 0).unwrap();

        assert_eq!(nb.node, g.boundary());
        assert_eq!(raw.node, g.node(1, 1));
        assert_eq!(nb.arc, raw.arc);
    }
}

use ndarray::prelude::*;
use crate::bucket::Buckets;
use crate::config::Params;
use crate::cost::Costs;
use crate::error::{firewall, Result, UnwrapError};
use crate::grid::{cycle_residue, ArcId, Flows, Grid, NodeId, LARGE_SHORT, MAX_RES, MIN_RES, VERY_FAR};
use crate::node::{group, NodeArena, PredArc};
use crate::topology::{GridTopology, Topology};



const CLIP_FACTOR: f64 = 0.6666666667;
const INIT_MAX_COST_INCR: i64 = 200;

/// Arc marks while walking the residue tree: unused, on tree, descended, finished.
const ARC_FREE: i8 = 0;
const ARC_TREE: i8 = -1;
const ARC_DOWN: i8 = -2;
const ARC_DONE: i8 = -3;



struct MstState<'a> {
    grid: Grid,
    topo: GridTopology,
    nodes: NodeArena,
    residue: Array2<i64>,
    weights: &'a mut [i64],
    arcstatus: Vec<i8>
}

impl MstState<'_> {
    fn charge_of(&self, node: NodeId, ground_charge: i64) -> i64 {
        match self.grid.node_rc(node) {
            Some(rc) => self.residue[rc],
            None => ground_charge
        }
    }

    /// Approximate Steiner tree over all charged nodes, grown from `source`.
    fn solve(&mut self, source: NodeId, max_cost: i64) {
        let ground_charge = -self.residue.sum();
        let mut bkts = Buckets::for_distances(self.grid, max_cost);

        for node in self.nodes.iter_mut() {
            node.group = group::NOT_IN_BUCKET;
            node.outcost = VERY_FAR;
            node.pred = None;
        }

        self.arcstatus.fill(ARC_FREE);
        self.nodes[source].outcost = 0;
        self.nodes[source].group = group::IN_BUCKET;
        bkts.insert(&mut self.nodes, source, 0);
        bkts.curr = 0;

        while let Some(from) = bkts.pop_closest(&mut self.nodes) {
            // Charged nodes join the tree along their shortest path back to it
            if from != source && self.charge_of(from, ground_charge) != 0 {
                let mut pathto = from;

                loop {
                    let pathfrom = self.nodes.parent(pathto);

                    if pathfrom == pathto {
                        break;
                    }

                    self.nodes[pathto].outcost = 0;
                    self.arcstatus[self.nodes[pathto].pred_arc.arc.0] = ARC_TREE;

                    if self.charge_of(pathfrom, ground_charge) != 0 {
                        break;
                    }

                    pathto = pathfrom;
                }
            }

            let fromdist = self.nodes[from].outcost;

            for k in 0..self.topo.degree(from) {
                let Some(nb) = self.topo.neighbor(from, k) else { continue };
                let w = self.weights[nb.arc.0];
                let arcdist = if self.arcstatus[nb.arc.0] < 0 {
                    0
                } else if w >= LARGE_SHORT {
                    VERY_FAR
                } else {
                    w
                };
                let newdist = fromdist+arcdist;
                let to = nb.node;

                if newdist < self.nodes[to].outcost {
                    if self.nodes[to].group == group::IN_BUCKET {
                        let old = self.nodes[to].outcost;
                        bkts.remove_by_cost(&mut self.nodes, to, old);
                    }

                    self.nodes[to].outcost = newdist;
                    self.nodes[to].pred = Some(from);
                    self.nodes[to].pred_arc = PredArc { arc: nb.arc, dir: nb.dir };
                    self.nodes[to].group = group::IN_BUCKET;
                    bkts.insert_by_cost(&mut self.nodes, to, newdist);
                }
            }
        }
    }

    /// Push every node's charge towards `source` along the tree, depth first.
    fn discharge(&mut self, source: NodeId, flows: &mut Flows) -> i64 {
        let ground = self.grid.ground();
        let mut ground_charge = 0;

        for node in self.nodes.ids() {
            let charge = match self.grid.node_rc(node) {
                Some(rc) => self.residue[rc],
                None => 0
            };

            self.nodes[node].outcost = charge;
            ground_charge -= charge;
        }

        self.nodes[ground].outcost = ground_charge;

        let mut next = source;
        let mut from;
        let mut todir = 0;

        loop {
            from = next;

            let mut chosen = None;

            for k in 0..self.topo.degree(from) {
                let Some(nb) = self.topo.neighbor(from, k) else { continue };

                match self.arcstatus[nb.arc.0] {
                    ARC_TREE => {
                        chosen = Some(nb);
                        break;
                    },
                    ARC_DOWN => {
                        chosen = Some(nb);
                        todir = nb.dir;
                    },
                    _ => {}
                }
            }

            let Some(nb) = chosen else { break };

            next = nb.node;
            self.arcstatus[nb.arc.0] -= 1;

            if self.arcstatus[nb.arc.0] == ARC_DONE {
                let charge = self.nodes[from].outcost;

                flows.add(nb.arc, todir*charge);
                self.nodes[next].outcost += charge;
                self.nodes[from].outcost = 0;
            }
        }

        self.nodes[from].outcost
    }
}

/// Clip flows above the limit and fold the excess into the residues at either end.
/// Returns whether anything was clipped.
fn clip_flows(
    flows: &mut Flows,
    residue: &mut Array2<i64>,
    weights: &mut [i64],
    max_cost: &mut i64,
    params: &Params
) -> Result<bool> {
    let grid = flows.grid();
    let mostflow = flows.max_abs();
    let cliplimit = if params.init_max_flow > 0 {
        params.init_max_flow
    } else {
        ((mostflow as f64*CLIP_FACTOR).ceil() as i64+1).max(params.max_flow)
    };

    if mostflow <= cliplimit {
        return Ok(false);
    }

    if *max_cost+INIT_MAX_COST_INCR >= LARGE_SHORT {
        log::warn!("Arc costs would overflow the short range, escaping flow clipping");
        return Ok(false);
    }

    *max_cost += INIT_MAX_COST_INCR;

    log::info!("Maximum initial flow {} clipped at {}", mostflow, cliplimit);

    let arcs: Vec<_> = flows.arcs().filter(|&(_, f)| f.abs() > cliplimit).collect();

    for (arc, f) in arcs {
        let clipped = f.signum()*cliplimit;
        let excess = f-clipped;
        let (tail, head) = grid.arc_nodes(arc);

        flows.set(arc, clipped);
        weights[arc.0] = *max_cost;

        if let Some(rc) = grid.node_rc(tail) {
            residue[rc] += excess;
        }

        if let Some(rc) = grid.node_rc(head) {
            residue[rc] -= excess;
        }
    }

    if let Some(((row, col), &value)) = residue.indexed_iter().find(|(_, &v)| !(MIN_RES..=MAX_RES).contains(&v)) {
        return Err(UnwrapError::ResidueOverflow { row, col, value });
    }

    Ok(true)
}

/// Feasible flow from an approximate minimum spanning tree over the residues.
pub fn mst_flows(wrapped: ArrayView2<f32>, costs: &Costs, params: &Params) -> Result<Flows> {
    let grid = costs.grid();
    let mut weights = costs.linear_weights();
    let mut max_cost = (0..grid.n_arcs())
        .filter(|&a| !grid.is_corner_arc(ArcId(a)))
        .map(|a| weights[a])
        .filter(|&w| w < LARGE_SHORT)
        .max()
        .unwrap_or(0);
    let mut flows = Flows::zeros(grid);
    let mut state = MstState {
        grid,
        topo: GridTopology::new(grid),
        nodes: NodeArena::new(grid.n_nodes()),
        residue: cycle_residue(wrapped).mapv(|v| v as i64),
        weights: &mut weights,
        arcstatus: vec![ARC_FREE; grid.n_arcs()]
    };

    log::info!(
        "Initializing flows with MST algorithm ({} residues)",
        state.residue.iter().filter(|&&v| v != 0).count()
    );

    loop {
        let Some(((r, c), _)) = state.residue.indexed_iter().find(|(_, &v)| v != 0) else {
            break;
        };
        let source = grid.node(r, c);

        state.solve(source, max_cost);

        let leftover = state.discharge(source, &mut flows);

        if leftover != 0 {
            return Err(firewall(format!(
                "Residue tree left charge {} at the source", leftover
            )));
        }

        state.residue.fill(0);

        if !clip_flows(&mut flows, &mut state.residue, state.weights, &mut max_cost, params)? {
            break;
        }
    }

    Ok(flows)
}



#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostTag;
    use crate::grid::wrap;

    fn vortex_pair(h: usize, w: usize) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(r, c)| {
            let (y, x) = (r as f64, c as f64);
            let a = (y-3.5).atan2(x-2.5);
            let b = (y-3.5).atan2(x-7.5);
            wrap(a-b) as f32
        })
    }

    #[test]
    fn mst_flows_conserve_residues() {
        let wrapped = vortex_pair(9, 11);
        let mag = Array2::<f32>::ones(wrapped.dim());
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let flows = mst_flows(wrapped.view(), &costs, &params).unwrap();
        let residue = cycle_residue(wrapped.view());

        assert_eq!(residue.iter().filter(|&&v| v != 0).count(), 2);
        assert_eq!(flows.conservation_errors(residue.view()), 0);
        assert!(flows.max_abs() > 0);
    }

    #[test]
    fn no_residues_means_no_flow() {
        let wrapped = Array2::from_shape_fn((5, 6), |(r, c)| wrap(0.5*r as f64+0.3*c as f64) as f32);
        let mag = Array2::<f32>::ones(wrapped.dim());
        let params = Params::default();
        let costs = Costs::derive(CostTag::Smooth, &params, wrapped.view(), mag.view()).unwrap();
        let flows = mst_flows(wrapped.view(), &costs, &params).unwrap();

        assert_eq!(flows.max_abs(), 0);
    }

    #[test]
    fn clipping_moves_excess_into_residues() {
        let grid = Grid::new(4, 4).unwrap();
        let mut flows = Flows::zeros(grid);
        let mut residue = Array2::<i64>::zeros((3, 3));
        let mut weights = vec![1; grid.n_arcs()];
        let mut max_cost = 1;
        let params = Params { init_max_flow: 2, ..Params::default() };
        let arc = grid.row_arc(1, 1);

        flows.set(arc, 5);
        residue[[1, 0]] = 5;
        residue[[1, 1]] = -5;

        assert!(clip_flows(&mut flows, &mut residue, &mut weights, &mut max_cost, &params).unwrap());
        assert_eq!(flows.get(arc), 2);
        assert_eq!(residue[[1, 0]], 8);
        assert_eq!(residue[[1, 1]], -8);
        assert_eq!(weights[arc.0], 1+INIT_MAX_COST_INCR);
    }
}

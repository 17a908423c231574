use ndarray::prelude::*;
use crate::cost::Costs;
use crate::error::{Result, UnwrapError};
use crate::grid::{cycle_residue, ArcId, Flows};
use crate::mcf::{McfStatus, MinCostFlow};



/// Capacity of each direction of a residue network arc.
const ARC_UBOUND: i64 = 200;



/// Feasible flow from an exact L1 min-cost-flow solve over the residue network.
pub fn mcf_flows(wrapped: ArrayView2<f32>, costs: &Costs) -> Result<Flows> {
    let grid = costs.grid();
    let weights = costs.linear_weights();
    let residue = cycle_residue(wrapped);
    let (m, n) = (grid.nnoderow(), grid.nnodecol());
    let nnodes = m*n+1;
    let narcs = grid.n_arcs();

    log::info!("Initializing flows with MCF algorithm");

    let mut mcf = MinCostFlow::with_capacity(nnodes, 2*narcs)?;
    let ground = mcf.add_node(0);
    let index: Vec<usize> = (0..m*n).map(|_| mcf.add_node(0)).collect();
    let node = |i: usize, j: usize| index[i*n+j];

    // Each grid arc becomes a pair of opposed arcs; the pair list keeps the arc
    // they stand for together with the index of the first of the two
    let mut pairs: Vec<(ArcId, usize)> = Vec::with_capacity(narcs);
    let mut add_pair = |mcf: &mut MinCostFlow, a: usize, b: usize, arc: ArcId| {
        let w = weights[arc.0];
        let first = mcf.add_arc(b, a, ARC_UBOUND, w);
        mcf.add_arc(a, b, ARC_UBOUND, w);
        pairs.push((arc, first));
    };

    for i in 0..m {
        add_pair(&mut mcf, ground, node(i, 0), grid.row_arc(i, 0));

        for j in 0..n-1 {
            add_pair(&mut mcf, node(i, j), node(i, j+1), grid.row_arc(i, j+1));
        }

        add_pair(&mut mcf, node(i, n-1), ground, grid.row_arc(i, n));
    }

    for j in 0..n {
        add_pair(&mut mcf, ground, node(0, j), grid.col_arc(0, j));
    }

    for i in 0..m-1 {
        for j in 0..n {
            add_pair(&mut mcf, node(i, j), node(i+1, j), grid.col_arc(i+1, j));
        }
    }

    for j in 0..n {
        add_pair(&mut mcf, node(m-1, j), ground, grid.col_arc(m, j));
    }

    let mut total = 0;

    for ((i, j), &res) in residue.indexed_iter() {
        mcf.set_supply(node(i, j), res as i64);
        total += res as i64;
    }

    mcf.set_supply(ground, -total);

    match mcf.solve() {
        McfStatus::Optimal => {},
        status => return Err(UnwrapError::McfNotOptimal(status))
    }

    let mut flows = Flows::zeros(grid);

    for (arc, first) in pairs {
        flows.set(arc, mcf.flow(first+1)-mcf.flow(first));
    }

    Ok(flows)
}

use ndarray::prelude::*;
use crate::config::Params;
use crate::cost::Costs;
use crate::error::{Result, UnwrapError};
use crate::grid::{Flows, LARGE_SHORT};
use crate::interrupt::Hooks;
use super::network::Network;



/// Result of a nonlinear optimization run.
#[derive(Clone, Debug)]
pub struct SolveOutcome {
    pub flows: Flows,
    pub total_cost: f64,
    /// Largest flow magnitude on an unmasked arc
    pub max_flow: i64,
    /// Arcs whose incremental costs were clipped in the last round
    pub clipped_costs: usize
}

/// Improve a feasible flow by repeated tree solves with flow increments cycling
/// from 1 up to the largest flow on the network, until a full cycle of increments
/// finds (almost) nothing to improve.
pub(crate) fn optimize(
    wrapped: ArrayView2<f32>,
    mag: ArrayView2<f32>,
    costs: &Costs,
    params: &Params,
    flows: Flows,
    hooks: &mut Hooks
) -> Result<SolveOutcome> {
    let mut net = Network::new(wrapped.view(), mag.view(), costs, params, flows)?;

    net.flows.fold_corner_arcs();

    let mut mostflow = net.flows.max_abs();

    if mostflow*params.nshortcycle > LARGE_SHORT {
        return Err(UnwrapError::FlowOverflow { mostflow, nshortcycle: params.nshortcycle });
    }

    if mag.iter().all(|&m| m <= 0.) {
        return Err(UnwrapError::AllMasked);
    }

    net.mask_nodes();

    let npix = costs.grid().npix() as f64;
    let max_nflow_cycles = (params.max_cycle_fraction*npix).round() as usize;
    let narcs = costs.grid().n_arcs();
    let convex = costs.tag.is_convex();

    let mut nflow: i64 = 1;
    let mut nflowdone: i64 = 0;
    let mut ncycle = 0;
    let mut nincreased: i64 = 0;
    let mut notfirstloop = false;
    let mut totalcost = f64::INFINITY;
    let mut best: Option<(f64, Flows)> = None;
    let mut clipped;

    log::info!("Running nonlinear network flow optimizer");
    log::info!("Maximum flow on network: {}", mostflow);
    log::info!("Number of nodes in network: {}", costs.grid().n_grid_nodes()+1);

    loop {
        net.check_interrupt(hooks)?;

        log::info!("Flow increment: {}  (Total improvements: {})", nflow, ncycle);

        clipped = net.incr.setup(costs, &net.flows, nflow);

        if clipped > 0 {
            log::warn!(
                "{} arcs had incremental costs clipped to avoid overflow ({:.3}%)",
                clipped, 100.*clipped as f64/narcs as f64
            );
        }

        let sources = net.select_sources()?;
        net.setup_tree_network();

        let mut n = 0;

        for (source, nconnected) in sources {
            n += net.tree_solve(source, nconnected, nflow, hooks)?;
        }

        ncycle += n;

        if notfirstloop {
            let oldtotalcost = totalcost;
            totalcost = costs.total(&net.flows);

            let mintotalcost = best.as_ref().map_or(f64::INFINITY, |(c, _)| *c);

            if totalcost > oldtotalcost || (n > 0 && totalcost == oldtotalcost) {
                log::warn!("Unexpected increase in total cost");
            }

            if totalcost > mintotalcost {
                nincreased += 1;
            } else {
                nincreased = 0;

                if totalcost < mintotalcost {
                    best = Some((totalcost, net.flows.clone()));
                }
            }
        }

        if n <= max_nflow_cycles {
            nflowdone += 1;
        } else {
            nflowdone = 1;
        }

        mostflow = net.flows.max_unmasked(mag);
        hooks.observer.flows(nflow, &net.flows);

        if nincreased > 0 && nincreased >= mostflow {
            log::warn!("Total cost kept increasing, keeping the cheapest solution found");

            if let Some((_, flows)) = best.take() {
                net.flows = flows;
            }

            break;
        }

        if nflowdone >= params.max_flow || nflowdone >= mostflow || convex {
            break;
        }

        nflow += 1;

        if nflow > params.max_flow || nflow > mostflow {
            nflow = 1;
            notfirstloop = true;
        }

        log::debug!("Maximum valid flow on network: {}", mostflow);
    }

    let total_cost = costs.total(&net.flows);
    let max_flow = net.flows.max_unmasked(mag);

    log::info!("Total solution cost: {:.0}", total_cost);
    log::info!("Maximum flow on network: {}", max_flow);

    Ok(SolveOutcome { flows: net.flows, total_cost, max_flow, clipped_costs: clipped })
}

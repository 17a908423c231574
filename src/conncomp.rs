use std::collections::VecDeque;
use ndarray::prelude::*;
use crate::config::ConnCompParams;
use crate::cost::Costs;
use crate::grid::{Flows, LARGE_SHORT};



/// Label pixels that are joined through arcs the solution is confident about.
///
/// Two unmasked pixels are joined when the cost curvature of the arc between them,
/// the sum of both incremental costs at the final flow, reaches the threshold. The
/// largest components that are big enough get labels `1..=n` in order of size.
pub fn grow_conncomps(
    costs: &Costs,
    flows: &Flows,
    mag: ArrayView2<f32>,
    params: &ConnCompParams
) -> Array2<u32> {
    let grid = costs.grid();
    let (h, w) = grid.dim();
    let thresh = params.cost_thresh.unwrap_or_else(|| costs.default_conncomp_thresh());
    let min_size = ((params.min_size_frac*grid.npix() as f64).ceil() as usize).max(1);

    let joined = |arc| {
        let (pos, neg) = costs.incremental(arc, flows.get(arc), 1);
        pos.clamp(-LARGE_SHORT, LARGE_SHORT)+neg.clamp(-LARGE_SHORT, LARGE_SHORT) >= thresh
    };

    let mut comp = Array2::<u32>::zeros((h, w));
    let mut sizes: Vec<(usize, u32)> = Vec::new();
    let mut queue = VecDeque::new();

    for start in (0..h).flat_map(|r| (0..w).map(move |c| (r, c))) {
        if mag[start] <= 0. || comp[start] != 0 {
            continue;
        }

        let id = sizes.len() as u32+1;
        let mut size = 0;

        comp[start] = id;
        queue.push_back(start);

        while let Some((r, c)) = queue.pop_front() {
            size += 1;

            let mut next = Vec::with_capacity(4);

            if c+1 < w { next.push(((r, c+1), grid.col_arc(r, c))); }
            if c > 0 { next.push(((r, c-1), grid.col_arc(r, c-1))); }
            if r+1 < h { next.push(((r+1, c), grid.row_arc(r, c))); }
            if r > 0 { next.push(((r-1, c), grid.row_arc(r-1, c))); }

            for (px, arc) in next {
                if comp[px] == 0 && mag[px] > 0. && joined(arc) {
                    comp[px] = id;
                    queue.push_back(px);
                }
            }
        }

        sizes.push((size, id));
    }

    sizes.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut relabel = vec![0u32; sizes.len()+1];

    for (rank, &(size, id)) in sizes.iter().enumerate().take(params.max_ncomps) {
        if size >= min_size {
            relabel[id as usize] = rank as u32+1;
        }
    }

    let ncomps = relabel.iter().filter(|&&l| l > 0).count();

    log::info!("Found {} connected component(s) of at least {} pixels", ncomps, min_size);

    comp.mapv_inplace(|id| relabel[id as usize]);
    comp
}

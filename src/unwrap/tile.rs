use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;
use crate::config::{Params, TileParams};
use crate::cost::Costs;
use crate::error::{firewall, Result, UnwrapError};
use crate::grid::NodeId;
use crate::interrupt::{Hooks, Interrupt};
use crate::topology::{max_spanning_forest, TileTopology};
use super::solve_single;



/// One tile of a tiled solve. The tile is solved over `rows` x `cols` and owns the
/// output pixels in `core_rows` x `core_cols`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileWindow {
    pub row: usize,
    pub col: usize,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    pub core_rows: Range<usize>,
    pub core_cols: Range<usize>
}

impl TileWindow {
    fn view<'a, T>(&self, arr: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        arr.slice_move(s![self.rows.clone(), self.cols.clone()])
    }
}

fn split(n: usize, ntile: usize, overlap: usize) -> Vec<(Range<usize>, Range<usize>)> {
    let size = n.div_ceil(ntile);

    (0..ntile).map(|i| {
        let core = i*size..((i+1)*size).min(n);
        let window = core.start.saturating_sub(overlap.div_ceil(2))..(core.end+overlap/2).min(n);

        (window, core)
    }).collect()
}

/// Windows of every tile in row-major order. Neighbouring windows share `row_overlap`
/// rows or `col_overlap` columns.
pub fn tile_windows(nrow: usize, ncol: usize, tile: &TileParams) -> Vec<TileWindow> {
    let rows = split(nrow, tile.ntilerow, tile.row_overlap);
    let cols = split(ncol, tile.ntilecol, tile.col_overlap);

    rows.iter().enumerate().flat_map(|(i, (rw, rc))| {
        cols.iter().enumerate().map(move |(j, (cw, cc))| TileWindow {
            row: i,
            col: j,
            rows: rw.clone(),
            cols: cw.clone(),
            core_rows: rc.clone(),
            core_cols: cc.clone()
        })
    }).collect()
}



pub(crate) struct TileResult {
    pub phase: Array2<f32>,
    pub clipped_costs: usize
}

pub(crate) struct Assembled {
    pub phase: Array2<f32>,
    pub clipped_costs: usize
}

fn solve_tile(
    win: &TileWindow,
    wrapped: ArrayView2<f32>,
    mag: ArrayView2<f32>,
    costs: &Costs,
    params: &Params,
    interrupt: Option<&Interrupt>,
    cancel: &AtomicBool
) -> Result<TileResult> {
    let wrapped = win.view(wrapped);
    let mag = win.view(mag);

    if mag.iter().all(|&m| m <= 0.) {
        log::warn!("Tile ({}, {}) is fully masked, passing its wrapped phase through", win.row, win.col);
        return Ok(TileResult { phase: wrapped.to_owned(), clipped_costs: 0 });
    }

    let costs = costs.window(win.rows.clone(), win.cols.clone())?;
    let mut observer = ();
    let mut hooks = Hooks { interrupt, observer: &mut observer, cancel: Some(cancel), estimate: None };
    let sol = solve_single(wrapped, mag, &costs, params, params.init_method.into(), &mut hooks)?;

    log::debug!("Tile ({}, {}) solved", win.row, win.col);

    Ok(TileResult { phase: sol.phase, clipped_costs: sol.clipped_costs })
}

/// Solve every tile on a pool of `params.tile.nthreads` threads, then stitch the
/// tiles together. The first tile failure cancels every other tile, running or not.
pub(crate) fn solve_tiled(
    wrapped: ArrayView2<f32>,
    mag: ArrayView2<f32>,
    costs: &Costs,
    params: &Params,
    interrupt: Option<&Interrupt>,
    monitor: Option<&flume::Sender<usize>>
) -> Result<Assembled> {
    let t = &params.tile;
    let windows = tile_windows(wrapped.nrows(), wrapped.ncols(), t);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(t.nthreads)
        .build()
        .map_err(|e| UnwrapError::Config(format!("Could not start tile threads: {}", e)))?;
    let abort = AtomicBool::new(false);
    let mut results: Vec<Option<TileResult>> = windows.iter().map(|_| None).collect();
    let mut failure = None;

    log::info!(
        "Unwrapping {}x{} tiles with {}x{} overlap on {} thread(s)",
        t.ntilerow, t.ntilecol, t.row_overlap, t.col_overlap, t.nthreads
    );

    let (tx, rx) = flume::unbounded();

    std::thread::scope(|s| {
        s.spawn(|| {
            pool.install(|| {
                windows.par_iter().enumerate().for_each_with(tx, |tx, (idx, win)| {
                    if abort.load(Ordering::SeqCst) {
                        return;
                    }

                    let res = catch_unwind(AssertUnwindSafe(|| {
                        solve_tile(win, wrapped, mag, costs, params, interrupt, &abort)
                    }));
                    let res = match res {
                        Ok(Ok(tile)) => Ok(tile),
                        Ok(Err(UnwrapError::Interrupted)) => {
                            if !interrupt.is_some_and(|i| i.stop_requested()) {
                                log::debug!("Tile ({}, {}) cancelled", win.row, win.col);
                                return;
                            }

                            Err(UnwrapError::Interrupted)
                        },
                        Ok(Err(e)) => Err(UnwrapError::Tile { row: win.row, col: win.col, source: Box::new(e) }),
                        Err(_) => Err(UnwrapError::TilePanicked { row: win.row, col: win.col })
                    };

                    if res.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }

                    let _ = tx.send((idx, res));
                });
            });
        });

        for (count, (idx, res)) in rx.iter().enumerate() {
            match res {
                Ok(tile) => results[idx] = Some(tile),
                Err(e) => {
                    log::error!("{}", e);
                    failure.get_or_insert(e);
                }
            }

            if let Some(m) = monitor {
                let _ = m.send(count+1);
            }
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }

    let tiles: Vec<TileResult> = results.into_iter()
        .collect::<Option<_>>()
        .ok_or_else(|| firewall("Tile finished without a result"))?;
    let clipped_costs = tiles.iter().map(|t| t.clipped_costs).sum();
    let phase = reassemble(&windows, &tiles, mag);

    Ok(Assembled { phase, clipped_costs })
}



/// Majority vote on the whole number of cycles to add to `b` to make it agree with
/// `a` over their shared unmasked pixels. Returns the winning shift, its vote count
/// and the total number of votes.
fn overlap_shift(
    a: &TileWindow,
    pa: ArrayView2<f32>,
    b: &TileWindow,
    pb: ArrayView2<f32>,
    mag: ArrayView2<f32>
) -> Option<(i64, usize, usize)> {
    let rows = a.rows.start.max(b.rows.start)..a.rows.end.min(b.rows.end);
    let cols = a.cols.start.max(b.cols.start)..a.cols.end.min(b.cols.end);
    let mut votes = BTreeMap::<i64, usize>::new();

    for r in rows {
        for c in cols.clone() {
            if mag[[r, c]] <= 0. {
                continue;
            }

            let va = pa[[r-a.rows.start, c-a.cols.start]] as f64;
            let vb = pb[[r-b.rows.start, c-b.cols.start]] as f64;

            *votes.entry(((va-vb)/TAU).round() as i64).or_default() += 1;
        }
    }

    let total = votes.values().sum();

    votes.into_iter()
        .max_by_key(|&(k, n)| (n, Reverse(k.abs())))
        .map(|(k, n)| (k, n, total))
}

/// Shift each tile by whole cycles so neighbours agree in their overlaps, then copy
/// every tile's core into the output. Shifts are propagated along a spanning forest
/// of the tile adjacency that prefers the most strongly agreeing overlaps.
pub(crate) fn reassemble(
    windows: &[TileWindow],
    tiles: &[TileResult],
    mag: ArrayView2<f32>
) -> Array2<f32> {
    let ntilecol = windows.iter().map(|w| w.col+1).max().unwrap_or(1);
    let mut topo = TileTopology::new(windows.len());
    let mut shifts = Vec::new();
    let mut weights = Vec::new();
    let mut disagreeing = 0;

    for (a, wa) in windows.iter().enumerate() {
        let right = (wa.col+1 < ntilecol).then_some(a+1);
        let below = Some(a+ntilecol).filter(|&b| b < windows.len());

        for b in right.into_iter().chain(below) {
            let wb = &windows[b];
            let vote = overlap_shift(wa, tiles[a].phase.view(), wb, tiles[b].phase.view(), mag);

            let Some((k, n, total)) = vote else {
                log::debug!("Tiles ({}, {}) and ({}, {}) share no unmasked pixels", wa.row, wa.col, wb.row, wb.col);
                continue;
            };

            if n < total {
                disagreeing += 1;
                log::debug!(
                    "Tiles ({}, {}) and ({}, {}) disagree on {} of {} overlap pixels",
                    wa.row, wa.col, wb.row, wb.col, total-n, total
                );
            }

            topo.add_arc(NodeId(a), NodeId(b));
            shifts.push(k);
            weights.push(n as i64);
        }
    }

    let (order, links) = max_spanning_forest(&topo, |arc| weights[arc.index()]);
    let mut offsets = vec![0i64; windows.len()];

    for node in order {
        if let Some(link) = links[node.index()] {
            offsets[node.index()] = offsets[link.parent.index()]+link.via.dir*shifts[link.via.arc.index()];
        }
    }

    log::info!(
        "Reassembled {} tiles over {} overlap(s), {} with disagreeing pixels",
        windows.len(), topo.n_arcs(), disagreeing
    );

    let mut phase = Array2::<f32>::zeros(mag.dim());

    for ((win, tile), &k) in windows.iter().zip(tiles).zip(&offsets) {
        let (r0, c0) = (win.rows.start, win.cols.start);
        let core = tile.phase.slice(s![
            win.core_rows.start-r0..win.core_rows.end-r0,
            win.core_cols.start-c0..win.core_cols.end-c0
        ]);
        let shift = (TAU*k as f64) as f32;

        Zip::from(phase.slice_mut(s![win.core_rows.clone(), win.core_cols.clone()]))
            .and(&core)
            .for_each(|p, &v| *p = v+shift);
    }

    phase
}



#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::grid::wrap;
    use super::*;

    fn tiling(ntilerow: usize, ntilecol: usize, row_overlap: usize, col_overlap: usize) -> TileParams {
        TileParams { ntilerow, ntilecol, row_overlap, col_overlap, ..TileParams::default() }
    }

    #[test]
    fn cores_partition_and_windows_overlap() {
        let wins = tile_windows(10, 7, &tiling(3, 1, 2, 0));
        let rows: Vec<_> = wins.iter().map(|w| (w.rows.clone(), w.core_rows.clone())).collect();

        assert_eq!(rows, vec![(0..5, 0..4), (3..9, 4..8), (7..10, 8..10)]);
        assert!(wins.iter().all(|w| w.cols == (0..7) && w.core_cols == (0..7)));
        assert_eq!((wins[1].row, wins[1].col), (1, 0));
    }

    #[test]
    fn tiles_are_shifted_into_agreement() {
        let truth = Array2::from_shape_fn((8, 10), |(r, c)| 0.7*(r+c) as f32);
        let wins = tile_windows(8, 10, &tiling(2, 2, 2, 2));
        let cycles = [1, -3, 2, 0];
        let tiles: Vec<TileResult> = wins.iter().zip(cycles).map(|(w, k)| TileResult {
            phase: w.view(truth.view()).mapv(|v| v+(TAU*k as f64) as f32),
            clipped_costs: 0
        }).collect();
        let mag = Array2::<f32>::ones(truth.dim());
        let phase = reassemble(&wins, &tiles, mag.view());

        for (a, b) in phase.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(*a, *b+TAU as f32, epsilon = 1e-4);
        }
    }

    #[test]
    fn masked_tile_passes_wrapped_phase_through() {
        let wrapped = Array2::from_shape_fn((12, 12), |(r, c)| wrap(0.9*(r+c) as f64) as f32);
        let mut mag = Array2::<f32>::ones(wrapped.dim());
        mag.slice_mut(s![.., 5..]).fill(0.);

        let mut params = Params::default();
        params.tile = tiling(1, 2, 0, 2);

        let costs = Costs::derive(
            crate::cost::CostTag::from_params(&params).unwrap(), &params, wrapped.view(), mag.view()
        ).unwrap();
        let (tx, rx) = flume::unbounded();
        let out = solve_tiled(wrapped.view(), mag.view(), &costs, &params, None, Some(&tx)).unwrap();

        drop(tx);

        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(out.phase.slice(s![.., 6..]), wrapped.slice(s![.., 6..]));
        assert_abs_diff_eq!(out.phase[[11, 4]]-out.phase[[0, 0]], 0.9*15., epsilon = 1e-3);
    }

    #[test]
    fn stop_request_aborts_tiles() {
        let wrapped = Array2::from_shape_fn((12, 12), |(r, c)| wrap(0.9*(r+c) as f64) as f32);
        let mag = Array2::<f32>::ones(wrapped.dim());
        let mut params = Params::default();
        params.tile = tiling(2, 2, 2, 2);

        let costs = Costs::derive(
            crate::cost::CostTag::from_params(&params).unwrap(), &params, wrapped.view(), mag.view()
        ).unwrap();
        let interrupt = Interrupt::new();

        interrupt.request_stop();

        assert!(matches!(
            solve_tiled(wrapped.view(), mag.view(), &costs, &params, Some(&interrupt), None),
            Err(UnwrapError::Interrupted)
        ));
    }

    #[test]
    fn cancelled_tile_stops_without_a_result() {
        let wrapped = Array2::from_shape_fn((12, 12), |(r, c)| wrap(0.9*(r+c) as f64) as f32);
        let mag = Array2::<f32>::ones(wrapped.dim());
        let mut params = Params::default();
        params.tile = tiling(1, 2, 0, 2);

        let costs = Costs::derive(
            crate::cost::CostTag::from_params(&params).unwrap(), &params, wrapped.view(), mag.view()
        ).unwrap();
        let wins = tile_windows(12, 12, &params.tile);
        let running = AtomicBool::new(false);
        let cancelled = AtomicBool::new(true);

        assert!(solve_tile(&wins[0], wrapped.view(), mag.view(), &costs, &params, None, &running).is_ok());
        assert!(matches!(
            solve_tile(&wins[1], wrapped.view(), mag.view(), &costs, &params, None, &cancelled),
            Err(UnwrapError::Interrupted)
        ));
    }
}

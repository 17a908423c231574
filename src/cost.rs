use ndarray::prelude::*;
use crate::config::{CostMode, Params};
use crate::error::{Result, UnwrapError};
use crate::grid::{dh, dv, ArcId, ArcKind, Flows, Grid, LARGE_SHORT};



pub const NO_COST_SHELF: i64 = -LARGE_SHORT;



/// Cost family selected for a solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CostTag {
    Topo,
    Defo,
    Smooth,
    L0,
    L1,
    L2,
    Lp(f64),
    L0BiDir,
    L1BiDir,
    L2BiDir,
    LpBiDir(f64)
}

/// Shape of the per-arc statistics a cost tag expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsFamily {
    Stat,
    Smooth,
    Weight,
    BiDir
}

impl CostTag {
    pub fn from_params(params: &Params) -> Result<Self> {
        if params.p < 0. {
            return match params.cost_mode {
                CostMode::Topo => Ok(Self::Topo),
                CostMode::Defo => Ok(Self::Defo),
                CostMode::Smooth => Ok(Self::Smooth),
                CostMode::Lp => Err(UnwrapError::Config(
                    "Lp cost mode needs a non-negative exponent".into()
                ))
            };
        }

        let p = params.p;

        Ok(match (params.bidir, p) {
            (false, p) if p == 0. => Self::L0,
            (false, p) if p == 1. => Self::L1,
            (false, p) if p == 2. => Self::L2,
            (false, p) => Self::Lp(p),
            (true, p) if p == 0. => Self::L0BiDir,
            (true, p) if p == 1. => Self::L1BiDir,
            (true, p) if p == 2. => Self::L2BiDir,
            (true, p) => Self::LpBiDir(p)
        })
    }

    pub fn exponent(&self) -> Option<f64> {
        match *self {
            Self::Topo | Self::Defo | Self::Smooth => None,
            Self::L0 | Self::L0BiDir => Some(0.),
            Self::L1 | Self::L1BiDir => Some(1.),
            Self::L2 | Self::L2BiDir => Some(2.),
            Self::Lp(p) | Self::LpBiDir(p) => Some(p)
        }
    }

    /// Convex costs need a single flow-increment sweep.
    pub fn is_convex(&self) -> bool {
        self.exponent().is_some_and(|p| p >= 1.)
    }

    pub fn is_statistical(&self) -> bool {
        self.exponent().is_none()
    }

    pub fn family(&self) -> StatsFamily {
        match self {
            Self::Topo | Self::Defo => StatsFamily::Stat,
            Self::Smooth => StatsFamily::Smooth,
            Self::L0 | Self::L1 | Self::L2 | Self::Lp(_) => StatsFamily::Weight,
            _ => StatsFamily::BiDir
        }
    }
}

/// Per-arc cost statistics, in units of 1/nshortcycle cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArcStats {
    Stat { offset: i32, sigsq: i32, dzmax: i32, laycost: i32 },
    Smooth { offset: i32, sigsq: i32 },
    Weight(i32),
    BiDir { pos: i32, neg: i32 }
}

impl ArcStats {
    pub fn family(&self) -> StatsFamily {
        match self {
            Self::Stat { .. } => StatsFamily::Stat,
            Self::Smooth { .. } => StatsFamily::Smooth,
            Self::Weight(_) => StatsFamily::Weight,
            Self::BiDir { .. } => StatsFamily::BiDir
        }
    }

    /// Statistics that make an arc free to carry any flow.
    pub fn masked(family: StatsFamily) -> Self {
        let big = LARGE_SHORT as i32;

        match family {
            StatsFamily::Stat => Self::Stat { offset: 0, sigsq: big, dzmax: big, laycost: 0 },
            StatsFamily::Smooth => Self::Smooth { offset: 0, sigsq: big },
            StatsFamily::Weight => Self::Weight(0),
            StatsFamily::BiDir => Self::BiDir { pos: 0, neg: 0 }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostParams {
    pub nshortcycle: i64,
    pub lay_falloff_const: f64
}

impl From<&Params> for CostParams {
    fn from(params: &Params) -> Self {
        Self { nshortcycle: params.nshortcycle, lay_falloff_const: params.lay_falloff_const }
    }
}



fn shelf_cost(i: i64, sigsq: i64, dzmax: i64, laycost: i64, falloff: f64) -> i64 {
    if i > dzmax {
        let d = i-dzmax;
        ((d*d) as f64/(falloff*sigsq as f64)) as i64+laycost
    } else {
        let c = i*i/sigsq;

        if laycost != NO_COST_SHELF && i > 0 && c > laycost { laycost } else { c }
    }
}

fn scale_by_increment(c: i64, nflow: i64) -> i64 {
    let nflowsq = (nflow*nflow) as f64;

    if c > 0 {
        (c as f64/nflowsq).ceil() as i64
    } else {
        (c as f64/nflowsq).floor() as i64
    }
}

fn lp_eval(p: f64, flow: i64, wpos: i64, wneg: i64) -> f64 {
    if flow == 0 {
        return 0.;
    }

    let w = if flow > 0 { wpos } else { wneg } as f64;
    let f = flow.abs() as f64;

    if p == 0. {
        w
    } else if p == 1. {
        w*f
    } else if p == 2. {
        w*f*f
    } else {
        w*f.powf(p)
    }
}

fn lp_weights(stats: &ArcStats) -> (i64, i64) {
    match *stats {
        ArcStats::Weight(w) => (w as i64, w as i64),
        ArcStats::BiDir { pos, neg } => (pos as i64, neg as i64),
        _ => (0, 0)
    }
}

/// Cost change for moving the flow on an arc by `+nflow` and by `-nflow`.
pub fn incremental_cost(
    tag: CostTag,
    cp: &CostParams,
    stats: &ArcStats,
    flow: i64,
    nflow: i64,
    is_row: bool
) -> (i64, i64) {
    let nsc = cp.nshortcycle;

    match (tag, *stats) {
        (CostTag::Topo | CostTag::Defo, ArcStats::Stat { offset, sigsq, dzmax, laycost }) => {
            let sym = tag == CostTag::Defo || is_row;
            let dz = |f: i64| {
                let v = f*nsc+offset as i64;
                if sym { v.abs() } else { v }
            };
            let cost = |i: i64| {
                shelf_cost(i, sigsq as i64, dzmax as i64, laycost as i64, cp.lay_falloff_const)
            };
            let cost1 = cost(dz(flow));
            let pos = cost(dz(flow+nflow))-cost1;
            let neg = cost(dz(flow-nflow))-cost1;

            (scale_by_increment(pos, nflow), scale_by_increment(neg, nflow))
        },
        (CostTag::Smooth, ArcStats::Smooth { offset, sigsq }) => {
            let sigsq = sigsq as i64;
            let cost = |f: i64| {
                let i = (f*nsc+offset as i64).abs();
                i*i/sigsq
            };
            let cost1 = cost(flow);
            let pos = cost(flow+nflow)-cost1;
            let neg = cost(flow-nflow)-cost1;

            (scale_by_increment(pos, nflow), scale_by_increment(neg, nflow))
        },
        (tag, stats) => {
            let Some(p) = tag.exponent() else { return (0, 0) };
            let (wpos, wneg) = lp_weights(&stats);
            let cost1 = lp_eval(p, flow, wpos, wneg);
            let pos = lp_eval(p, flow+nflow, wpos, wneg)-cost1;
            let neg = lp_eval(p, flow-nflow, wpos, wneg)-cost1;

            (pos.round() as i64, neg.round() as i64)
        }
    }
}

/// Total cost of carrying `flow` on an arc.
pub fn arc_cost(tag: CostTag, cp: &CostParams, stats: &ArcStats, flow: i64, is_row: bool) -> f64 {
    let nsc = cp.nshortcycle;

    match (tag, *stats) {
        (CostTag::Topo | CostTag::Defo, ArcStats::Stat { offset, sigsq, dzmax, laycost }) => {
            let mut i = flow*nsc+offset as i64;

            if tag == CostTag::Defo || is_row {
                i = i.abs();
            }

            shelf_cost(i, sigsq as i64, dzmax as i64, laycost as i64, cp.lay_falloff_const) as f64
        },
        (CostTag::Smooth, ArcStats::Smooth { offset, sigsq }) => {
            let i = flow*nsc+offset as i64;
            (i*i/sigsq as i64) as f64
        },
        (tag, stats) => {
            let Some(p) = tag.exponent() else { return 0. };
            let (wpos, wneg) = lp_weights(&stats);

            lp_eval(p, flow, wpos, wneg)
        }
    }
}



/// Cost statistics for every arc of a grid together with the tag that interprets them.
#[derive(Clone, Debug)]
pub struct Costs {
    pub tag: CostTag,
    pub params: CostParams,
    grid: Grid,
    stats: Vec<ArcStats>
}

impl Costs {
    /// Derive statistics from wrapped phase and magnitude quality.
    pub fn derive(
        tag: CostTag,
        params: &Params,
        wrapped: ArrayView2<f32>,
        mag: ArrayView2<f32>
    ) -> Result<Self> {
        let (h, w) = wrapped.dim();
        let grid = Grid::new(h, w)?;
        let family = tag.family();
        let nsc = params.nshortcycle as f64;
        let big = LARGE_SHORT as f64;
        let qmax = mag.fold(0f32, |m, &v| m.max(v));
        let qmax = if qmax > 0. { qmax as f64 } else { 1. };

        let stats = (0..grid.n_arcs()).map(ArcId).map(|arc| {
            let (p, q) = grid.arc_pixels(arc);

            if mag[p] <= 0. || mag[q] <= 0. {
                return ArcStats::masked(family);
            }

            let quality = (mag[p].min(mag[q]) as f64/qmax).clamp(0., 1.);
            let offset = match grid.arc_kind(arc) {
                ArcKind::Col(r, c) => (nsc*dh(wrapped, r, c)).round(),
                ArcKind::Row(r, c) => -(nsc*dv(wrapped, r, c)).round()
            } as i32;
            let sigma = nsc*(params.sigma_max_cycles-(params.sigma_max_cycles-params.sigma_min_cycles)*quality);
            let sigsq = (sigma*sigma).round().clamp(1., big);
            let weight = (params.lp_weight_scale*quality).round().max(1.) as i32;

            match family {
                StatsFamily::Stat => {
                    let dzmax = (nsc*params.dzmax_cycles).round().min(big);
                    let laycost = (params.layover_shelf*dzmax*dzmax/sigsq).round().clamp(0., big);

                    ArcStats::Stat {
                        offset,
                        sigsq: sigsq as i32,
                        dzmax: dzmax as i32,
                        laycost: laycost as i32
                    }
                },
                StatsFamily::Smooth => ArcStats::Smooth { offset, sigsq: sigsq as i32 },
                StatsFamily::Weight => ArcStats::Weight(weight),
                StatsFamily::BiDir => ArcStats::BiDir { pos: weight, neg: weight }
            }
        }).collect();

        Ok(Self { tag, params: params.into(), grid, stats })
    }

    /// Use precomputed statistics laid out like the row-arc and column-arc grids.
    pub fn from_stats(
        tag: CostTag,
        params: &Params,
        rows: ArrayView2<ArcStats>,
        cols: ArrayView2<ArcStats>
    ) -> Result<Self> {
        let (h1, w) = rows.dim();
        let grid = Grid::new(h1+1, w)?;

        if cols.dim() != (grid.nrow, grid.ncol-1) {
            return Err(UnwrapError::Shape {
                name: "column arc statistics",
                found: cols.dim(),
                expected: (grid.nrow, grid.ncol-1)
            });
        }

        if let Some(bad) = rows.iter().chain(cols.iter()).find(|s| s.family() != tag.family()) {
            return Err(UnwrapError::Config(format!(
                "Arc statistics {:?} do not fit cost tag {:?}", bad, tag
            )));
        }

        let stats = rows.iter().chain(cols.iter()).copied().collect();

        Ok(Self { tag, params: params.into(), grid, stats })
    }

    pub fn grid(&self) -> Grid { self.grid }

    /// Statistics restricted to the pixel window `rows` x `cols`.
    pub fn window(&self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Result<Self> {
        let sub = Grid::new(rows.len(), cols.len())?;
        let (r0, c0) = (rows.start, cols.start);

        let stats = (0..sub.n_arcs()).map(ArcId).map(|arc| {
            let src = match sub.arc_kind(arc) {
                ArcKind::Row(r, c) => self.grid.row_arc(r+r0, c+c0),
                ArcKind::Col(r, c) => self.grid.col_arc(r+r0, c+c0)
            };
            self.stats[src.0]
        }).collect();

        Ok(Self { tag: self.tag, params: self.params, grid: sub, stats })
    }

    pub fn stats(&self, arc: ArcId) -> &ArcStats {
        &self.stats[arc.0]
    }

    pub fn incremental(&self, arc: ArcId, flow: i64, nflow: i64) -> (i64, i64) {
        incremental_cost(self.tag, &self.params, &self.stats[arc.0], flow, nflow, self.grid.is_row_arc(arc))
    }

    pub fn arc_cost(&self, arc: ArcId, flow: i64) -> f64 {
        arc_cost(self.tag, &self.params, &self.stats[arc.0], flow, self.grid.is_row_arc(arc))
    }

    pub fn total(&self, flows: &Flows) -> f64 {
        flows.arcs().map(|(arc, f)| self.arc_cost(arc, f)).sum()
    }

    /// Static non-negative arc weights for the initializers.
    pub fn linear_weights(&self) -> Vec<i64> {
        (0..self.grid.n_arcs()).map(ArcId).map(|arc| {
            let (pos, neg) = self.incremental(arc, 0, 1);
            ((pos.max(0)+neg.max(0))/2).clamp(0, LARGE_SHORT-1)
        }).collect()
    }

    pub fn default_conncomp_thresh(&self) -> i64 {
        if self.tag.is_statistical() { 100 } else { 2 }
    }
}



/// Incremental cost pair for one arc, clipped to the short range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IncrCost {
    pub pos: i32,
    pub neg: i32
}

#[derive(Clone, Debug)]
pub struct IncrCosts {
    data: Vec<IncrCost>
}

fn clip(v: i64) -> (i32, bool) {
    if v > LARGE_SHORT {
        (LARGE_SHORT as i32, true)
    } else if v < -LARGE_SHORT {
        (-LARGE_SHORT as i32, true)
    } else {
        (v as i32, false)
    }
}

impl IncrCosts {
    pub fn new(narcs: usize) -> Self {
        Self { data: vec![IncrCost::default(); narcs] }
    }

    /// Cost of moving one increment of flow over `arc` in direction `dir`.
    pub fn get(&self, arc: ArcId, dir: i64) -> i64 {
        let c = self.data[arc.0];
        if dir > 0 { c.pos as i64 } else { c.neg as i64 }
    }

    pub fn pair(&self, arc: ArcId) -> IncrCost {
        self.data[arc.0]
    }

    /// Recompute one arc, returning whether either cost was clipped.
    pub fn recalc(&mut self, costs: &Costs, arc: ArcId, flow: i64, nflow: i64) -> bool {
        let (pos, neg) = costs.incremental(arc, flow, nflow);
        let (pos, pclip) = clip(pos);
        let (neg, nclip) = clip(neg);

        self.data[arc.0] = IncrCost { pos, neg };

        pclip || nclip
    }

    /// Recompute every arc, returning the number of clipped arcs.
    pub fn setup(&mut self, costs: &Costs, flows: &Flows, nflow: i64) -> usize {
        flows.arcs()
            .filter(|&(arc, f)| self.recalc(costs, arc, f, nflow))
            .count()
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    fn cp() -> CostParams {
        CostParams { nshortcycle: 200, lay_falloff_const: 2. }
    }

    fn all_tags() -> Vec<(CostTag, ArcStats)> {
        vec![
            (CostTag::Topo, ArcStats::Stat { offset: -37, sigsq: 900, dzmax: 300, laycost: 50 }),
            (CostTag::Defo, ArcStats::Stat { offset: 80, sigsq: 400, dzmax: 300, laycost: 70 }),
            (CostTag::Smooth, ArcStats::Smooth { offset: 12, sigsq: 1600 }),
            (CostTag::L0, ArcStats::Weight(7)),
            (CostTag::L1, ArcStats::Weight(7)),
            (CostTag::L2, ArcStats::Weight(7)),
            (CostTag::Lp(0.5), ArcStats::Weight(7)),
            (CostTag::L1BiDir, ArcStats::BiDir { pos: 3, neg: 9 }),
            (CostTag::LpBiDir(1.5), ArcStats::BiDir { pos: 3, neg: 9 })
        ]
    }

    #[test]
    fn incremental_cost_is_idempotent() {
        for (tag, stats) in all_tags() {
            for flow in -3..=3 {
                for nflow in 1..=3 {
                    for is_row in [false, true] {
                        let a = incremental_cost(tag, &cp(), &stats, flow, nflow, is_row);
                        let b = incremental_cost(tag, &cp(), &stats, flow, nflow, is_row);

                        assert_eq!(a, b, "{:?} flow {} nflow {}", tag, flow, nflow);
                    }
                }
            }
        }
    }

    #[test]
    fn l1_costs() {
        let w = ArcStats::Weight(5);

        assert_eq!(incremental_cost(CostTag::L1, &cp(), &w, 0, 1, true), (5, 5));
        assert_eq!(incremental_cost(CostTag::L1, &cp(), &w, 2, 1, true), (5, -5));
        assert_eq!(incremental_cost(CostTag::L1, &cp(), &w, -1, 2, true), (0, 10));
        assert_eq!(arc_cost(CostTag::L1, &cp(), &w, -3, false), 15.);
    }

    #[test]
    fn l0_costs() {
        let w = ArcStats::Weight(4);

        assert_eq!(incremental_cost(CostTag::L0, &cp(), &w, 0, 1, true), (4, 4));
        assert_eq!(incremental_cost(CostTag::L0, &cp(), &w, 1, 1, true), (0, -4));
        assert_eq!(incremental_cost(CostTag::L0, &cp(), &w, -2, 2, true), (-4, 0));
    }

    #[test]
    fn bidir_uses_sign_dependent_weights() {
        let s = ArcStats::BiDir { pos: 2, neg: 6 };

        assert_eq!(incremental_cost(CostTag::L1BiDir, &cp(), &s, 0, 1, true), (2, 6));
        assert_eq!(arc_cost(CostTag::L1BiDir, &cp(), &s, 3, true), 6.);
        assert_eq!(arc_cost(CostTag::L1BiDir, &cp(), &s, -3, true), 18.);
    }

    #[test]
    fn smooth_cost_is_quadratic_in_gradient() {
        let s = ArcStats::Smooth { offset: 0, sigsq: 400 };

        assert_eq!(arc_cost(CostTag::Smooth, &cp(), &s, 1, false), 100.);
        assert_eq!(incremental_cost(CostTag::Smooth, &cp(), &s, 0, 1, false), (100, 100));
        assert_eq!(incremental_cost(CostTag::Smooth, &cp(), &s, 0, 2, false), (100, 100));
    }

    #[test]
    fn topo_shelf_caps_cost_below_dzmax() {
        let s = ArcStats::Stat { offset: 0, sigsq: 100, dzmax: 300, laycost: 50 };

        // 200^2/100 = 400 would exceed the shelf
        assert_eq!(arc_cost(CostTag::Topo, &cp(), &s, 1, true), 50.);
        // Past dzmax the falloff term is added to the shelf
        assert_eq!(arc_cost(CostTag::Topo, &cp(), &s, 2, true), (100.*100./200.) as i64 as f64+50.);
    }

    #[test]
    fn masked_arcs_are_free() {
        let s = ArcStats::masked(StatsFamily::Weight);

        assert_eq!(incremental_cost(CostTag::L1, &cp(), &s, 0, 1, true), (0, 0));

        let s = ArcStats::masked(StatsFamily::Stat);

        assert_eq!(incremental_cost(CostTag::Topo, &cp(), &s, 0, 1, true), (0, 0));
    }

    #[test]
    fn clipping_is_counted() {
        let mut params = Params::lp(2.);
        params.lp_weight_scale = 30000.;

        let wrapped = Array2::<f32>::zeros((3, 3));
        let mag = Array2::<f32>::ones((3, 3));
        let costs = Costs::derive(CostTag::L2, &params, wrapped.view(), mag.view()).unwrap();
        let mut flows = Flows::zeros(costs.grid());
        let arc = ArcId(0);
        flows.set(arc, 1);

        let mut incr = IncrCosts::new(costs.grid().n_arcs());
        let clipped = incr.setup(&costs, &flows, 1);

        // (2^2-1^2)*30000 exceeds the short range on the loaded arc only
        assert_eq!(clipped, 1);
        assert_eq!(incr.get(arc, 1), LARGE_SHORT);
    }

    #[test]
    fn tag_selection() {
        assert_eq!(CostTag::from_params(&Params::default()).unwrap(), CostTag::Smooth);
        assert_eq!(CostTag::from_params(&Params::lp(1.)).unwrap(), CostTag::L1);
        assert_eq!(CostTag::from_params(&Params { bidir: true, ..Params::lp(0.7) }).unwrap(), CostTag::LpBiDir(0.7));
        assert!(CostTag::L1.is_convex());
        assert!(!CostTag::L0.is_convex());
        assert!(!CostTag::Topo.is_convex());
    }

    #[test]
    fn window_matches_parent_statistics() {
        let params = Params::default();
        let wrapped = Array2::from_shape_fn((6, 7), |(r, c)| (0.3*r as f32-0.8*c as f32).sin());
        let mag = Array2::from_shape_fn((6, 7), |(r, c)| 1.+(r*c) as f32);
        let costs = Costs::derive(CostTag::Smooth, &params, wrapped.view(), mag.view()).unwrap();
        let sub = costs.window(2..5, 1..6).unwrap();
        let (g, sg) = (costs.grid(), sub.grid());

        assert_eq!(sub.stats(sg.row_arc(1, 2)), costs.stats(g.row_arc(3, 3)));
        assert_eq!(sub.stats(sg.col_arc(2, 3)), costs.stats(g.col_arc(4, 4)));
    }

    #[test]
    fn from_stats_rejects_wrong_family() {
        let rows = Array2::from_elem((2, 3), ArcStats::Weight(1));
        let cols = Array2::from_elem((3, 2), ArcStats::Weight(1));

        assert!(Costs::from_stats(CostTag::L1, &Params::lp(1.), rows.view(), cols.view()).is_ok());
        assert!(Costs::from_stats(CostTag::Smooth, &Params::default(), rows.view(), cols.view()).is_err());
    }
}

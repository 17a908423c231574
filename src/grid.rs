use std::f64::consts::TAU;
use ndarray::prelude::*;
use crate::error::{Result, UnwrapError};



pub const LARGE_SHORT: i64 = 32000;
pub const VERY_FAR: i64 = i32::MAX as i64;
pub const MAX_RES: i64 = i8::MAX as i64;
pub const MIN_RES: i64 = i8::MIN as i64;



/// Index of a node in the arena: grid nodes first, then ground, then the boundary node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Terminator for intrusive lists threaded through the node arena.
    pub const NONE: NodeId = NodeId(usize::MAX);

    pub fn index(self) -> usize { self.0 }

    pub fn is_none(self) -> bool { self == Self::NONE }
}

/// Index of an arc: row arcs first, then column arcs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArcId(pub usize);

impl ArcId {
    pub fn index(self) -> usize { self.0 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArcKind {
    /// Crosses pixels (r, c) and (r+1, c); positive flow runs towards increasing column
    Row(usize, usize),
    /// Crosses pixels (r, c) and (r, c+1); positive flow runs towards increasing row
    Col(usize, usize)
}

/// A neighbouring node reached over `arc`; `dir` is the flow sign for moving flow towards it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbor {
    pub node: NodeId,
    pub arc: ArcId,
    pub dir: i64
}



/// Addressing scheme for an `nrow` x `ncol` pixel grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grid {
    pub nrow: usize,
    pub ncol: usize
}

impl Grid {
    pub fn new(nrow: usize, ncol: usize) -> Result<Self> {
        if nrow < 2 || ncol < 2 {
            return Err(UnwrapError::Config(format!(
                "Grid of {}x{} pixels has no nodes", nrow, ncol
            )));
        }

        Ok(Self { nrow, ncol })
    }

    pub fn dim(&self) -> (usize, usize) { (self.nrow, self.ncol) }

    pub fn npix(&self) -> usize { self.nrow*self.ncol }

    pub fn nnoderow(&self) -> usize { self.nrow-1 }

    pub fn nnodecol(&self) -> usize { self.ncol-1 }

    pub fn n_grid_nodes(&self) -> usize { self.nnoderow()*self.nnodecol() }

    pub fn ground(&self) -> NodeId { NodeId(self.n_grid_nodes()) }

    pub fn boundary(&self) -> NodeId { NodeId(self.n_grid_nodes()+1) }

    pub fn n_nodes(&self) -> usize { self.n_grid_nodes()+2 }

    pub fn node(&self, r: usize, c: usize) -> NodeId { NodeId(r*self.nnodecol()+c) }

    pub fn node_rc(&self, node: NodeId) -> Option<(usize, usize)> {
        if node.0 < self.n_grid_nodes() {
            Some((node.0/self.nnodecol(), node.0%self.nnodecol()))
        } else {
            None
        }
    }

    pub fn n_row_arcs(&self) -> usize { (self.nrow-1)*self.ncol }

    pub fn n_col_arcs(&self) -> usize { self.nrow*(self.ncol-1) }

    pub fn n_arcs(&self) -> usize { self.n_row_arcs()+self.n_col_arcs() }

    pub fn row_arc(&self, r: usize, c: usize) -> ArcId { ArcId(r*self.ncol+c) }

    pub fn col_arc(&self, r: usize, c: usize) -> ArcId {
        ArcId(self.n_row_arcs()+r*(self.ncol-1)+c)
    }

    pub fn arc_kind(&self, arc: ArcId) -> ArcKind {
        let nr = self.n_row_arcs();

        if arc.0 < nr {
            ArcKind::Row(arc.0/self.ncol, arc.0%self.ncol)
        } else {
            let i = arc.0-nr;
            ArcKind::Col(i/(self.ncol-1), i%(self.ncol-1))
        }
    }

    pub fn is_row_arc(&self, arc: ArcId) -> bool { arc.0 < self.n_row_arcs() }

    /// The two pixels separated by an arc.
    pub fn arc_pixels(&self, arc: ArcId) -> ((usize, usize), (usize, usize)) {
        match self.arc_kind(arc) {
            ArcKind::Row(r, c) => ((r, c), (r+1, c)),
            ArcKind::Col(r, c) => ((r, c), (r, c+1))
        }
    }

    /// Column arcs joining a corner node to ground; these never carry flow.
    pub fn is_corner_arc(&self, arc: ArcId) -> bool {
        match self.arc_kind(arc) {
            ArcKind::Row(..) => false,
            ArcKind::Col(r, c) => {
                (r == 0 || r == self.nrow-1) && (c == 0 || c == self.nnodecol()-1)
            }
        }
    }

    /// Endpoints of an arc as (tail, head) for positive flow.
    pub fn arc_nodes(&self, arc: ArcId) -> (NodeId, NodeId) {
        let ground = self.ground();

        match self.arc_kind(arc) {
            ArcKind::Row(r, c) => (
                if c == 0 { ground } else { self.node(r, c-1) },
                if c == self.ncol-1 { ground } else { self.node(r, c) }
            ),
            ArcKind::Col(r, c) => (
                if r == 0 { ground } else { self.node(r-1, c) },
                if r == self.nrow-1 { ground } else { self.node(r, c) }
            )
        }
    }
}



/// Wrap a phase difference into [-pi, pi].
pub fn wrap(v: f64) -> f64 {
    v-TAU*(v/TAU).round()
}

/// Wrapped horizontal gradient between pixels (r, c) and (r, c+1), in cycles.
pub fn dh(wrapped: ArrayView2<f32>, r: usize, c: usize) -> f64 {
    wrap(wrapped[[r, c+1]] as f64-wrapped[[r, c]] as f64)/TAU
}

/// Wrapped vertical gradient between pixels (r, c) and (r+1, c), in cycles.
pub fn dv(wrapped: ArrayView2<f32>, r: usize, c: usize) -> f64 {
    wrap(wrapped[[r+1, c]] as f64-wrapped[[r, c]] as f64)/TAU
}

/// Curl of the wrapped phase around grid node (r, c).
pub fn node_residue(wrapped: ArrayView2<f32>, r: usize, c: usize) -> i64 {
    (dh(wrapped, r, c)+dv(wrapped, r, c+1)-dh(wrapped, r+1, c)-dv(wrapped, r, c)).round() as i64
}

pub fn cycle_residue(wrapped: ArrayView2<f32>) -> Array2<i8> {
    let (h, w) = wrapped.dim();

    Array2::from_shape_fn((h-1, w-1), |(r, c)| {
        node_residue(wrapped, r, c).clamp(MIN_RES, MAX_RES) as i8
    })
}



/// Integer cycle flows on every arc of a grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Flows {
    grid: Grid,
    data: Vec<i32>
}

impl Flows {
    pub fn zeros(grid: Grid) -> Self {
        Self { grid, data: vec![0; grid.n_arcs()] }
    }

    pub fn grid(&self) -> Grid { self.grid }

    pub fn get(&self, arc: ArcId) -> i64 { self.data[arc.0] as i64 }

    pub fn set(&mut self, arc: ArcId, v: i64) { self.data[arc.0] = v as i32; }

    pub fn add(&mut self, arc: ArcId, dv: i64) { self.data[arc.0] += dv as i32; }

    /// Row-arc and column-arc flows as arrays shaped like their arc grids.
    pub fn to_arrays(&self) -> (Array2<i32>, Array2<i32>) {
        let g = self.grid;
        let rows = Array2::from_shape_fn((g.nrow-1, g.ncol), |(r, c)| self.data[g.row_arc(r, c).0]);
        let cols = Array2::from_shape_fn((g.nrow, g.ncol-1), |(r, c)| self.data[g.col_arc(r, c).0]);

        (rows, cols)
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, i64)> + '_ {
        self.data.iter().enumerate().map(|(i, &f)| (ArcId(i), f as i64))
    }

    pub fn max_abs(&self) -> i64 {
        self.data.iter().map(|f| (*f as i64).abs()).max().unwrap_or(0)
    }

    /// Largest flow magnitude on arcs whose pixels are both unmasked.
    pub fn max_unmasked(&self, mag: ArrayView2<f32>) -> i64 {
        self.arcs()
            .filter(|&(arc, _)| {
                let (p, q) = self.grid.arc_pixels(arc);
                mag[p] > 0. && mag[q] > 0.
            })
            .map(|(_, f)| f.abs())
            .max()
            .unwrap_or(0)
    }

    /// Net outflow of grid node (r, c).
    pub fn net_outflow(&self, r: usize, c: usize) -> i64 {
        let g = self.grid;

        self.get(g.row_arc(r, c+1))-self.get(g.row_arc(r, c))
            +self.get(g.col_arc(r+1, c))-self.get(g.col_arc(r, c))
    }

    /// Move flow off the corner column arcs onto the row arc of the same corner node.
    pub fn fold_corner_arcs(&mut self) {
        let g = self.grid;
        let (nr, nc) = (g.nrow, g.ncol);
        let moves = [
            (g.col_arc(0, 0), g.row_arc(0, 0), 1),
            (g.col_arc(0, nc-2), g.row_arc(0, nc-1), -1),
            (g.col_arc(nr-1, 0), g.row_arc(nr-2, 0), -1),
            (g.col_arc(nr-1, nc-2), g.row_arc(nr-2, nc-1), 1)
        ];

        for (corner, row, sign) in moves {
            let f = self.get(corner);

            if f != 0 {
                self.add(row, sign*f);
                self.set(corner, 0);
            }
        }
    }

    /// Number of grid nodes where the flow does not balance the residue.
    pub fn conservation_errors(&self, residue: ArrayView2<i8>) -> usize {
        residue.indexed_iter()
            .filter(|&((r, c), &res)| self.net_outflow(r, c) != res as i64)
            .count()
    }
}

/// Integrate wrapped gradients corrected by flows into an unwrapped phase.
pub fn integrate_phase(wrapped: ArrayView2<f32>, flows: &Flows) -> Array2<f32> {
    let (h, w) = wrapped.dim();
    let g = flows.grid();
    let mut acc = Array2::<f64>::zeros((h, w));

    acc[[0, 0]] = wrapped[[0, 0]] as f64;

    for r in 1..h {
        acc[[r, 0]] = acc[[r-1, 0]]+TAU*(dv(wrapped, r-1, 0)-flows.get(g.row_arc(r-1, 0)) as f64);
    }

    for r in 0..h {
        for c in 1..w {
            acc[[r, c]] = acc[[r, c-1]]+TAU*(dh(wrapped, r, c-1)+flows.get(g.col_arc(r, c-1)) as f64);
        }
    }

    acc.mapv(|v| v as f32)
}

/// Flows that reproduce an already unwrapped field when integrated.
pub fn flows_from_unwrapped(unwrapped: ArrayView2<f32>, wrapped: ArrayView2<f32>) -> Result<Flows> {
    let (h, w) = wrapped.dim();
    let grid = Grid::new(h, w)?;
    let mut flows = Flows::zeros(grid);

    if unwrapped.dim() != wrapped.dim() {
        return Err(UnwrapError::Shape {
            name: "unwrapped",
            found: unwrapped.dim(),
            expected: wrapped.dim()
        });
    }

    for r in 0..h {
        for c in 0..w-1 {
            let d = (unwrapped[[r, c+1]] as f64-unwrapped[[r, c]] as f64)/TAU;
            flows.set(grid.col_arc(r, c), (d-dh(wrapped, r, c)).round() as i64);
        }
    }

    for r in 0..h-1 {
        for c in 0..w {
            let d = (unwrapped[[r+1, c]] as f64-unwrapped[[r, c]] as f64)/TAU;
            flows.set(grid.row_arc(r, c), -(d-dv(wrapped, r, c)).round() as i64);
        }
    }

    Ok(flows)
}



/// Pixel-mask predicates over arcs and nodes of a grid.
#[derive(Clone, Copy)]
pub struct MaskView<'a> {
    pub grid: Grid,
    pub mag: ArrayView2<'a, f32>
}

impl<'a> MaskView<'a> {
    pub fn new(grid: Grid, mag: ArrayView2<'a, f32>) -> Self {
        Self { grid, mag }
    }

    fn arc_mags(&self, arc: ArcId) -> (bool, bool) {
        let (p, q) = self.grid.arc_pixels(arc);
        (self.mag[p] > 0., self.mag[q] > 0.)
    }

    /// Exactly one side of the arc is masked.
    pub fn is_edge_arc(&self, arc: ArcId) -> bool {
        let (a, b) = self.arc_mags(arc);
        a != b
    }

    pub fn is_interior_arc(&self, arc: ArcId) -> bool {
        let (a, b) = self.arc_mags(arc);
        a && b
    }

    pub fn is_region_arc(&self, arc: ArcId) -> bool {
        let (a, b) = self.arc_mags(arc);
        a || b
    }

    fn node_pixels(&self, r: usize, c: usize) -> [bool; 4] {
        let m = &self.mag;
        [m[[r, c]] > 0., m[[r+1, c]] > 0., m[[r, c+1]] > 0., m[[r+1, c+1]] > 0.]
    }

    /// Some but not all of the four surrounding pixels are masked.
    pub fn is_edge_node(&self, r: usize, c: usize) -> bool {
        let px = self.node_pixels(r, c);
        px.iter().any(|&v| v) && !px.iter().all(|&v| v)
    }

    pub fn is_masked_node(&self, r: usize, c: usize) -> bool {
        !self.node_pixels(r, c).iter().any(|&v| v)
    }

    /// Ground is masked when every edge pixel is.
    pub fn is_masked_ground(&self) -> bool {
        let (h, w) = self.mag.dim();

        let rows_masked = (0..w).all(|c| self.mag[[0, c]] <= 0. && self.mag[[h-1, c]] <= 0.);
        let cols_masked = (0..h).all(|r| self.mag[[r, 0]] <= 0. && self.mag[[r, w-1]] <= 0.);

        rows_masked && cols_masked
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn vortex(h: usize, w: usize, r0: f64, c0: f64) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(r, c)| {
            wrap((r as f64-r0).atan2(c as f64-c0)) as f32
        })
    }

    #[test]
    fn arc_addressing_round_trips() {
        let g = Grid::new(4, 5).unwrap();

        for r in 0..3 {
            for c in 0..5 {
                assert_eq!(g.arc_kind(g.row_arc(r, c)), ArcKind::Row(r, c));
            }
        }

        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(g.arc_kind(g.col_arc(r, c)), ArcKind::Col(r, c));
            }
        }

        assert_eq!(g.n_arcs(), 3*5+4*4);
    }

    #[test]
    fn corner_arcs() {
        let g = Grid::new(4, 5).unwrap();
        let corners: Vec<_> = (0..g.n_arcs()).map(ArcId).filter(|&a| g.is_corner_arc(a)).collect();

        assert_eq!(corners, vec![g.col_arc(0, 0), g.col_arc(0, 3), g.col_arc(3, 0), g.col_arc(3, 3)]);
    }

    #[test]
    fn smooth_field_has_no_residues() {
        let wrapped = Array2::from_shape_fn((8, 9), |(r, c)| wrap(0.7*r as f64-0.4*c as f64) as f32);

        assert!(cycle_residue(wrapped.view()).iter().all(|&v| v == 0));
    }

    #[test]
    fn vortex_has_single_residue() {
        let wrapped = vortex(6, 6, 2.5, 2.5);
        let res = cycle_residue(wrapped.view());

        assert_eq!(res.iter().filter(|&&v| v != 0).count(), 1);
        assert_eq!(res[[2, 2]].abs(), 1);
    }

    #[test]
    fn integration_reproduces_unwrapped_field() {
        let truth = Array2::from_shape_fn((7, 6), |(r, c)| (1.1*r as f64+4.0*c as f64) as f32);
        let wrapped = truth.mapv(|v| wrap(v as f64) as f32);
        let flows = flows_from_unwrapped(truth.view(), wrapped.view()).unwrap();
        let res = cycle_residue(wrapped.view());
        let phase = integrate_phase(wrapped.view(), &flows);
        let offset = truth[[0, 0]]-phase[[0, 0]];

        assert_eq!(flows.conservation_errors(res.view()), 0);

        for (a, b) in phase.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(a+offset, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn corner_folding_preserves_conservation() {
        let g = Grid::new(4, 4).unwrap();
        let mut flows = Flows::zeros(g);

        // Route one unit around the top-left corner node through both ground arcs
        flows.set(g.row_arc(0, 0), 1);
        flows.set(g.col_arc(0, 0), -1);

        let before = flows.net_outflow(0, 0);
        flows.fold_corner_arcs();

        assert_eq!(flows.net_outflow(0, 0), before);
        assert_eq!(flows.get(g.col_arc(0, 0)), 0);
        assert_eq!(flows.get(g.row_arc(0, 0)), 0);
    }

    #[test]
    fn mask_predicates() {
        let mut mag = Array2::<f32>::ones((4, 4));
        mag[[1, 1]] = 0.;
        let mv = MaskView::new(Grid::new(4, 4).unwrap(), mag.view());
        let g = mv.grid;

        assert!(mv.is_edge_arc(g.row_arc(0, 1)));
        assert!(!mv.is_interior_arc(g.row_arc(0, 1)));
        assert!(mv.is_interior_arc(g.row_arc(2, 2)));
        assert!(mv.is_edge_node(0, 0));
        assert!(!mv.is_masked_node(0, 0));
        assert!(!mv.is_masked_ground());
    }
}

use clap::ValueEnum;
use crate::error::{Result, UnwrapError};



/// Cost family used to score candidate flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CostMode {
    Topo,
    Defo,
    Smooth,
    Lp
}

/// Strategy producing the first feasible flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InitMethod {
    Mst,
    Mcf
}

#[derive(Clone, Debug)]
pub struct TileParams {
    pub ntilerow: usize,
    pub ntilecol: usize,
    pub row_overlap: usize,
    pub col_overlap: usize,
    pub nthreads: usize,
    pub single_tile_reopt: bool
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            ntilerow: 1,
            ntilecol: 1,
            row_overlap: 0,
            col_overlap: 0,
            nthreads: 1,
            single_tile_reopt: false
        }
    }
}

impl TileParams {
    pub fn is_tiled(&self) -> bool {
        self.ntilerow > 1 || self.ntilecol > 1
    }
}

#[derive(Clone, Debug)]
pub struct ConnCompParams {
    pub enabled: bool,
    /// Minimum cost curvature for two pixels to be joined, `None` picks a per-mode default
    pub cost_thresh: Option<i64>,
    pub min_size_frac: f64,
    pub max_ncomps: usize
}

impl Default for ConnCompParams {
    fn default() -> Self {
        Self { enabled: false, cost_thresh: None, min_size_frac: 0.01, max_ncomps: 32 }
    }
}

#[derive(Clone, Debug)]
pub struct Params {
    pub cost_mode: CostMode,
    /// Lp exponent, negative selects the statistical cost of `cost_mode`
    pub p: f64,
    pub bidir: bool,
    pub init_method: InitMethod,
    pub max_flow: i64,
    /// Flow clipping limit for the MST initializer, 0 derives it from the observed flows
    pub init_max_flow: i64,
    pub nshortcycle: i64,
    pub max_new_node_const: f64,
    pub max_cycle_fraction: f64,
    pub nconn_node_min: i64,
    pub max_cost: i64,
    pub n_major_prune: i64,
    pub prune_cost_thresh: i64,
    pub lay_falloff_const: f64,
    pub sigma_min_cycles: f64,
    pub sigma_max_cycles: f64,
    pub dzmax_cycles: f64,
    pub layover_shelf: f64,
    pub lp_weight_scale: f64,
    pub init_only: bool,
    pub tile: TileParams,
    pub conncomp: ConnCompParams
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cost_mode: CostMode::Smooth,
            p: -1.,
            bidir: false,
            init_method: InitMethod::Mst,
            max_flow: 4,
            init_max_flow: 9999,
            nshortcycle: 200,
            max_new_node_const: 0.0008,
            max_cycle_fraction: 0.00001,
            nconn_node_min: 0,
            max_cost: 1000,
            n_major_prune: 2_000_000_000,
            prune_cost_thresh: 2_000_000_000,
            lay_falloff_const: 2.,
            sigma_min_cycles: 0.05,
            sigma_max_cycles: 0.3,
            dzmax_cycles: 1.5,
            layover_shelf: 0.5,
            lp_weight_scale: 100.,
            init_only: false,
            tile: TileParams::default(),
            conncomp: ConnCompParams::default()
        }
    }
}

impl Params {
    /// Convenience constructor for the Lp cost family.
    pub fn lp(p: f64) -> Self {
        Self { cost_mode: CostMode::Lp, p, ..Self::default() }
    }

    pub fn validate(&self, nrow: usize, ncol: usize) -> Result<()> {
        let err = |msg: String| Err(UnwrapError::Config(msg));

        if nrow < 2 || ncol < 2 {
            return err(format!("Input of {}x{} pixels is too small to unwrap", nrow, ncol));
        }

        if self.cost_mode == CostMode::Lp && self.p < 0. {
            return err("Lp cost mode needs a non-negative exponent".into());
        }

        if !self.p.is_finite() {
            return err("Lp exponent must be finite".into());
        }

        for (name, v) in [
            ("max_flow", self.max_flow),
            ("nshortcycle", self.nshortcycle),
            ("max_cost", self.max_cost),
            ("n_major_prune", self.n_major_prune)
        ] {
            if v <= 0 {
                return err(format!("{} must be positive", name));
            }
        }

        if self.init_max_flow < 0 {
            return err("init_max_flow must not be negative".into());
        }

        if !(self.max_new_node_const > 0. && self.max_new_node_const <= 1.) {
            return err("max_new_node_const must lie in (0, 1]".into());
        }

        if !(self.sigma_min_cycles > 0. && self.sigma_min_cycles <= self.sigma_max_cycles) {
            return err("Statistical sigma range is empty".into());
        }

        if self.lay_falloff_const <= 0. || self.lp_weight_scale <= 0. {
            return err("Cost scale factors must be positive".into());
        }

        let t = &self.tile;

        if t.ntilerow == 0 || t.ntilecol == 0 || t.nthreads == 0 {
            return err("Tile counts and thread count must be positive".into());
        }

        if t.is_tiled() {
            let tile_h = nrow.div_ceil(t.ntilerow);
            let tile_w = ncol.div_ceil(t.ntilecol);

            if (t.ntilerow > 1 && t.row_overlap == 0) || (t.ntilecol > 1 && t.col_overlap == 0) {
                return err("Tiles must overlap their neighbours to be reassembled".into());
            }

            if tile_h < 2 || tile_w < 2 || tile_h < 2*t.row_overlap || tile_w < 2*t.col_overlap {
                return err(format!(
                    "Tiles of {}x{} pixels are too small for an overlap of {}x{}",
                    tile_h, tile_w, t.row_overlap, t.col_overlap
                ));
            }

            if (t.ntilerow-1)*tile_h >= nrow || (t.ntilecol-1)*tile_w >= ncol {
                return err("Too many tiles for the input size".into());
            }
        }

        let c = &self.conncomp;

        if c.enabled && (c.max_ncomps == 0 || !(0. ..=1.).contains(&c.min_size_frac)) {
            return err("Invalid connected component limits".into());
        }

        Ok(())
    }
}

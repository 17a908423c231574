mod tile;

use ndarray::prelude::*;
use ndarray::Zip;
use crate::config::Params;
use crate::conncomp::grow_conncomps;
use crate::cost::{CostTag, Costs};
use crate::error::{Result, UnwrapError};
use crate::grid::{flows_from_unwrapped, integrate_phase, wrap, Flows};
use crate::init::{initial_flows, Initializer};
use crate::interrupt::{Hooks, Interrupt, SolveObserver};
use crate::solver::optimize;

pub use tile::{tile_windows, TileWindow};



/// Everything known about one interferogram before unwrapping.
#[derive(Clone, Copy, Debug)]
pub struct Interferogram<'a> {
    pub wrapped: ArrayView2<'a, f32>,
    /// Pixel quality, zero or negative means masked. All ones when absent
    pub magnitude: Option<ArrayView2<'a, f32>>,
    /// Zero marks a masked pixel
    pub mask: Option<ArrayView2<'a, u8>>,
    /// Coarse unwrapped phase, subtracted before solving and added back after
    pub estimate: Option<ArrayView2<'a, f32>>,
    /// Precomputed arc statistics, derived from the inputs when absent
    pub costs: Option<&'a Costs>
}

impl<'a> Interferogram<'a> {
    pub fn new(wrapped: ArrayView2<'a, f32>) -> Self {
        Self { wrapped, magnitude: None, mask: None, estimate: None, costs: None }
    }

    pub fn with_magnitude(self, magnitude: ArrayView2<'a, f32>) -> Self {
        Self { magnitude: Some(magnitude), ..self }
    }

    pub fn with_mask(self, mask: ArrayView2<'a, u8>) -> Self {
        Self { mask: Some(mask), ..self }
    }

    pub fn with_estimate(self, estimate: ArrayView2<'a, f32>) -> Self {
        Self { estimate: Some(estimate), ..self }
    }

    pub fn with_costs(self, costs: &'a Costs) -> Self {
        Self { costs: Some(costs), ..self }
    }

    fn check_shapes(&self) -> Result<()> {
        let expected = self.wrapped.dim();
        let check = |name, found| if found == expected {
            Ok(())
        } else {
            Err(UnwrapError::Shape { name, found, expected })
        };

        if let Some(m) = self.magnitude { check("magnitude", m.dim())?; }
        if let Some(m) = self.mask { check("mask", m.dim())?; }
        if let Some(e) = self.estimate { check("estimate", e.dim())?; }
        if let Some(c) = self.costs { check("cost statistics", c.grid().dim())?; }

        Ok(())
    }

    /// Magnitude with masked pixels zeroed.
    fn effective_magnitude(&self) -> Array2<f32> {
        let mut mag = match self.magnitude {
            Some(m) => m.to_owned(),
            None => Array2::ones(self.wrapped.dim())
        };

        if let Some(mask) = self.mask {
            Zip::from(&mut mag).and(&mask).for_each(|m, &k| if k == 0 { *m = 0. });
        }

        mag
    }
}



/// Result of unwrapping one interferogram.
#[derive(Clone, Debug)]
pub struct Unwrapped {
    pub phase: Array2<f32>,
    /// Connected component labels, when requested
    pub conncomp: Option<Array2<u32>>,
    pub total_cost: f64,
    pub max_flow: i64,
    pub clipped_costs: usize
}

/// Optional hooks into a running solve.
#[derive(Default)]
pub struct SolveOptions<'a> {
    pub interrupt: Option<&'a Interrupt>,
    pub observer: Option<&'a mut dyn SolveObserver>,
    /// Receives the number of finished tiles as they complete
    pub monitor: Option<flume::Sender<usize>>
}



pub fn unwrap(input: &Interferogram, params: &Params) -> Result<Unwrapped> {
    unwrap_with(input, params, SolveOptions::default())
}

/// Unwrap `input`, tiled or as a single network depending on `params.tile`.
pub fn unwrap_with(input: &Interferogram, params: &Params, opts: SolveOptions) -> Result<Unwrapped> {
    let (nrow, ncol) = input.wrapped.dim();

    params.validate(nrow, ncol)?;
    input.check_shapes()?;

    let tag = CostTag::from_params(params)?;
    let mag = input.effective_magnitude();
    let wrapped = match input.estimate {
        Some(est) => Zip::from(input.wrapped).and(est)
            .map_collect(|&psi, &e| wrap(psi as f64-e as f64) as f32),
        None => input.wrapped.to_owned()
    };

    let costs = match input.costs {
        Some(c) if c.tag.family() != tag.family() => {
            return Err(UnwrapError::Config(format!(
                "Precomputed cost statistics for {:?} do not fit cost tag {:?}", c.tag, tag
            )));
        },
        Some(c) => {
            let mut c = c.clone();
            c.tag = tag;
            c
        },
        None => Costs::derive(tag, params, wrapped.view(), mag.view())?
    };

    log::info!("Unwrapping {}x{} pixels with {:?} costs", nrow, ncol, tag);

    let mut noop = ();
    let observer: &mut dyn SolveObserver = match opts.observer {
        Some(o) => o,
        None => &mut noop
    };
    let mut hooks = Hooks {
        interrupt: opts.interrupt,
        observer,
        cancel: None,
        estimate: input.estimate.as_ref().map(|e| e.view())
    };

    let solution = if params.tile.is_tiled() {
        let tiled = tile::solve_tiled(
            wrapped.view(), mag.view(), &costs, params, opts.interrupt, opts.monitor.as_ref()
        )?;

        if params.tile.single_tile_reopt {
            log::info!("Reoptimizing the assembled solution as a single tile");

            let init = Initializer::Unwrapped(tiled.phase.view());
            let sol = solve_single(wrapped.view(), mag.view(), &costs, params, init, &mut hooks)?;

            Solution { clipped_costs: sol.clipped_costs+tiled.clipped_costs, ..sol }
        } else {
            let flows = flows_from_unwrapped(tiled.phase.view(), wrapped.view())?;

            Solution { phase: tiled.phase, flows, clipped_costs: tiled.clipped_costs }
        }
    } else {
        let init = Initializer::from(params.init_method);

        solve_single(wrapped.view(), mag.view(), &costs, params, init, &mut hooks)?
    };

    let conncomp = params.conncomp.enabled
        .then(|| grow_conncomps(&costs, &solution.flows, mag.view(), &params.conncomp));
    let total_cost = costs.total(&solution.flows);
    let max_flow = solution.flows.max_unmasked(mag.view());
    let mut phase = solution.phase;

    if let Some(est) = input.estimate {
        phase += &est;
    }

    Ok(Unwrapped { phase, conncomp, total_cost, max_flow, clipped_costs: solution.clipped_costs })
}



pub(crate) struct Solution {
    pub phase: Array2<f32>,
    pub flows: Flows,
    pub clipped_costs: usize
}

/// Initialize and optimize one network covering all of `wrapped`.
pub(crate) fn solve_single(
    wrapped: ArrayView2<f32>,
    mag: ArrayView2<f32>,
    costs: &Costs,
    params: &Params,
    init: Initializer,
    hooks: &mut Hooks
) -> Result<Solution> {
    if mag.iter().all(|&m| m <= 0.) {
        return Err(UnwrapError::AllMasked);
    }

    let flows = initial_flows(init, wrapped, costs, params)?;

    if params.init_only {
        log::info!("Skipping optimization, keeping the initial flows");

        let phase = integrate_phase(wrapped, &flows);

        return Ok(Solution { phase, flows, clipped_costs: 0 });
    }

    let out = optimize(wrapped, mag, costs, params, flows, hooks)?;
    let phase = integrate_phase(wrapped, &out.flows);

    Ok(Solution { phase, flows: out.flows, clipped_costs: out.clipped_costs })
}



#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::config::CostMode;
    use super::*;

    fn ramp(h: usize, w: usize, slope: f64) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(r, c)| (slope*(r as f64+0.5*c as f64)) as f32)
    }

    #[test]
    fn estimate_is_added_back() {
        let truth = ramp(10, 12, 1.1);
        let wrapped = truth.mapv(|v| wrap(v as f64) as f32);
        let input = Interferogram::new(wrapped.view()).with_estimate(truth.view());
        let out = unwrap(&input, &Params::default()).unwrap();

        for (a, b) in out.phase.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }

        assert_eq!(out.max_flow, 0);
    }

    #[test]
    fn mismatched_mask_is_a_shape_error() {
        let wrapped = Array2::<f32>::zeros((6, 6));
        let mask = Array2::<u8>::ones((6, 5));
        let input = Interferogram::new(wrapped.view()).with_mask(mask.view());

        assert!(matches!(
            unwrap(&input, &Params::default()),
            Err(UnwrapError::Shape { name: "mask", found: (6, 5), expected: (6, 6) })
        ));
    }

    #[test]
    fn precomputed_costs_must_fit_the_tag() {
        let wrapped = Array2::<f32>::zeros((6, 6));
        let mag = Array2::<f32>::ones((6, 6));
        let lp = Params::lp(1.);
        let costs = Costs::derive(
            CostTag::from_params(&lp).unwrap(), &lp, wrapped.view(), mag.view()
        ).unwrap();
        let input = Interferogram::new(wrapped.view()).with_costs(&costs);
        let smooth = Params { cost_mode: CostMode::Smooth, ..Params::default() };

        assert!(matches!(unwrap(&input, &smooth), Err(UnwrapError::Config(_))));
        assert!(unwrap(&input, &lp).is_ok());
    }

    #[test]
    fn fully_masked_input_is_fatal() {
        let wrapped = Array2::<f32>::zeros((6, 6));
        let mask = Array2::<u8>::zeros((6, 6));
        let input = Interferogram::new(wrapped.view()).with_mask(mask.view());

        assert!(matches!(unwrap(&input, &Params::default()), Err(UnwrapError::AllMasked)));
    }

    #[test]
    fn conncomps_follow_the_mask() {
        let wrapped = ramp(8, 11, 0.4).mapv(|v| wrap(v as f64) as f32);
        let mut mask = Array2::<u8>::ones(wrapped.dim());
        mask.column_mut(4).fill(0);

        let mut params = Params::default();
        params.conncomp.enabled = true;
        params.conncomp.min_size_frac = 0.;

        let input = Interferogram::new(wrapped.view()).with_mask(mask.view());
        let out = unwrap(&input, &params).unwrap();
        let comp = out.conncomp.unwrap();

        assert!(comp.column(4).iter().all(|&l| l == 0));
        assert_eq!(comp[[0, 10]], 1);
        assert_eq!(comp[[0, 0]], 2);
    }
}

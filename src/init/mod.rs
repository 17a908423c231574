mod mcf;
mod mst;

use ndarray::prelude::*;
use crate::config::{InitMethod, Params};
use crate::cost::Costs;
use crate::error::Result;
use crate::grid::{flows_from_unwrapped, Flows};

pub use mcf::mcf_flows;
pub use mst::mst_flows;



/// Source of the first feasible flow handed to the optimizer.
#[derive(Clone, Copy, Debug)]
pub enum Initializer<'a> {
    Mst,
    Mcf,
    /// Flows that integrate to an already unwrapped field
    Unwrapped(ArrayView2<'a, f32>)
}

impl From<InitMethod> for Initializer<'_> {
    fn from(method: InitMethod) -> Self {
        match method {
            InitMethod::Mst => Self::Mst,
            InitMethod::Mcf => Self::Mcf
        }
    }
}

pub fn initial_flows(
    init: Initializer,
    wrapped: ArrayView2<f32>,
    costs: &Costs,
    params: &Params
) -> Result<Flows> {
    match init {
        Initializer::Mst => mst_flows(wrapped, costs, params),
        Initializer::Mcf => mcf_flows(wrapped, costs),
        Initializer::Unwrapped(unwrapped) => flows_from_unwrapped(unwrapped, wrapped)
    }
}

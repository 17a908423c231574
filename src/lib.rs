//! Two-dimensional phase unwrapping by nonlinear minimum-cost network flow.
//!
//! Residues of a wrapped phase field are balanced by integer cycle flows on the arcs
//! between pixels. A feasible flow from a minimum spanning tree or a min-cost-flow
//! solve is refined by a tree-based primal optimizer under a statistical or Lp cost,
//! and the result is integrated into an unwrapped phase. Large inputs can be split
//! into overlapping tiles that are solved in parallel and stitched back together.

pub mod bucket;
pub mod config;
pub mod conncomp;
pub mod cost;
pub mod error;
pub mod grid;
pub mod init;
pub mod interrupt;
pub mod mcf;
pub mod node;
pub mod solver;
pub mod topology;
pub mod unwrap;
pub mod util;

pub use config::{ConnCompParams, CostMode, InitMethod, Params, TileParams};
pub use cost::{CostTag, Costs};
pub use error::{Result, UnwrapError};
pub use interrupt::{Interrupt, SolveObserver};
pub use unwrap::{unwrap, unwrap_with, Interferogram, SolveOptions, Unwrapped};

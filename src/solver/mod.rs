//! Nonlinear minimum-cost flow optimizer.
//!
//! A spanning tree is grown over each connected region of unmasked nodes. Every
//! non-tree arc whose reduced cost is negative is pivoted into the tree, pushing
//! flow around its cycle when that lowers the total cost. Rims of masked areas can
//! be collapsed into a single boundary node so the tree reaches around them cheaply.

mod boundary;
mod driver;
mod network;
mod tree;

pub(crate) use driver::optimize;
pub use driver::SolveOutcome;

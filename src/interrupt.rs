use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ndarray::prelude::*;
use crate::grid::Flows;



/// Cooperative cancellation shared between a running solve and whoever controls it.
///
/// A dump request makes the solver hand its current solution to the observer at the
/// next check and carry on. A stop request dumps and then aborts the solve.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    dump: Arc<AtomicBool>,
    stop: Arc<AtomicBool>
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_dump(&self) {
        self.dump.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.dump.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn take_dump(&self) -> bool {
        self.dump.swap(false, Ordering::SeqCst)
    }
}



/// Receives intermediate solver state.
pub trait SolveObserver {
    /// Flows at the end of each flow-increment round.
    fn flows(&mut self, _nflow: i64, _flows: &Flows) {}

    /// Unwrapped phase of the current solution when a dump is requested.
    fn interrupted(&mut self, _phase: ArrayView2<f32>) {}
}

impl SolveObserver for () {}



/// Everything outside the network that the solver reports to or listens on.
pub(crate) struct Hooks<'a> {
    pub interrupt: Option<&'a Interrupt>,
    pub observer: &'a mut dyn SolveObserver,
    /// Set by the tile scheduler when a sibling tile has failed
    pub cancel: Option<&'a AtomicBool>,
    /// Added back to the integrated phase before it is dumped
    pub estimate: Option<ArrayView2<'a, f32>>
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_is_consumed_but_stop_sticks() {
        let int = Interrupt::new();
        let shared = int.clone();

        assert!(!int.take_dump());

        shared.request_dump();

        assert!(int.take_dump());
        assert!(!int.take_dump());
        assert!(!int.stop_requested());

        shared.request_stop();

        assert!(int.take_dump());
        assert!(int.stop_requested());
        assert!(int.stop_requested());
    }
}

use anyhow::Result;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::history::IterationHistory;

// IEEE-754 infinities are used as sentinels by the control scan.
const _: () = assert!(f64::INFINITY > f64::MAX && f64::NEG_INFINITY < f64::MIN);

/// A linear system `A(t) x = b(t)` assembled at a requested time.
pub trait LinearSystem {
    /// Assembles the operator at time `t`.
    fn a(&mut self, history: &IterationHistory, t: f64) -> CsrMatrix<f64>;

    /// Assembles the forcing vector at time `t`.
    fn b(&mut self, history: &IterationHistory, t: f64) -> DVector<f64>;

    /// Hint that the operator returned for the upcoming step equals the one
    /// returned for the previous step, so a factorization may be reused.
    /// Never required for correctness.
    fn is_a_the_same(&self, _history: &IterationHistory) -> bool {
        false
    }
}

/// A linear system driven by an outer stepper through lifecycle hooks.
///
/// Wrappers forward every hook to the system they wrap.
pub trait LinearSystemIteration: LinearSystem {
    /// Number of previous iterands needed to assemble a step.
    fn minimum_lookback(&self) -> usize {
        1
    }

    /// Resets per-solve state. Called once before the first step.
    fn clear(&mut self) {}

    /// Called before `a`/`b` are requested for a step.
    fn on_iteration_start(&mut self, _history: &IterationHistory) -> Result<()> {
        Ok(())
    }

    /// Called once after a step has been solved and recorded.
    fn on_iteration_end(&mut self, _history: &IterationHistory) {}

    /// Called after an exogenous event has modified the latest iterand.
    fn on_after_event(&mut self) {}
}

/// A linear system whose coefficients depend on per-node control inputs.
pub trait ControlledLinearSystem: LinearSystemIteration {
    /// Number of input vectors `set_inputs` expects.
    fn control_dimension(&self) -> usize;

    /// Commits one input vector per control dimension, each with one entry
    /// per spatial node. Subsequent `a`/`b` calls reflect these inputs.
    fn set_inputs(&mut self, inputs: Vec<DVector<f64>>) -> Result<()>;
}

impl<T: LinearSystem + ?Sized> LinearSystem for &mut T {
    fn a(&mut self, history: &IterationHistory, t: f64) -> CsrMatrix<f64> {
        (**self).a(history, t)
    }

    fn b(&mut self, history: &IterationHistory, t: f64) -> DVector<f64> {
        (**self).b(history, t)
    }

    fn is_a_the_same(&self, history: &IterationHistory) -> bool {
        (**self).is_a_the_same(history)
    }
}

impl<T: LinearSystemIteration + ?Sized> LinearSystemIteration for &mut T {
    fn minimum_lookback(&self) -> usize {
        (**self).minimum_lookback()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn on_iteration_start(&mut self, history: &IterationHistory) -> Result<()> {
        (**self).on_iteration_start(history)
    }

    fn on_iteration_end(&mut self, history: &IterationHistory) {
        (**self).on_iteration_end(history)
    }

    fn on_after_event(&mut self) {
        (**self).on_after_event()
    }
}

impl<T: ControlledLinearSystem + ?Sized> ControlledLinearSystem for &mut T {
    fn control_dimension(&self) -> usize {
        (**self).control_dimension()
    }

    fn set_inputs(&mut self, inputs: Vec<DVector<f64>>) -> Result<()> {
        (**self).set_inputs(inputs)
    }
}

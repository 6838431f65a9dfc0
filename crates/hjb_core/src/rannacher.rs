//! Rannacher timestepping: two fully-implicit steps followed by
//! Crank-Nicolson.
//!
//! Crank-Nicolson is second order but rings when the initial data is not
//! smooth (e.g. a payoff kink). Taking the first two steps fully implicitly
//! damps the high-frequency error before switching.
//!
//! For a wrapped operator `L` with `V_τ + L V = f`, step length `h`,
//! previous time `t0` and previous iterand `v0`:
//!
//! ```text
//! implicit:        (I + h·L(t1)) v1 = v0 + h·f(t1)
//! Crank-Nicolson:  (I + h/2·L(t1)) v1 = (I − h/2·L(t0)) v0 + (f(t1) + f(t0))/2
//! ```

use anyhow::Result;
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::HjbError;
use crate::history::{IterationHistory, EPSILON};
use crate::traits::{ControlledLinearSystem, LinearSystem, LinearSystemIteration};

/// Direction in which the stepper advances time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeDirection {
    Forward,
    /// From expiry back towards the valuation time.
    #[default]
    Backward,
}

impl TimeDirection {
    /// Directed elapsed time from `t0` to `t1`.
    ///
    /// # Panics
    /// If the elapsed time does not exceed [`EPSILON`].
    pub fn elapsed(self, t1: f64, t0: f64) -> f64 {
        let dt = match self {
            TimeDirection::Forward => t1 - t0,
            TimeDirection::Backward => t0 - t1,
        };
        assert!(
            dt > EPSILON,
            "non-positive timestep: {self:?} step from {t0} to {t1} has length {dt}"
        );
        dt
    }

    /// Sign applied to step lengths when generating times.
    pub fn sign(self) -> f64 {
        match self {
            TimeDirection::Forward => 1.0,
            TimeDirection::Backward => -1.0,
        }
    }
}

/// What the scheme does after an exogenous event modifies the iterand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AfterEvent {
    /// Keep the current scheme; assumes events do not introduce new
    /// non-smoothness.
    #[default]
    KeepScheme,
    /// Re-arm the implicit smoothing steps.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RannacherSettings {
    pub direction: TimeDirection,
    #[serde(default)]
    pub after_event: AfterEvent,
}

impl RannacherSettings {
    pub fn forward() -> Self {
        Self {
            direction: TimeDirection::Forward,
            ..Self::default()
        }
    }

    pub fn backward() -> Self {
        Self {
            direction: TimeDirection::Backward,
            ..Self::default()
        }
    }
}

/// Discretization used for the upcoming step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    Implicit1,
    Implicit2,
    CrankNicolson,
}

/// Internal state. The first Crank-Nicolson step is tracked separately
/// since its matrix always differs from the implicit one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Implicit1,
    Implicit2,
    SwitchToCrankNicolson,
    CrankNicolson,
}

impl Stage {
    fn advance(self) -> Self {
        match self {
            Stage::Implicit1 => Stage::Implicit2,
            Stage::Implicit2 => Stage::SwitchToCrankNicolson,
            Stage::SwitchToCrankNicolson | Stage::CrankNicolson => Stage::CrankNicolson,
        }
    }

    fn scheme(self) -> Scheme {
        match self {
            Stage::Implicit1 => Scheme::Implicit1,
            Stage::Implicit2 => Scheme::Implicit2,
            Stage::SwitchToCrankNicolson | Stage::CrankNicolson => Scheme::CrankNicolson,
        }
    }

    /// Fraction of the step length the new-time operator is weighted with.
    fn theta(self) -> f64 {
        match self.scheme() {
            Scheme::Implicit1 | Scheme::Implicit2 => 1.0,
            Scheme::CrankNicolson => 0.5,
        }
    }
}

/// Rannacher time discretization of a wrapped operator.
pub struct Rannacher<'a, S> {
    domain: &'a dyn Domain,
    op: S,
    settings: RannacherSettings,
    stage: Stage,
}

impl<'a, S: LinearSystemIteration> Rannacher<'a, S> {
    pub fn new(domain: &'a dyn Domain, op: S, settings: RannacherSettings) -> Self {
        Self {
            domain,
            op,
            settings,
            stage: Stage::Implicit1,
        }
    }

    pub fn forward(domain: &'a dyn Domain, op: S) -> Self {
        Self::new(domain, op, RannacherSettings::forward())
    }

    pub fn backward(domain: &'a dyn Domain, op: S) -> Self {
        Self::new(domain, op, RannacherSettings::backward())
    }

    pub fn scheme(&self) -> Scheme {
        self.stage.scheme()
    }

    pub fn settings(&self) -> RannacherSettings {
        self.settings
    }

    pub fn operator(&self) -> &S {
        &self.op
    }

    pub fn operator_mut(&mut self) -> &mut S {
        &mut self.op
    }

    pub fn into_inner(self) -> S {
        self.op
    }
}

impl<S: LinearSystemIteration> LinearSystem for Rannacher<'_, S> {
    fn a(&mut self, history: &IterationHistory, t1: f64) -> CsrMatrix<f64> {
        let h = self.settings.direction.elapsed(t1, history.time(0));
        let weighted = self.op.a(history, t1) * (h * self.stage.theta());
        &self.domain.identity() + &weighted
    }

    fn b(&mut self, history: &IterationHistory, t1: f64) -> DVector<f64> {
        let t0 = history.time(0);
        let h = self.settings.direction.elapsed(t1, t0);
        let v0 = history.iterand(0);

        match self.stage.scheme() {
            Scheme::Implicit1 | Scheme::Implicit2 => v0 + self.op.b(history, t1) * h,
            Scheme::CrankNicolson => {
                // A(t0) first: operators may cache on the last queried time.
                let a0 = self.op.a(history, t0);
                let b0 = self.op.b(history, t0);
                let b1 = self.op.b(history, t1);
                let explicit = &self.domain.identity() - &(a0 * (h / 2.0));
                &explicit * v0 + (b1 + b0) * 0.5
            }
        }
    }

    fn is_a_the_same(&self, history: &IterationHistory) -> bool {
        match self.stage {
            // Implicit1 follows either nothing or a restart from Crank-Nicolson.
            Stage::Implicit1 | Stage::SwitchToCrankNicolson => false,
            _ => history.is_timestep_the_same() && self.op.is_a_the_same(history),
        }
    }
}

impl<S: LinearSystemIteration> LinearSystemIteration for Rannacher<'_, S> {
    fn minimum_lookback(&self) -> usize {
        self.op.minimum_lookback().max(1)
    }

    fn clear(&mut self) {
        self.stage = Stage::Implicit1;
        self.op.clear();
    }

    fn on_iteration_start(&mut self, history: &IterationHistory) -> Result<()> {
        self.op.on_iteration_start(history)
    }

    fn on_iteration_end(&mut self, history: &IterationHistory) {
        self.op.on_iteration_end(history);
        let next = self.stage.advance();
        if next.scheme() != self.stage.scheme() {
            debug!(
                "rannacher: {:?} -> {:?} after t={}",
                self.stage.scheme(),
                next.scheme(),
                history.time(0)
            );
        }
        self.stage = next;
    }

    fn on_after_event(&mut self) {
        self.op.on_after_event();
        if self.settings.after_event == AfterEvent::Restart && self.stage != Stage::Implicit1 {
            debug!("rannacher: event re-arms implicit smoothing");
            self.stage = Stage::Implicit1;
        }
    }
}

impl<S: ControlledLinearSystem> ControlledLinearSystem for Rannacher<'_, S> {
    fn control_dimension(&self) -> usize {
        self.op.control_dimension()
    }

    fn set_inputs(&mut self, inputs: Vec<DVector<f64>>) -> Result<()> {
        if let Some(bad) = inputs.iter().find(|v| v.len() != self.domain.size()) {
            return Err(HjbError::SizeMismatch {
                expected: self.domain.size(),
                actual: bad.len(),
            }
            .into());
        }
        self.op.set_inputs(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RectilinearGrid;
    use crate::operators::TimeIndependentSystem;
    use nalgebra::DMatrix;
    use nalgebra_sparse::convert::serial::{convert_csr_dense, convert_dense_csr};

    fn assert_close(actual: &DMatrix<f64>, expected: &DMatrix<f64>) {
        assert_eq!(actual.shape(), expected.shape());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "got\n{actual}\nexpected\n{expected}");
        }
    }

    fn fixture() -> (RectilinearGrid, DMatrix<f64>, DVector<f64>, DVector<f64>) {
        let grid = RectilinearGrid::from_ticks(vec![0.0, 1.0, 2.0]).unwrap();
        let a0 = DMatrix::from_row_slice(3, 3, &[2.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 2.0]);
        let b0 = DVector::from_vec(vec![0.5, -1.0, 2.0]);
        let v0 = DVector::from_vec(vec![1.0, 3.0, -2.0]);
        (grid, a0, b0, v0)
    }

    /// Operator whose matrix varies in time as `t·I`, with `b(t) = t·1`.
    struct Ramp {
        n: usize,
        queried: Vec<(char, f64)>,
    }

    impl LinearSystem for Ramp {
        fn a(&mut self, _history: &IterationHistory, t: f64) -> CsrMatrix<f64> {
            self.queried.push(('A', t));
            CsrMatrix::identity(self.n) * t
        }

        fn b(&mut self, _history: &IterationHistory, t: f64) -> DVector<f64> {
            self.queried.push(('b', t));
            DVector::from_element(self.n, t)
        }
    }

    impl LinearSystemIteration for Ramp {}

    #[test]
    fn implicit_step_matches_closed_form() {
        let (grid, a0, b0, v0) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0.clone()).unwrap();
        let mut rannacher = Rannacher::backward(&grid, op);
        rannacher.clear();

        let mut history = IterationHistory::new(1.0, v0.clone(), 2);
        history.set_next_time(0.9);

        let a = convert_csr_dense(&rannacher.a(&history, 0.9));
        let b = rannacher.b(&history, 0.9);
        assert_close(&a, &(DMatrix::identity(3, 3) + &a0 * 0.1));
        let expected = &v0 + &b0 * 0.1;
        for i in 0..3 {
            assert!((b[i] - expected[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn crank_nicolson_step_matches_closed_form() {
        let (grid, a0, b0, v0) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0.clone()).unwrap();
        let mut rannacher = Rannacher::backward(&grid, op);
        rannacher.clear();

        let mut history = IterationHistory::new(1.2, DVector::zeros(3), 2);
        history.push(1.1, DVector::zeros(3));
        rannacher.on_iteration_end(&history);
        history.push(1.0, v0.clone());
        rannacher.on_iteration_end(&history);
        assert_eq!(rannacher.scheme(), Scheme::CrankNicolson);

        history.set_next_time(0.9);
        let a = convert_csr_dense(&rannacher.a(&history, 0.9));
        let b = rannacher.b(&history, 0.9);

        let identity = DMatrix::<f64>::identity(3, 3);
        assert_close(&a, &(&identity + &a0 * 0.05));
        let expected = (&identity - &a0 * 0.05) * &v0 + &b0;
        for i in 0..3 {
            assert!((b[i] - expected[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn forward_direction_uses_positive_elapsed_time() {
        let (grid, a0, b0, v0) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0.clone()).unwrap();
        let mut rannacher = Rannacher::forward(&grid, op);

        let mut history = IterationHistory::new(0.0, v0.clone(), 2);
        history.set_next_time(0.25);
        let a = convert_csr_dense(&rannacher.a(&history, 0.25));
        assert_close(&a, &(DMatrix::identity(3, 3) + &a0 * 0.25));
    }

    #[test]
    fn scheme_sequence_and_reset() {
        let (grid, a0, b0, _) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0).unwrap();
        let mut rannacher = Rannacher::backward(&grid, op);
        let mut history = IterationHistory::new(1.0, DVector::zeros(3), 2);

        for _ in 0..2 {
            rannacher.clear();
            let mut seen = Vec::new();
            for step in 1..=5 {
                seen.push(rannacher.scheme());
                history.push(1.0 - 0.1 * step as f64, DVector::zeros(3));
                rannacher.on_iteration_end(&history);
            }
            assert_eq!(
                seen,
                vec![
                    Scheme::Implicit1,
                    Scheme::Implicit2,
                    Scheme::CrankNicolson,
                    Scheme::CrankNicolson,
                    Scheme::CrankNicolson,
                ]
            );
        }
    }

    #[test]
    fn matrix_reuse_hint_drops_on_scheme_switch() {
        let (grid, a0, b0, _) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0).unwrap();
        let mut rannacher = Rannacher::backward(&grid, op);
        rannacher.clear();

        let mut history = IterationHistory::new(1.0, DVector::zeros(3), 2);
        let mut hints = Vec::new();
        for step in 1..=5 {
            let t = 1.0 - 0.1 * step as f64;
            history.set_next_time(t);
            hints.push(rannacher.is_a_the_same(&history));
            history.push(t, DVector::zeros(3));
            rannacher.on_iteration_end(&history);
        }
        assert_eq!(hints, vec![false, true, false, true, true]);
    }

    #[test]
    fn matrix_reuse_hint_requires_underlying_hint() {
        let grid = RectilinearGrid::from_ticks(vec![0.0, 1.0]).unwrap();
        let mut rannacher = Rannacher::backward(
            &grid,
            Ramp {
                n: 2,
                queried: Vec::new(),
            },
        );
        let mut history = IterationHistory::new(1.0, DVector::zeros(2), 2);
        history.push(0.9, DVector::zeros(2));
        history.set_next_time(0.8);
        assert!(history.is_timestep_the_same());
        assert!(!rannacher.is_a_the_same(&history));
    }

    #[test]
    fn crank_nicolson_queries_old_operator_first() {
        let grid = RectilinearGrid::from_ticks(vec![0.0, 1.0]).unwrap();
        let mut rannacher = Rannacher::backward(
            &grid,
            Ramp {
                n: 2,
                queried: Vec::new(),
            },
        );
        let mut history = IterationHistory::new(2.0, DVector::zeros(2), 2);
        rannacher.on_iteration_end(&history);
        rannacher.on_iteration_end(&history);

        history.set_next_time(1.5);
        let b = rannacher.b(&history, 1.5);
        assert_eq!(
            rannacher.operator().queried,
            vec![('A', 2.0), ('b', 2.0), ('b', 1.5)]
        );
        // (I − 0.25·2I)·0 + (1.5 + 2)/2
        assert!(b.iter().all(|&v| (v - 1.75).abs() < 1e-12));
    }

    #[test]
    #[should_panic(expected = "non-positive timestep")]
    fn zero_step_is_fatal() {
        let (grid, a0, b0, v0) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0).unwrap();
        let mut rannacher = Rannacher::backward(&grid, op);
        let history = IterationHistory::new(1.0, v0, 2);
        rannacher.a(&history, 1.0);
    }

    #[test]
    #[should_panic(expected = "non-positive timestep")]
    fn step_against_direction_is_fatal() {
        let (grid, a0, b0, v0) = fixture();
        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0).unwrap();
        let mut rannacher = Rannacher::forward(&grid, op);
        let history = IterationHistory::new(1.0, v0, 2);
        rannacher.b(&history, 0.5);
    }

    #[test]
    fn events_keep_or_restart_the_scheme() {
        let (grid, a0, b0, _) = fixture();
        let history = IterationHistory::new(1.0, DVector::zeros(3), 2);

        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0.clone()).unwrap();
        let mut keep = Rannacher::backward(&grid, op);
        keep.on_iteration_end(&history);
        keep.on_iteration_end(&history);
        keep.on_after_event();
        assert_eq!(keep.scheme(), Scheme::CrankNicolson);

        let op = TimeIndependentSystem::new(convert_dense_csr(&a0), b0).unwrap();
        let settings = RannacherSettings {
            direction: TimeDirection::Backward,
            after_event: AfterEvent::Restart,
        };
        let mut restart = Rannacher::new(&grid, op, settings);
        restart.on_iteration_end(&history);
        restart.on_iteration_end(&history);
        restart.on_after_event();
        assert_eq!(restart.scheme(), Scheme::Implicit1);

        let mut history = history;
        history.push(0.9, DVector::zeros(3));
        history.set_next_time(0.8);
        assert!(!restart.is_a_the_same(&history));
    }
}

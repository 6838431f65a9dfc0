//! Policy iteration over a discretized control grid.
//!
//! At the start of every step the control grid is scanned exhaustively.
//! For each control node `q` the candidate `A(q)·x − b(q)` is evaluated at
//! the upcoming time, and each spatial node independently keeps the control
//! with the best candidate. The resulting control field is committed to the
//! system, which then supplies `A`/`b` for the step.

use anyhow::Result;
use log::trace;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::HjbError;
use crate::history::IterationHistory;
use crate::traits::{ControlledLinearSystem, LinearSystem, LinearSystemIteration};

/// Whether the per-node candidate is maximized or minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationSense {
    Maximize,
    Minimize,
}

impl OptimizationSense {
    /// Initial best value: the worst possible value for this sense.
    pub fn sentinel(self) -> f64 {
        match self {
            OptimizationSense::Maximize => f64::NEG_INFINITY,
            OptimizationSense::Minimize => f64::INFINITY,
        }
    }

    /// Strict comparison; `NaN` never improves.
    #[inline]
    pub fn improves(self, candidate: f64, best: f64) -> bool {
        match self {
            OptimizationSense::Maximize => candidate > best,
            OptimizationSense::Minimize => candidate < best,
        }
    }
}

/// Outcome of one control-grid scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlScan {
    /// Best candidate value per spatial node.
    pub best: DVector<f64>,
    /// One vector per control dimension holding the optimal coordinate per
    /// spatial node.
    pub controls: Vec<DVector<f64>>,
}

/// Selects the locally optimal control at every spatial node before each
/// step.
pub struct PolicyIteration<'a, S> {
    domain: &'a dyn Domain,
    control_domain: &'a dyn Domain,
    system: S,
    sense: OptimizationSense,
}

impl<'a, S: ControlledLinearSystem> PolicyIteration<'a, S> {
    pub fn new(
        domain: &'a dyn Domain,
        control_domain: &'a dyn Domain,
        system: S,
        sense: OptimizationSense,
    ) -> Result<Self> {
        if control_domain.dimension() != system.control_dimension() {
            return Err(HjbError::ControlDimensionMismatch {
                domain: control_domain.dimension(),
                system: system.control_dimension(),
            }
            .into());
        }
        Ok(Self {
            domain,
            control_domain,
            system,
            sense,
        })
    }

    pub fn maximize(domain: &'a dyn Domain, control_domain: &'a dyn Domain, system: S) -> Result<Self> {
        Self::new(domain, control_domain, system, OptimizationSense::Maximize)
    }

    pub fn minimize(domain: &'a dyn Domain, control_domain: &'a dyn Domain, system: S) -> Result<Self> {
        Self::new(domain, control_domain, system, OptimizationSense::Minimize)
    }

    pub fn sense(&self) -> OptimizationSense {
        self.sense
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut S {
        &mut self.system
    }

    pub fn into_inner(self) -> S {
        self.system
    }

    /// Scans the control grid against `history.iterand(0)` at
    /// `history.next_time()`. Leaves the system holding the inputs of the
    /// last scanned node; `on_iteration_start` commits the optimum.
    pub fn scan(&mut self, history: &IterationHistory) -> Result<ControlScan> {
        let nodes = self.control_domain.size();
        if nodes == 0 {
            return Err(HjbError::EmptyControlGrid.into());
        }

        let n = self.domain.size();
        let dims = self.control_domain.dimension();
        let t = history.next_time();
        let x = history.iterand(0);

        let mut controls = vec![self.domain.zeros(); dims];
        let mut best = DVector::from_element(n, self.sense.sentinel());
        let mut node = vec![0.0; dims];

        for index in 0..nodes {
            self.control_domain.node(index, &mut node);

            let inputs = node.iter().map(|&q| DVector::from_element(n, q)).collect();
            self.system.set_inputs(inputs)?;

            let a = self.system.a(history, t);
            let b = self.system.b(history, t);
            let candidate = &a * x - b;

            for i in 0..n {
                if self.sense.improves(candidate[i], best[i]) {
                    best[i] = candidate[i];
                    for (control, &q) in controls.iter_mut().zip(&node) {
                        control[i] = q;
                    }
                }
            }
        }

        trace!(
            "policy scan at t={t}: {nodes} controls x {n} nodes ({:?})",
            self.sense
        );

        Ok(ControlScan { best, controls })
    }
}

impl<S: ControlledLinearSystem> LinearSystem for PolicyIteration<'_, S> {
    /// Evaluated at the upcoming time regardless of `t`.
    fn a(&mut self, history: &IterationHistory, _t: f64) -> CsrMatrix<f64> {
        self.system.a(history, history.next_time())
    }

    fn b(&mut self, history: &IterationHistory, _t: f64) -> DVector<f64> {
        self.system.b(history, history.next_time())
    }
}

impl<S: ControlledLinearSystem> LinearSystemIteration for PolicyIteration<'_, S> {
    fn minimum_lookback(&self) -> usize {
        self.system.minimum_lookback().max(1)
    }

    fn clear(&mut self) {
        self.system.clear();
    }

    fn on_iteration_start(&mut self, history: &IterationHistory) -> Result<()> {
        self.system.on_iteration_start(history)?;
        let scan = self.scan(history)?;
        self.system.set_inputs(scan.controls)
    }

    fn on_iteration_end(&mut self, history: &IterationHistory) {
        self.system.on_iteration_end(history);
    }

    fn on_after_event(&mut self) {
        self.system.on_after_event();
    }
}

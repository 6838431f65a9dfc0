//! Concrete linear systems.
//!
//! - [`TimeIndependentSystem`]: a fixed `(A, b)` pair.
//! - [`ControlledDiffusion`]: a one-dimensional controlled drift-diffusion
//!   operator `L_q V = -½σ²V_xx - μ(q)V_x + ρV` with forcing `f(q)`,
//!   discretized on a non-uniform axis.

use anyhow::Result;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::domain::Axis;
use crate::error::HjbError;
use crate::history::IterationHistory;
use crate::traits::{ControlledLinearSystem, LinearSystem, LinearSystemIteration};

/// A constant operator and forcing term.
#[derive(Debug, Clone)]
pub struct TimeIndependentSystem {
    a: CsrMatrix<f64>,
    b: DVector<f64>,
}

impl TimeIndependentSystem {
    pub fn new(a: CsrMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        if a.nrows() != a.ncols() {
            return Err(HjbError::SizeMismatch {
                expected: a.nrows(),
                actual: a.ncols(),
            }
            .into());
        }
        if b.len() != a.nrows() {
            return Err(HjbError::SizeMismatch {
                expected: a.nrows(),
                actual: b.len(),
            }
            .into());
        }
        Ok(Self { a, b })
    }
}

impl LinearSystem for TimeIndependentSystem {
    fn a(&mut self, _history: &IterationHistory, _t: f64) -> CsrMatrix<f64> {
        self.a.clone()
    }

    fn b(&mut self, _history: &IterationHistory, _t: f64) -> DVector<f64> {
        self.b.clone()
    }

    fn is_a_the_same(&self, _history: &IterationHistory) -> bool {
        true
    }
}

impl LinearSystemIteration for TimeIndependentSystem {}

/// Coefficient of `(t, x)`.
pub type Coefficient = Box<dyn Fn(f64, f64) -> f64>;

/// Coefficient of `(t, x, q)` where `q` holds one entry per control
/// dimension.
pub type ControlledCoefficient = Box<dyn Fn(f64, f64, &[f64]) -> f64>;

/// One-dimensional controlled drift-diffusion operator.
///
/// Interior rows use central differences for diffusion and upwinding for
/// drift, which keeps `I + hL` an M-matrix for any `h > 0`. Boundary rows
/// keep only the discount term.
pub struct ControlledDiffusion {
    ticks: Vec<f64>,
    discount: Coefficient,
    volatility: Coefficient,
    drift: ControlledCoefficient,
    flow: ControlledCoefficient,
    inputs: Vec<DVector<f64>>,
}

impl ControlledDiffusion {
    /// Creates an operator with all coefficients zero and all inputs zero.
    pub fn new(axis: &Axis, control_dimension: usize) -> Self {
        let n = axis.len();
        Self {
            ticks: axis.ticks().to_vec(),
            discount: Box::new(|_, _| 0.0),
            volatility: Box::new(|_, _| 0.0),
            drift: Box::new(|_, _, _| 0.0),
            flow: Box::new(|_, _, _| 0.0),
            inputs: vec![DVector::zeros(n); control_dimension],
        }
    }

    pub fn with_discount(mut self, f: impl Fn(f64, f64) -> f64 + 'static) -> Self {
        self.discount = Box::new(f);
        self
    }

    pub fn with_volatility(mut self, f: impl Fn(f64, f64) -> f64 + 'static) -> Self {
        self.volatility = Box::new(f);
        self
    }

    pub fn with_drift(mut self, f: impl Fn(f64, f64, &[f64]) -> f64 + 'static) -> Self {
        self.drift = Box::new(f);
        self
    }

    pub fn with_flow(mut self, f: impl Fn(f64, f64, &[f64]) -> f64 + 'static) -> Self {
        self.flow = Box::new(f);
        self
    }

    /// Inputs committed by the last `set_inputs` call.
    pub fn inputs(&self) -> &[DVector<f64>] {
        &self.inputs
    }

    fn control_at(&self, i: usize, q: &mut [f64]) {
        for (slot, input) in q.iter_mut().zip(&self.inputs) {
            *slot = input[i];
        }
    }
}

impl LinearSystem for ControlledDiffusion {
    fn a(&mut self, _history: &IterationHistory, t: f64) -> CsrMatrix<f64> {
        let n = self.ticks.len();
        let mut q = vec![0.0; self.inputs.len()];
        let mut coo = CooMatrix::new(n, n);

        for i in 0..n {
            let x = self.ticks[i];
            let rho = (self.discount)(t, x);
            if i == 0 || i + 1 == n {
                coo.push(i, i, rho);
                continue;
            }

            self.control_at(i, &mut q);
            let sigma = (self.volatility)(t, x);
            let mu = (self.drift)(t, x, &q);
            let dx_minus = x - self.ticks[i - 1];
            let dx_plus = self.ticks[i + 1] - x;
            let span = dx_minus + dx_plus;

            let alpha = sigma * sigma / (dx_minus * span) + (-mu).max(0.0) / dx_minus;
            let beta = sigma * sigma / (dx_plus * span) + mu.max(0.0) / dx_plus;

            coo.push(i, i - 1, -alpha);
            coo.push(i, i, alpha + beta + rho);
            coo.push(i, i + 1, -beta);
        }

        CsrMatrix::from(&coo)
    }

    fn b(&mut self, _history: &IterationHistory, t: f64) -> DVector<f64> {
        let mut q = vec![0.0; self.inputs.len()];
        DVector::from_fn(self.ticks.len(), |i, _| {
            self.control_at(i, &mut q);
            (self.flow)(t, self.ticks[i], &q)
        })
    }
}

impl LinearSystemIteration for ControlledDiffusion {}

impl ControlledLinearSystem for ControlledDiffusion {
    fn control_dimension(&self) -> usize {
        self.inputs.len()
    }

    fn set_inputs(&mut self, inputs: Vec<DVector<f64>>) -> Result<()> {
        if inputs.len() != self.inputs.len() {
            return Err(HjbError::InputCountMismatch {
                expected: self.inputs.len(),
                actual: inputs.len(),
            }
            .into());
        }
        if let Some(bad) = inputs.iter().find(|v| v.len() != self.ticks.len()) {
            return Err(HjbError::SizeMismatch {
                expected: self.ticks.len(),
                actual: bad.len(),
            }
            .into());
        }
        self.inputs = inputs;
        Ok(())
    }
}

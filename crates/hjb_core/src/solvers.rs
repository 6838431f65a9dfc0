use anyhow::{bail, Result};
use log::warn;
use nalgebra::linalg::LU;
use nalgebra::{DVector, Dyn};
use nalgebra_sparse::convert::serial::convert_csr_dense;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::error::HjbError;

/// Solves `A x = b` for a matrix supplied ahead of time.
///
/// `factorize` is skipped by the stepper while the root iteration reports
/// that `A` is unchanged, so implementations should keep whatever they
/// computed from the last matrix.
pub trait LinearSolver {
    fn factorize(&mut self, a: &CsrMatrix<f64>) -> Result<()>;

    /// Solves against the last factorized matrix. `guess` seeds iterative
    /// methods.
    fn solve(&mut self, b: &DVector<f64>, guess: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Dense LU decomposition. Suited to small grids and tests.
#[derive(Default)]
pub struct DenseLuSolver {
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl DenseLuSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for DenseLuSolver {
    fn factorize(&mut self, a: &CsrMatrix<f64>) -> Result<()> {
        if a.nrows() != a.ncols() {
            bail!(HjbError::SizeMismatch {
                expected: a.nrows(),
                actual: a.ncols(),
            });
        }
        let lu = convert_csr_dense(a).lu();
        if !lu.is_invertible() {
            self.lu = None;
            bail!(HjbError::SingularMatrix);
        }
        self.lu = Some(lu);
        Ok(())
    }

    fn solve(&mut self, b: &DVector<f64>, _guess: &DVector<f64>) -> Result<DVector<f64>> {
        let Some(lu) = self.lu.as_ref() else {
            bail!(HjbError::NotFactorized);
        };
        match lu.solve(b) {
            Some(x) => Ok(x),
            None => bail!(HjbError::SingularMatrix),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BiCgStabSettings {
    /// Relative residual `‖b − Ax‖ / ‖b‖` at which iteration stops.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStabSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

impl BiCgStabSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            bail!(HjbError::InvalidSettings("tolerance must be positive".into()));
        }
        if self.max_iterations == 0 {
            bail!(HjbError::InvalidSettings(
                "max_iterations must be greater than zero".into()
            ));
        }
        Ok(())
    }
}

/// Stabilized biconjugate gradient method on the sparse matrix.
pub struct BiCgStabSolver {
    settings: BiCgStabSettings,
    a: Option<CsrMatrix<f64>>,
    iterations: usize,
}

impl BiCgStabSolver {
    pub fn new(settings: BiCgStabSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            a: None,
            iterations: 0,
        })
    }

    /// Iterations taken by the last `solve`.
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

impl LinearSolver for BiCgStabSolver {
    fn factorize(&mut self, a: &CsrMatrix<f64>) -> Result<()> {
        if a.nrows() != a.ncols() {
            bail!(HjbError::SizeMismatch {
                expected: a.nrows(),
                actual: a.ncols(),
            });
        }
        self.a = Some(a.clone());
        Ok(())
    }

    fn solve(&mut self, b: &DVector<f64>, guess: &DVector<f64>) -> Result<DVector<f64>> {
        let Some(a) = self.a.as_ref() else {
            bail!(HjbError::NotFactorized);
        };
        if b.len() != a.nrows() {
            bail!(HjbError::SizeMismatch {
                expected: a.nrows(),
                actual: b.len(),
            });
        }

        self.iterations = 0;
        let b_norm = b.norm();
        if b_norm == 0.0 {
            return Ok(DVector::zeros(b.len()));
        }
        let target = self.settings.tolerance * b_norm;

        let mut x = if guess.len() == b.len() {
            guess.clone()
        } else {
            DVector::zeros(b.len())
        };
        let mut r = b - a * &x;
        if r.norm() <= target {
            return Ok(x);
        }
        let r_hat = r.clone();
        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = DVector::zeros(b.len());
        let mut p = DVector::zeros(b.len());

        for iteration in 1..=self.settings.max_iterations {
            self.iterations = iteration;

            let rho_next = r_hat.dot(&r);
            if rho_next == 0.0 || omega == 0.0 {
                warn!("bicgstab breakdown at iteration {iteration}");
                break;
            }
            let beta = (rho_next / rho) * (alpha / omega);
            p = &r + (&p - &v * omega) * beta;
            v = a * &p;
            alpha = rho_next / r_hat.dot(&v);

            let s = &r - &v * alpha;
            if s.norm() <= target {
                x += &p * alpha;
                return Ok(x);
            }

            let t = a * &s;
            omega = t.dot(&s) / t.dot(&t);
            x += &p * alpha + &s * omega;
            r = s - &t * omega;
            if r.norm() <= target {
                return Ok(x);
            }
            rho = rho_next;
        }

        bail!(HjbError::NotConverged {
            iterations: self.iterations,
            residual: (b - a * &x).norm() / b_norm,
        })
    }
}

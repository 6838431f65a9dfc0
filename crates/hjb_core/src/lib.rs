//! The `hjb_core` crate provides the timestepping stages used to solve discretized
//! Hamilton-Jacobi-Bellman and quasi-variational-inequality problems.
//!
//! Key components:
//! - **Traits**: `LinearSystem`, `LinearSystemIteration` (lifecycle hooks), `ControlledLinearSystem`.
//! - **Policy iteration**: exhaustive per-node control optimization before each step.
//! - **Rannacher**: two fully-implicit steps, then Crank-Nicolson.
//! - **Stepper/Solvers**: a constant-step outer loop with dense LU and BiCGSTAB solvers.

pub mod domain;
pub mod error;
pub mod history;
pub mod operators;
pub mod policy;
pub mod rannacher;
pub mod solvers;
pub mod stepper;
pub mod traits;

pub use domain::{Axis, Domain, RectilinearGrid};
pub use error::HjbError;
pub use history::{IterationHistory, EPSILON};
pub use policy::{ControlScan, OptimizationSense, PolicyIteration};
pub use rannacher::{AfterEvent, Rannacher, RannacherSettings, Scheme, TimeDirection};
pub use stepper::{ConstantStepper, StepReport, StepperSettings};
pub use traits::{ControlledLinearSystem, LinearSystem, LinearSystemIteration};

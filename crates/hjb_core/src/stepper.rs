//! Constant-step outer loop driving a root [`LinearSystemIteration`].

use anyhow::{bail, Context, Result};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::HjbError;
use crate::history::IterationHistory;
use crate::rannacher::TimeDirection;
use crate::solvers::LinearSolver;
use crate::traits::LinearSystemIteration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepperSettings {
    pub start_time: f64,
    pub end_time: f64,
    pub steps: usize,
    /// `Backward` starts at `end_time` and finishes at `start_time`.
    pub direction: TimeDirection,
}

impl Default for StepperSettings {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            end_time: 1.0,
            steps: 25,
            direction: TimeDirection::Backward,
        }
    }
}

impl StepperSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.start_time.is_finite() || !self.end_time.is_finite() {
            bail!(HjbError::InvalidSettings("times must be finite".into()));
        }
        if self.end_time <= self.start_time {
            bail!(HjbError::InvalidSettings(
                "end_time must exceed start_time".into()
            ));
        }
        if self.steps == 0 {
            bail!(HjbError::InvalidSettings(
                "steps must be greater than zero".into()
            ));
        }
        Ok(())
    }

    /// Time reached after `n` steps.
    pub fn time_at(&self, n: usize) -> f64 {
        let fraction = n as f64 / self.steps as f64;
        let span = self.end_time - self.start_time;
        match self.direction {
            TimeDirection::Forward => self.start_time + span * fraction,
            TimeDirection::Backward => self.end_time - span * fraction,
        }
    }
}

/// Exogenous modification of the solution at a fixed time.
pub type EventMap = Box<dyn FnMut(&DVector<f64>) -> DVector<f64>>;

struct ScheduledEvent {
    time: f64,
    map: EventMap,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub solution: DVector<f64>,
    /// Time of `solution`.
    pub time: f64,
    pub steps: usize,
    /// Number of times the solver was handed a new matrix.
    pub factorizations: usize,
}

/// Takes `steps` equal steps between the configured times.
pub struct ConstantStepper {
    settings: StepperSettings,
    events: Vec<ScheduledEvent>,
}

impl ConstantStepper {
    pub fn new(settings: StepperSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            events: Vec::new(),
        })
    }

    pub fn settings(&self) -> &StepperSettings {
        &self.settings
    }

    /// Applies `map` to the solution after the first step that reaches or
    /// passes `time`, then notifies the root via `on_after_event`.
    pub fn add_event(&mut self, time: f64, map: impl FnMut(&DVector<f64>) -> DVector<f64> + 'static) {
        self.events.push(ScheduledEvent {
            time,
            map: Box::new(map),
        });
    }

    pub fn solve<I, L>(&mut self, root: &mut I, solver: &mut L, initial: DVector<f64>) -> Result<StepReport>
    where
        I: LinearSystemIteration + ?Sized,
        L: LinearSolver + ?Sized,
    {
        let settings = self.settings;
        let sign = settings.direction.sign();

        root.clear();
        let capacity = root.minimum_lookback() + 1;
        let mut history = IterationHistory::new(settings.time_at(0), initial, capacity);
        let mut factorized = false;
        let mut factorizations = 0;

        for n in 1..=settings.steps {
            let previous = history.time(0);
            let t = settings.time_at(n);
            history.set_next_time(t);

            root.on_iteration_start(&history)
                .with_context(|| format!("failed to start step {n} (t = {t})"))?;

            if !factorized || !root.is_a_the_same(&history) {
                let a = root.a(&history, t);
                solver
                    .factorize(&a)
                    .with_context(|| format!("failed to factorize operator at step {n}"))?;
                factorized = true;
                factorizations += 1;
            }
            let b = root.b(&history, t);
            let x = solver
                .solve(&b, history.iterand(0))
                .with_context(|| format!("failed to solve step {n} (t = {t})"))?;

            history.push(t, x);
            root.on_iteration_end(&history);
            debug!("step {n}/{} reached t={t}", settings.steps);

            for event in &mut self.events {
                let reached = sign * (t - event.time) >= 0.0;
                let before = sign * (previous - event.time) < 0.0;
                if reached && before {
                    let updated = (event.map)(history.iterand(0));
                    history.replace_latest(updated);
                    root.on_after_event();
                    debug!("event scheduled for t={} applied at t={t}", event.time);
                }
            }
        }

        Ok(StepReport {
            solution: history.iterand(0).clone(),
            time: history.time(0),
            steps: settings.steps,
            factorizations,
        })
    }
}

use std::collections::VecDeque;

use nalgebra::DVector;

/// Elapsed times at or below this are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// The lookback window an outer stepper maintains: the most recent
/// `(time, iterand)` pairs, newest first, plus the time the upcoming step
/// will reach.
#[derive(Debug, Clone)]
pub struct IterationHistory {
    times: VecDeque<f64>,
    iterands: VecDeque<DVector<f64>>,
    capacity: usize,
    next_time: f64,
}

impl IterationHistory {
    /// Starts a history at `time` with `iterand`. At least two entries are
    /// kept so that the previous step length is always known.
    pub fn new(time: f64, iterand: DVector<f64>, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut times = VecDeque::with_capacity(capacity);
        let mut iterands = VecDeque::with_capacity(capacity);
        times.push_front(time);
        iterands.push_front(iterand);
        Self {
            times,
            iterands,
            capacity,
            next_time: time,
        }
    }

    /// Timestamp `k` steps behind the current one. Panics if fewer than
    /// `k + 1` entries are stored.
    pub fn time(&self, k: usize) -> f64 {
        self.times[k]
    }

    /// Solution `k` steps behind the current one. Panics if fewer than
    /// `k + 1` entries are stored.
    pub fn iterand(&self, k: usize) -> &DVector<f64> {
        &self.iterands[k]
    }

    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    pub fn set_next_time(&mut self, t: f64) {
        self.next_time = t;
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Records a completed step.
    pub fn push(&mut self, time: f64, iterand: DVector<f64>) {
        if self.times.len() == self.capacity {
            self.times.pop_back();
            self.iterands.pop_back();
        }
        self.times.push_front(time);
        self.iterands.push_front(iterand);
        self.next_time = time;
    }

    /// Overwrites the newest iterand, e.g. after an exogenous event.
    pub fn replace_latest(&mut self, iterand: DVector<f64>) {
        self.iterands[0] = iterand;
    }

    /// True when the upcoming step has the same length as the last one.
    pub fn is_timestep_the_same(&self) -> bool {
        if self.times.len() < 2 {
            return false;
        }
        let upcoming = (self.next_time - self.times[0]).abs();
        let previous = (self.times[0] - self.times[1]).abs();
        (upcoming - previous).abs() <= EPSILON * previous.max(1.0)
    }
}

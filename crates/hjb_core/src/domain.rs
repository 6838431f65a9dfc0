//! Rectilinear domains used for both the spatial grid and the control grid.

use anyhow::Result;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::HjbError;

/// A finite set of nodes, each a point in `dimension()`-dimensional space.
pub trait Domain {
    /// Number of coordinates per node.
    fn dimension(&self) -> usize;

    /// Number of nodes.
    fn size(&self) -> usize;

    /// Writes the coordinates of node `index` into `out`.
    /// `out` must have length `dimension()` and `index < size()`.
    fn node(&self, index: usize, out: &mut [f64]);

    fn zeros(&self) -> DVector<f64> {
        DVector::zeros(self.size())
    }

    fn ones(&self) -> DVector<f64> {
        DVector::from_element(self.size(), 1.0)
    }

    fn identity(&self) -> CsrMatrix<f64> {
        CsrMatrix::identity(self.size())
    }
}

/// Sorted ticks along one coordinate direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    ticks: Vec<f64>,
}

impl Axis {
    pub fn new(ticks: Vec<f64>) -> Result<Self> {
        if ticks.is_empty() {
            return Err(HjbError::InvalidAxis("axis needs at least one tick".into()).into());
        }
        if let Some(bad) = ticks.iter().find(|t| !t.is_finite()) {
            return Err(HjbError::InvalidAxis(format!("tick {bad} is not finite")).into());
        }
        if let Some(pair) = ticks.windows(2).find(|w| w[1] <= w[0]) {
            return Err(HjbError::InvalidAxis(format!(
                "ticks must be strictly increasing ({} then {})",
                pair[0], pair[1]
            ))
            .into());
        }
        Ok(Self { ticks })
    }

    /// `points` evenly spaced ticks from `min` to `max` inclusive.
    pub fn uniform(min: f64, max: f64, points: usize) -> Result<Self> {
        if points == 0 {
            return Err(HjbError::InvalidAxis("uniform axis needs at least one point".into()).into());
        }
        if points == 1 {
            return Self::new(vec![min]);
        }
        let step = (max - min) / (points - 1) as f64;
        let ticks = (0..points)
            .map(|i| if i + 1 == points { max } else { min + step * i as f64 })
            .collect();
        Self::new(ticks)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn ticks(&self) -> &[f64] {
        &self.ticks
    }
}

/// Cartesian product of axes. Node indices run with the first axis varying
/// fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct RectilinearGrid {
    axes: Vec<Axis>,
    size: usize,
}

impl RectilinearGrid {
    pub fn new(axes: Vec<Axis>) -> Self {
        let size = if axes.is_empty() {
            0
        } else {
            axes.iter().map(Axis::len).product()
        };
        Self { axes, size }
    }

    /// Convenience constructor for a one-dimensional grid.
    pub fn from_ticks(ticks: Vec<f64>) -> Result<Self> {
        Ok(Self::new(vec![Axis::new(ticks)?]))
    }

    /// A grid with no nodes; scanning it is an error.
    pub fn empty(dimension: usize) -> Self {
        Self {
            axes: vec![Axis { ticks: Vec::new() }; dimension],
            size: 0,
        }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            grid: self,
            index: 0,
        }
    }
}

impl Domain for RectilinearGrid {
    fn dimension(&self) -> usize {
        self.axes.len()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn node(&self, index: usize, out: &mut [f64]) {
        debug_assert!(index < self.size);
        debug_assert_eq!(out.len(), self.axes.len());
        let mut rest = index;
        for (axis, slot) in self.axes.iter().zip(out.iter_mut()) {
            *slot = axis.ticks[rest % axis.len()];
            rest /= axis.len();
        }
    }
}

/// Restartable enumeration of grid nodes.
pub struct Nodes<'a> {
    grid: &'a RectilinearGrid,
    index: usize,
}

impl Iterator for Nodes<'_> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.grid.size() {
            return None;
        }
        let mut coords = vec![0.0; self.grid.dimension()];
        self.grid.node(self.index, &mut coords);
        self.index += 1;
        Some(coords)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.size().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Nodes<'_> {}

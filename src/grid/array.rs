//! Dense N-dimensional array of optional metric values

use super::Coord;
use crate::{Error, Result};
use rustc_hash::FxHashMap;

/// A named dimension and its sorted, deduplicated coordinate domain.
#[derive(Debug, Clone)]
pub struct Axis {
    name: String,
    domain: Vec<Coord>,
    positions: FxHashMap<Coord, usize>,
}

impl Axis {
    /// Build an axis; `values` are sorted and deduplicated.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = Coord>) -> Self {
        let mut domain: Vec<Coord> = values.into_iter().collect();
        domain.sort();
        domain.dedup();
        let positions = domain
            .iter()
            .enumerate()
            .map(|(i, coord)| (coord.clone(), i))
            .collect();
        Self {
            name: name.into(),
            domain,
            positions,
        }
    }

    /// Axis name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Coordinate values in ascending order.
    #[must_use]
    pub fn domain(&self) -> &[Coord] {
        &self.domain
    }

    /// Number of coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domain.len()
    }

    /// Whether the domain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    /// Index of `coord` in the domain.
    #[must_use]
    pub fn position(&self, coord: &Coord) -> Option<usize> {
        self.positions.get(coord).copied()
    }
}

impl PartialEq for Axis {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain
    }
}

/// Dense row-major array over a list of axes.
///
/// Cells that no record supplied are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedArray {
    axes: Vec<Axis>,
    strides: Vec<usize>,
    cells: Vec<Option<f64>>,
}

impl AggregatedArray {
    /// Allocate an all-missing array.
    ///
    /// # Errors
    ///
    /// Returns error if the product of the axis sizes overflows.
    pub fn new(axes: Vec<Axis>) -> Result<Self> {
        let mut strides = vec![0; axes.len()];
        let mut size: usize = 1;
        for (stride, axis) in strides.iter_mut().zip(&axes).rev() {
            *stride = size;
            size = size.checked_mul(axis.len()).ok_or_else(|| {
                Error::Configuration(format!(
                    "aggregated array over axes {:?} is too large",
                    axes.iter().map(|a| (a.name(), a.len())).collect::<Vec<_>>()
                ))
            })?;
        }
        Ok(Self {
            axes,
            strides,
            cells: vec![None; size],
        })
    }

    /// Axes in storage order.
    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Axis with the given name.
    #[must_use]
    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name() == name)
    }

    /// Size of each axis.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }

    /// Total number of cells, filled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the array has no cells at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells holding a value.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Raw cells in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[Option<f64>] {
        &self.cells
    }

    fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.axes.len() {
            return None;
        }
        let mut offset = 0;
        for ((&i, &stride), axis) in index.iter().zip(&self.strides).zip(&self.axes) {
            if i >= axis.len() {
                return None;
            }
            offset += i * stride;
        }
        Some(offset)
    }

    /// Value at a positional index; `None` when missing or out of range.
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.offset(index).and_then(|o| self.cells[o])
    }

    /// Mutable cell at a positional index.
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut Option<f64>> {
        let offset = self.offset(index)?;
        self.cells.get_mut(offset)
    }

    /// Positional index of a coordinate tuple given in axis order.
    #[must_use]
    pub fn index_of(&self, coords: &[Coord]) -> Option<Vec<usize>> {
        if coords.len() != self.axes.len() {
            return None;
        }
        self.axes
            .iter()
            .zip(coords)
            .map(|(axis, coord)| axis.position(coord))
            .collect()
    }

    /// Value at a coordinate tuple given in axis order.
    #[must_use]
    pub fn lookup(&self, coords: &[Coord]) -> Option<f64> {
        self.index_of(coords).and_then(|index| self.get(&index))
    }

    /// Filled cells as (coordinates in axis order, value), row-major.
    pub fn iter_filled(&self) -> impl Iterator<Item = (Vec<&Coord>, f64)> + '_ {
        self.cells.iter().enumerate().filter_map(|(offset, cell)| {
            let value = (*cell)?;
            let coords = self
                .axes
                .iter()
                .zip(&self.strides)
                .map(|(axis, stride)| &axis.domain[(offset / stride) % axis.len()])
                .collect();
            Some((coords, value))
        })
    }
}

//! Buffer management for the flat ODE state.
//!
//! The flat vector holds the environment first, then for every population its
//! cohort records followed by its staged boundary records. `SystemLayout`
//! records the offsets, `StateArena` owns the buffers, and the view types turn
//! (population, cohort, field) coordinates into slices without copying.

use crate::constants::block_capacity;
use crate::error::{IntegrationError, Result};
use crate::population::SystemState;

/// Offsets of one population inside the flat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationBlock {
    pub offset: usize,
    pub cohort_size: usize,
    pub cohort_count: usize,
    pub boundary_count: usize,
}

impl PopulationBlock {
    pub fn len(&self) -> usize {
        (self.cohort_count + self.boundary_count) * self.cohort_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn boundary_offset(&self) -> usize {
        self.offset + self.cohort_count * self.cohort_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemLayout {
    pub environment_dim: usize,
    pub populations: Vec<PopulationBlock>,
    pub system_size: usize,
}

impl SystemLayout {
    pub fn from_state(state: &SystemState) -> Self {
        let mut offset = state.environment.len();
        let populations = state
            .populations
            .iter()
            .map(|pop| {
                let block = PopulationBlock {
                    offset,
                    cohort_size: pop.cohort_size,
                    cohort_count: pop.cohort_count,
                    boundary_count: pop.boundary_count,
                };
                offset += block.len();
                block
            })
            .collect();
        Self {
            environment_dim: state.environment.len(),
            populations,
            system_size: offset,
        }
    }
}

/// Staged boundary reference values, copied once per cycle.
#[derive(Debug, Clone, Default)]
pub struct Staging {
    references: Vec<Vec<f64>>,
    cohort_sizes: Vec<usize>,
}

impl Staging {
    pub fn from_state(state: &SystemState) -> Self {
        Self {
            references: state.populations.iter().map(|p| p.bpoints.clone()).collect(),
            cohort_sizes: state.populations.iter().map(|p| p.cohort_size).collect(),
        }
    }

    /// Reference record of boundary cohort `index` in population `pop`.
    pub fn reference(&self, pop: usize, index: usize) -> &[f64] {
        let size = self.cohort_sizes[pop];
        &self.references[pop][index * size..(index + 1) * size]
    }

    pub fn population(&self, pop: usize) -> &[f64] {
        &self.references[pop]
    }
}

/// Read-only structured view of a flat state buffer.
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    layout: &'a SystemLayout,
    data: &'a [f64],
    stage: usize,
}

impl<'a> StateView<'a> {
    pub fn new(layout: &'a SystemLayout, data: &'a [f64]) -> Self {
        Self { layout, data, stage: 0 }
    }

    /// Tag the view with the solver stage it was built for.
    pub fn at_stage(mut self, stage: usize) -> Self {
        self.stage = stage;
        self
    }

    /// Stage of the current solver step; 0 outside a step.
    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn time(&self) -> f64 {
        self.data[0]
    }

    pub fn environment(&self) -> &'a [f64] {
        &self.data[..self.layout.environment_dim]
    }

    pub fn population_count(&self) -> usize {
        self.layout.populations.len()
    }

    pub fn cohort_count(&self, pop: usize) -> usize {
        self.layout.populations[pop].cohort_count
    }

    pub fn boundary_count(&self, pop: usize) -> usize {
        self.layout.populations[pop].boundary_count
    }

    /// All cohort records of a population, back to back.
    pub fn cohorts(&self, pop: usize) -> &'a [f64] {
        let block = &self.layout.populations[pop];
        &self.data[block.offset..block.boundary_offset()]
    }

    pub fn cohort(&self, pop: usize, index: usize) -> &'a [f64] {
        let block = &self.layout.populations[pop];
        let start = block.offset + index * block.cohort_size;
        &self.data[start..start + block.cohort_size]
    }

    pub fn boundary(&self, pop: usize, index: usize) -> &'a [f64] {
        let block = &self.layout.populations[pop];
        let start = block.boundary_offset() + index * block.cohort_size;
        &self.data[start..start + block.cohort_size]
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}

/// Writable structured view over a derivative buffer.
pub struct DerivativeView<'a> {
    layout: &'a SystemLayout,
    data: &'a mut [f64],
}

impl<'a> DerivativeView<'a> {
    pub fn new(layout: &'a SystemLayout, data: &'a mut [f64]) -> Self {
        Self { layout, data }
    }

    pub fn environment_mut(&mut self) -> &mut [f64] {
        &mut self.data[..self.layout.environment_dim]
    }

    pub fn cohort_mut(&mut self, pop: usize, index: usize) -> &mut [f64] {
        let block = &self.layout.populations[pop];
        let start = block.offset + index * block.cohort_size;
        &mut self.data[start..start + block.cohort_size]
    }

    pub fn boundary_mut(&mut self, pop: usize, index: usize) -> &mut [f64] {
        let block = &self.layout.populations[pop];
        let start = block.boundary_offset() + index * block.cohort_size;
        &mut self.data[start..start + block.cohort_size]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data[..]
    }
}

/// Resize `buffer` to `len` values, reserving a whole block past it when the
/// current capacity is too small. Capacity never shrinks.
pub fn grow_buffer(buffer: &mut Vec<f64>, len: usize) -> Result<()> {
    if buffer.capacity() <= len {
        let target = block_capacity(len);
        buffer
            .try_reserve_exact(target - buffer.len())
            .map_err(|_| IntegrationError::Allocation { requested: target })?;
    }
    buffer.resize(len, 0.0);
    Ok(())
}

/// Resize a group of buffers to the same length.
pub fn grow_buffers<const N: usize>(buffers: [&mut Vec<f64>; N], len: usize) -> Result<()> {
    for buffer in buffers {
        grow_buffer(buffer, len)?;
    }
    Ok(())
}

/// Flat buffers owned by the driver: start-of-step state, end-of-step state
/// and an interpolation scratch buffer.
#[derive(Debug, Default)]
pub struct StateArena {
    pub layout: SystemLayout,
    pub staging: Staging,
    pub y: Vec<f64>,
    pub y_new: Vec<f64>,
    pub scratch: Vec<f64>,
}

impl StateArena {
    /// Recompute offsets from the current cohort counts, grow the buffers if
    /// needed and load the external state into `y`.
    pub fn prepare(&mut self, state: &SystemState) -> Result<()> {
        self.layout = SystemLayout::from_state(state);
        self.staging = Staging::from_state(state);
        let n = self.layout.system_size;
        grow_buffers([&mut self.y, &mut self.y_new, &mut self.scratch], n)?;
        state.store_flat(&mut self.y);
        self.y_new.copy_from_slice(&self.y);
        Ok(())
    }

    pub fn system_size(&self) -> usize {
        self.layout.system_size
    }

    pub fn capacity(&self) -> usize {
        self.y.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::Population;

    fn system() -> SystemState {
        let mut pop = Population::with_cohorts(2, &[vec![5.0, 1.0], vec![3.0, 2.0]]);
        pop.push_boundary(&[0.5, 0.1], &[0.0, 0.0]);
        SystemState::new(vec![0.0, 7.0]).with_population(pop)
    }

    #[test]
    fn layout_offsets_follow_environment() {
        let layout = SystemLayout::from_state(&system());
        assert_eq!(layout.environment_dim, 2);
        assert_eq!(layout.system_size, 2 + 3 * 2);
        assert_eq!(layout.populations[0].offset, 2);
        assert_eq!(layout.populations[0].boundary_offset(), 6);
    }

    #[test]
    fn views_index_cohorts_and_boundaries() {
        let mut arena = StateArena::default();
        arena.prepare(&system()).expect("prepare");
        let view = StateView::new(&arena.layout, &arena.y);
        assert_eq!(view.environment(), &[0.0, 7.0]);
        assert_eq!(view.cohort(0, 1), &[3.0, 2.0]);
        assert_eq!(view.boundary(0, 0), &[0.5, 0.1]);
        assert_eq!(view.cohorts(0).len(), 4);

        let mut out = vec![0.0; arena.system_size()];
        let mut deriv = DerivativeView::new(&arena.layout, &mut out);
        deriv.boundary_mut(0, 0)[1] = 9.0;
        assert_eq!(out[7], 9.0);
    }

    #[test]
    fn capacity_grows_in_blocks_and_never_shrinks() {
        let mut arena = StateArena::default();
        arena.prepare(&system()).expect("prepare");
        let first = arena.capacity();
        assert!(first >= 256);

        let small = SystemState::new(vec![0.0]);
        arena.prepare(&small).expect("prepare");
        assert_eq!(arena.system_size(), 1);
        assert_eq!(arena.capacity(), first);

        let mut big = Population::new(1);
        for _ in 0..600 {
            big.push_cohort(&[1.0]);
        }
        arena
            .prepare(&SystemState::new(vec![0.0]).with_population(big))
            .expect("prepare");
        assert_eq!(arena.system_size(), 601);
        assert!(arena.capacity() >= 768);
    }
}

//! Data owned by the cohort-management layer.
//!
//! The integration core only copies in and out of these tables at cycle
//! start, step acceptance and intermediate sampling.

use serde::{Deserialize, Serialize};

/// Slot of the abundance ("number") in every cohort record.
pub const NUMBER: usize = 0;

/// One population: existing cohorts followed by the boundary cohorts staged
/// during the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    /// Values per cohort record, abundance included.
    pub cohort_size: usize,
    pub cohort_count: usize,
    pub boundary_count: usize,
    /// `(cohort_count + boundary_count) * cohort_size` values.
    pub records: Vec<f64>,
    /// Reference values of the staged boundary cohorts,
    /// `boundary_count * cohort_size` values.
    pub bpoints: Vec<f64>,
}

impl Population {
    pub fn new(cohort_size: usize) -> Self {
        Self {
            cohort_size,
            cohort_count: 0,
            boundary_count: 0,
            records: Vec::new(),
            bpoints: Vec::new(),
        }
    }

    /// Population with the given existing cohorts and no staged ones.
    pub fn with_cohorts(cohort_size: usize, cohorts: &[Vec<f64>]) -> Self {
        let mut pop = Self::new(cohort_size);
        for cohort in cohorts {
            pop.push_cohort(cohort);
        }
        pop
    }

    pub fn push_cohort(&mut self, record: &[f64]) {
        assert_eq!(record.len(), self.cohort_size, "cohort record size mismatch");
        let at = self.cohort_count * self.cohort_size;
        self.records.splice(at..at, record.iter().copied());
        self.cohort_count += 1;
    }

    /// Stage a boundary cohort. `record` holds the integrated quantities
    /// (abundance and offsets), `reference` the values offsets are taken from.
    pub fn push_boundary(&mut self, record: &[f64], reference: &[f64]) {
        assert_eq!(record.len(), self.cohort_size, "boundary record size mismatch");
        assert_eq!(reference.len(), self.cohort_size, "boundary reference size mismatch");
        self.records.extend_from_slice(record);
        self.bpoints.extend_from_slice(reference);
        self.boundary_count += 1;
    }

    pub fn table_size(&self) -> usize {
        self.cohort_count + self.boundary_count
    }

    pub fn len(&self) -> usize {
        self.table_size() * self.cohort_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cohort(&self, index: usize) -> &[f64] {
        let start = index * self.cohort_size;
        &self.records[start..start + self.cohort_size]
    }

    pub fn boundary(&self, index: usize) -> &[f64] {
        self.cohort(self.cohort_count + index)
    }

    fn boundary_records_mut(&mut self) -> &mut [f64] {
        let start = self.cohort_count * self.cohort_size;
        &mut self.records[start..]
    }

    /// Express staged boundary cohorts as regular cohorts for output:
    /// offsets become means (if the cohort holds any individuals) and are
    /// shifted by the reference values.
    pub fn boundary_to_output(&mut self) {
        let size = self.cohort_size;
        let bpoints = std::mem::take(&mut self.bpoints);
        for (record, reference) in self
            .boundary_records_mut()
            .chunks_exact_mut(size)
            .zip(bpoints.chunks_exact(size))
        {
            let number = record[NUMBER];
            if number > 0.0 {
                for value in record.iter_mut().skip(1) {
                    *value /= number;
                }
            }
            for (value, base) in record.iter_mut().zip(reference).skip(1) {
                *value += base;
            }
        }
        self.bpoints = bpoints;
    }

    /// Permanently convert staged boundary cohorts and merge them into the
    /// regular cohorts; empty ones are zeroed. Nothing is staged afterwards.
    pub fn flush_boundary(&mut self) {
        let size = self.cohort_size;
        let bpoints = std::mem::take(&mut self.bpoints);
        for (record, reference) in self
            .boundary_records_mut()
            .chunks_exact_mut(size)
            .zip(bpoints.chunks_exact(size))
        {
            let number = record[NUMBER];
            if number > 0.0 {
                for k in 1..size {
                    record[k] = reference[k] + record[k] / number;
                }
            } else {
                record.fill(0.0);
            }
        }
        self.cohort_count += self.boundary_count;
        self.boundary_count = 0;
    }
}

/// Environment plus populations. Environment slot 0 is simulation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub environment: Vec<f64>,
    pub populations: Vec<Population>,
}

impl SystemState {
    pub fn new(environment: Vec<f64>) -> Self {
        Self {
            environment,
            populations: Vec::new(),
        }
    }

    pub fn with_population(mut self, population: Population) -> Self {
        self.populations.push(population);
        self
    }

    pub fn time(&self) -> f64 {
        self.environment.first().copied().unwrap_or(0.0)
    }

    /// Flat system size: environment plus every record of every population.
    pub fn system_size(&self) -> usize {
        self.environment.len() + self.populations.iter().map(Population::len).sum::<usize>()
    }

    /// Copy the flat state into the environment and population tables.
    pub fn load_flat(&mut self, flat: &[f64]) {
        let env_dim = self.environment.len();
        self.environment.copy_from_slice(&flat[..env_dim]);
        let mut offset = env_dim;
        for pop in &mut self.populations {
            let len = pop.len();
            pop.records.copy_from_slice(&flat[offset..offset + len]);
            offset += len;
        }
    }

    /// Copy the environment and population tables into a flat buffer.
    pub fn store_flat(&self, flat: &mut [f64]) {
        let env_dim = self.environment.len();
        flat[..env_dim].copy_from_slice(&self.environment);
        let mut offset = env_dim;
        for pop in &self.populations {
            let len = pop.len();
            flat[offset..offset + len].copy_from_slice(&pop.records);
            offset += len;
        }
    }

    pub fn boundary_to_output(&mut self) {
        for pop in &mut self.populations {
            pop.boundary_to_output();
        }
    }

    pub fn flush_boundary(&mut self) {
        for pop in &mut self.populations {
            pop.flush_boundary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged() -> Population {
        let mut pop = Population::with_cohorts(3, &[vec![10.0, 1.0, 2.0]]);
        pop.push_boundary(&[4.0, 2.0, 8.0], &[0.0, 0.5, 1.0]);
        pop.push_boundary(&[0.0, 3.0, 3.0], &[0.0, 0.5, 1.0]);
        pop
    }

    #[test]
    fn flush_converts_offsets_and_clears_empty_records() {
        let mut pop = staged();
        pop.flush_boundary();
        assert_eq!(pop.cohort(0), &[10.0, 1.0, 2.0]);
        assert_eq!(pop.cohort(1), &[4.0, 1.0, 3.0]);
        assert_eq!(pop.cohort(2), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn flush_leaves_nothing_staged() {
        let mut pop = staged();
        pop.flush_boundary();
        assert_eq!(pop.cohort_count, 3);
        assert_eq!(pop.boundary_count, 0);
        assert!(pop.bpoints.is_empty());
        assert_eq!(pop.len(), 9);

        let flushed = pop.records.clone();
        pop.flush_boundary();
        pop.boundary_to_output();
        assert_eq!(pop.records, flushed);

        // New staging starts from a clean slate.
        pop.push_boundary(&[2.0, 4.0, 0.0], &[0.0, 1.0, 1.0]);
        pop.flush_boundary();
        assert_eq!(pop.cohort(3), &[2.0, 3.0, 1.0]);
        assert_eq!(pop.cohort(1), &[4.0, 1.0, 3.0]);
    }

    #[test]
    fn output_transform_keeps_empty_records_shifted() {
        let mut pop = staged();
        pop.boundary_to_output();
        assert_eq!(pop.boundary(0), &[4.0, 1.0, 3.0]);
        assert_eq!(pop.boundary(1), &[0.0, 3.5, 4.0]);
    }

    #[test]
    fn flat_round_trip_preserves_layout() {
        let state = SystemState::new(vec![0.5, 2.0]).with_population(staged());
        let mut flat = vec![0.0; state.system_size()];
        state.store_flat(&mut flat);
        assert_eq!(flat.len(), 2 + 9);
        assert_eq!(flat[2..5], [10.0, 1.0, 2.0]);

        let mut other = state.clone();
        flat[0] = 1.5;
        other.load_flat(&flat);
        assert_eq!(other.time(), 1.5);
        assert_eq!(other.populations[0].records, state.populations[0].records);
    }
}

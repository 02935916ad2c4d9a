//! In-memory sample store and the sample-library contract a harness drives.

use std::path::Path;

use ndarray::Array2;

use crate::error::{DatasetError, Result};
use crate::sample::{Sample, TokenId};
use crate::table::read_table;

/// The load/unload contract a benchmark harness calls on its sample library.
pub trait QuerySampleLibrary {
    /// Number of samples the harness may draw from.
    fn total_sample_count(&self) -> usize;

    /// Number of samples to keep resident during a performance run.
    fn performance_sample_count(&self) -> usize;

    /// Makes the given samples available for queries.
    fn load_samples_to_ram(&self, indices: &[usize]) -> Result<()>;

    /// Releases the given samples.
    fn unload_samples_from_ram(&self, indices: &[usize]) -> Result<()>;
}

/// Ordered, immutable collection of loaded samples.
#[derive(Debug, Clone)]
pub struct SampleStore {
    samples: Vec<Sample>,
    perf_count: usize,
}

impl SampleStore {
    /// Builds a store from samples already in memory.
    ///
    /// Keeps at most `max_samples` samples. `perf_count_override` of `None`
    /// or `Some(0)` falls back to the number of samples kept.
    pub fn from_samples(
        mut samples: Vec<Sample>,
        max_samples: usize,
        perf_count_override: Option<usize>,
    ) -> Self {
        samples.truncate(max_samples);
        let perf_count = perf_count_override
            .filter(|&n| n > 0)
            .unwrap_or(samples.len());
        Self {
            samples,
            perf_count,
        }
    }

    /// Loads the sample table at `path`.
    pub fn load<P: AsRef<Path>>(
        path: P,
        max_samples: usize,
        perf_count_override: Option<usize>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let samples = read_table(path)?;
        let available = samples.len();
        let store = Self::from_samples(samples, max_samples, perf_count_override);
        tracing::info!(
            path = %path.display(),
            available,
            loaded = store.len(),
            perf_count = store.perf_count,
            "finished loading dataset"
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// Returns the sample at `index` or an out-of-range error.
    pub fn sample(&self, index: usize) -> Result<&Sample> {
        self.samples
            .get(index)
            .ok_or(DatasetError::SampleIndexOutOfRange {
                index,
                len: self.samples.len(),
            })
    }

    /// Prompt token ids of sample `index`.
    pub fn tokens(&self, index: usize) -> Result<&[TokenId]> {
        Ok(self.sample(index)?.token_ids())
    }

    /// Prompt of sample `index` as a `[1, len]` tensor.
    pub fn input_ids(&self, index: usize) -> Result<Array2<TokenId>> {
        self.sample(index)?.input_ids()
    }

    /// All-ones attention mask of sample `index`.
    pub fn attention_mask(&self, index: usize) -> Result<Array2<TokenId>> {
        Ok(self.sample(index)?.attention_mask())
    }

    /// Prompt length of sample `index`.
    pub fn length(&self, index: usize) -> Result<usize> {
        Ok(self.sample(index)?.len())
    }

    pub fn dataset_name(&self, index: usize) -> Result<&str> {
        Ok(self.sample(index)?.dataset_name())
    }

    pub fn input_text(&self, index: usize) -> Result<&str> {
        Ok(self.sample(index)?.input_text())
    }

    /// Number of samples held, i.e. `min(cap, available)`.
    pub fn total_sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn perf_count(&self) -> usize {
        self.perf_count
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|&&i| i >= self.samples.len()) {
            Some(&index) => Err(DatasetError::SampleIndexOutOfRange {
                index,
                len: self.samples.len(),
            }),
            None => Ok(()),
        }
    }
}

impl QuerySampleLibrary for SampleStore {
    fn total_sample_count(&self) -> usize {
        self.samples.len()
    }

    fn performance_sample_count(&self) -> usize {
        self.perf_count
    }

    // Samples are resident from construction; only the indices are checked.
    fn load_samples_to_ram(&self, indices: &[usize]) -> Result<()> {
        self.check_indices(indices)?;
        tracing::debug!(count = indices.len(), "load samples to ram");
        Ok(())
    }

    fn unload_samples_from_ram(&self, indices: &[usize]) -> Result<()> {
        self.check_indices(indices)?;
        tracing::debug!(count = indices.len(), "unload samples from ram");
        Ok(())
    }
}

//! Benchmark dataset: samples, tokenizer and output post-processing in one
//! value built once at startup.

use std::path::PathBuf;

use ndarray::ArrayView2;

use crate::error::{DatasetError, Result};
use crate::hub::DEFAULT_MODEL;
use crate::postprocess::{OutputFormat, OutputWriter, PostProcessor, TrimConfig, DEFAULT_OUTPUT_DIR};
use crate::sample::{QueryId, TokenId};
use crate::store::{QuerySampleLibrary, SampleStore};
use crate::tokenizer::{TokenizerAdapter, TokenizerOptions};

/// Default cap on the number of samples loaded.
pub const TOTAL_SAMPLE_COUNT: usize = 15000;

/// The only supported device; tensors live in host memory.
pub const CPU_DEVICE: &str = "cpu";

/// Builder for configuring a [`Dataset`].
pub struct DatasetBuilder {
    model_name: String,
    dataset_path: Option<PathBuf>,
    total_sample_count: usize,
    perf_count_override: Option<usize>,
    device: String,
    tokenizer_file: Option<PathBuf>,
    tokenizer_options: TokenizerOptions,
    trim_config: TrimConfig,
    output_dir: PathBuf,
    output_format: OutputFormat,
}

impl Default for DatasetBuilder {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            dataset_path: None,
            total_sample_count: TOTAL_SAMPLE_COUNT,
            perf_count_override: None,
            device: CPU_DEVICE.to_string(),
            tokenizer_file: None,
            tokenizer_options: TokenizerOptions::default(),
            trim_config: TrimConfig::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_format: OutputFormat::default(),
        }
    }
}

impl DatasetBuilder {
    /// Sets the HuggingFace model id whose tokenizer is loaded.
    pub fn model(mut self, name: &str) -> Self {
        self.model_name = name.to_string();
        self
    }

    /// Sets the path of the pre-tokenized sample table.
    pub fn dataset_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.dataset_path = Some(path.into());
        self
    }

    /// Caps the number of samples loaded.
    pub fn total_sample_count(mut self, count: usize) -> Self {
        self.total_sample_count = count;
        self
    }

    /// Overrides the performance sample count.
    pub fn perf_count_override(mut self, count: usize) -> Self {
        self.perf_count_override = Some(count);
        self
    }

    /// Sets the execution device tag.
    pub fn device(mut self, device: &str) -> Self {
        self.device = device.to_string();
        self
    }

    /// Loads the tokenizer from a local `tokenizer.json` instead of the Hub.
    pub fn tokenizer_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.tokenizer_file = Some(path.into());
        self
    }

    pub fn tokenizer_options(mut self, options: TokenizerOptions) -> Self {
        self.tokenizer_options = options;
        self
    }

    pub fn trim_config(mut self, config: TrimConfig) -> Self {
        self.trim_config = config;
        self
    }

    /// Sets the directory post-processed batches are written to.
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Validates the configuration, loads the tokenizer and the samples.
    pub fn build(self) -> Result<Dataset> {
        if self.device != CPU_DEVICE {
            return Err(DatasetError::UnsupportedDevice(self.device));
        }
        let dataset_path = self.dataset_path.ok_or(DatasetError::MissingDatasetPath)?;

        let tokenizer = match &self.tokenizer_file {
            Some(path) => TokenizerAdapter::from_file(path, &self.tokenizer_options)?,
            None => TokenizerAdapter::from_pretrained(&self.model_name, &self.tokenizer_options)?,
        };

        let store = SampleStore::load(
            &dataset_path,
            self.total_sample_count,
            self.perf_count_override,
        )?;

        let post_processor = PostProcessor::new(
            self.trim_config,
            OutputWriter::new(self.output_dir, self.output_format),
        );

        Ok(Dataset {
            model_name: self.model_name,
            dataset_path,
            device: self.device,
            tokenizer,
            store,
            post_processor,
        })
    }
}

/// Loaded benchmark dataset.
#[derive(Debug)]
pub struct Dataset {
    model_name: String,
    dataset_path: PathBuf,
    device: String,
    tokenizer: TokenizerAdapter,
    store: SampleStore,
    post_processor: PostProcessor,
}

impl Dataset {
    /// Creates a builder for configuring the dataset.
    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::default()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dataset_path(&self) -> &std::path::Path {
        &self.dataset_path
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn tokenizer(&self) -> &TokenizerAdapter {
        &self.tokenizer
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.post_processor
    }

    pub fn total_sample_count(&self) -> usize {
        self.store.total_sample_count()
    }

    pub fn perf_count(&self) -> usize {
        self.store.perf_count()
    }

    /// Trims and persists a generated batch.
    ///
    /// Row `i` answers query `query_ids[i]` for sample `sample_indices[i]`;
    /// the sample's dataset label decides whether the stop marker applies.
    pub fn postprocess(
        &self,
        batch: ArrayView2<'_, TokenId>,
        prompt_length: usize,
        query_ids: &[QueryId],
        sample_indices: &[usize],
    ) -> Result<Vec<Vec<TokenId>>> {
        if sample_indices.len() != batch.nrows() {
            return Err(DatasetError::ShapeMismatch {
                what: "sample indices",
                rows: batch.nrows(),
                given: sample_indices.len(),
            });
        }
        let datasets = sample_indices
            .iter()
            .map(|&i| self.store.dataset_name(i))
            .collect::<Result<Vec<_>>>()?;

        self.post_processor
            .postprocess(batch, prompt_length, query_ids, &datasets)
    }
}

impl QuerySampleLibrary for Dataset {
    fn total_sample_count(&self) -> usize {
        self.store.total_sample_count()
    }

    fn performance_sample_count(&self) -> usize {
        self.store.perf_count()
    }

    fn load_samples_to_ram(&self, indices: &[usize]) -> Result<()> {
        self.store.load_samples_to_ram(indices)
    }

    fn unload_samples_from_ram(&self, indices: &[usize]) -> Result<()> {
        self.store.unload_samples_from_ram(indices)
    }
}

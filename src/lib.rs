//! Sample loading and output post-processing for LLM inference benchmarks.
//!
//! This crate loads a pre-tokenized benchmark sample set, exposes per-sample
//! prompt tensors to a harness, and trims generated token batches before
//! persisting them for accuracy scoring.
//!
//! # Quick Start
//!
//! ```no_run
//! use bench_dataset::Dataset;
//!
//! let dataset = Dataset::builder()
//!     .model("mistralai/Mixtral-8x7B-v0.1")
//!     .dataset_path("mixtral_15k.pkl")
//!     .total_sample_count(15000)
//!     .build()
//!     .unwrap();
//!
//! let prompt = dataset.store().input_ids(0).unwrap();
//! println!("{:?}", prompt.shape());
//! ```
//!
//! # Post-processing
//!
//! ```no_run
//! use bench_dataset::{OutputFormat, OutputWriter, PostProcessor, TrimConfig};
//! use ndarray::arr2;
//!
//! let processor = PostProcessor::new(
//!     TrimConfig::default(),
//!     OutputWriter::new("run_outputs", OutputFormat::Pickle),
//! );
//! let batch = arr2(&[[1, 415, 5, 9, 2, 0], [1, 415, 7, 2, 0, 0]]);
//! // Writes run_outputs/q12_13.pkl
//! let trimmed = processor
//!     .postprocess(batch.view(), 2, &[12, 13], &["GSM8K", "MBXP"])
//!     .unwrap();
//! assert_eq!(trimmed, vec![vec![5, 9], vec![7]]);
//! ```

pub mod dataset;
pub mod error;
pub mod hub;
pub mod postprocess;
pub mod sample;
pub mod store;
pub mod table;
pub mod tokenizer;

pub use dataset::{Dataset, DatasetBuilder};
pub use error::{DatasetError, Result};
pub use postprocess::{
    batch_file_name, read_batch_output, trim_trailing_filler, truncate_at_stop, BatchOutput,
    OutputFormat, OutputWriter, PostProcessor, TrimConfig,
};
pub use sample::{QueryId, Sample, TokenId};
pub use store::{QuerySampleLibrary, SampleStore};
pub use table::{read_table, TableFormat};
pub use tokenizer::{TokenizerAdapter, TokenizerOptions};

/// Trims a generated batch and writes it under `run_outputs/` with the
/// default trimming rules.
///
/// `datasets[i]` is the dataset label of row `i`.
///
/// # Example
/// ```no_run
/// let batch = ndarray::arr2(&[[5, 9, 2, 0, 0]]);
/// let out = bench_dataset::postprocess(batch.view(), 0, &[1], &["other"]).unwrap();
/// assert_eq!(out, vec![vec![5, 9]]);
/// ```
pub fn postprocess<S: AsRef<str>>(
    batch: ndarray::ArrayView2<'_, TokenId>,
    prompt_length: usize,
    query_ids: &[QueryId],
    datasets: &[S],
) -> Result<Vec<Vec<TokenId>>> {
    PostProcessor::default().postprocess(batch, prompt_length, query_ids, datasets)
}

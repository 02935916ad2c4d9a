//! Post-processing of generated token batches.
//!
//! A generated batch is a rectangular `[rows, width]` array: every row starts
//! with the same `prompt_length` prompt columns (prompts are left padded) and
//! ends with eos/pad filler up to the batch width. Trimming strips the prompt,
//! the trailing filler and, for one dataset variant, everything after a stop
//! marker. Persisting writes the trimmed rows to one file per batch.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};
use crate::sample::{QueryId, TokenId};

/// Mixtral end-of-sequence id.
pub const EOS_TOKEN_ID: TokenId = 2;

/// Generic pad id.
pub const PAD_TOKEN_ID: TokenId = 0;

/// Code-block terminator emitted by Mixtral for MBXP prompts.
pub const MBXP_STOP_MARKER: [TokenId; 4] = [13, 13940, 28832, 13];

/// Dataset label whose rows are cut at the stop marker.
pub const MBXP_DATASET: &str = "MBXP";

/// Default directory for persisted batches.
pub const DEFAULT_OUTPUT_DIR: &str = "run_outputs";

/// Drops trailing eos/pad filler.
///
/// Stops at the first non-filler value from the end; an all-filler row
/// becomes empty.
pub fn trim_trailing_filler(row: &[TokenId], eos: TokenId, pad: TokenId) -> &[TokenId] {
    let filler = row
        .iter()
        .rev()
        .take_while(|&&t| t == eos || t == pad)
        .count();
    &row[..row.len() - filler]
}

/// Cuts `row` right after the first occurrence of `marker`.
///
/// Returns `row` unchanged if the marker never occurs or is empty.
pub fn truncate_at_stop<'a>(row: &'a [TokenId], marker: &[TokenId]) -> &'a [TokenId] {
    if marker.is_empty() {
        return row;
    }
    match row.windows(marker.len()).position(|w| w == marker) {
        Some(start) => &row[..start + marker.len()],
        None => row,
    }
}

/// Token ids and labels that drive trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimConfig {
    pub eos_token_id: TokenId,
    pub pad_token_id: TokenId,
    pub stop_marker: Vec<TokenId>,
    /// Only rows carrying this dataset label are cut at `stop_marker`.
    pub stop_dataset: String,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            eos_token_id: EOS_TOKEN_ID,
            pad_token_id: PAD_TOKEN_ID,
            stop_marker: MBXP_STOP_MARKER.to_vec(),
            stop_dataset: MBXP_DATASET.to_string(),
        }
    }
}

impl TrimConfig {
    /// Trims one generated row (prompt already removed).
    pub fn trim_row(&self, generated: &[TokenId], dataset: &str) -> Vec<TokenId> {
        let row = trim_trailing_filler(generated, self.eos_token_id, self.pad_token_id);
        let row = if dataset == self.stop_dataset {
            truncate_at_stop(row, &self.stop_marker)
        } else {
            row
        };
        row.to_vec()
    }

    /// Strips the prompt columns from every row of `batch` and trims the rest.
    ///
    /// `datasets[i]` is the dataset label of row `i`.
    pub fn trim_batch<S: AsRef<str>>(
        &self,
        batch: ArrayView2<'_, TokenId>,
        prompt_length: usize,
        datasets: &[S],
    ) -> Result<Vec<Vec<TokenId>>> {
        let (rows, width) = batch.dim();
        if datasets.len() != rows {
            return Err(DatasetError::ShapeMismatch {
                what: "dataset labels",
                rows,
                given: datasets.len(),
            });
        }
        if prompt_length > width {
            return Err(DatasetError::InvalidPromptLength {
                prompt_length,
                width,
            });
        }

        Ok(batch
            .rows()
            .into_iter()
            .zip(datasets)
            .map(|(row, dataset)| {
                let generated: Vec<TokenId> = row.iter().skip(prompt_length).copied().collect();
                self.trim_row(&generated, dataset.as_ref())
            })
            .collect())
    }
}

/// File format of persisted batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Python pickle, readable by the accuracy scripts.
    #[default]
    Pickle,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pickle => "pkl",
            OutputFormat::Json => "json",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "pkl" | "pickle" => Some(OutputFormat::Pickle),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// One post-processed batch as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub query_ids: Vec<QueryId>,
    pub outputs: Vec<Vec<TokenId>>,
}

/// File name for a batch: `q<id1>_<id2>_..._<idN>.<ext>`.
pub fn batch_file_name(query_ids: &[QueryId], format: OutputFormat) -> String {
    let ids: Vec<String> = query_ids.iter().map(|id| id.to_string()).collect();
    format!("q{}.{}", ids.join("_"), format.extension())
}

/// Writes post-processed batches below one directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    format: OutputFormat,
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR, OutputFormat::default())
    }
}

impl OutputWriter {
    pub fn new<P: Into<PathBuf>>(dir: P, format: OutputFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Path a batch with these query ids is written to.
    pub fn path_for(&self, query_ids: &[QueryId]) -> PathBuf {
        self.dir.join(batch_file_name(query_ids, self.format))
    }

    /// Writes `output`, creating the output directory if needed.
    pub fn persist(&self, output: &BatchOutput) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&output.query_ids);

        let mut writer = BufWriter::new(File::create(&path)?);
        match self.format {
            OutputFormat::Pickle => {
                serde_pickle::to_writer(&mut writer, output, serde_pickle::SerOptions::new())?
            }
            OutputFormat::Json => serde_json::to_writer(&mut writer, output)?,
        }
        writer.flush()?;

        tracing::info!(path = %path.display(), rows = output.outputs.len(), "saved outputs");
        Ok(path)
    }
}

/// Reads a batch written by [`OutputWriter::persist`].
pub fn read_batch_output<P: AsRef<Path>>(path: P) -> Result<BatchOutput> {
    let path = path.as_ref();
    let format = OutputFormat::from_path(path)
        .ok_or_else(|| DatasetError::data_load(path, "unknown output file extension"))?;
    let reader = BufReader::new(File::open(path)?);
    match format {
        OutputFormat::Pickle => {
            let value = serde_pickle::value_from_reader(reader, serde_pickle::DeOptions::new())?;
            batch_from_pickle(value, path)
        }
        OutputFormat::Json => Ok(serde_json::from_reader(reader)?),
    }
}

// Query ids above i64::MAX are pickled as Python longs, which the typed
// deserializer rejects; decode them from the value tree instead.
fn batch_from_pickle(value: serde_pickle::Value, path: &Path) -> Result<BatchOutput> {
    use serde_pickle::{HashableValue, Value};

    let malformed =
        |what: &str| DatasetError::data_load(path, format!("malformed output pickle: {what}"));

    let Value::Dict(mut dict) = value else {
        return Err(malformed("expected a dict"));
    };

    let query_ids = match dict.remove(&HashableValue::String("query_ids".to_string())) {
        Some(Value::List(ids)) | Some(Value::Tuple(ids)) => ids
            .into_iter()
            .map(query_id_from_value)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| malformed("query id is not an unsigned 64-bit integer"))?,
        _ => return Err(malformed("missing query_ids")),
    };

    let outputs = dict
        .remove(&HashableValue::String("outputs".to_string()))
        .ok_or_else(|| malformed("missing outputs"))?;
    let outputs = serde_pickle::from_value(outputs)?;

    Ok(BatchOutput { query_ids, outputs })
}

fn query_id_from_value(value: serde_pickle::Value) -> Option<QueryId> {
    match value {
        serde_pickle::Value::I64(id) => QueryId::try_from(id).ok(),
        serde_pickle::Value::Int(id) => QueryId::try_from(&id).ok(),
        _ => None,
    }
}

/// Trims generated batches and persists them for scoring.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    trim: TrimConfig,
    writer: OutputWriter,
}

impl PostProcessor {
    pub fn new(trim: TrimConfig, writer: OutputWriter) -> Self {
        Self { trim, writer }
    }

    pub fn trim_config(&self) -> &TrimConfig {
        &self.trim
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    /// Trims `batch`, writes it under the output directory and returns the
    /// trimmed rows.
    ///
    /// `query_ids[i]` and `datasets[i]` belong to row `i`.
    pub fn postprocess<S: AsRef<str>>(
        &self,
        batch: ArrayView2<'_, TokenId>,
        prompt_length: usize,
        query_ids: &[QueryId],
        datasets: &[S],
    ) -> Result<Vec<Vec<TokenId>>> {
        let rows = batch.nrows();
        if query_ids.len() != rows {
            return Err(DatasetError::ShapeMismatch {
                what: "query ids",
                rows,
                given: query_ids.len(),
            });
        }
        if rows == 0 {
            return Err(DatasetError::EmptyBatch);
        }

        let outputs = self.trim.trim_batch(batch, prompt_length, datasets)?;
        let output = BatchOutput {
            query_ids: query_ids.to_vec(),
            outputs,
        };
        self.writer.persist(&output)?;
        Ok(output.outputs)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, Array2};

    use super::*;

    #[test]
    fn test_trim_trailing_filler() {
        assert_eq!(trim_trailing_filler(&[5, 9, 2, 0, 0], 2, 0), &[5, 9]);
        assert_eq!(trim_trailing_filler(&[5, 2, 9], 2, 0), &[5, 2, 9]);
        assert_eq!(trim_trailing_filler(&[0, 2, 2, 0], 2, 0), &[] as &[TokenId]);
        assert_eq!(trim_trailing_filler(&[], 2, 0), &[] as &[TokenId]);
        // Interior filler is kept.
        assert_eq!(trim_trailing_filler(&[0, 7, 2], 2, 0), &[0, 7]);
    }

    #[test]
    fn test_truncate_at_stop() {
        let row = [5, 9, 13, 13940, 28832, 13, 7, 7];
        assert_eq!(
            truncate_at_stop(&row, &MBXP_STOP_MARKER),
            &[5, 9, 13, 13940, 28832, 13]
        );
        // First occurrence wins.
        let row = [13, 13940, 28832, 13, 1, 13, 13940, 28832, 13];
        assert_eq!(truncate_at_stop(&row, &MBXP_STOP_MARKER), &row[..4]);
        // Partial marker at the end is not a match.
        let row = [4, 13, 13940, 28832];
        assert_eq!(truncate_at_stop(&row, &MBXP_STOP_MARKER), &row);
        assert_eq!(truncate_at_stop(&[13], &MBXP_STOP_MARKER), &[13]);
        assert_eq!(truncate_at_stop(&[1, 2], &[]), &[1, 2]);
    }

    #[test]
    fn test_trim_row_respects_dataset() {
        let config = TrimConfig::default();
        let row = [5, 9, 13, 13940, 28832, 13, 7, 7];
        assert_eq!(config.trim_row(&row, "MBXP"), vec![5, 9, 13, 13940, 28832, 13]);
        assert_eq!(config.trim_row(&row, "GSM8K"), row.to_vec());
        assert_eq!(config.trim_row(&[5, 9, 2, 0, 0], "other"), vec![5, 9]);
    }

    #[test]
    fn test_filler_trim_runs_before_stop() {
        let config = TrimConfig::default();
        let row = [13, 13940, 28832, 13, 2, 0];
        assert_eq!(config.trim_row(&row, "MBXP"), vec![13, 13940, 28832, 13]);
    }

    #[test]
    fn test_custom_stop_marker() {
        let config = TrimConfig {
            stop_marker: vec![99, 98],
            stop_dataset: "HumanEval".to_string(),
            ..TrimConfig::default()
        };
        assert_eq!(config.trim_row(&[1, 99, 98, 4], "HumanEval"), vec![1, 99, 98]);
        assert_eq!(config.trim_row(&[1, 99, 98, 4], "MBXP"), vec![1, 99, 98, 4]);
    }

    #[test]
    fn test_trim_batch_strips_prompt() {
        let batch = arr2(&[
            [0, 0, 11, 12, 5, 9, 2, 0],
            [0, 21, 22, 23, 13, 13940, 28832, 13],
        ]);
        let trimmed = TrimConfig::default()
            .trim_batch(batch.view(), 4, &["OpenOrca", "MBXP"])
            .unwrap();
        assert_eq!(trimmed, vec![vec![5, 9], vec![13, 13940, 28832, 13]]);
    }

    #[test]
    fn test_trim_batch_full_prompt_width() {
        let batch = arr2(&[[1, 2, 3]]);
        let trimmed = TrimConfig::default()
            .trim_batch(batch.view(), 3, &["GSM8K"])
            .unwrap();
        assert_eq!(trimmed, vec![Vec::<TokenId>::new()]);
    }

    #[test]
    fn test_trim_batch_errors() {
        let batch = arr2(&[[1, 2, 3], [4, 5, 6]]);
        let config = TrimConfig::default();
        assert!(matches!(
            config.trim_batch(batch.view(), 0, &["MBXP"]),
            Err(DatasetError::ShapeMismatch {
                rows: 2,
                given: 1,
                ..
            })
        ));
        assert!(matches!(
            config.trim_batch(batch.view(), 4, &["MBXP", "MBXP"]),
            Err(DatasetError::InvalidPromptLength {
                prompt_length: 4,
                width: 3
            })
        ));
    }

    #[test]
    fn test_batch_file_name() {
        assert_eq!(batch_file_name(&[12, 13, 14], OutputFormat::Pickle), "q12_13_14.pkl");
        assert_eq!(batch_file_name(&[7], OutputFormat::Json), "q7.json");
    }

    #[test]
    fn test_postprocess_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("run_outputs");
        let processor = PostProcessor::new(
            TrimConfig::default(),
            OutputWriter::new(&out_dir, OutputFormat::Pickle),
        );

        let batch = arr2(&[[5, 9, 2, 0, 0], [5, 9, 13, 13940, 28832]]);
        let trimmed = processor
            .postprocess(batch.view(), 0, &[3, 4], &["other", "MBXP"])
            .unwrap();
        assert_eq!(trimmed, vec![vec![5, 9], vec![5, 9, 13, 13940, 28832]]);

        let path = out_dir.join("q3_4.pkl");
        assert!(path.is_file());
        let saved = read_batch_output(&path).unwrap();
        assert_eq!(saved.query_ids, vec![3, 4]);
        assert_eq!(saved.outputs, trimmed);
    }

    #[test]
    fn test_postprocess_query_id_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let processor = PostProcessor::new(
            TrimConfig::default(),
            OutputWriter::new(dir.path(), OutputFormat::Json),
        );
        let batch = arr2(&[[1, 2], [3, 4], [5, 6]]);
        let err = processor
            .postprocess(batch.view(), 0, &[1, 2], &["a", "b", "c"])
            .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::ShapeMismatch {
                what: "query ids",
                rows: 3,
                given: 2
            }
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_postprocess_empty_batch() {
        let processor = PostProcessor::default();
        let batch = Array2::<TokenId>::zeros((0, 4));
        let err = processor
            .postprocess(batch.view(), 0, &[], &[] as &[&str])
            .unwrap_err();
        assert!(matches!(err, DatasetError::EmptyBatch));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), OutputFormat::Json);
        let output = BatchOutput {
            query_ids: vec![u64::MAX, 0],
            outputs: vec![vec![], vec![1, 2, 3]],
        };
        let path = writer.persist(&output).unwrap();
        assert_eq!(path.file_name().unwrap(), format!("q{}_0.json", u64::MAX).as_str());
        assert_eq!(read_batch_output(&path).unwrap(), output);
    }

    #[test]
    fn test_pickle_round_trip_large_query_ids() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), OutputFormat::Pickle);
        let output = BatchOutput {
            query_ids: vec![u64::MAX, i64::MAX as u64 + 1, 1],
            outputs: vec![vec![5, 9], vec![], vec![13, 13940, 28832, 13]],
        };
        let path = writer.persist(&output).unwrap();
        assert_eq!(read_batch_output(&path).unwrap(), output);
    }

    #[test]
    fn test_pickle_missing_outputs() {
        use serde_pickle::{HashableValue, Value};

        let mut dict = std::collections::BTreeMap::new();
        dict.insert(
            HashableValue::String("query_ids".to_string()),
            Value::List(vec![Value::I64(1)]),
        );
        let bytes =
            serde_pickle::value_to_vec(&Value::Dict(dict), serde_pickle::SerOptions::new()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q1.pkl");
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            read_batch_output(&path),
            Err(DatasetError::DataLoad { .. })
        ));
    }
}

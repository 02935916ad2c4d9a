//! Reader for the pre-tokenized sample table produced by the data-prep step.
//!
//! The table has three columns: `tok_input` (token ids), `input` (prompt
//! text) and `dataset` (sub-task label). Extra columns are ignored. Layouts
//! are picked by file extension:
//!
//! * `.pkl` / `.pickle`: a pickled column dict (`df.to_dict("list")`) or a
//!   list of record dicts (`df.to_dict("records")`). Pickles that embed numpy
//!   or pandas objects cannot be decoded; convert to plain lists first.
//! * `.json`: a column object or an array of record objects.
//! * `.jsonl` / `.ndjson`: one record object per line.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::error::{DatasetError, Result};
use crate::sample::{Sample, TokenId};

const TOK_INPUT: &str = "tok_input";
const INPUT: &str = "input";
const DATASET: &str = "dataset";

/// On-disk layout of a sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Pickle,
    Json,
    JsonLines,
}

impl TableFormat {
    /// Determines the layout from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pkl" | "pickle" => Some(Self::Pickle),
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    tok_input: Option<Vec<TokenId>>,
    input: Option<String>,
    dataset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawColumns {
    tok_input: Option<Vec<Vec<TokenId>>>,
    input: Option<Vec<String>>,
    dataset: Option<Vec<String>>,
}

/// A decoded table, shaped by its top-level value: a sequence of records or
/// a map of columns.
#[derive(Debug)]
enum RawTable {
    Records(Vec<RawRecord>),
    Columns(RawColumns),
}

impl RawRecord {
    fn into_sample(self, row: usize) -> Result<Sample> {
        let missing = |column| DatasetError::MissingColumn {
            column,
            row: Some(row),
        };
        let token_ids = self.tok_input.ok_or_else(|| missing(TOK_INPUT))?;
        let input = self.input.ok_or_else(|| missing(INPUT))?;
        let dataset = self.dataset.ok_or_else(|| missing(DATASET))?;
        Ok(Sample::new(token_ids, input, dataset))
    }
}

impl RawTable {
    fn into_samples(self, path: &Path) -> Result<Vec<Sample>> {
        match self {
            RawTable::Records(records) => records
                .into_iter()
                .enumerate()
                .map(|(row, record)| record.into_sample(row))
                .collect(),
            RawTable::Columns(columns) => {
                let missing = |column| DatasetError::MissingColumn { column, row: None };
                let tok_input = columns.tok_input.ok_or_else(|| missing(TOK_INPUT))?;
                let input = columns.input.ok_or_else(|| missing(INPUT))?;
                let dataset = columns.dataset.ok_or_else(|| missing(DATASET))?;

                if tok_input.len() != input.len() || tok_input.len() != dataset.len() {
                    return Err(DatasetError::data_load(
                        path,
                        format!(
                            "column lengths differ: {TOK_INPUT}={}, {INPUT}={}, {DATASET}={}",
                            tok_input.len(),
                            input.len(),
                            dataset.len()
                        ),
                    ));
                }

                Ok(tok_input
                    .into_iter()
                    .zip(input)
                    .zip(dataset)
                    .map(|((ids, text), name)| Sample::new(ids, text, name))
                    .collect())
            }
        }
    }
}

/// Reads every sample in the table at `path`, in table order.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Vec<Sample>> {
    let path = path.as_ref();

    if !path.is_file() {
        tracing::warn!(
            path = %path.display(),
            "processed dataset file not found, check that the path is correct"
        );
    }

    let format = TableFormat::from_path(path).ok_or_else(|| {
        DatasetError::data_load(path, "unsupported table format (expected .pkl, .json or .jsonl)")
    })?;

    let file = File::open(path).map_err(|e| DatasetError::data_load(path, e))?;
    let reader = BufReader::new(file);

    match format {
        TableFormat::Pickle => read_pickle(reader, path)?.into_samples(path),
        TableFormat::Json => read_json(reader, path)?.into_samples(path),
        TableFormat::JsonLines => read_json_lines(reader, path),
    }
}

fn read_pickle<R: Read>(reader: R, path: &Path) -> Result<RawTable> {
    use serde_pickle::Value;

    let load_err = |e: serde_pickle::Error| DatasetError::data_load(path, e);
    let value = serde_pickle::value_from_reader(reader, serde_pickle::DeOptions::new())
        .map_err(load_err)?;
    match value {
        Value::List(_) | Value::Tuple(_) => Ok(RawTable::Records(
            serde_pickle::from_value(value).map_err(load_err)?,
        )),
        Value::Dict(_) => Ok(RawTable::Columns(
            serde_pickle::from_value(value).map_err(load_err)?,
        )),
        _ => Err(DatasetError::data_load(
            path,
            "expected a list of records or a dict of columns",
        )),
    }
}

fn read_json<R: Read>(mut reader: R, path: &Path) -> Result<RawTable> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| DatasetError::data_load(path, e))?;
    let load_err = |e: serde_json::Error| DatasetError::data_load(path, e);
    match text.trim_start().chars().next() {
        Some('[') => Ok(RawTable::Records(
            serde_json::from_str(&text).map_err(load_err)?,
        )),
        Some('{') => Ok(RawTable::Columns(
            serde_json::from_str(&text).map_err(load_err)?,
        )),
        _ => Err(DatasetError::data_load(
            path,
            "expected an array of records or an object of columns",
        )),
    }
}

fn read_json_lines<R: BufRead>(reader: R, path: &Path) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DatasetError::data_load(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(line)
            .map_err(|e| DatasetError::data_load(path, format!("line {}: {e}", line_no + 1)))?;
        samples.push(record.into_sample(samples.len())?);
    }
    Ok(samples)
}

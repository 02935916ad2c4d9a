//! Pre-tokenized benchmark samples.

use ndarray::Array2;

use crate::error::Result;

/// Token id as produced by the `tokenizers` crate.
pub type TokenId = u32;

/// Query identifier assigned by the benchmark harness.
pub type QueryId = u64;

/// One pre-tokenized prompt together with its source text and sub-task label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    token_ids: Vec<TokenId>,
    input_text: String,
    dataset_name: String,
}

impl Sample {
    pub fn new(
        token_ids: Vec<TokenId>,
        input_text: impl Into<String>,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            token_ids,
            input_text: input_text.into(),
            dataset_name: dataset_name.into(),
        }
    }

    /// Prompt token ids.
    pub fn token_ids(&self) -> &[TokenId] {
        &self.token_ids
    }

    /// Raw prompt text.
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    /// Source sub-task label, e.g. "MBXP" or "GSM8K".
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Number of prompt tokens.
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }

    /// Prompt as a `[1, len]` tensor.
    pub fn input_ids(&self) -> Result<Array2<TokenId>> {
        Ok(Array2::from_shape_vec(
            (1, self.token_ids.len()),
            self.token_ids.clone(),
        )?)
    }

    /// All-ones attention mask matching [`input_ids`](Self::input_ids).
    ///
    /// Prompts are stored unpadded; padding is left to whoever batches them.
    pub fn attention_mask(&self) -> Array2<TokenId> {
        Array2::ones((1, self.token_ids.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shapes() {
        let sample = Sample::new(vec![1, 415, 2936], "The quick", "GSM8K");
        let ids = sample.input_ids().unwrap();
        assert_eq!(ids.shape(), &[1, 3]);
        assert_eq!(ids.row(0).to_vec(), vec![1, 415, 2936]);

        let mask = sample.attention_mask();
        assert_eq!(mask.shape(), ids.shape());
        assert!(mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_empty_prompt() {
        let sample = Sample::new(Vec::new(), "", "MBXP");
        assert!(sample.is_empty());
        assert_eq!(sample.input_ids().unwrap().shape(), &[1, 0]);
        assert_eq!(sample.attention_mask().shape(), &[1, 0]);
    }
}

//! Tokenizer wrapper fixing the padding conventions used to batch prompts.
//!
//! Prompts are left padded so that generated content starts at the same
//! column in every row, and the pad token is the eos token.

use std::path::Path;

use ndarray::Array2;
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{DatasetError, Result};
use crate::hub::{download_tokenizer, is_valid_model_id};
use crate::sample::TokenId;

/// Maximum prompt length accepted by the benchmark.
pub const MAX_LENGTH: usize = 1024;

/// Mixtral end-of-sequence token.
pub const EOS_TOKEN: &str = "</s>";

/// Settings applied to a freshly loaded tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerOptions {
    pub max_length: usize,
    /// Token used both as end-of-sequence and as padding.
    pub eos_token: String,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            max_length: MAX_LENGTH,
            eos_token: EOS_TOKEN.to_string(),
        }
    }
}

/// A tokenizer configured for left-padded, length-capped batches.
#[derive(Clone)]
pub struct TokenizerAdapter {
    tokenizer: Tokenizer,
    max_length: usize,
    eos_token: String,
    eos_id: TokenId,
}

impl std::fmt::Debug for TokenizerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerAdapter")
            .field("max_length", &self.max_length)
            .field("eos_token", &self.eos_token)
            .field("eos_id", &self.eos_id)
            .finish_non_exhaustive()
    }
}

impl TokenizerAdapter {
    /// Downloads the tokenizer of `model_name` from HuggingFace Hub.
    pub fn from_pretrained(model_name: &str, options: &TokenizerOptions) -> Result<Self> {
        if !is_valid_model_id(model_name) {
            return Err(DatasetError::Tokenizer(
                format!("invalid model id: {model_name}").into(),
            ));
        }
        let path = download_tokenizer(model_name)?;
        Self::from_file(path, options)
    }

    /// Loads a local `tokenizer.json`.
    pub fn from_file<P: AsRef<Path>>(path: P, options: &TokenizerOptions) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())?;
        Self::new(tokenizer, options)
    }

    /// Loads a tokenizer from serialized `tokenizer.json` bytes.
    pub fn from_bytes(bytes: &[u8], options: &TokenizerOptions) -> Result<Self> {
        let tokenizer = Tokenizer::from_bytes(bytes)?;
        Self::new(tokenizer, options)
    }

    /// Applies truncation and left padding with pad token = eos token.
    pub fn new(mut tokenizer: Tokenizer, options: &TokenizerOptions) -> Result<Self> {
        let eos_id = tokenizer.token_to_id(&options.eos_token).ok_or_else(|| {
            DatasetError::Tokenizer(
                format!("eos token {:?} not in vocabulary", options.eos_token).into(),
            )
        })?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: options.max_length,
                ..Default::default()
            }))?
            .with_padding(Some(PaddingParams {
                strategy: PaddingStrategy::BatchLongest,
                direction: PaddingDirection::Left,
                pad_id: eos_id,
                pad_token: options.eos_token.clone(),
                ..Default::default()
            }));

        tracing::debug!(
            max_length = options.max_length,
            eos_token = %options.eos_token,
            eos_id,
            "tokenizer configured"
        );

        Ok(Self {
            tokenizer,
            max_length: options.max_length,
            eos_token: options.eos_token.clone(),
            eos_id,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn eos_id(&self) -> TokenId {
        self.eos_id
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    /// Pad id; always the eos id.
    pub fn pad_id(&self) -> TokenId {
        self.eos_id
    }

    pub fn pad_token(&self) -> &str {
        &self.eos_token
    }

    pub fn padding_left(&self) -> bool {
        self.tokenizer
            .get_padding()
            .is_some_and(|p| matches!(p.direction, PaddingDirection::Left))
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Encodes `texts` into left-padded `[batch, longest]` ids and mask.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<(Array2<TokenId>, Array2<TokenId>)> {
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)?;
        let rows = encodings.len();
        let width = encodings.first().map_or(0, |e| e.len());

        let mut ids = Vec::with_capacity(rows * width);
        let mut mask = Vec::with_capacity(rows * width);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        Ok((
            Array2::from_shape_vec((rows, width), ids)?,
            Array2::from_shape_vec((rows, width), mask)?,
        ))
    }

    /// Decodes a batch of token sequences into text, dropping special tokens.
    pub fn decode_batch(&self, tokens: &[Vec<TokenId>]) -> Result<Vec<String>> {
        let seqs: Vec<&[TokenId]> = tokens.iter().map(Vec::as_slice).collect();
        Ok(self.tokenizer.decode_batch(&seqs, true)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 2, "content": "</s>", "single_word": false, "lstrip": false,
             "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "<s>": 1, "</s>": 2, "hello": 3, "world": 4, "again": 5},
            "unk_token": "<unk>"
        }
    }"#;

    fn adapter() -> TokenizerAdapter {
        TokenizerAdapter::from_bytes(TOKENIZER_JSON.as_bytes(), &TokenizerOptions::default())
            .unwrap()
    }

    #[test]
    fn test_pad_is_eos() {
        let tok = adapter();
        assert_eq!(tok.eos_id(), 2);
        assert_eq!(tok.pad_id(), tok.eos_id());
        assert_eq!(tok.pad_token(), "</s>");
        assert_eq!(tok.max_length(), MAX_LENGTH);
        assert!(tok.padding_left());
    }

    #[test]
    fn test_encode_batch_left_pads() {
        let tok = adapter();
        let (ids, mask) = tok.encode_batch(&["hello", "hello world again"]).unwrap();
        assert_eq!(ids.shape(), &[2, 3]);
        assert_eq!(ids.row(0).to_vec(), vec![2, 2, 3]);
        assert_eq!(ids.row(1).to_vec(), vec![3, 4, 5]);
        assert_eq!(mask.row(0).to_vec(), vec![0, 0, 1]);
        assert_eq!(mask.row(1).to_vec(), vec![1, 1, 1]);
    }

    #[test]
    fn test_truncation() {
        let options = TokenizerOptions {
            max_length: 2,
            ..TokenizerOptions::default()
        };
        let tok = TokenizerAdapter::from_bytes(TOKENIZER_JSON.as_bytes(), &options).unwrap();
        let (ids, _) = tok.encode_batch(&["hello world again"]).unwrap();
        assert_eq!(ids.shape(), &[1, 2]);
    }

    #[test]
    fn test_decode_batch_skips_eos() {
        let tok = adapter();
        let text = tok.decode_batch(&[vec![3, 4, 2], vec![]]).unwrap();
        assert_eq!(text, vec!["hello world".to_string(), String::new()]);
    }

    #[test]
    fn test_unknown_eos_token() {
        let options = TokenizerOptions {
            eos_token: "<|endoftext|>".to_string(),
            ..TokenizerOptions::default()
        };
        let err = TokenizerAdapter::from_bytes(TOKENIZER_JSON.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, DatasetError::Tokenizer(_)));
    }

    #[test]
    fn test_invalid_model_id() {
        let err = TokenizerAdapter::from_pretrained("mixtral", &TokenizerOptions::default())
            .unwrap_err();
        assert!(matches!(err, DatasetError::Tokenizer(_)));
    }
}

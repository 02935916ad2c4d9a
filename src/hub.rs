//! HuggingFace Hub tokenizer downloading.

use std::path::PathBuf;

use hf_hub::api::sync::Api;

use crate::error::Result;

/// Default model whose tokenizer is used for the benchmark.
pub const DEFAULT_MODEL: &str = "mistralai/Mixtral-8x7B-v0.1";

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Downloads `tokenizer.json` for `model_name` from HuggingFace Hub.
///
/// Returns the path of the cached file. Gated repositories need a token in
/// the usual HuggingFace cache location.
pub fn download_tokenizer(model_name: &str) -> Result<PathBuf> {
    let api = Api::new()?;
    let repo = api.model(model_name.to_string());
    let path = repo.get(TOKENIZER_FILE)?;
    tracing::debug!(model = model_name, path = %path.display(), "tokenizer downloaded");
    Ok(path)
}

/// Checks that a model name looks like `owner/name`.
pub fn is_valid_model_id(model_name: &str) -> bool {
    let mut parts = model_name.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}

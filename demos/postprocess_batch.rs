//! Example: Trim a synthetic generated batch built from the first samples.
//!
//! Usage: cargo run --example postprocess_batch -- <samples.pkl> <tokenizer.json> [batch_size]

use std::env;
use std::process::exit;

use bench_dataset::Dataset;
use ndarray::Array2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <samples.pkl> <tokenizer.json> [batch_size]", args[0]);
        exit(1);
    }

    let batch_size: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4);

    let dataset = match Dataset::builder()
        .dataset_path(&args[1])
        .tokenizer_file(&args[2])
        .build()
    {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to load dataset: {e}");
            exit(1);
        }
    };

    let rows = batch_size.min(dataset.total_sample_count());
    if rows == 0 {
        eprintln!("Dataset is empty");
        exit(1);
    }
    let indices: Vec<usize> = (0..rows).collect();
    let store = dataset.store();

    // Left-pad each prompt to the longest one, then append a fake completion
    // followed by eos/pad filler, the way a generated batch comes back.
    let prompt_length = indices
        .iter()
        .filter_map(|&i| store.length(i).ok())
        .max()
        .unwrap_or(0);
    let generated = 8;
    let pad = dataset.tokenizer().pad_id();

    let mut batch = Array2::from_elem((rows, prompt_length + generated), pad);
    for (row, &i) in indices.iter().enumerate() {
        let tokens = store.tokens(i).unwrap_or_default();
        let offset = prompt_length - tokens.len();
        for (col, &t) in tokens.iter().enumerate() {
            batch[[row, offset + col]] = t;
        }
        for col in 0..row % generated {
            batch[[row, prompt_length + col]] = 1000 + col as u32;
        }
    }

    let query_ids: Vec<u64> = indices.iter().map(|&i| i as u64).collect();
    let trimmed = match dataset.postprocess(batch.view(), prompt_length, &query_ids, &indices) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Post-processing failed: {e}");
            exit(1);
        }
    };

    for (i, seq) in indices.iter().zip(&trimmed) {
        let label = store.dataset_name(*i).unwrap_or("?");
        println!("sample {i} ({label}): {} generated tokens {:?}", seq.len(), seq);
    }

    match dataset.tokenizer().decode_batch(&trimmed) {
        Ok(texts) => {
            for text in texts {
                println!("  {text:?}");
            }
        }
        Err(e) => eprintln!("Decoding failed: {e}"),
    }
}

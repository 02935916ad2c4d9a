//! Example: Print per-dataset sample counts and prompt lengths.
//!
//! Usage: cargo run --example inspect_dataset -- <samples.pkl|json|jsonl> [max_samples]

use std::collections::BTreeMap;
use std::env;
use std::process::exit;

use bench_dataset::SampleStore;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <samples.pkl|json|jsonl> [max_samples]", args[0]);
        exit(1);
    }

    let max_samples: usize = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(usize::MAX);

    let store = match SampleStore::load(&args[1], max_samples, None) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load dataset: {e}");
            exit(1);
        }
    };

    // dataset -> (count, total tokens, longest prompt)
    let mut stats: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
    for sample in store.samples() {
        let entry = stats.entry(sample.dataset_name()).or_default();
        entry.0 += 1;
        entry.1 += sample.len();
        entry.2 = entry.2.max(sample.len());
    }

    println!("{} samples, perf count {}", store.total_sample_count(), store.perf_count());
    for (name, (count, tokens, longest)) in stats {
        let mean = tokens as f32 / count as f32;
        println!("{name:>12}: {count:>6} samples, mean {mean:.1} tokens, max {longest}");
    }
}

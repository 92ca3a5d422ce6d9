//! Prints table sizes, stream watermarks, the storage manifest and pending
//! deletions of a model, including its LM when present.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use mmt_lm::NGramStorage;
use mmt_phrasetable::SuffixArray;
use mmt_tools::{init_logging, load_options};

#[derive(Parser)]
#[command(about = "Inspect a phrase-table model directory")]
struct Args {
    #[arg(long)]
    model: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let options = load_options(args.config.as_deref())?;

    let suffix_array = SuffixArray::open(&args.model, &options).context("opening suffix array")?;
    let index = suffix_array.index();
    println!("prefix length: {}", index.prefix_length());
    println!("tables:");
    for (name, size) in index.table_sizes()? {
        println!("  {name:<14} {size}");
    }

    let mut streams: Vec<_> = suffix_array.get_latest_updates_identifier().into_iter().collect();
    streams.sort();
    println!("streams:");
    for (stream, seq) in streams {
        println!("  {stream:<6} {seq}");
    }

    let mut manifest: Vec<_> = index.manifest().into_iter().collect();
    manifest.sort_by_key(|(memory, _)| *memory);
    println!("memories:");
    for (memory, entry) in manifest {
        println!("  {memory:<10} generation {:<5} size {}", entry.generation, entry.size);
    }

    println!("pending deletions:");
    for retired in index.retired()? {
        println!("  {:<10} generation {:<5} size {}", retired.memory, retired.generation, retired.size);
    }
    suffix_array.close()?;

    let lm_dir = args.model.join("lm");
    if lm_dir.is_dir() {
        let storage = NGramStorage::open(&lm_dir, &options).context("opening LM")?;
        println!("lm order: {}", storage.order());
        for (name, size) in storage.store().table_sizes()? {
            println!("  {name:<14} {size}");
        }
        for (memory, generation) in storage.store().retired()? {
            println!("  pending deletion {memory} generation {generation}");
        }
        storage.close()?;
    }
    Ok(())
}

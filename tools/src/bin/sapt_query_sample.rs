//! Reads source phrases (word ids, one per line) from stdin and prints the
//! sampled sentence pairs of each as a JSON line.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use mmt_phrasetable::PhraseTable;
use mmt_tools::{init_logging, load_options, parse_context, parse_words};

#[derive(Parser)]
#[command(about = "Sample sentence pairs containing source phrases")]
struct Args {
    #[arg(long)]
    model: PathBuf,

    /// Maximum samples per phrase, the configured default when 0.
    #[arg(long, default_value_t = 0)]
    sample: usize,

    /// Context as `memory:score,...`.
    #[arg(long)]
    context: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Print translation options instead of raw samples.
    #[arg(long)]
    options: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let options = load_options(args.config.as_deref())?;
    let table = PhraseTable::open(&args.model, &options).context("opening phrase table")?;
    let context = match &args.context {
        Some(arg) => table.normalize_context(&parse_context(arg)?),
        None => Vec::new(),
    };
    let limit = if args.sample == 0 { options.phrasetable.samples } else { args.sample };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in std::io::stdin().lock().lines() {
        let phrase = parse_words(&line?)?;
        if phrase.is_empty() {
            continue;
        }
        let record = if args.options {
            let options = table.get_translation_options(&phrase, limit, &context)?;
            let options: Vec<_> = options
                .iter()
                .map(|o| {
                    json!({
                        "target": o.target_phrase,
                        "alignment": o.alignment,
                        "count": o.count,
                    })
                })
                .collect();
            json!({ "phrase": phrase, "options": options })
        } else {
            let samples = table.suffix_array().get_random_samples(&phrase, limit, &context)?;
            let samples: Vec<_> = samples
                .iter()
                .map(|s| {
                    json!({
                        "memory": s.memory,
                        "source": s.source,
                        "target": s.target,
                        "alignment": s.alignment,
                        "offsets": s.offsets,
                    })
                })
                .collect();
            json!({ "phrase": phrase, "samples": samples })
        };
        writeln!(out, "{record}")?;
    }

    table.close()?;
    Ok(())
}

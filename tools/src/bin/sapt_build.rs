//! Bulk-loads `<memory>.src` / `.trg` / `.aln` files into a phrase table,
//! and optionally the target side into the adaptive LM under `<model>/lm`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use mmt_core::{MemoryId, UpdateId};
use mmt_lm::AdaptiveLm;
use mmt_phrasetable::PhraseTable;
use mmt_tools::{init_logging, load_options, memory_of, parse_alignment, parse_words};

#[derive(Parser)]
#[command(about = "Build a suffix-array phrase table from word-id corpora")]
struct Args {
    /// Model directory, created if missing.
    #[arg(long)]
    model: PathBuf,

    /// Directory of `<memory>.src`, `<memory>.trg` and `<memory>.aln` files.
    #[arg(long)]
    input: PathBuf,

    /// Update buffer size, overriding the configuration.
    #[arg(long)]
    buffer: Option<usize>,

    /// TOML options file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also feed target sentences to the adaptive LM.
    #[arg(long)]
    with_lm: bool,
}

fn lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(file).lines())
}

fn corpora(input: &Path) -> Result<Vec<(MemoryId, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(input).with_context(|| format!("reading {}", input.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "src") {
            match memory_of(&path) {
                Some(memory) => out.push((memory, path)),
                None => bail!("{}: file name is not a memory id", path.display()),
            }
        }
    }
    out.sort();
    Ok(out)
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let mut options = load_options(args.config.as_deref())?;
    if let Some(buffer) = args.buffer {
        options.updates.buffer_size = buffer;
    }

    let table = PhraseTable::open(&args.model, &options).context("opening phrase table")?;
    let lm = if args.with_lm {
        Some(AdaptiveLm::open(args.model.join("lm"), &options).context("opening LM")?)
    } else {
        None
    };

    let started = Instant::now();
    let mut seq = table.get_latest_updates_identifier().get(&0).copied().unwrap_or(-1);
    let mut total = 0usize;
    for (memory, source_path) in corpora(&args.input)? {
        let source = lines(&source_path)?;
        let target = lines(&source_path.with_extension("trg"))?;
        let alignment = lines(&source_path.with_extension("aln"))?;

        let mut units = 0usize;
        for (line, ((s, t), a)) in source.zip(target).zip(alignment).enumerate() {
            let context = || format!("{} line {}", source_path.display(), line + 1);
            let source = parse_words(&s?).with_context(context)?;
            let target = parse_words(&t?).with_context(context)?;
            let alignment = parse_alignment(&a?).with_context(context)?;

            seq += 1;
            if let Some(lm) = &lm {
                lm.add(UpdateId::new(0, seq), memory, target.clone()).with_context(context)?;
            }
            table
                .add(UpdateId::new(0, seq), memory, source, target, alignment)
                .with_context(context)?;
            units += 1;
        }
        info!(memory, units, "memory loaded");
        total += units;
    }

    table.close().context("closing phrase table")?;
    if let Some(lm) = &lm {
        lm.close().context("closing LM")?;
    }
    println!(
        "loaded {total} sentence pairs into {} in {:.1}s",
        args.model.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

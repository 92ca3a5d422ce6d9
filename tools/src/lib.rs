//! Shared helpers of the command line tools: logging setup, configuration
//! loading and parsing of the plain-text corpus formats.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mmt_core::{Alignment, ContextScore, Length, MemoryId, Options, WordId};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, `warn` by default.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

/// Options from a TOML file, or the defaults.
pub fn load_options(path: Option<&Path>) -> Result<Options> {
    match path {
        Some(path) => Options::load_toml(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Options::default()),
    }
}

/// Whitespace-separated word ids.
pub fn parse_words(line: &str) -> Result<Vec<WordId>> {
    line.split_whitespace()
        .map(|token| token.parse::<WordId>().with_context(|| format!("bad word id {token:?}")))
        .collect()
}

/// Whitespace-separated `source-target` pairs.
pub fn parse_alignment(line: &str) -> Result<Alignment> {
    line.split_whitespace()
        .map(|token| {
            let Some((s, t)) = token.split_once('-') else {
                bail!("bad alignment point {token:?}");
            };
            let s: Length = s.parse().with_context(|| format!("bad alignment point {token:?}"))?;
            let t: Length = t.parse().with_context(|| format!("bad alignment point {token:?}"))?;
            Ok((s, t))
        })
        .collect()
}

/// Comma-separated `memory:score` pairs.
pub fn parse_context(arg: &str) -> Result<Vec<ContextScore>> {
    arg.split(',')
        .filter(|item| !item.trim().is_empty())
        .map(|item| {
            let Some((memory, score)) = item.trim().split_once(':') else {
                bail!("bad context entry {item:?}, expected memory:score");
            };
            let memory: MemoryId = memory.parse().with_context(|| format!("bad memory id {memory:?}"))?;
            let score: f32 = score.parse().with_context(|| format!("bad score {score:?}"))?;
            Ok(ContextScore::new(memory, score))
        })
        .collect()
}

/// The memory id of a corpus file named `<memory>.<ext>`.
pub fn memory_of(path: &Path) -> Option<MemoryId> {
    path.file_stem()?.to_str()?.parse().ok()
}

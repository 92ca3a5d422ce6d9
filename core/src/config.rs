//! Engine options.
//!
//! Designed to be deserialized from TOML (via `serde`). Every field has a
//! default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Suffix-array phrase table options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhraseTableOptions {
    /// Number of words per index key (P).
    pub prefix_length: u8,
    /// Maximum number of samples drawn for one source phrase.
    pub samples: usize,
    /// Records reclaimed per garbage-collection write batch.
    pub gc_batch_size: usize,
    /// Polling interval of the garbage collector, in seconds.
    pub gc_timeout_secs: f64,
}

impl Default for PhraseTableOptions {
    fn default() -> Self {
        Self {
            prefix_length: 4,
            samples: 1000,
            gc_batch_size: 100_000,
            gc_timeout_secs: 120.0,
        }
    }
}

/// Adaptive language model options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LmOptions {
    /// Highest n-gram order stored.
    pub order: u8,
    /// Keys reclaimed per garbage-collection write batch.
    pub gc_batch_size: usize,
    /// Polling interval of the garbage collector, in seconds.
    pub gc_timeout_secs: f64,
    /// Entries of the probability cache; 0 disables it.
    pub cache_size: usize,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            order: 5,
            gc_batch_size: 100_000,
            gc_timeout_secs: 120.0,
            cache_size: 10_000,
        }
    }
}

/// Update pipeline options, shared by both models.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Maximum entries buffered in the foreground batch.
    pub buffer_size: usize,
    /// Maximum staleness of a buffered entry, in seconds.
    pub max_delay_secs: f64,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            max_delay_secs: 1.0,
        }
    }
}

impl UpdateOptions {
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Options {
    pub phrasetable: PhraseTableOptions,
    pub lm: LmOptions,
    pub updates: UpdateOptions,
}

impl Options {
    /// Load options from a TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Save options to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Parse and validate options from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Options = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.phrasetable.prefix_length == 0 {
            return Err(Error::Config("phrasetable.prefix_length must be > 0".into()));
        }
        if self.phrasetable.gc_batch_size == 0 || self.lm.gc_batch_size == 0 {
            return Err(Error::Config("gc_batch_size must be > 0".into()));
        }
        if self.lm.order == 0 {
            return Err(Error::Config("lm.order must be > 0".into()));
        }
        if self.updates.buffer_size == 0 {
            return Err(Error::Config("updates.buffer_size must be > 0".into()));
        }
        let intervals = [
            self.phrasetable.gc_timeout_secs,
            self.lm.gc_timeout_secs,
            self.updates.max_delay_secs,
        ];
        if intervals.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::Config("timeouts and delays must be positive".into()));
        }
        Ok(())
    }

    pub fn phrasetable_gc_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.phrasetable.gc_timeout_secs)
    }

    pub fn lm_gc_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lm.gc_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = Options::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.phrasetable.prefix_length, 4);
        assert_eq!(opts.lm.order, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let opts = Options::from_toml_str(
            r#"
            [phrasetable]
            prefix_length = 2

            [updates]
            max_delay_secs = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(opts.phrasetable.prefix_length, 2);
        assert_eq!(opts.phrasetable.samples, 1000);
        assert_eq!(opts.updates.max_delay(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Options::from_toml_str("[lm]\norder = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(Options::from_toml_str("[updates]\nmax_delay_secs = -1.0\n").is_err());
    }

    #[test]
    fn toml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut opts = Options::default();
        opts.lm.cache_size = 0;
        opts.save_toml(&path).unwrap();
        assert_eq!(Options::load_toml(&path).unwrap(), opts);
    }
}

//! Ambient configuration (§4.L): GC tuning, stack limits, and verbosity,
//! loaded from a `sparrow.toml` the same way the teacher project loads its
//! own config — current directory, then the user config directory, then
//! home — falling back to defaults if none is found. This is a
//! driver-level convenience; the library crates never parse TOML.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sparrow_heap::GcConfig;
use sparrow_vm::StackConfig;

pub const CONFIG_FILE_NAME: &str = "sparrow.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GcConfigToml {
    pub initial_threshold: Option<usize>,
    pub threshold: Option<usize>,
    pub ratio: Option<f64>,
    pub penalty_ratio: Option<f64>,
}

impl GcConfigToml {
    pub fn resolve(&self) -> GcConfig {
        let defaults = GcConfig::default();
        GcConfig {
            initial_threshold: self.initial_threshold.unwrap_or(defaults.initial_threshold),
            threshold: self.threshold.unwrap_or(defaults.threshold),
            ratio: self.ratio.unwrap_or(defaults.ratio),
            penalty_ratio: self.penalty_ratio.unwrap_or(defaults.penalty_ratio),
        }
    }

    /// Applies the CLI's `--gc-threshold`/`--gc-ratio` overrides on top of
    /// whatever a config file already set.
    pub fn with_overrides(mut self, threshold: Option<usize>, ratio: Option<f64>) -> Self {
        if threshold.is_some() {
            self.threshold = threshold;
        }
        if ratio.is_some() {
            self.ratio = ratio;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SparrowConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub gc: GcConfigToml,
}

impl Default for SparrowConfig {
    fn default() -> Self {
        Self { verbose: false, stack: StackConfig::default(), gc: GcConfigToml::default() }
    }
}

impl SparrowConfig {
    /// Searches current directory, then the user config directory, then
    /// home, for `sparrow.toml`; falls back to defaults if none exist.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    fn find_config_file() -> Option<PathBuf> {
        let here = PathBuf::from(CONFIG_FILE_NAME);
        if here.exists() {
            return Some(here);
        }
        if let Some(dir) = dirs::config_dir() {
            let candidate = dir.join("sparrow").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        if let Some(dir) = dirs::home_dir() {
            let candidate = dir.join(format!(".{CONFIG_FILE_NAME}"));
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn gc_config(&self) -> GcConfig {
        self.gc.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_stack_bounds() {
        let config = SparrowConfig::default();
        assert!(config.stack.initial_stack_size <= config.stack.max_stack_size);
        assert!(config.stack.max_frames > 0);
    }

    #[test]
    fn loading_a_valid_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "verbose = true\n[stack]\nmax_frames = 10\n").unwrap();
        let config = SparrowConfig::load_from_path(&path).unwrap();
        assert!(config.verbose);
        assert_eq!(config.stack.max_frames, 10);
        assert_eq!(config.stack.initial_stack_size, StackConfig::default().initial_stack_size);
    }

    #[test]
    fn gc_config_toml_falls_back_to_defaults_for_unset_fields() {
        let toml = GcConfigToml { ratio: Some(0.8), ..GcConfigToml::default() };
        let resolved = toml.resolve();
        assert_eq!(resolved.ratio, 0.8);
        assert_eq!(resolved.threshold, GcConfig::default().threshold);
    }

    #[test]
    fn cli_overrides_win_over_file_values() {
        let toml = GcConfigToml { threshold: Some(100), ratio: Some(0.5), ..GcConfigToml::default() };
        let overridden = toml.with_overrides(Some(500), None);
        assert_eq!(overridden.threshold, Some(500));
        assert_eq!(overridden.ratio, Some(0.5));
    }
}

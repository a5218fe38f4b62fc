//! Ambient configuration (§4.L): the interpreter's own stack limits.
//! `StackConfig` is the one piece of configuration the library itself is
//! constructed from directly — everything else (GC tuning, verbosity, the
//! `sparrow.toml` file search) is the embedding CLI's job; this crate never
//! parses TOML.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    #[serde(default = "default_initial_stack_size")]
    pub initial_stack_size: usize,
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            initial_stack_size: default_initial_stack_size(),
            max_stack_size: default_max_stack_size(),
            max_frames: default_max_frames(),
        }
    }
}

fn default_initial_stack_size() -> usize {
    256
}

fn default_max_stack_size() -> usize {
    1 << 20
}

fn default_max_frames() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_stack_bounds() {
        let config = StackConfig::default();
        assert!(config.initial_stack_size <= config.max_stack_size);
        assert!(config.max_frames > 0);
    }
}

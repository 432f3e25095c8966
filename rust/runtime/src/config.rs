//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Container configuration, shared by all clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Record the diagnostic text log.
    pub record_trace: bool,
    /// Bound on run-loop phases a machine may take without dequeuing an
    /// event. Catches raise and goto cycles.
    pub max_steps_per_run: usize,
    /// Seed for the fallback choice generator. `None` draws from OS entropy.
    pub fallback_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            record_trace: true,
            max_steps_per_run: 10_000,
            fallback_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{"fallback_seed": 7}"#).unwrap();
        assert_eq!(cfg.fallback_seed, Some(7));
        assert!(cfg.record_trace);
        assert_eq!(cfg.max_steps_per_run, 10_000);
    }
}

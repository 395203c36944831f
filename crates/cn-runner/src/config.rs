//! Runtime tuning knobs, embeddable in a TOML node configuration.

use cn_dbc::RangePolicy;
use serde::Deserialize;

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunnerConfig {
    /// Report frames with unknown ids instead of silently dropping them.
    #[serde(default)]
    pub strict: bool,
    /// Per-subscriber delivery queue length.
    #[serde(default = "default_subscription_capacity")]
    pub subscription_capacity: usize,
    /// Handling of out-of-range physical values on encode.
    #[serde(default)]
    pub range_policy: RangePolicy,
    /// Period for messages without a cycle time in the database.
    #[serde(default)]
    pub default_period_ms: Option<u64>,
    /// Buffered runtime events per observer before it lags.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_subscription_capacity() -> usize {
    64
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strict: false,
            subscription_capacity: default_subscription_capacity(),
            range_policy: RangePolicy::default(),
            default_period_ms: None,
            event_capacity: default_event_capacity(),
        }
    }
}

//! Watch request options
//!
//! Options arrive from callers and from YAML config, so every field is
//! defaulted and out-of-range values are normalized (with a warning) rather
//! than rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::clamp_watch_timeout;

pub const DEFAULT_DEBOUNCE_MS: i64 = 100;
pub const DEFAULT_REQUIRED_STABLE_CHECKS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Retire after the first successful notification
    #[serde(default = "default_once")]
    pub once: bool,

    /// Wait for the matched node's content to settle before notifying
    #[serde(default)]
    pub stable: bool,

    /// Quiescence window length
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: i64,

    /// Consecutive quiet windows needed to call a node stable
    #[serde(default = "default_required_stable_checks")]
    pub required_stable_checks: i64,

    /// Selector of the root container; the document body when unset
    #[serde(default)]
    pub root: Option<String>,

    /// Give up if nothing was delivered within this many milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_once() -> bool {
    true
}

fn default_debounce_ms() -> i64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_required_stable_checks() -> i64 {
    DEFAULT_REQUIRED_STABLE_CHECKS
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            once: default_once(),
            stable: false,
            debounce_ms: default_debounce_ms(),
            required_stable_checks: default_required_stable_checks(),
            root: None,
            timeout_ms: None,
        }
    }
}

impl WatchOptions {
    /// Defaults with stability gating turned on
    pub fn stable() -> Self {
        Self {
            stable: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.once = false;
        self
    }

    #[must_use]
    pub fn with_debounce_ms(mut self, debounce_ms: i64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    #[must_use]
    pub fn with_required_stable_checks(mut self, checks: i64) -> Self {
        self.required_stable_checks = checks;
        self
    }

    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Resolve into the values the watcher runs with
    pub fn normalize(&self) -> Settings {
        let debounce_ms = if self.debounce_ms < 0 {
            warn!("debounce_ms {} is negative, using 0", self.debounce_ms);
            0
        } else {
            self.debounce_ms as u64
        };

        let required_stable_checks = if self.required_stable_checks < 1 {
            warn!(
                "required_stable_checks {} is below 1, using 1",
                self.required_stable_checks
            );
            1
        } else {
            u32::try_from(self.required_stable_checks).unwrap_or(u32::MAX)
        };

        Settings {
            once: self.once,
            stable: self.stable,
            debounce: Duration::from_millis(debounce_ms),
            required_stable_checks,
            root: self.root.clone(),
            timeout: self.timeout_ms.map(clamp_watch_timeout),
        }
    }
}

/// Normalized options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub once: bool,
    pub stable: bool,
    pub debounce: Duration,
    pub required_stable_checks: u32,
    pub root: Option<String>,
    pub timeout: Option<Duration>,
}

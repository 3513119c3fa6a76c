// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration.
//!
//! Mirrors the reference daemon's own config module shape: an `AppConfig`
//! with `Option<T>` fields and default-baked accessor methods, so an absent
//! environment is a perfectly valid configuration. The document store and
//! transport stay injected collaborators, not config.

use std::env;
use std::time::Duration;

/// Default auto-push interval.
const DEFAULT_AUTO_PUSH_INTERVAL_MS: u64 = 200;
/// Default number of history entries a document keeps before an
/// implementation is free to compact older ones away.
const DEFAULT_HISTORY_COMPACTION_THRESHOLD: usize = 10_000;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:6464";

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub auto_push_interval_ms: Option<u64>,
    pub history_compaction_threshold: Option<usize>,
    pub bind_addr: Option<String>,
}

impl AppConfig {
    /// Read overrides from the process environment (`BRAID_AUTO_PUSH_INTERVAL_MS`,
    /// `BRAID_HISTORY_COMPACTION_THRESHOLD`, `BRAID_BIND_ADDR`). Absence of any
    /// of these is not an error; it simply leaves the corresponding field unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            auto_push_interval_ms: env::var("BRAID_AUTO_PUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            history_compaction_threshold: env::var("BRAID_HISTORY_COMPACTION_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
            bind_addr: env::var("BRAID_BIND_ADDR").ok(),
        }
    }

    /// `self` wins; `other`'s fields only fill in gaps, matching the
    /// reference daemon's CLI-overrides-config-file precedence.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            auto_push_interval_ms: self.auto_push_interval_ms.or(other.auto_push_interval_ms),
            history_compaction_threshold: self
                .history_compaction_threshold
                .or(other.history_compaction_threshold),
            bind_addr: self.bind_addr.or(other.bind_addr),
        }
    }

    #[must_use]
    pub fn auto_push_interval(&self) -> Duration {
        Duration::from_millis(self.auto_push_interval_ms.unwrap_or(DEFAULT_AUTO_PUSH_INTERVAL_MS))
    }

    #[must_use]
    pub fn history_compaction_threshold(&self) -> usize {
        self.history_compaction_threshold
            .unwrap_or(DEFAULT_HISTORY_COMPACTION_THRESHOLD)
    }

    #[must_use]
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_when_nothing_set() {
        let config = AppConfig::default();
        assert_eq!(config.auto_push_interval(), Duration::from_millis(200));
        assert_eq!(config.history_compaction_threshold(), 10_000);
        assert_eq!(config.bind_addr(), "127.0.0.1:6464");
    }

    #[test]
    fn merge_prefers_self_over_other() {
        let specific = AppConfig {
            auto_push_interval_ms: Some(50),
            ..AppConfig::default()
        };
        let fallback = AppConfig {
            auto_push_interval_ms: Some(500),
            bind_addr: Some("0.0.0.0:9000".to_string()),
            ..AppConfig::default()
        };
        let merged = specific.merge(fallback);
        assert_eq!(merged.auto_push_interval_ms, Some(50));
        assert_eq!(merged.bind_addr.as_deref(), Some("0.0.0.0:9000"));
    }
}

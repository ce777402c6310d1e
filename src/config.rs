//! Scan pipeline configuration.
//! Timing and threshold knobs (word-count floor, debounce, rescan cadence)
//! are explicit fields, defaulted at construction and validated once
//! before the engine starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tags whose subtrees are scanned for candidate text.
pub const DEFAULT_TARGET_TAGS: &[&str] = &[
    "p", "div", "article", "section", "h1", "h2", "h3", "h4", "h5", "h6", "li", "td", "span",
    "pre", "blockquote",
];

/// Tags whose text is never rewritten.
pub const DEFAULT_EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "code", "input", "textarea", "select", "button", "label",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Elements considered as scan roots.
    pub target_tags: Vec<String>,
    /// Elements whose text nodes are skipped outright.
    pub excluded_tags: Vec<String>,
    /// Minimum number of word-like tokens a text node must contain.
    pub min_words: usize,
    /// Fraction of a placeholder's box that must enter the viewport
    /// before its text node is dispatched.
    pub intersection_threshold: f64,
    /// Scroll events are coalesced over this window.
    pub scroll_debounce: Duration,
    /// Cadence of the fallback periodic rescan.
    pub rescan_interval: Duration,
    /// The periodic rescan only runs within this window after the most
    /// recent scroll.
    pub rescan_active_window: Duration,
    /// Disable the periodic rescan entirely (scroll + mutation paths
    /// still run).
    pub periodic_rescan: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_tags: DEFAULT_TARGET_TAGS.iter().map(|s| s.to_string()).collect(),
            excluded_tags: DEFAULT_EXCLUDED_TAGS.iter().map(|s| s.to_string()).collect(),
            min_words: 5,
            intersection_threshold: 0.1,
            scroll_debounce: Duration::from_millis(200),
            rescan_interval: Duration::from_secs(1),
            rescan_active_window: Duration::from_secs(5),
            periodic_rescan: true,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ZeroMinWords,
    BadThreshold(f64),
    ZeroDuration(&'static str),
    NoTargets,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroMinWords => write!(f, "min_words must be at least 1"),
            ConfigError::BadThreshold(v) => {
                write!(f, "intersection_threshold {v} outside (0, 1]")
            }
            ConfigError::ZeroDuration(which) => write!(f, "{which} must be non-zero"),
            ConfigError::NoTargets => write!(f, "target_tags is empty"),
        }
    }
}

impl ScanConfig {
    /// Validate once before engine start. The engine refuses to spawn on a
    /// config that would stall (zero timings) or scan nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_words == 0 {
            return Err(ConfigError::ZeroMinWords);
        }
        if !(self.intersection_threshold > 0.0 && self.intersection_threshold <= 1.0) {
            return Err(ConfigError::BadThreshold(self.intersection_threshold));
        }
        if self.scroll_debounce.is_zero() {
            return Err(ConfigError::ZeroDuration("scroll_debounce"));
        }
        if self.rescan_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("rescan_interval"));
        }
        if self.rescan_active_window.is_zero() {
            return Err(ConfigError::ZeroDuration("rescan_active_window"));
        }
        if self.target_tags.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(())
    }

    pub fn is_target_tag(&self, tag: &str) -> bool {
        self.target_tags.iter().any(|t| t == tag)
    }

    pub fn is_excluded_tag(&self, tag: &str) -> bool {
        self.excluded_tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_min_words_rejected() {
        let cfg = ScanConfig {
            min_words: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroMinWords)));
    }

    #[test]
    fn threshold_bounds_enforced() {
        for bad in [0.0, -0.2, 1.5] {
            let cfg = ScanConfig {
                intersection_threshold: bad,
                ..Default::default()
            };
            assert!(matches!(cfg.validate(), Err(ConfigError::BadThreshold(_))));
        }
        let edge = ScanConfig {
            intersection_threshold: 1.0,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn zero_debounce_rejected() {
        let cfg = ScanConfig {
            scroll_debounce: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("scroll_debounce"))
        ));
    }
}

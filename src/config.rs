// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The configuration collaborator (spec.md §6): a reader that yields the
//! "warn on overload" flag and the overload threshold
//! [`crate::looper::Looper`] compares its smoothed iteration time against.
//!
//! No file-format or CLI surface belongs to the Looper core (spec.md §1), so
//! this is deliberately just a `serde`-deserializable struct with sane
//! defaults — the same shape `cmdr`'s config-saving code in this workspace
//! uses `serde_json` for.

use serde::{Deserialize, Serialize};

/// Looper-relevant configuration. Everything else an application reads from
/// its config file is out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Whether to log a warning when a looper becomes overloaded (spec.md
    /// §4.3 step 5). Defaults to `true`.
    pub warn_on_overload: bool,
    /// Smoothed iteration time, in milliseconds, above which a looper is
    /// considered overloaded. Defaults to `100`.
    pub average_overload_threshold_ms: u64,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self { warn_on_overload: true, average_overload_threshold_ms: 100 }
    }
}

impl LooperConfig {
    /// Parses a [`LooperConfig`] from a JSON document, falling back to
    /// [`Default::default`] for any field the document omits.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if `json` is not valid
    /// JSON or contains a field with the wrong type.
    pub fn from_json(json: &str) -> serde_json::Result<Self> { serde_json::from_str(json) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = LooperConfig::default();
        assert!(config.warn_on_overload);
        assert_eq!(config.average_overload_threshold_ms, 100);
    }

    #[test]
    fn from_json_fills_in_missing_fields_with_defaults() {
        let config = LooperConfig::from_json(r#"{"warn_on_overload": false}"#).unwrap();
        assert!(!config.warn_on_overload);
        assert_eq!(config.average_overload_threshold_ms, 100);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(LooperConfig::from_json("not json").is_err());
    }
}

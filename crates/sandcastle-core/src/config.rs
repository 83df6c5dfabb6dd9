use std::env;
use std::time::Duration;

use crate::wire::WireFormat;

pub const ENV_WRITE_DEADLINE_MS: &str = "SANDCASTLE_WRITE_DEADLINE_MS";
pub const ENV_OUTBOUND_DEPTH: &str = "SANDCASTLE_OUTBOUND_DEPTH";
pub const ENV_BINARY_PROTOCOL: &str = "SANDCASTLE_PROTO_BINARY";

/// Per-session synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// A single frame write taking longer than this desynchronizes the session.
    pub write_deadline: Duration,
    /// Frames committed but not yet written. A full queue counts as a stall.
    pub outbound_depth: usize,
    pub wire_format: WireFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_deadline: Duration::from_millis(5_000),
            outbound_depth: 256,
            wire_format: WireFormat::Binary,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source; unparsable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let write_deadline = lookup(ENV_WRITE_DEADLINE_MS)
            .and_then(|val| val.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.write_deadline);
        let outbound_depth = lookup(ENV_OUTBOUND_DEPTH)
            .and_then(|val| val.trim().parse().ok())
            .filter(|depth: &usize| *depth > 0)
            .unwrap_or(defaults.outbound_depth);
        let wire_format = match lookup(ENV_BINARY_PROTOCOL) {
            Some(value) if !parse_flag(&value) => WireFormat::Json,
            _ => defaults.wire_format,
        };

        Self {
            write_deadline,
            outbound_depth,
            wire_format,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test_timeout::timeout]
    fn defaults_apply_when_unset() {
        assert_eq!(SyncConfig::from_lookup(lookup(&[])), SyncConfig::default());
    }

    #[test_timeout::timeout]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_WRITE_DEADLINE_MS, "250"),
            (ENV_OUTBOUND_DEPTH, " 8 "),
            (ENV_BINARY_PROTOCOL, "off"),
        ]));
        assert_eq!(config.write_deadline, Duration::from_millis(250));
        assert_eq!(config.outbound_depth, 8);
        assert_eq!(config.wire_format, WireFormat::Json);
    }

    #[test_timeout::timeout]
    fn invalid_values_fall_back() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_WRITE_DEADLINE_MS, "soon"),
            (ENV_OUTBOUND_DEPTH, "0"),
            (ENV_BINARY_PROTOCOL, "YES"),
        ]));
        assert_eq!(config, SyncConfig::default());
    }

    #[test_timeout::timeout]
    fn flag_parsing() {
        assert!(parse_flag("true"));
        assert!(parse_flag("YES"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}

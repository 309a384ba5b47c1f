//! Routing keys and topic-exchange pattern matching.
//!
//! Keys are dot-separated segments (`log.ERROR`). Binding patterns may use
//! `*` for exactly one segment and `#` for zero or more segments.

use std::fmt;
use std::str::FromStr;

use super::{BusError, Result};

/// AMQP short strings cap routing keys at 255 bytes.
const MAX_ROUTING_KEY_LEN: usize = 255;

/// Conventional log severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Routing key for this severity (`log.<LEVEL>`).
    pub fn routing_key(self) -> &'static str {
        match self {
            Severity::Info => "log.INFO",
            Severity::Warning => "log.WARNING",
            Severity::Error => "log.ERROR",
        }
    }

    /// Routing keys for every severity, for binding a listener to all of them.
    pub fn all_routing_keys() -> Vec<String> {
        [Severity::Info, Severity::Warning, Severity::Error]
            .iter()
            .map(|s| s.routing_key().to_string())
            .collect()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for Severity {
    type Err = BusError;

    /// Accepts `INFO` or `log.INFO`; the level is case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let level = s.strip_prefix("log.").unwrap_or(s);
        match level.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            _ => Err(BusError::InvalidRoutingKey {
                key: s.to_string(),
                reason: "unknown severity",
            }),
        }
    }
}

/// Check that `key` can be used to publish.
///
/// Wildcards belong in binding patterns, not in the key of a message.
pub fn validate_routing_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(BusError::InvalidRoutingKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("empty");
    }
    if key.len() > MAX_ROUTING_KEY_LEN {
        return invalid("longer than 255 bytes");
    }
    if key.split('.').any(str::is_empty) {
        return invalid("empty segment");
    }
    if key.contains(['*', '#']) {
        return invalid("wildcards are only valid in binding patterns");
    }
    Ok(())
}

/// Topic-exchange match of a routing key against a binding pattern.
///
/// Runs in `O(pattern segments × key segments)` however many `#` the pattern holds.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    let n = key.len();

    // `next[j]`: the segments after the current one match key[j..]
    let mut next = vec![false; n + 1];
    next[n] = true;

    for segment in pattern.iter().rev() {
        let mut current = vec![false; n + 1];
        for j in (0..=n).rev() {
            current[j] = match *segment {
                // `#` absorbs zero segments, or one more and stays in place.
                "#" => next[j] || (j < n && current[j + 1]),
                "*" => j < n && next[j + 1],
                literal => j < n && key[j] == literal && next[j + 1],
            };
        }
        next = current;
    }

    next[0]
}

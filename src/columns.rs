// src/columns.rs
//! Column resolution for heterogeneous station headers.
//!
//! Devices across the fleet do not agree on column naming or ordering, so
//! logical fields are matched against the parsed header once and the
//! resulting map is reused for every row. Timestamp columns are matched by
//! case-insensitive substring with tolerance for common misspellings; water
//! content channels by a `wc[1-4]` prefix, first match per channel wins.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Logical field → physical column name, resolved once per parsed header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    pub timestamp: Option<String>,
    pub wc: [Option<String>; 4],
}

impl ColumnMap {
    pub fn resolve(header: &[String]) -> Self {
        let mut map = ColumnMap::default();
        for name in header {
            if map.timestamp.is_none() && is_timestamp_name(name) {
                map.timestamp = Some(name.clone());
            }
            if let Some(ch) = wc_channel(name) {
                if map.wc[ch].is_none() {
                    map.wc[ch] = Some(name.clone());
                }
            }
        }
        map
    }

    /// Logical fields the daily-history path requires but the header does
    /// not provide. Empty means the map is complete.
    pub fn missing_history_fields(&self) -> Vec<&'static str> {
        const WC_NAMES: [&str; 4] = ["wc1", "wc2", "wc3", "wc4"];
        let mut missing = Vec::new();
        if self.timestamp.is_none() {
            missing.push("timestamp");
        }
        for (ch, name) in WC_NAMES.iter().enumerate() {
            if self.wc[ch].is_none() {
                missing.push(*name);
            }
        }
        missing
    }
}

/// Find the configured rain-amount column in the header, case-insensitively.
pub fn resolve_rain_column<'a>(header: &'a [String], configured: &str) -> Option<&'a str> {
    header
        .iter()
        .find(|name| name.eq_ignore_ascii_case(configured))
        .map(|s| s.as_str())
}

fn is_timestamp_name(name: &str) -> bool {
    let n = name.trim().to_ascii_lowercase();
    if n.contains("timestamp") || n == "ts" || n == "tms" || n.starts_with("time") {
        return true;
    }
    // Loggers in the field misspell this one surprisingly often
    // ("timestmap", "timstamp", "tmstamp").
    strsim::normalized_levenshtein(&n, "timestamp") >= 0.75
}

/// Channel index (0-based) for `wc1`..`wc4`-prefixed column names.
fn wc_channel(name: &str) -> Option<usize> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^wc([1-4])").unwrap());
    re.captures(name.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .map(|n| n - 1)
}

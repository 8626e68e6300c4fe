//! Process-wide toggles. Built once, shared read-only by every call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the consistency detector does when the two paths disagree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum InconsistencyPolicy {
    /// Abort via `panic!`; meant for test clusters and CI.
    Panic,
    /// Log at error level and count; the caller keeps its result.
    #[default]
    Alert,
}

impl std::str::FromStr for InconsistencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic" => Ok(Self::Panic),
            "alert" | "log" => Ok(Self::Alert),
            other => Err(format!("unknown inconsistency policy: {other} (expect panic|alert)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelistConfig {
    /// Attempt streaming lists at all.
    pub watch_list_client: bool,
    /// Verify results assembled from a watch stream.
    pub watch_list_consistency_check: bool,
    /// Verify plain lists that may have been served from the watch cache.
    pub list_from_cache_consistency_check: bool,
    pub on_inconsistency: InconsistencyPolicy,
    /// Budget for a streaming attempt when the caller set no timeout.
    pub watch_list_timeout: Duration,
    /// Attempts for the detector's authoritative fetch.
    pub check_attempts: u32,
    pub check_interval: Duration,
}

impl Default for RelistConfig {
    fn default() -> Self {
        Self {
            watch_list_client: false,
            watch_list_consistency_check: false,
            list_from_cache_consistency_check: false,
            on_inconsistency: InconsistencyPolicy::Alert,
            watch_list_timeout: Duration::from_secs(60),
            check_attempts: 3,
            check_interval: Duration::from_millis(1000),
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl RelistConfig {
    /// Read `RELIST_*` variables; anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            watch_list_client: env_bool("RELIST_WATCHLIST_CLIENT").unwrap_or(d.watch_list_client),
            watch_list_consistency_check: env_bool("RELIST_WATCHLIST_INCONSISTENCY_DETECTOR")
                .unwrap_or(d.watch_list_consistency_check),
            list_from_cache_consistency_check: env_bool("RELIST_LIST_FROM_CACHE_INCONSISTENCY_DETECTOR")
                .unwrap_or(d.list_from_cache_consistency_check),
            on_inconsistency: std::env::var("RELIST_ON_INCONSISTENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.on_inconsistency),
            watch_list_timeout: std::env::var("RELIST_WATCHLIST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.watch_list_timeout),
            check_attempts: std::env::var("RELIST_CONSISTENCY_CHECK_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .map(|n| n.max(1))
                .unwrap_or(d.check_attempts),
            check_interval: std::env::var("RELIST_CONSISTENCY_CHECK_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(d.check_interval),
        }
    }
}

//! Cross-check a list result against an authoritative list pinned to its resource version.
//!
//! A mismatch is a defect in the serving path, not a transient condition: it is raised
//! out-of-band (panic or error log) and never turned into the caller's error.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use metrics::counter;
use relist_core::{Item, ListOptions, ObjectKey, ResourceVersion, Snapshot, VersionMatch};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{InconsistencyPolicy, RelistConfig};
use crate::error::{ListError, ListResult};
use crate::stats::ListStats;

/// Keys that differ between the received and the authoritative item sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InconsistencyReport {
    pub identity: String,
    pub resource_version: ResourceVersion,
    /// Present in the authoritative list only.
    pub missing: Vec<ObjectKey>,
    /// Present in the received list only.
    pub unexpected: Vec<ObjectKey>,
    /// Present in both with different content.
    pub changed: Vec<ObjectKey>,
}

impl InconsistencyReport {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.changed.is_empty()
    }

    pub fn summary(&self) -> String {
        fn keys(v: &[ObjectKey]) -> String {
            v.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(",")
        }
        format!(
            "rv={} missing=[{}] unexpected=[{}] changed=[{}]",
            self.resource_version,
            keys(&self.missing),
            keys(&self.unexpected),
            keys(&self.changed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Check disabled or not applicable to this result.
    Skipped,
    Consistent,
    /// The authoritative fetch never succeeded.
    Unverified(String),
    /// Only returned under [`InconsistencyPolicy::Alert`].
    Inconsistent(InconsistencyReport),
}

pub struct ConsistencyDetector {
    policy: InconsistencyPolicy,
    attempts: u32,
    interval: Duration,
    stats: Arc<ListStats>,
}

impl ConsistencyDetector {
    pub fn new(config: &RelistConfig, stats: Arc<ListStats>) -> Self {
        Self {
            policy: config.on_inconsistency,
            attempts: config.check_attempts.max(1),
            interval: config.check_interval,
            stats,
        }
    }

    /// Compare `received` with a list fetched through `list_fn` at `received`'s resource version.
    ///
    /// `list_fn` must perform a plain list; it is never given streaming options.
    pub async fn check<F, Fut>(
        &self,
        enabled: bool,
        identity: &str,
        list_fn: F,
        opts: &ListOptions,
        received: &Snapshot,
    ) -> Verdict
    where
        F: Fn(ListOptions) -> Fut,
        Fut: Future<Output = ListResult<Snapshot>>,
    {
        if !enabled {
            return Verdict::Skipped;
        }
        if received.resource_version.is_empty() {
            debug!(identity, "consistency check skipped: result carries no resource version");
            return Verdict::Skipped;
        }
        if opts.version_match == Some(VersionMatch::Exact) {
            debug!(identity, "consistency check skipped: result was already pinned to an exact version");
            return Verdict::Skipped;
        }
        self.stats.consistency_check();
        counter!("relist_consistency_checks_total", 1u64);

        let pinned = pinned_options(opts, &received.resource_version);
        let mut last_err = String::new();
        let mut authoritative = None;
        for attempt in 1..=self.attempts {
            match fetch_all_pages(&list_fn, pinned.clone()).await {
                Ok(items) => {
                    authoritative = Some(items);
                    break;
                }
                Err(e) => {
                    warn!(identity, attempt, error = %e, "consistency check list failed");
                    last_err = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        let Some(authoritative) = authoritative else {
            return Verdict::Unverified(last_err);
        };

        let report = diff_items(identity, &received.resource_version, &received.items, &authoritative);
        if report.is_empty() {
            debug!(identity, rv = %received.resource_version, items = received.items.len(), "consistency check passed");
            return Verdict::Consistent;
        }
        self.raise(report)
    }

    fn raise(&self, report: InconsistencyReport) -> Verdict {
        self.stats.inconsistency();
        counter!("relist_inconsistencies_total", 1u64);
        match self.policy {
            InconsistencyPolicy::Panic => {
                panic!("data inconsistency detected for {}, panicking! {}", report.identity, report.summary())
            }
            InconsistencyPolicy::Alert => {
                error!(identity = %report.identity, details = %report.summary(), "data inconsistency detected");
                Verdict::Inconsistent(report)
            }
        }
    }
}

/// Options for the authoritative fetch: same selectors, exact resource version, no streaming.
pub fn pinned_options(opts: &ListOptions, rv: &ResourceVersion) -> ListOptions {
    ListOptions {
        resource_version: Some(rv.as_str().to_string()),
        version_match: Some(VersionMatch::Exact),
        watch: false,
        allow_bookmarks: false,
        send_initial_events: None,
        continue_token: None,
        ..opts.clone()
    }
}

/// Whether a plain list may have been answered by the watch cache rather than storage.
pub fn served_from_cache(opts: &ListOptions) -> bool {
    opts.resource_version.as_deref().is_some_and(|rv| !rv.is_empty())
        && opts.version_match != Some(VersionMatch::Exact)
}

async fn fetch_all_pages<F, Fut>(list_fn: &F, mut opts: ListOptions) -> ListResult<Vec<Item>>
where
    F: Fn(ListOptions) -> Fut,
    Fut: Future<Output = ListResult<Snapshot>>,
{
    let mut items = Vec::new();
    let mut seen = FxHashSet::default();
    loop {
        let page = list_fn(opts.clone()).await?;
        items.extend(page.items);
        match page.continue_token.filter(|c| !c.is_empty()) {
            Some(token) if !seen.insert(token.clone()) => {
                return Err(ListError::Transport(anyhow!("server repeated continue token {:?} after {} items", token, items.len())));
            }
            Some(token) => opts.continue_token = Some(token),
            None => return Ok(items),
        }
    }
}

fn diff_items(identity: &str, rv: &ResourceVersion, received: &[Item], authoritative: &[Item]) -> InconsistencyReport {
    let got: BTreeMap<&ObjectKey, &Item> = received.iter().map(|i| (i.key(), i)).collect();
    let want: BTreeMap<&ObjectKey, &Item> = authoritative.iter().map(|i| (i.key(), i)).collect();
    let mut report = InconsistencyReport {
        identity: identity.to_string(),
        resource_version: rv.clone(),
        ..Default::default()
    };
    for (key, w) in want.iter() {
        match got.get(key) {
            None => report.missing.push((*key).clone()),
            Some(g) if g.raw() != w.raw() => report.changed.push((*key).clone()),
            Some(_) => {}
        }
    }
    for key in got.keys() {
        if !want.contains_key(key) {
            report.unexpected.push((*key).clone());
        }
    }
    report
}

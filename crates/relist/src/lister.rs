use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use relist_core::{ListOptions, ResourceScope, Snapshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assemble::assemble;
use crate::config::RelistConfig;
use crate::detect::{served_from_cache, ConsistencyDetector, Verdict};
use crate::error::{ListError, ListResult};
use crate::negotiate::prepare_watch_list;
use crate::stats::ListStats;
use crate::transport::Transport;

/// Result of the streaming attempt; decides what `list` does next.
#[derive(Debug)]
enum Outcome {
    Snapshot(Snapshot),
    Fallback(ListError),
    Fatal(ListError),
}

/// Entry point for listing collections. Picks streaming or a plain list per call,
/// falls back once, and runs the configured consistency checks.
pub struct Lister<T> {
    transport: T,
    config: Arc<RelistConfig>,
    detector: ConsistencyDetector,
    stats: Arc<ListStats>,
}

impl<T: Transport> Lister<T> {
    pub fn new(transport: T, config: RelistConfig) -> Self {
        Self::with_shared_config(transport, Arc::new(config))
    }

    pub fn with_shared_config(transport: T, config: Arc<RelistConfig>) -> Self {
        let stats = Arc::new(ListStats::default());
        let detector = ConsistencyDetector::new(&config, stats.clone());
        Self { transport, config, detector, stats }
    }

    pub fn stats(&self) -> &ListStats { &self.stats }
    pub fn transport(&self) -> &T { &self.transport }

    pub async fn list(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<Snapshot> {
        self.list_with_cancel(scope, opts, &CancellationToken::new()).await
    }

    /// List `scope`; cancelling `cancel` aborts whichever request is in flight.
    pub async fn list_with_cancel(
        &self,
        scope: &ResourceScope,
        opts: &ListOptions,
        cancel: &CancellationToken,
    ) -> ListResult<Snapshot> {
        let t0 = Instant::now();
        let gvk = scope.gvk_key();
        let mut fell_back = false;

        if let Some(wl_opts) = prepare_watch_list(opts, self.config.watch_list_client) {
            match self.stream_attempt(scope, &wl_opts, cancel).await {
                Outcome::Snapshot(snap) => {
                    self.stats.watch_list();
                    self.record("watchlist", t0);
                    info!(gvk = %gvk, ns = ?scope.namespace, items = snap.len(), rv = %snap.resource_version, took_ms = %t0.elapsed().as_millis(), "list served by watchlist");
                    let identity = format!("watchlist request for {}", gvk);
                    self.verify(self.config.watch_list_consistency_check, &identity, scope, opts, &snap, cancel).await?;
                    return Ok(snap);
                }
                Outcome::Fatal(e) => {
                    debug!(gvk = %gvk, error = %e, "watchlist request aborted");
                    return Err(e);
                }
                Outcome::Fallback(e) => {
                    self.stats.fallback();
                    counter!("relist_watchlist_fallback_total", 1u64);
                    warn!(gvk = %gvk, ns = ?scope.namespace, error = %e, "watchlist request ended with an error, falling back to the standard LIST semantics");
                    fell_back = true;
                }
            }
        } else {
            debug!(gvk = %gvk, "watchlist not applicable; using plain list");
        }

        let snap = self.plain_list(scope, opts, cancel).await?;
        let strategy = if fell_back { "fallback" } else { "list" };
        self.stats.plain_list();
        self.record(strategy, t0);
        info!(gvk = %gvk, ns = ?scope.namespace, strategy, items = snap.len(), rv = %snap.resource_version, took_ms = %t0.elapsed().as_millis(), "list served");
        if served_from_cache(opts) {
            let identity = format!("list request for {}", gvk);
            self.verify(self.config.list_from_cache_consistency_check, &identity, scope, opts, &snap, cancel).await?;
        }
        Ok(snap)
    }

    /// Exactly one watch + assemble round, bounded by the caller's timeout or the configured one.
    async fn stream_attempt(&self, scope: &ResourceScope, opts: &ListOptions, cancel: &CancellationToken) -> Outcome {
        let budget = client_timeout(opts).unwrap_or(self.config.watch_list_timeout);
        let attempt = async {
            let events = self.transport.watch(scope, opts).await?;
            assemble(events).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Fatal(ListError::Cancelled),
            res = tokio::time::timeout(budget, attempt) => match res {
                Ok(Ok(snap)) => Outcome::Snapshot(snap),
                Ok(Err(ListError::Cancelled)) => Outcome::Fatal(ListError::Cancelled),
                Ok(Err(e)) => Outcome::Fallback(e),
                Err(_) => Outcome::Fallback(ListError::Timeout(budget)),
            },
        }
    }

    async fn plain_list(&self, scope: &ResourceScope, opts: &ListOptions, cancel: &CancellationToken) -> ListResult<Snapshot> {
        let request = async {
            match client_timeout(opts) {
                Some(budget) => {
                    tokio::time::timeout(budget, self.transport.list(scope, opts))
                        .await
                        .map_err(|_| ListError::Timeout(budget))?
                }
                None => self.transport.list(scope, opts).await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ListError::Cancelled),
            res = request => res,
        }
    }

    async fn verify(
        &self,
        enabled: bool,
        identity: &str,
        scope: &ResourceScope,
        opts: &ListOptions,
        snap: &Snapshot,
        cancel: &CancellationToken,
    ) -> ListResult<Verdict> {
        if !enabled {
            return Ok(Verdict::Skipped);
        }
        let list_fn = |o: ListOptions| async move { self.plain_list(scope, &o, cancel).await };
        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ListError::Cancelled),
            v = self.detector.check(true, identity, list_fn, opts, snap) => v,
        };
        if let Verdict::Unverified(reason) = &verdict {
            warn!(identity, reason = %reason, "consistency check could not be completed");
        }
        Ok(verdict)
    }

    /// Run the consistency check on demand, whatever the configured toggles say.
    pub async fn verify_snapshot(
        &self,
        scope: &ResourceScope,
        opts: &ListOptions,
        snap: &Snapshot,
        cancel: &CancellationToken,
    ) -> ListResult<Verdict> {
        let identity = format!("verify request for {}", scope.gvk_key());
        self.verify(true, &identity, scope, opts, snap, cancel).await
    }

    fn record(&self, strategy: &'static str, t0: Instant) {
        counter!("relist_list_total", 1u64, "strategy" => strategy);
        histogram!("relist_list_ms", t0.elapsed().as_secs_f64() * 1000.0, "strategy" => strategy);
    }
}

/// Client-side deadline for one request. `timeoutSeconds=0` is unbounded, as on the wire.
fn client_timeout(opts: &ListOptions) -> Option<Duration> {
    opts.timeout_seconds.filter(|s| *s > 0).map(|s| Duration::from_secs(u64::from(s)))
}

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use relist::core::{Bookmark, Item, ListOptions, ResourceScope, Snapshot, Status, VersionMatch, WatchEvent};
use relist::{CancellationToken, EventStream, InconsistencyPolicy, ListError, ListResult, Lister, RelistConfig, Transport};
use serde_json::json;

const WATCHLIST_QUERY: &str = "watch?allowWatchBookmarks=true&resourceVersionMatch=NotOlderThan&sendInitialEvents=true&watch=true";

/// Records every request; replays scripted events and list responses.
#[derive(Default)]
struct Stub {
    /// `None` means the test fails if a watch is opened.
    events: Option<Vec<WatchEvent>>,
    watch_open_error: bool,
    /// Simulated latency before a list answers / a watch opens.
    list_delay: Option<Duration>,
    watch_delay: Option<Duration>,
    lists: Mutex<VecDeque<ListResult<Snapshot>>>,
    requests: Mutex<Vec<String>>,
}

impl Stub {
    fn streaming(events: Vec<WatchEvent>) -> Self { Self { events: Some(events), ..Default::default() } }

    fn forbid_watch() -> Self { Self::default() }

    fn then_list(self, res: ListResult<Snapshot>) -> Self {
        self.lists.lock().unwrap().push_back(res);
        self
    }

    fn requests(&self) -> Vec<String> { self.requests.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl Transport for Stub {
    async fn list(&self, _scope: &ResourceScope, opts: &ListOptions) -> ListResult<Snapshot> {
        self.requests.lock().unwrap().push(format!("list?{}", opts.to_query()));
        if let Some(d) = self.list_delay {
            tokio::time::sleep(d).await;
        }
        self.lists.lock().unwrap().pop_front().unwrap_or_else(|| panic!("unexpected list call: {}", opts.to_query()))
    }

    async fn watch(&self, _scope: &ResourceScope, opts: &ListOptions) -> ListResult<EventStream> {
        self.requests.lock().unwrap().push(format!("watch?{}", opts.to_query()));
        let events = self.events.clone().unwrap_or_else(|| panic!("watch must not be opened for {}", opts.to_query()));
        if let Some(d) = self.watch_delay {
            tokio::time::sleep(d).await;
        }
        if self.watch_open_error {
            return Err(ListError::Transport(anyhow::anyhow!("connection reset")));
        }
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

fn item(name: &str, v: &str) -> Item {
    Item::from_raw(json!({"metadata": {"name": name, "namespace": "default"}, "data": {"v": v}})).unwrap()
}

fn scope() -> ResourceScope { ResourceScope::parse("v1/Secret", Some("default")).unwrap() }

fn streaming_cfg() -> RelistConfig { RelistConfig { watch_list_client: true, ..Default::default() } }

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

fn replay(items: &[Item], rv: &str) -> Vec<WatchEvent> {
    let mut v: Vec<WatchEvent> = items.iter().cloned().map(WatchEvent::Added).collect();
    v.push(WatchEvent::Bookmark(Bookmark::initial_events_end(rv)));
    v
}

#[tokio::test]
async fn incompatible_options_never_open_a_stream() {
    let plain = Snapshot::new("3", vec![item("a", "1")]);
    let cases = vec![
        ListOptions::default().limit(10),
        ListOptions::default().at("3", Some(VersionMatch::Exact)),
        ListOptions { continue_token: Some("next".into()), ..Default::default() },
    ];
    for opts in cases {
        let lister = Lister::new(Stub::forbid_watch().then_list(Ok(plain.clone())), streaming_cfg());
        let snap = lister.list(&scope(), &opts).await.unwrap();
        assert_eq!(snap, plain);
        assert_eq!(lister.transport().requests().len(), 1);
    }
}

#[tokio::test]
async fn disabled_toggle_uses_plain_list() {
    let plain = Snapshot::new("3", vec![item("a", "1")]);
    let lister = Lister::new(Stub::forbid_watch().then_list(Ok(plain.clone())), RelistConfig::default());
    assert_eq!(lister.list(&scope(), &ListOptions::default()).await.unwrap(), plain);
    assert_eq!(lister.transport().requests(), vec!["list?".to_string()]);
    assert_eq!(lister.stats().snapshot().plain_lists, 1);
}

#[tokio::test]
async fn stream_assembles_latest_state() {
    let stub = Stub::streaming(vec![
        WatchEvent::Added(item("a", "1")),
        WatchEvent::Added(item("b", "1")),
        WatchEvent::Modified(item("a", "2")),
        WatchEvent::Bookmark(Bookmark::initial_events_end("5")),
    ]);
    let lister = Lister::new(stub, streaming_cfg());
    let snap = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(snap.resource_version.as_str(), "5");
    assert_eq!(snap.items, vec![item("a", "2"), item("b", "1")]);
    assert_eq!(lister.transport().requests(), vec![WATCHLIST_QUERY.to_string()]);
    assert_eq!(lister.stats().snapshot().watch_lists, 1);
}

#[tokio::test]
async fn deletion_during_replay_is_applied() {
    let stub = Stub::streaming(vec![
        WatchEvent::Added(item("a", "1")),
        WatchEvent::Added(item("b", "1")),
        WatchEvent::Deleted(item("a", "1")),
        WatchEvent::Bookmark(Bookmark::initial_events_end("7")),
    ]);
    let lister = Lister::new(stub, streaming_cfg());
    let snap = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(snap.resource_version.as_str(), "7");
    assert_eq!(snap.items, vec![item("b", "1")]);
}

#[tokio::test]
async fn early_close_falls_back_to_plain_list() {
    let plain = Snapshot::new("9", vec![item("x", "1")]);
    let stub = Stub::streaming(vec![WatchEvent::Added(item("a", "1"))]).then_list(Ok(plain.clone()));
    let lister = Lister::new(stub, streaming_cfg());
    let snap = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(snap, plain);
    assert_eq!(lister.transport().requests(), vec![WATCHLIST_QUERY.to_string(), "list?".to_string()]);
    let s = lister.stats().snapshot();
    assert_eq!((s.watch_lists, s.fallbacks, s.plain_lists), (0, 1, 1));
}

#[tokio::test]
async fn error_event_and_open_failure_fall_back() {
    let plain = Snapshot::new("9", vec![item("x", "1")]);
    let status = Status { code: 410, reason: "Expired".into(), message: "too old resource version".into() };
    let stub = Stub::streaming(vec![WatchEvent::Added(item("a", "1")), WatchEvent::Error(status)]).then_list(Ok(plain.clone()));
    let lister = Lister::new(stub, streaming_cfg());
    assert_eq!(lister.list(&scope(), &ListOptions::default()).await.unwrap(), plain);

    let stub = Stub { watch_open_error: true, ..Stub::streaming(vec![]) }.then_list(Ok(plain.clone()));
    let lister = Lister::new(stub, streaming_cfg());
    assert_eq!(lister.list(&scope(), &ListOptions::default()).await.unwrap(), plain);
    assert_eq!(lister.transport().requests().len(), 2);
}

#[tokio::test]
async fn fallback_failure_is_returned_verbatim() {
    let status = Status { code: 500, reason: "InternalError".into(), message: "etcd unavailable".into() };
    let stub = Stub::streaming(vec![]).then_list(Err(ListError::Status(status.clone())));
    let lister = Lister::new(stub, streaming_cfg());
    match lister.list(&scope(), &ListOptions::default()).await {
        Err(ListError::Status(s)) => assert_eq!(s, status),
        other => panic!("unexpected result: {:?}", other),
    }
    // one stream attempt, one fallback, nothing more
    assert_eq!(lister.transport().requests().len(), 2);
}

#[tokio::test]
async fn repeated_lists_of_unchanged_collection_agree() {
    let backing = vec![item("a", "1"), item("b", "1"), item("c", "1")];
    let lister = Lister::new(Stub::streaming(replay(&backing, "12")), streaming_cfg());
    let first = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    let second = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(first.items, second.items);
    assert_eq!(first.items, backing);
}

#[tokio::test]
async fn consistency_check_pins_exact_version() {
    let backing = vec![item("a", "1"), item("b", "1")];
    let cfg = RelistConfig { watch_list_consistency_check: true, ..streaming_cfg() };
    let stub = Stub::streaming(replay(&backing, "5")).then_list(Ok(Snapshot::new("5", backing.clone())));
    let lister = Lister::new(stub, cfg);
    let snap = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(snap.items, backing);
    assert_eq!(
        lister.transport().requests(),
        vec![WATCHLIST_QUERY.to_string(), "list?resourceVersion=5&resourceVersionMatch=Exact".to_string()]
    );
    assert_eq!(lister.stats().inconsistencies(), 0);
}

#[tokio::test]
async fn mismatch_is_raised_once_per_call() {
    let streamed = vec![item("a", "1"), item("b", "1")];
    let cfg = RelistConfig { watch_list_consistency_check: true, on_inconsistency: InconsistencyPolicy::Alert, ..streaming_cfg() };
    let stub = Stub::streaming(replay(&streamed, "5"))
        .then_list(Ok(Snapshot::new("5", vec![item("a", "1")])))
        .then_list(Ok(Snapshot::new("5", vec![item("a", "2"), item("b", "1")])));
    let lister = Lister::new(stub, cfg);

    // the caller still gets the streamed result
    let snap = lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(snap.items, streamed);
    assert_eq!(lister.stats().inconsistencies(), 1);

    lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(lister.stats().inconsistencies(), 2);
    assert_eq!(lister.stats().snapshot().consistency_checks, 2);
}

#[tokio::test]
#[should_panic(expected = "data inconsistency detected for watchlist request for v1/Secret")]
async fn mismatch_panics_under_panic_policy() {
    let cfg = RelistConfig { watch_list_consistency_check: true, on_inconsistency: InconsistencyPolicy::Panic, ..streaming_cfg() };
    let stub = Stub::streaming(replay(&[item("a", "1")], "5")).then_list(Ok(Snapshot::new("5", vec![])));
    let lister = Lister::new(stub, cfg);
    let _ = lister.list(&scope(), &ListOptions::default()).await;
}

#[tokio::test]
async fn disabled_check_issues_no_secondary_fetch() {
    let backing = vec![item("a", "1")];
    let lister = Lister::new(Stub::streaming(replay(&backing, "5")), streaming_cfg());
    lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(lister.transport().requests().len(), 1);

    let stub = Stub::streaming(vec![]).then_list(Ok(Snapshot::new("6", backing.clone())));
    let lister = Lister::new(stub, streaming_cfg());
    lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(lister.transport().requests().len(), 2);
}

#[tokio::test]
async fn fallback_result_is_not_checked_by_watchlist_detector() {
    let cfg = RelistConfig { watch_list_consistency_check: true, ..streaming_cfg() };
    let stub = Stub::streaming(vec![]).then_list(Ok(Snapshot::new("6", vec![item("a", "1")])));
    let lister = Lister::new(stub, cfg);
    lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(lister.transport().requests().len(), 2);
}

#[tokio::test]
async fn cache_served_list_is_checked_when_enabled() {
    let items = vec![item("a", "1")];
    let cfg = RelistConfig { list_from_cache_consistency_check: true, ..Default::default() };
    let stub = Stub::forbid_watch()
        .then_list(Ok(Snapshot::new("40", items.clone())))
        .then_list(Ok(Snapshot::new("40", items.clone())));
    let lister = Lister::new(stub, cfg);
    let opts = ListOptions::default().at("0", None).labels("app=web");
    lister.list(&scope(), &opts).await.unwrap();
    assert_eq!(
        lister.transport().requests(),
        vec![
            "list?labelSelector=app%3Dweb&resourceVersion=0".to_string(),
            "list?labelSelector=app%3Dweb&resourceVersion=40&resourceVersionMatch=Exact".to_string(),
        ]
    );
}

#[tokio::test]
async fn consistent_read_is_not_checked() {
    let cfg = RelistConfig { list_from_cache_consistency_check: true, ..Default::default() };
    let stub = Stub::forbid_watch().then_list(Ok(Snapshot::new("40", vec![item("a", "1")])));
    let lister = Lister::new(stub, cfg);
    lister.list(&scope(), &ListOptions::default()).await.unwrap();
    assert_eq!(lister.transport().requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_leaves_requests_unbounded() {
    let plain = Snapshot::new("3", vec![item("a", "1")]);
    let stub = Stub { list_delay: Some(Duration::from_millis(10)), ..Stub::forbid_watch() }.then_list(Ok(plain.clone()));
    let lister = Lister::new(stub, streaming_cfg());
    let opts = ListOptions::default().limit(5).timeout(0);
    assert_eq!(lister.list(&scope(), &opts).await.unwrap(), plain);

    let backing = vec![item("a", "1")];
    let stub = Stub { watch_delay: Some(Duration::from_millis(10)), ..Stub::streaming(replay(&backing, "4")) };
    let lister = Lister::new(stub, streaming_cfg());
    let snap = lister.list(&scope(), &ListOptions::default().timeout(0)).await.unwrap();
    assert_eq!(snap.items, backing);
    let s = lister.stats().snapshot();
    assert_eq!((s.watch_lists, s.fallbacks), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn slow_plain_list_times_out() {
    let stub = Stub { list_delay: Some(Duration::from_secs(30)), ..Stub::forbid_watch() }
        .then_list(Ok(Snapshot::new("3", vec![])));
    let lister = Lister::new(stub, RelistConfig::default());
    match lister.list(&scope(), &ListOptions::default().timeout(5)).await {
        Err(ListError::Timeout(d)) => assert_eq!(d, Duration::from_secs(5)),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(lister.stats().snapshot().plain_lists, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_fallback_times_out_on_its_own_budget() {
    let stub = Stub {
        watch_delay: Some(Duration::from_secs(30)),
        list_delay: Some(Duration::from_secs(30)),
        ..Stub::streaming(vec![])
    }
    .then_list(Ok(Snapshot::new("3", vec![])));
    let lister = Lister::new(stub, streaming_cfg());
    let res = lister.list(&scope(), &ListOptions::default().timeout(5)).await;
    assert!(matches!(res, Err(ListError::Timeout(d)) if d == Duration::from_secs(5)));
    assert_eq!(lister.transport().requests().len(), 2);
    let s = lister.stats().snapshot();
    assert_eq!((s.watch_lists, s.fallbacks, s.plain_lists), (0, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_fallback_returns_no_snapshot() {
    let stub = Stub { list_delay: Some(Duration::from_secs(60)), ..Stub::streaming(vec![]) }
        .then_list(Ok(Snapshot::new("9", vec![item("x", "1")])));
    let lister = Lister::new(stub, streaming_cfg());
    let cancel = cancel_after(Duration::from_secs(1));
    let res = lister.list_with_cancel(&scope(), &ListOptions::default(), &cancel).await;
    assert!(matches!(res, Err(ListError::Cancelled)));
    assert_eq!(lister.transport().requests(), vec![WATCHLIST_QUERY.to_string(), "list?".to_string()]);
    let s = lister.stats().snapshot();
    assert_eq!((s.fallbacks, s.plain_lists), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_consistency_check_is_returned() {
    let backing = vec![item("a", "1")];
    let cfg = RelistConfig { watch_list_consistency_check: true, ..streaming_cfg() };
    let stub = Stub { list_delay: Some(Duration::from_secs(60)), ..Stub::streaming(replay(&backing, "5")) }
        .then_list(Ok(Snapshot::new("5", backing.clone())));
    let lister = Lister::new(stub, cfg);
    let cancel = cancel_after(Duration::from_secs(1));
    let res = lister.list_with_cancel(&scope(), &ListOptions::default(), &cancel).await;
    assert!(matches!(res, Err(ListError::Cancelled)));
    assert_eq!(lister.stats().inconsistencies(), 0);
}

//! Decide whether a list may be served by streaming its initial state over a watch.

use relist_core::{ListOptions, VersionMatch};

/// Rewrite `opts` into a streaming-list request, or `None` when the plain list must be used.
pub fn prepare_watch_list(opts: &ListOptions, enabled: bool) -> Option<ListOptions> {
    if !enabled || !is_eligible(opts) {
        return None;
    }
    let mut out = opts.clone();
    out.watch = true;
    out.allow_bookmarks = true;
    out.send_initial_events = Some(true);
    out.version_match = Some(VersionMatch::NotOlderThan);
    out.limit = None;
    Some(out)
}

fn is_eligible(opts: &ListOptions) -> bool {
    if opts.watch {
        return false;
    }
    if opts.continue_token.as_deref().is_some_and(|c| !c.is_empty()) {
        return false;
    }
    if opts.version_match == Some(VersionMatch::Exact) {
        return false;
    }
    if opts.send_initial_events == Some(false) {
        return false;
    }
    // The watch cache ignores limits only when listing at "0".
    if opts.limit.is_some_and(|l| l > 0) && opts.resource_version.as_deref() != Some("0") {
        return false;
    }
    true
}

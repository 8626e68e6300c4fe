//! Fold the initial replay of a watch stream into a [`Snapshot`].

use futures::{Stream, StreamExt};
use relist_core::{Item, ObjectKey, Snapshot, WatchEvent};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::{ListError, ListResult};

/// Accumulates replayed items until the initial-events bookmark arrives.
#[derive(Debug, Default)]
pub struct SnapshotAssembler {
    items: FxHashMap<ObjectKey, Item>,
    events: u64,
}

impl SnapshotAssembler {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.items.len() }

    /// Apply one event. Returns the finished snapshot when the stream's initial state is complete.
    pub fn apply(&mut self, event: WatchEvent) -> ListResult<Option<Snapshot>> {
        self.events += 1;
        match event {
            WatchEvent::Added(item) | WatchEvent::Modified(item) => {
                self.items.insert(item.key().clone(), item);
                Ok(None)
            }
            WatchEvent::Deleted(item) => {
                self.items.remove(item.key());
                Ok(None)
            }
            WatchEvent::Bookmark(bm) if bm.is_initial_events_end() => {
                let mut items: Vec<Item> = std::mem::take(&mut self.items).into_values().collect();
                items.sort_by(|a, b| a.key().cmp(b.key()));
                debug!(items = items.len(), events = self.events, rv = %bm.resource_version, "initial events complete");
                Ok(Some(Snapshot::new(bm.resource_version, items)))
            }
            WatchEvent::Bookmark(bm) => {
                trace!(rv = %bm.resource_version, "bookmark before initial events end");
                Ok(None)
            }
            WatchEvent::Error(status) => Err(ListError::Status(status)),
        }
    }
}

/// Drive `events` until the initial-events bookmark. The stream is dropped on return,
/// whatever the outcome.
pub async fn assemble<S>(events: S) -> ListResult<Snapshot>
where
    S: Stream<Item = ListResult<WatchEvent>> + Send,
{
    futures::pin_mut!(events);
    let mut acc = SnapshotAssembler::new();
    while let Some(ev) = events.next().await {
        if let Some(snap) = acc.apply(ev?)? {
            return Ok(snap);
        }
    }
    debug!(partial = acc.len(), "watch stream closed before initial events end");
    Err(ListError::StreamIncomplete)
}

use futures::stream::BoxStream;
use relist_core::{ListOptions, ResourceScope, Snapshot, WatchEvent};

use crate::error::ListResult;

/// Events of one watch connection. Dropping the stream closes the connection.
pub type EventStream = BoxStream<'static, ListResult<WatchEvent>>;

/// Request plumbing the lister calls into.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// One consistent list round trip.
    async fn list(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<Snapshot>;

    /// Open a watch connection with the given options.
    async fn watch(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<EventStream>;
}

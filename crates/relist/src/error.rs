use std::time::Duration;

use relist_core::{CoreError, Status};

/// Errors surfaced by transports and by [`crate::Lister`].
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("watch stream ended before the initial-events bookmark")]
    StreamIncomplete,
    #[error("server status {0}")]
    Status(Status),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("invalid object: {0}")]
    InvalidObject(#[from] CoreError),
    #[error("transport: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type ListResult<T> = Result<T, ListError>;

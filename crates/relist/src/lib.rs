//! relist: list a collection by streaming its initial state over a watch, falling back
//! to a plain list on any failure, with an optional consistency detector.
//!
//! Callers only see [`Lister::list`]; which strategy served a call shows up in logs,
//! metrics and [`ListStats`], never in the result.

#![forbid(unsafe_code)]

pub mod assemble;
pub mod config;
pub mod detect;
pub mod error;
pub mod lister;
pub mod negotiate;
pub mod stats;
pub mod transport;

pub use assemble::{assemble, SnapshotAssembler};
pub use config::{InconsistencyPolicy, RelistConfig};
pub use detect::{ConsistencyDetector, InconsistencyReport, Verdict};
pub use error::{ListError, ListResult};
pub use lister::Lister;
pub use negotiate::prepare_watch_list;
pub use relist_core as core;
pub use stats::{ListStats, StatsSnapshot};
pub use transport::{EventStream, Transport};
pub use tokio_util::sync::CancellationToken;

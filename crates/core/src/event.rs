use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Item, ResourceVersion};

/// Annotation a bookmark carries once the initial replay of a collection is complete.
pub const INITIAL_EVENTS_END_ANNOTATION: &str = "k8s.io/initial-events-end";

/// One event of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Item),
    Modified(Item),
    Deleted(Item),
    Bookmark(Bookmark),
    Error(Status),
}

/// Synthetic event carrying only a resource version and annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub resource_version: ResourceVersion,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Bookmark {
    pub fn new(resource_version: impl Into<ResourceVersion>) -> Self {
        Self { resource_version: resource_version.into(), annotations: BTreeMap::new() }
    }

    /// Bookmark marking the end of the initial replay.
    pub fn initial_events_end(resource_version: impl Into<ResourceVersion>) -> Self {
        let mut b = Self::new(resource_version);
        b.annotations.insert(INITIAL_EVENTS_END_ANNOTATION.to_string(), "true".to_string());
        b
    }

    pub fn is_initial_events_end(&self) -> bool {
        self.annotations.get(INITIAL_EVENTS_END_ANNOTATION).map(|v| v == "true").unwrap_or(false)
    }
}

/// Server status attached to an error event or a failed request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.reason, self.message)
    }
}

//! relist core types: list options, watch events and collection snapshots.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

mod event;
mod options;

pub use event::{Bookmark, Status, WatchEvent, INITIAL_EVENTS_END_ANNOTATION};
pub use options::{ListOptions, VersionMatch};

/// Errors raised while shaping raw objects into core types.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("object missing metadata.name")]
    MissingName,
    #[error("object is not a JSON map")]
    NotAnObject,
    #[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
    InvalidGvk(String),
}

/// Opaque point in a collection's change history. Compared for equality only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(rv: impl Into<String>) -> Self { Self(rv.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ResourceVersion {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for ResourceVersion {
    fn from(v: String) -> Self { Self(v) }
}

/// Identity of an item within a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One object of a collection: its identity plus the raw JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    key: ObjectKey,
    raw: serde_json::Value,
}

impl Item {
    /// Build an item from a raw object, reading identity from `metadata`.
    pub fn from_raw(raw: serde_json::Value) -> Result<Self, CoreError> {
        if !raw.is_object() {
            return Err(CoreError::NotAnObject);
        }
        let meta = raw.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::MissingName)?
            .to_string();
        let namespace = meta
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(Self { key: ObjectKey { namespace, name }, raw })
    }

    pub fn key(&self) -> &ObjectKey { &self.key }
    pub fn raw(&self) -> &serde_json::Value { &self.raw }
}

/// Full state of a collection at one resource version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub resource_version: ResourceVersion,
    pub items: Vec<Item>,
    /// Set when the server paginated the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

impl Snapshot {
    pub fn new(resource_version: impl Into<ResourceVersion>, items: Vec<Item>) -> Self {
        Self { resource_version: resource_version.into(), items, continue_token: None }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

/// Collection addressed by a GVK key plus optional namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceScope {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
}

impl ResourceScope {
    /// Parse `v1/Kind` or `group/v1/Kind`.
    pub fn parse(gvk_key: &str, namespace: Option<&str>) -> Result<Self, CoreError> {
        let parts: Vec<&str> = gvk_key.split('/').collect();
        let (group, version, kind) = match parts.as_slice() {
            [version, kind] => (String::new(), (*version).to_string(), (*kind).to_string()),
            [group, version, kind] => ((*group).to_string(), (*version).to_string(), (*kind).to_string()),
            _ => return Err(CoreError::InvalidGvk(gvk_key.to_string())),
        };
        if version.is_empty() || kind.is_empty() {
            return Err(CoreError::InvalidGvk(gvk_key.to_string()));
        }
        Ok(Self { group, version, kind, namespace: namespace.map(|s| s.to_string()) })
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

pub mod prelude {
    pub use super::{
        Bookmark, CoreError, Item, ListOptions, ObjectKey, ResourceScope, ResourceVersion, Snapshot, Status,
        VersionMatch, WatchEvent,
    };
}

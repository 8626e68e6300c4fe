use serde::{Deserialize, Serialize};

/// How the server should interpret `resource_version` on a list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VersionMatch {
    Exact,
    NotOlderThan,
}

impl VersionMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionMatch::Exact => "Exact",
            VersionMatch::NotOlderThan => "NotOlderThan",
        }
    }
}

/// Query options for list and watch requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
    pub version_match: Option<VersionMatch>,
    pub send_initial_events: Option<bool>,
    pub allow_bookmarks: bool,
    pub timeout_seconds: Option<u32>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub watch: bool,
}

impl ListOptions {
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    pub fn at(mut self, resource_version: &str, version_match: Option<VersionMatch>) -> Self {
        self.resource_version = Some(resource_version.to_string());
        self.version_match = version_match;
        self
    }

    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query pairs in key order; unset and default values are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out: Vec<(&'static str, String)> = Vec::new();
        if self.allow_bookmarks { out.push(("allowWatchBookmarks", "true".into())); }
        if let Some(c) = self.continue_token.as_deref().filter(|s| !s.is_empty()) { out.push(("continue", c.to_string())); }
        if let Some(s) = self.field_selector.as_deref().filter(|s| !s.is_empty()) { out.push(("fieldSelector", s.to_string())); }
        if let Some(s) = self.label_selector.as_deref().filter(|s| !s.is_empty()) { out.push(("labelSelector", s.to_string())); }
        if let Some(l) = self.limit.filter(|l| *l > 0) { out.push(("limit", l.to_string())); }
        if let Some(rv) = self.resource_version.as_deref().filter(|s| !s.is_empty()) { out.push(("resourceVersion", rv.to_string())); }
        if let Some(m) = self.version_match { out.push(("resourceVersionMatch", m.as_str().to_string())); }
        if let Some(b) = self.send_initial_events { out.push(("sendInitialEvents", b.to_string())); }
        if let Some(t) = self.timeout_seconds { out.push(("timeoutSeconds", t.to_string())); }
        if self.watch { out.push(("watch", "true".into())); }
        out
    }

    /// Form-urlencoded query string, keys sorted.
    pub fn to_query(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.query_pairs() {
            ser.append_pair(k, &v);
        }
        ser.finish()
    }
}

//! relist kubehub – kube-backed transport: discovery, list and watch requests

#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use kube::{
    core::{ApiResource, DynamicObject, ErrorResponse, ObjectList, WatchEvent as KubeEvent},
    discovery::{Discovery, Scope},
    Client, Resource,
};
use metrics::counter;
use relist::core::{Bookmark, Item, ListOptions, ResourceScope, ResourceVersion, Snapshot, Status, WatchEvent};
use relist::{EventStream, ListError, ListResult, Transport};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Transport issuing raw `GET <path>?<query>` requests through a `kube::Client`.
pub struct KubeTransport {
    client: Client,
    strip_managed_fields: bool,
    resources: RwLock<HashMap<String, (ApiResource, bool)>>,
}

impl KubeTransport {
    pub fn new(client: Client) -> Self {
        Self { client, strip_managed_fields: true, resources: RwLock::new(HashMap::new()) }
    }

    /// Client from kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        let strip = std::env::var("RELIST_STRIP_MANAGED_FIELDS")
            .ok()
            .map(|s| !matches!(s.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        Ok(Self::new(client).with_strip_managed_fields(strip))
    }

    pub fn with_strip_managed_fields(mut self, on: bool) -> Self {
        self.strip_managed_fields = on;
        self
    }

    /// API resource and namespacing for `scope`. A cache miss runs discovery once and
    /// remembers every recommended resource it returns.
    async fn resolve(&self, scope: &ResourceScope) -> Result<(ApiResource, bool)> {
        let key = scope.gvk_key();
        if let Some(hit) = self.resources.read().await.get(&key) {
            return Ok(hit.clone());
        }
        let discovered = discover(self.client.clone()).await?;
        let mut cache = self.resources.write().await;
        cache.extend(discovered);
        debug!(resources = cache.len(), "discovery cache refreshed");
        cache.get(&key).cloned().ok_or_else(|| anyhow!("GVK not served by the cluster: {}", key))
    }

    async fn request(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<http::Request<Vec<u8>>> {
        let (ar, namespaced) = self.resolve(scope).await?;
        let ns = match (namespaced, scope.namespace.as_deref()) {
            (true, ns) => ns,
            (false, Some(ns)) => {
                warn!(gvk = %scope.gvk_key(), ns, "ignoring namespace for cluster-scoped kind");
                None
            }
            (false, None) => None,
        };
        let url = request_url(&DynamicObject::url_path(&ar, ns), opts);
        debug!(url = %url, "kube request");
        let req = http::Request::get(url).body(Vec::new()).context("building request")?;
        Ok(req)
    }
}

#[async_trait::async_trait]
impl Transport for KubeTransport {
    async fn list(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<Snapshot> {
        let req = self.request(scope, opts).await?;
        counter!("relist_kube_requests_total", 1u64, "verb" => "list");
        let list: ObjectList<DynamicObject> = self.client.request(req).await.map_err(from_kube)?;
        let items = list
            .items
            .into_iter()
            .map(|o| to_item(o, self.strip_managed_fields))
            .collect::<ListResult<Vec<_>>>()?;
        Ok(Snapshot {
            resource_version: ResourceVersion::new(list.metadata.resource_version.unwrap_or_default()),
            items,
            continue_token: list.metadata.continue_.filter(|c| !c.is_empty()),
        })
    }

    async fn watch(&self, scope: &ResourceScope, opts: &ListOptions) -> ListResult<EventStream> {
        let req = self.request(scope, opts).await?;
        counter!("relist_kube_requests_total", 1u64, "verb" => "watch");
        let strip = self.strip_managed_fields;
        let events = self.client.request_events::<DynamicObject>(req).await.map_err(from_kube)?;
        info!(gvk = %scope.gvk_key(), ns = ?scope.namespace, "watch stream opened");
        Ok(events
            .map(move |res: Result<KubeEvent<DynamicObject>, kube::Error>| match res {
                Ok(ev) => convert_event(ev, strip),
                Err(e) => Err(from_kube(e)),
            })
            .boxed())
    }
}

fn request_url(path: &str, opts: &ListOptions) -> String {
    let query = opts.to_query();
    if query.is_empty() { path.to_string() } else { format!("{}?{}", path, query) }
}

/// Recommended resources of every served group, keyed like [`ResourceScope::gvk_key`].
async fn discover(client: Client) -> Result<Vec<(String, (ApiResource, bool))>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    Ok(discovery
        .groups()
        .flat_map(|g| g.recommended_resources())
        .map(|(ar, caps)| (resource_key(&ar), (ar, matches!(caps.scope, Scope::Namespaced))))
        .collect())
}

fn resource_key(ar: &ApiResource) -> String {
    ResourceScope { group: ar.group.clone(), version: ar.version.clone(), kind: ar.kind.clone(), namespace: None }.gvk_key()
}

/// Drop fields that differ between list and watch encodings of the same object.
fn normalize(v: &mut serde_json::Value, strip_managed_fields: bool) {
    if let Some(obj) = v.as_object_mut() {
        obj.remove("apiVersion");
        obj.remove("kind");
    }
    if strip_managed_fields {
        if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("managedFields");
        }
    }
}

fn to_item(obj: DynamicObject, strip_managed_fields: bool) -> ListResult<Item> {
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    normalize(&mut raw, strip_managed_fields);
    Ok(Item::from_raw(raw)?)
}

fn convert_event(ev: KubeEvent<DynamicObject>, strip: bool) -> ListResult<WatchEvent> {
    Ok(match ev {
        KubeEvent::Added(o) => WatchEvent::Added(to_item(o, strip)?),
        KubeEvent::Modified(o) => WatchEvent::Modified(to_item(o, strip)?),
        KubeEvent::Deleted(o) => WatchEvent::Deleted(to_item(o, strip)?),
        KubeEvent::Bookmark(b) => WatchEvent::Bookmark(Bookmark {
            resource_version: ResourceVersion::new(b.metadata.resource_version),
            annotations: b.metadata.annotations,
        }),
        KubeEvent::Error(e) => WatchEvent::Error(status_from(&e)),
    })
}

fn status_from(e: &ErrorResponse) -> Status {
    Status { code: e.code, reason: e.reason.clone(), message: e.message.clone() }
}

fn from_kube(e: kube::Error) -> ListError {
    match e {
        kube::Error::Api(resp) => ListError::Status(status_from(&resp)),
        other => ListError::Transport(anyhow::Error::new(other)),
    }
}

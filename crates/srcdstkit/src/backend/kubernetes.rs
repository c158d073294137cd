//! Kubernetes backend using `kube`.
//!
//! Node watching runs as a task on a tokio runtime owned by the caller.
//! Events cross over to the synchronous dispatcher through an
//! [`EventQueue`], which keeps one pending event per node, and
//! `replace` blocks the calling thread on the runtime. Neither method may be
//! called from inside the runtime itself.

use super::{Closer, EventQueue, Inventory, NodeSource, Subscription};
use crate::error::{Error, Result};
use crate::node::NodeRecord;
use crate::types::WatchEvent;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, PostParams};
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use log::{debug, error, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, interval_at};

/// Cluster-wide node inventory backed by the Kubernetes API.
pub struct KubeInventory {
    api: Api<Node>,
    handle: Handle,
    resync: Duration,
}

impl KubeInventory {
    /// Connect with the default kubeconfig or in-cluster service account.
    ///
    /// Every `resync`, all known nodes are delivered again as updates.
    pub fn connect(handle: Handle, resync: Duration) -> Result<Self> {
        let client = handle
            .block_on(Client::try_default())
            .map_err(|e| Error::Other(format!("failed to create Kubernetes client: {e}")))?;
        Ok(Self::with_client(client, handle, resync))
    }

    /// Build from an existing client.
    pub fn with_client(client: Client, handle: Handle, resync: Duration) -> Self {
        Self {
            api: Api::all(client),
            handle,
            resync,
        }
    }
}

impl Inventory for KubeInventory {
    fn replace(&self, node: &NodeRecord) -> Result<()> {
        let desired: Node =
            serde_json::from_value(node.document().clone()).map_err(|e| Error::Persist {
                node: node.name().to_string(),
                message: format!("cannot rebuild node object: {e}"),
                transient: false,
            })?;

        self.handle
            .block_on(self.api.replace(node.name(), &PostParams::default(), &desired))
            .map(|_| ())
            .map_err(|e| classify(node.name(), e))
    }
}

impl NodeSource for KubeInventory {
    fn watch(&self) -> Result<Subscription> {
        let queue = Arc::new(EventQueue::new());
        let task = self
            .handle
            .spawn(pump(self.api.clone(), self.resync, Arc::clone(&queue)));
        let abort = task.abort_handle();
        Ok(Subscription::with_closer(queue, Closer::new(move || abort.abort())))
    }
}

/// Map an API error onto the persist taxonomy.
fn classify(node: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            node: node.to_string(),
        },
        kube::Error::Api(resp) => Error::Persist {
            node: node.to_string(),
            transient: is_transient_status(resp.code),
            message: format!("{} ({})", resp.message, resp.code),
        },
        other => Error::Persist {
            node: node.to_string(),
            message: other.to_string(),
            transient: true,
        },
    }
}

fn is_transient_status(code: u16) -> bool {
    code == 429 || code >= 500
}

/// Forward watch events until the queue is closed.
async fn pump(api: Api<Node>, resync: Duration, queue: Arc<EventQueue>) {
    let mut cache = NodeCache::default();
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut ticker = interval_at(Instant::now() + resync, resync);

    loop {
        let out = tokio::select! {
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if let Event::Delete(node) = &event
                        && let Some(name) = node.metadata.name.as_deref()
                    {
                        queue.discard(name);
                    }
                    cache.apply(event)
                }
                Some(Err(e)) => {
                    warn!("Node watch error: {e}");
                    continue;
                }
                None => {
                    error!("Node watch stream ended");
                    queue.close();
                    return;
                }
            },
            _ = ticker.tick() => {
                debug!("Resyncing {} nodes ({} still pending)", cache.len(), queue.len());
                cache.resync()
            }
        };

        for event in out {
            if !queue.push(event) {
                return;
            }
        }
    }
}

/// Last known version of every node, keyed by name.
///
/// Used to tell first sightings from updates and to replay nodes on resync.
#[derive(Default)]
struct NodeCache {
    nodes: HashMap<String, Value>,
    relisting: Option<HashSet<String>>,
}

impl NodeCache {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Fold one watcher event into the cache, returning events to forward.
    fn apply(&mut self, event: Event<Node>) -> Vec<WatchEvent> {
        match event {
            Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(node) => {
                if let (Some(seen), Some(name)) =
                    (self.relisting.as_mut(), node.metadata.name.as_ref())
                {
                    seen.insert(name.clone());
                }
                self.upsert(&node).into_iter().collect()
            }
            Event::InitDone => {
                if let Some(seen) = self.relisting.take() {
                    self.nodes.retain(|name, _| seen.contains(name));
                }
                Vec::new()
            }
            Event::Apply(node) => self.upsert(&node).into_iter().collect(),
            Event::Delete(node) => {
                if let Some(name) = node.metadata.name.as_deref() {
                    self.nodes.remove(name);
                }
                Vec::new()
            }
        }
    }

    fn upsert(&mut self, node: &Node) -> Option<WatchEvent> {
        let payload = match serde_json::to_value(node) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode node {:?}: {e}", node.metadata.name);
                return None;
            }
        };
        let Some(name) = node.metadata.name.clone() else {
            // Let the dispatcher classify it
            return Some(WatchEvent::updated(payload));
        };
        if self.nodes.insert(name, payload.clone()).is_some() {
            Some(WatchEvent::updated(payload))
        } else {
            Some(WatchEvent::added(payload))
        }
    }

    fn resync(&self) -> Vec<WatchEvent> {
        self.nodes.values().cloned().map(WatchEvent::updated).collect()
    }
}

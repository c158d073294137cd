//! Backend abstraction for the cluster and the cloud API.
//!
//! The reconciler only talks to these traits, enabling:
//! - The real Kubernetes and EC2 clients
//! - Mock implementations for testing

#[cfg(feature = "ec2")]
pub mod ec2;
#[cfg(feature = "kube")]
pub mod kubernetes;
mod queue;

pub use queue::EventQueue;

use crate::error::Result;
use crate::node::NodeRecord;
use crate::provider_id::InstanceId;
use crate::types::WatchEvent;
use std::fmt;
use std::sync::Arc;

/// Write access to the node inventory.
pub trait Inventory: Send + Sync {
    /// Replace the stored node with `node`, matched by name.
    ///
    /// Implementations should return [`crate::Error::Conflict`] when the
    /// stored node moved on since the snapshot was taken, and a
    /// [`crate::Error::Persist`] with `transient: true` for failures an
    /// immediate retry could fix.
    fn replace(&self, node: &NodeRecord) -> Result<()>;
}

/// Source of node add/update notifications.
pub trait NodeSource {
    /// Start watching all nodes in the cluster.
    fn watch(&self) -> Result<Subscription>;
}

/// The one cloud call the controller makes.
pub trait AttributeClient: Send + Sync {
    /// Disable source/destination check on an instance.
    ///
    /// Must be safe to call on an instance where it is already disabled.
    fn disable_source_dest_check(&self, instance_id: &InstanceId) -> Result<()>;
}

/// Handle that stops a running watch.
#[derive(Clone)]
pub struct Closer(Arc<dyn Fn() + Send + Sync>);

impl Closer {
    /// Wrap a stop function.
    pub fn new(stop: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(stop))
    }

    /// A closer with no producer to stop; only the queue gets closed.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Stop the watch. Events already queued are still delivered.
    pub fn close(&self) {
        (self.0)();
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closer")
    }
}

/// A live node watch.
///
/// Events are read from an [`EventQueue`] in arrival order, one per node at
/// most. The stream ends once the queue is closed and drained. Closing the
/// subscription, or dropping it, stops the producer and closes the queue.
#[derive(Debug)]
pub struct Subscription {
    queue: Arc<EventQueue>,
    closer: Closer,
}

impl Subscription {
    /// Subscription over a queue fed by the caller.
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self::with_closer(queue, Closer::noop())
    }

    /// Subscription that runs `stop` on shutdown before closing the queue.
    pub fn with_closer(queue: Arc<EventQueue>, stop: Closer) -> Self {
        let shared = Arc::clone(&queue);
        let closer = Closer::new(move || {
            stop.close();
            shared.close();
        });
        Self { queue, closer }
    }

    /// A handle that can stop this subscription from another thread.
    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }

    /// Block for the next event; `None` once the watch has ended.
    pub fn next_event(&self) -> Option<WatchEvent> {
        self.queue.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closer.close();
    }
}

//! # srcdstkit
//!
//! Keeps EC2 source/destination check disabled on every node of a
//! Kubernetes cluster.
//!
//! Overlay networks that route pod traffic through node IPs need the check
//! off on each instance. This crate watches the cluster's nodes, disables
//! the check once per node, and records that on the node itself with the
//! [`SRC_DST_CHECK_DISABLED_ANNOTATION`] annotation so it is never done twice.
//!
//! ## Example
//!
//! ```ignore
//! use srcdstkit::backend::NodeSource;
//! use srcdstkit::backend::ec2::{Ec2AttributeClient, Ec2Options};
//! use srcdstkit::backend::kubernetes::KubeInventory;
//! use srcdstkit::{Reconciler, WatchDispatcher};
//! use std::time::Duration;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let inventory = KubeInventory::connect(runtime.handle().clone(), Duration::from_secs(60))?;
//! let ec2 = Ec2AttributeClient::connect(runtime.handle().clone(), &Ec2Options::default())?;
//!
//! let subscription = inventory.watch()?;
//! let stats = WatchDispatcher::new(subscription, Reconciler::new(&inventory, &ec2)).run();
//! println!("{stats}");
//! ```
//!
//! ## Retry
//!
//! There is no retry loop of its own: a failed node is retried when the
//! watch next reports it, which the Kubernetes backend guarantees through
//! periodic resync. The only local retry is around the marker write, for
//! transient API failures; see [`Reconciler::with_persist_retry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod marker;
pub mod node;
pub mod provider_id;
pub mod reconciler;
pub mod retry;
pub mod types;

pub use backend::{AttributeClient, Closer, EventQueue, Inventory, NodeSource, Subscription};
pub use dispatcher::WatchDispatcher;
pub use error::{Error, ErrorCategory, Result};
pub use marker::{MARKER_VALUE, SRC_DST_CHECK_DISABLED_ANNOTATION, is_handled, mark_handled};
pub use node::NodeRecord;
pub use provider_id::{InstanceId, resolve};
pub use reconciler::Reconciler;
pub use types::{Outcome, ReconcileStats, RetryConfig, TriggerKind, WatchEvent};

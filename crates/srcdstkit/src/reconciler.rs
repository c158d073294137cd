//! Per-node reconciliation.
//!
//! One attempt runs these steps in order and stops at the first failure:
//!
//! 1. Check the completion marker. Marked nodes are done: no EC2 call, no write.
//! 2. Resolve `spec.providerID` to an instance ID.
//! 3. Disable source/destination check on the instance.
//! 4. Write back a marked copy of the node.
//!
//! A failed attempt leaves the cluster untouched and is picked up again on
//! the node's next watch event. If step 4 fails after step 3 succeeded,
//! step 3 is simply repeated next time; EC2 accepts it on an instance that
//! already has the check disabled.

use crate::backend::{AttributeClient, Inventory};
use crate::error::Result;
use crate::marker;
use crate::node::NodeRecord;
use crate::provider_id;
use crate::retry;
use crate::types::{Outcome, RetryConfig};
use log::{debug, info};

/// Drives a single node toward "check disabled, marker set".
///
/// Holds no per-node state, so one reconciler can serve any number of
/// nodes, from any number of threads.
pub struct Reconciler<'a> {
    inventory: &'a dyn Inventory,
    attributes: &'a dyn AttributeClient,
    persist_retry: RetryConfig,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler. Marker writes are not retried locally.
    pub fn new(inventory: &'a dyn Inventory, attributes: &'a dyn AttributeClient) -> Self {
        Self {
            inventory,
            attributes,
            persist_retry: RetryConfig::no_retry(),
        }
    }

    /// Retry transient marker-write failures with this policy.
    pub fn with_persist_retry(mut self, config: RetryConfig) -> Self {
        self.persist_retry = config;
        self
    }

    /// Run one reconciliation attempt for a node snapshot.
    pub fn reconcile(&self, node: &NodeRecord) -> Result<Outcome> {
        if marker::is_handled(node) {
            debug!(
                "Skipping node {} because it already has the {} annotation",
                node.name(),
                marker::SRC_DST_CHECK_DISABLED_ANNOTATION
            );
            return Ok(Outcome::AlreadyHandled);
        }

        let instance_id = provider_id::resolve(node.provider_id())?;
        debug!("Node {} is instance {}", node.name(), instance_id);

        self.attributes.disable_source_dest_check(&instance_id)?;

        let marked = marker::mark_handled(node)?;
        info!(
            "Marking node {} with {}",
            node.name(),
            marker::SRC_DST_CHECK_DISABLED_ANNOTATION
        );
        retry::with_retry(&self.persist_retry, "Marker write", || {
            self.inventory.replace(&marked)
        })?;

        Ok(Outcome::Disabled { instance_id })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Error, ErrorCategory};
    use crate::provider_id::InstanceId;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Counts calls and fails on demand.
    #[derive(Default)]
    pub(crate) struct MockAttributes {
        pub calls: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl AttributeClient for MockAttributes {
        fn disable_source_dest_check(&self, instance_id: &InstanceId) -> Result<()> {
            self.calls.lock().unwrap().push(instance_id.to_string());
            if self.fail {
                return Err(Error::AttributeCall {
                    instance_id: instance_id.to_string(),
                    message: "UnauthorizedOperation".to_string(),
                });
            }
            Ok(())
        }
    }

    impl MockAttributes {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    /// Records every replaced node; pops scripted errors first.
    #[derive(Default)]
    pub(crate) struct MockInventory {
        pub replaced: Mutex<Vec<NodeRecord>>,
        pub attempts: Mutex<usize>,
        pub errors: Mutex<VecDeque<Error>>,
    }

    impl Inventory for MockInventory {
        fn replace(&self, node: &NodeRecord) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            if let Some(err) = self.errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.replaced.lock().unwrap().push(node.clone());
            Ok(())
        }
    }

    impl MockInventory {
        pub fn failing_with(errors: Vec<Error>) -> Self {
            Self {
                errors: Mutex::new(errors.into()),
                ..Default::default()
            }
        }

        pub fn attempt_count(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    fn transient(node: &str) -> Error {
        Error::Persist {
            node: node.to_string(),
            message: "503 Service Unavailable".to_string(),
            transient: true,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_unmarked_node_is_disabled_and_marked() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        let node = NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh");
        let outcome = reconciler.reconcile(&node).unwrap();

        assert!(matches!(
            outcome,
            Outcome::Disabled { ref instance_id } if instance_id.as_str() == "i-abcdefgh"
        ));
        assert_eq!(*attributes.calls.lock().unwrap(), vec!["i-abcdefgh"]);

        let replaced = inventory.replaced.lock().unwrap();
        assert_eq!(replaced.len(), 1);
        assert!(marker::is_handled(&replaced[0]));
        // The snapshot handed in is never touched
        assert!(!marker::is_handled(&node));
    }

    #[test]
    fn test_marked_node_makes_no_calls() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        let node = marker::mark_handled(&NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh"))
            .unwrap();

        assert_eq!(reconciler.reconcile(&node).unwrap(), Outcome::AlreadyHandled);
        assert_eq!(reconciler.reconcile(&node).unwrap(), Outcome::AlreadyHandled);
        assert_eq!(attributes.call_count(), 0);
        assert_eq!(inventory.attempt_count(), 0);
    }

    #[test]
    fn test_second_pass_on_written_record_is_noop() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        let node = NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh");
        reconciler.reconcile(&node).unwrap();
        let written = inventory.replaced.lock().unwrap()[0].clone();
        assert_eq!(reconciler.reconcile(&written).unwrap(), Outcome::AlreadyHandled);

        assert_eq!(attributes.call_count(), 1);
    }

    #[test]
    fn test_exactly_one_call_with_many_annotations() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        let node = NodeRecord::from_payload(json!({
            "kind": "Node",
            "metadata": {
                "name": "busy",
                "annotations": {
                    "a.example.com/one": "1",
                    "a.example.com/two": "2",
                    "a.example.com/three": "3",
                    "volumes.kubernetes.io/controller-managed-attach-detach": "true"
                }
            },
            "spec": { "providerID": "aws://us-west-2a/i-a123hd52" }
        }))
        .unwrap();

        reconciler.reconcile(&node).unwrap();
        assert_eq!(attributes.call_count(), 1);
        let replaced = inventory.replaced.lock().unwrap();
        assert_eq!(replaced[0].annotations().len(), 5);
    }

    #[test]
    fn test_resolve_failure_aborts_before_any_call() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        for (provider_id, category) in [
            ("gce://us-west-1a/test", ErrorCategory::UnsupportedProvider),
            ("", ErrorCategory::UnsupportedProvider),
            ("aws:///us-west-2a/vol-1", ErrorCategory::MalformedIdentifier),
        ] {
            let err = reconciler
                .reconcile(&NodeRecord::new("n1", provider_id))
                .unwrap_err();
            assert_eq!(err.category(), category);
        }

        assert_eq!(attributes.call_count(), 0);
        assert_eq!(inventory.attempt_count(), 0);
    }

    #[test]
    fn test_attribute_failure_aborts_without_write() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes {
            fail: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(&inventory, &attributes);

        let err = reconciler
            .reconcile(&NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh"))
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::AttributeCall);
        assert_eq!(attributes.call_count(), 1);
        assert_eq!(inventory.attempt_count(), 0);
    }

    #[test]
    fn test_persist_failure_redoes_call_next_time() {
        let inventory = MockInventory::failing_with(vec![Error::Conflict {
            node: "n1".to_string(),
        }]);
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes).with_persist_retry(fast_retry(5));

        let node = NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh");
        let err = reconciler.reconcile(&node).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Persist);
        // Conflicts are not retried locally
        assert_eq!(inventory.attempt_count(), 1);

        // Next event for the same (still unmarked) node
        reconciler.reconcile(&node).unwrap();
        assert_eq!(attributes.call_count(), 2);
        assert_eq!(inventory.replaced.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_transient_persist_failure_is_retried() {
        let inventory = MockInventory::failing_with(vec![transient("n1"), transient("n1")]);
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes).with_persist_retry(fast_retry(3));

        let outcome = reconciler
            .reconcile(&NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh"))
            .unwrap();

        assert!(matches!(outcome, Outcome::Disabled { .. }));
        assert_eq!(inventory.attempt_count(), 3);
        assert_eq!(attributes.call_count(), 1);
    }

    #[test]
    fn test_transient_persist_failure_gives_up() {
        let inventory = MockInventory::failing_with(vec![transient("n1"), transient("n1")]);
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes).with_persist_retry(fast_retry(2));

        let err = reconciler
            .reconcile(&NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh"))
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(inventory.attempt_count(), 2);
        assert!(inventory.replaced.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_does_not_retry_persist() {
        let inventory = MockInventory::failing_with(vec![transient("n1")]);
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        assert!(
            reconciler
                .reconcile(&NodeRecord::new("n1", "aws:///us-mock-1/i-abcdefgh"))
                .is_err()
        );
        assert_eq!(inventory.attempt_count(), 1);
    }

    #[test]
    fn test_reconciler_is_shareable_across_threads() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let reconciler = Reconciler::new(&inventory, &attributes);

        std::thread::scope(|s| {
            for i in 0..4 {
                let reconciler = &reconciler;
                s.spawn(move || {
                    let node = NodeRecord::new(format!("n{i}"), format!("aws:///zone/i-{i:08x}"));
                    reconciler.reconcile(&node).unwrap();
                });
            }
        });

        assert_eq!(attributes.call_count(), 4);
        assert_eq!(inventory.replaced.lock().unwrap().len(), 4);
    }
}

//! Watch dispatcher: turns node watch events into reconciliation attempts.

use crate::backend::Subscription;
use crate::error::{Error, ErrorCategory};
use crate::node::NodeRecord;
use crate::reconciler::Reconciler;
use crate::types::{Outcome, ReconcileStats, WatchEvent};
use log::{Level, debug, error, info, log};

/// Owns the node subscription and feeds every event to the reconciler.
///
/// Added and updated events take the same path. Events are handled one at
/// a time, in delivery order, each to completion before the next.
pub struct WatchDispatcher<'a> {
    subscription: Subscription,
    reconciler: Reconciler<'a>,
    stats: ReconcileStats,
}

impl<'a> WatchDispatcher<'a> {
    /// Create a dispatcher over an open subscription.
    pub fn new(subscription: Subscription, reconciler: Reconciler<'a>) -> Self {
        Self {
            subscription,
            reconciler,
            stats: ReconcileStats::default(),
        }
    }

    /// Process events until the subscription ends, then return the counters.
    pub fn run(mut self) -> ReconcileStats {
        info!("Watching nodes");
        while let Some(event) = self.subscription.next_event() {
            self.dispatch(event);
        }
        info!("Node watch closed: {}", self.stats);
        self.stats
    }

    /// Handle a single event.
    ///
    /// Never fails: undecodable payloads are dropped and failed attempts are
    /// logged, both counted in [`Self::stats`].
    pub fn dispatch(&mut self, event: WatchEvent) -> Option<Outcome> {
        let node = match NodeRecord::from_payload(event.payload) {
            Ok(node) => node,
            Err(e) => {
                error!("Dropping {} event: {}", event.kind, e);
                self.stats.add_dropped();
                return None;
            }
        };

        debug!("Received {} event for node {}", event.kind, node.name());

        match self.reconciler.reconcile(&node) {
            Ok(outcome) => {
                if let Outcome::Disabled { instance_id } = &outcome {
                    info!(
                        "Disabled source/destination check for node {} ({})",
                        node.name(),
                        instance_id
                    );
                }
                self.stats.add_outcome(&outcome);
                Some(outcome)
            }
            Err(e) => {
                log_failure(&node, &e);
                self.stats.add_failure(e.category());
                None
            }
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }
}

fn log_failure(node: &NodeRecord, err: &Error) {
    let category = err.category();
    match category {
        ErrorCategory::UnsupportedProvider => {
            log!(failure_level(node, err), "Skipping node {}: {}", node.name(), err);
        }
        _ => {
            error!(
                "Failed to reconcile node {} [{}]: {}. {}",
                node.name(),
                category.label(),
                err,
                category.advice()
            );
        }
    }
}

/// Nodes the cloud provider has not initialised yet have no provider ID;
/// those are only worth a debug line until one shows up.
fn failure_level(node: &NodeRecord, err: &Error) -> Level {
    match err.category() {
        ErrorCategory::UnsupportedProvider if node.provider_id().is_empty() => Level::Debug,
        ErrorCategory::UnsupportedProvider => Level::Warn,
        _ => Level::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EventQueue;
    use crate::marker::SRC_DST_CHECK_DISABLED_ANNOTATION;
    use crate::reconciler::tests::{MockAttributes, MockInventory};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn node(name: &str, provider_id: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": name, "resourceVersion": "1" },
            "spec": { "providerID": provider_id }
        })
    }

    fn marked(name: &str, provider_id: &str) -> Value {
        let mut value = node(name, provider_id);
        value["metadata"]["annotations"] = json!({ SRC_DST_CHECK_DISABLED_ANNOTATION: "true" });
        value
    }

    fn subscription(events: Vec<WatchEvent>) -> Subscription {
        let queue = Arc::new(EventQueue::new());
        for event in events {
            assert!(queue.push(event));
        }
        queue.close();
        Subscription::new(queue)
    }

    #[test]
    fn test_run_until_closed() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();

        let events = vec![
            WatchEvent::added(node("a", "aws:///us-west-2a/i-09fc5a0ae524b0333")),
            WatchEvent::added(marked("b", "aws:///us-west-2a/i-0b")),
            WatchEvent::updated(json!({ "kind": "Pod", "metadata": { "name": "p" } })),
            WatchEvent::updated(node("c", "gce://us-west-1a/test")),
            WatchEvent::updated(node("d", "aws://us-west-2a/i-a123hd52")),
        ];

        let dispatcher =
            WatchDispatcher::new(subscription(events), Reconciler::new(&inventory, &attributes));
        let stats = dispatcher.run();

        assert_eq!(stats.disabled, 2);
        assert_eq!(stats.already_handled, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.failed["unsupported-provider"], 1);
        assert_eq!(
            *attributes.calls.lock().unwrap(),
            vec!["i-09fc5a0ae524b0333", "i-a123hd52"]
        );
    }

    #[test]
    fn test_added_and_updated_take_same_path() {
        let attributes = MockAttributes::default();

        for event in [
            WatchEvent::added(node("a", "aws:///zone/i-1")),
            WatchEvent::updated(node("a", "aws:///zone/i-1")),
        ] {
            let inventory = MockInventory::default();
            let mut dispatcher = WatchDispatcher::new(
                subscription(Vec::new()),
                Reconciler::new(&inventory, &attributes),
            );
            let outcome = dispatcher.dispatch(event);
            assert!(matches!(outcome, Some(Outcome::Disabled { .. })));
            assert_eq!(inventory.replaced.lock().unwrap().len(), 1);
        }

        assert_eq!(attributes.call_count(), 2);
    }

    #[test]
    fn test_unexpected_payload_is_dropped() {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        let mut dispatcher = WatchDispatcher::new(
            subscription(Vec::new()),
            Reconciler::new(&inventory, &attributes),
        );

        for payload in [json!(42), json!({ "kind": "Node" }), json!([node("a", "x")])] {
            assert!(dispatcher.dispatch(WatchEvent::added(payload)).is_none());
        }

        assert_eq!(dispatcher.stats().dropped, 3);
        assert_eq!(attributes.call_count(), 0);
        assert_eq!(inventory.attempt_count(), 0);
    }

    #[test]
    fn test_failures_keep_dispatcher_running() {
        let inventory = MockInventory::failing_with(vec![Error::Conflict {
            node: "a".to_string(),
        }]);
        let attributes = MockAttributes::default();

        let mut dispatcher = WatchDispatcher::new(
            subscription(vec![WatchEvent::updated(node("bad", "aws:///zone/nested/i-2"))]),
            Reconciler::new(&inventory, &attributes),
        );

        // Same unmarked snapshot twice: first write conflicts, second lands
        assert!(dispatcher.dispatch(WatchEvent::added(node("a", "aws:///zone/i-1"))).is_none());
        assert!(dispatcher.dispatch(WatchEvent::updated(node("a", "aws:///zone/i-1"))).is_some());
        let stats = dispatcher.run();

        assert_eq!(stats.failed["persist"], 1);
        assert_eq!(stats.failed["malformed-identifier"], 1);
        assert_eq!(stats.disabled, 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(attributes.call_count(), 2);
    }

    #[test]
    fn test_unsupported_provider_log_level() {
        let uninitialised = NodeRecord::new("a", "");
        let err = reconcile_error(&uninitialised);
        assert_eq!(failure_level(&uninitialised, &err), Level::Debug);

        let foreign = NodeRecord::new("b", "gce://us-west-1a/test");
        let err = reconcile_error(&foreign);
        assert_eq!(failure_level(&foreign, &err), Level::Warn);

        let malformed = NodeRecord::new("c", "aws:///zone/vol-1");
        let err = reconcile_error(&malformed);
        assert_eq!(failure_level(&malformed, &err), Level::Error);
    }

    fn reconcile_error(node: &NodeRecord) -> Error {
        let inventory = MockInventory::default();
        let attributes = MockAttributes::default();
        Reconciler::new(&inventory, &attributes)
            .reconcile(node)
            .unwrap_err()
    }
}

//! Shared types: watch events, outcomes, counters and options.

use crate::error::ErrorCategory;
use crate::provider_id::InstanceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Why a node is being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    /// First time the watch reports this node
    Added,
    /// Node changed, or was re-delivered by a resync
    Updated,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// One notification from the node watch, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// Add or update
    pub kind: TriggerKind,
    /// The object as delivered by the watch
    pub payload: Value,
}

impl WatchEvent {
    /// Create an "added" event.
    pub fn added(payload: Value) -> Self {
        Self {
            kind: TriggerKind::Added,
            payload,
        }
    }

    /// Create an "updated" event.
    pub fn updated(payload: Value) -> Self {
        Self {
            kind: TriggerKind::Updated,
            payload,
        }
    }

    /// `metadata.name` of the payload, if it has one.
    pub fn node_name(&self) -> Option<&str> {
        self.payload.pointer("/metadata/name").and_then(Value::as_str)
    }
}

/// Successful end states of a reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The node already carried the marker; nothing was called
    AlreadyHandled,
    /// The check was disabled and the marker written
    Disabled {
        /// Instance the check was disabled on
        instance_id: InstanceId,
    },
}

/// Running counters kept by the watch dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Nodes whose check was disabled
    pub disabled: usize,
    /// Events for nodes that already carried the marker
    pub already_handled: usize,
    /// Aborted attempts, per failure category label
    pub failed: BTreeMap<String, usize>,
    /// Payloads that were not nodes
    pub dropped: usize,
}

impl ReconcileStats {
    /// Record a successful attempt.
    pub fn add_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::AlreadyHandled => self.already_handled += 1,
            Outcome::Disabled { .. } => self.disabled += 1,
        }
    }

    /// Record an aborted attempt.
    pub fn add_failure(&mut self, category: ErrorCategory) {
        *self.failed.entry(category.label().to_string()).or_default() += 1;
    }

    /// Record a dropped payload.
    pub fn add_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Total aborted attempts.
    pub fn total_failed(&self) -> usize {
        self.failed.values().sum()
    }

    /// Total events seen.
    pub fn total(&self) -> usize {
        self.disabled + self.already_handled + self.total_failed() + self.dropped
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} disabled, {} already handled, {} failed, {} dropped",
            self.disabled,
            self.already_handled,
            self.total_failed(),
            self.dropped
        )?;
        if !self.failed.is_empty() {
            let detail: Vec<String> = self
                .failed
                .iter()
                .map(|(label, count)| format!("{label}={count}"))
                .collect();
            write!(f, " ({})", detail.join(", "))?;
        }
        Ok(())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

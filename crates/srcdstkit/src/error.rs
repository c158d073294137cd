//! Error types for node reconciliation.
//!
//! Every error a reconciliation attempt can hit maps onto one
//! [`ErrorCategory`]. None of them is fatal to the controller: the attempt
//! is abandoned, the error is logged, and the node is picked up again on
//! its next watch event.

use thiserror::Error;

/// Failure classes of a reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Provider ID scheme is not `aws`
    UnsupportedProvider,
    /// Provider ID could not be parsed into an instance ID
    MalformedIdentifier,
    /// The EC2 call failed
    AttributeCall,
    /// Writing the marked node back to the cluster failed
    Persist,
    /// The watch delivered something that is not a node
    UnexpectedPayload,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// All categories, in reporting order.
    pub fn all() -> &'static [ErrorCategory] {
        &[
            Self::UnsupportedProvider,
            Self::MalformedIdentifier,
            Self::AttributeCall,
            Self::Persist,
            Self::UnexpectedPayload,
            Self::Other,
        ]
    }

    /// Short label used in log lines and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnsupportedProvider => "unsupported-provider",
            Self::MalformedIdentifier => "malformed-identifier",
            Self::AttributeCall => "attribute-call",
            Self::Persist => "persist",
            Self::UnexpectedPayload => "unexpected-payload",
            Self::Other => "other",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::UnsupportedProvider => "Node is not backed by EC2; nothing to do",
            Self::MalformedIdentifier => {
                "Check the node's spec.providerID; it will not be retried until it changes"
            }
            Self::AttributeCall => {
                "Check IAM permissions for ec2:ModifyInstanceAttribute and the configured region"
            }
            Self::Persist => "Check RBAC for updating nodes; the node is retried on its next event",
            Self::UnexpectedPayload => "The watch is misconfigured; report this as a bug",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors raised while reconciling a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider ID does not belong to AWS
    #[error("node is not in AWS EC2 (provider ID {provider_id:?})")]
    UnsupportedProvider {
        /// The rejected provider ID
        provider_id: String,
    },

    /// Provider ID is structurally invalid
    #[error("invalid provider ID {provider_id:?}: {reason}")]
    MalformedIdentifier {
        /// The rejected provider ID
        provider_id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Disabling the check on the instance failed
    #[error("failed to disable source/destination check for {instance_id}: {message}")]
    AttributeCall {
        /// Target instance
        instance_id: String,
        /// Error detail from the cloud API
        message: String,
    },

    /// Writing the node back failed
    #[error("failed to update node {node}: {message}")]
    Persist {
        /// Node name
        node: String,
        /// Error detail
        message: String,
        /// Whether an immediate retry could succeed (network, throttling, 5xx)
        transient: bool,
    },

    /// The node changed since the snapshot was taken
    #[error("node {node} was modified concurrently; will retry on next event")]
    Conflict {
        /// Node name
        node: String,
    },

    /// Watch payload is not a node
    #[error("expected a Node but received: {message}")]
    UnexpectedPayload {
        /// What was received or why it failed to decode
        message: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnsupportedProvider { .. } => ErrorCategory::UnsupportedProvider,
            Error::MalformedIdentifier { .. } => ErrorCategory::MalformedIdentifier,
            Error::AttributeCall { .. } => ErrorCategory::AttributeCall,
            Error::Persist { .. } | Error::Conflict { .. } => ErrorCategory::Persist,
            Error::UnexpectedPayload { .. } => ErrorCategory::UnexpectedPayload,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying right away.
    ///
    /// Only persist failures qualify. A failed EC2 call or a conflict waits
    /// for the next watch event instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persist { transient: true, .. })
    }

    pub(crate) fn malformed(provider_id: &str, reason: impl Into<String>) -> Self {
        Error::MalformedIdentifier {
            provider_id: provider_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

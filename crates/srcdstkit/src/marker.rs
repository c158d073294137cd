//! Completion marker stored as a node annotation.
//!
//! Presence of the annotation, whatever its value, means the node's
//! instance already has source/destination check disabled. The controller
//! only ever adds it.

use crate::error::Result;
use crate::node::NodeRecord;

/// Annotation key recording that the check was disabled.
pub const SRC_DST_CHECK_DISABLED_ANNOTATION: &str =
    "kubernetes-ec2-srcdst-controller.ottoyiu.com/srcdst-check-disabled";

/// Value written under [`SRC_DST_CHECK_DISABLED_ANNOTATION`].
pub const MARKER_VALUE: &str = "true";

/// Whether the node has already been handled.
pub fn is_handled(node: &NodeRecord) -> bool {
    node.annotations()
        .contains_key(SRC_DST_CHECK_DISABLED_ANNOTATION)
}

/// Return a marked copy of the node. The input is left as it was.
pub fn mark_handled(node: &NodeRecord) -> Result<NodeRecord> {
    node.with_annotation(SRC_DST_CHECK_DISABLED_ANNOTATION, MARKER_VALUE)
}

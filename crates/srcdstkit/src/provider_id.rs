//! Provider ID → EC2 instance ID resolution.
//!
//! Kubernetes stores the cloud resource behind a node in `spec.providerID`.
//! On AWS it looks like `aws:///us-west-2a/i-0123456789abcdef0`; older
//! clusters also produce `aws://us-west-2a/i-0123456789abcdef0`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

/// Scheme of AWS provider IDs.
pub const AWS_SCHEME: &str = "aws";

/// Prefix every EC2 instance ID starts with.
pub const INSTANCE_ID_PREFIX: &str = "i-";

/// A validated EC2 instance ID.
///
/// Only the `i-` prefix is checked. Both known lengths (`i-12345678` and
/// `i-12345678abcdef01`) are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve a node's provider ID to an EC2 instance ID.
///
/// Same input always gives the same output or the same error category.
pub fn resolve(provider_id: &str) -> Result<InstanceId> {
    match provider_id.split_once("://") {
        Some((AWS_SCHEME, _)) => {}
        _ => {
            return Err(Error::UnsupportedProvider {
                provider_id: provider_id.to_string(),
            });
        }
    }

    // Kubernetes writes an empty host, so `aws:///zone/id` has to become
    // `aws://zone/id` before the zone lands in the authority.
    let normalized = match provider_id.strip_prefix("aws:///") {
        Some(rest) => format!("{AWS_SCHEME}://{rest}"),
        None => provider_id.to_string(),
    };

    let url = Url::parse(&normalized).map_err(|e| Error::malformed(provider_id, e.to_string()))?;

    // `Url` keeps the path percent-encoded; checks run on the decoded text
    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|e| Error::malformed(provider_id, format!("path is not valid UTF-8: {e}")))?;
    let instance_id = path.trim_matches('/');

    if instance_id.contains('/') {
        return Err(Error::malformed(
            provider_id,
            format!("unexpected path segments in {instance_id:?}"),
        ));
    }
    if !instance_id.starts_with(INSTANCE_ID_PREFIX) {
        return Err(Error::malformed(
            provider_id,
            format!("instance ID {instance_id:?} does not start with {INSTANCE_ID_PREFIX:?}"),
        ));
    }

    Ok(InstanceId(instance_id.to_string()))
}

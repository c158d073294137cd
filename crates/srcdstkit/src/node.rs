//! Node snapshots as seen by the controller.
//!
//! A [`NodeRecord`] is decoded from the JSON document the watch delivers.
//! The fields the controller reads are pulled out and typed; the full
//! document is kept alongside so a replace-by-name write sends back every
//! field untouched, `metadata.resourceVersion` included.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Kind string of Kubernetes node objects.
pub const NODE_KIND: &str = "Node";

/// An immutable snapshot of one cluster node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    name: String,
    provider_id: String,
    annotations: BTreeMap<String, String>,
    document: Value,
}

#[derive(Deserialize)]
struct NodeShape {
    #[serde(default)]
    kind: Option<String>,
    metadata: NodeMeta,
    #[serde(default)]
    spec: NodeSpec,
}

#[derive(Deserialize)]
struct NodeMeta {
    name: String,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Default)]
struct NodeSpec {
    #[serde(rename = "providerID", default)]
    provider_id: Option<String>,
}

impl NodeRecord {
    /// Decode a watch payload.
    ///
    /// Anything that is not a Kubernetes node with a name is rejected as
    /// [`Error::UnexpectedPayload`]. A node without `spec.providerID` decodes
    /// fine; it simply fails resolution later.
    pub fn from_payload(payload: Value) -> Result<Self> {
        let shape: NodeShape =
            serde_json::from_value(payload.clone()).map_err(|e| Error::UnexpectedPayload {
                message: e.to_string(),
            })?;

        match shape.kind.as_deref() {
            Some(NODE_KIND) => {}
            Some(other) => {
                return Err(Error::UnexpectedPayload {
                    message: format!("object of kind {other:?}"),
                });
            }
            None => {
                return Err(Error::UnexpectedPayload {
                    message: format!("object without kind (name {:?})", shape.metadata.name),
                });
            }
        }

        if shape.metadata.name.is_empty() {
            return Err(Error::UnexpectedPayload {
                message: "node without a name".to_string(),
            });
        }

        Ok(Self {
            name: shape.metadata.name,
            provider_id: shape.spec.provider_id.unwrap_or_default(),
            annotations: shape.metadata.annotations.unwrap_or_default(),
            document: payload,
        })
    }

    /// Build a minimal node document.
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let name = name.into();
        let provider_id = provider_id.into();
        let document = serde_json::json!({
            "apiVersion": "v1",
            "kind": NODE_KIND,
            "metadata": { "name": name },
            "spec": { "providerID": provider_id },
        });
        Self {
            name,
            provider_id,
            annotations: BTreeMap::new(),
            document,
        }
    }

    /// Node name, unique within the cluster.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw `spec.providerID`, empty if unset.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Node annotations.
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Look up a single annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// The full document this record was decoded from.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Return a copy with one annotation set, in both the typed view and
    /// the document.
    ///
    /// Fails if the document has no object-valued `metadata`, or if
    /// `metadata.annotations` exists but is not an object.
    pub fn with_annotation(&self, key: &str, value: &str) -> Result<Self> {
        let mut copy = self.clone();

        let metadata = copy
            .document
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::Persist {
                node: self.name.clone(),
                message: "node document has no metadata object".to_string(),
                transient: false,
            })?;

        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if annotations.is_null() {
            *annotations = Value::Object(Map::new());
        }
        let annotations = annotations.as_object_mut().ok_or_else(|| Error::Persist {
            node: self.name.clone(),
            message: "metadata.annotations is not an object".to_string(),
            transient: false,
        })?;

        annotations.insert(key.to_string(), Value::String(value.to_string()));
        copy.annotations.insert(key.to_string(), value.to_string());

        Ok(copy)
    }
}

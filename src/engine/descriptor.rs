use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ProvisionError, Result};

/// How a REST entity is located inside its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case", tag = "style")]
pub enum RestLookup {
    /// The entity lives at `{collection}/{name}` (e.g. `/v1/roles/Admin`).
    ByPath,
    /// The collection is listed and the entity is matched on `name_field`.
    /// Updates go to `{collection}/{id}`, or to `update_path` when the API
    /// takes the id in the body instead (RHACS groups: `PUT /v1/groups`).
    ByList {
        list_field: String,
        name_field: String,
        id_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update_path: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case", tag = "type")]
pub enum ResourceKind {
    K8sObject { api_version: String, kind: String },
    RestEntity { collection: String, lookup: RestLookup },
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::K8sObject { api_version, kind } => write!(f, "{kind}.{api_version}"),
            Self::RestEntity { collection, .. } => write!(f, "rest:{collection}"),
        }
    }
}

/// Desired state of a resource, compared structurally against what the
/// platform reports.
///
/// The desired document only needs to be a subset of the observed one: keys
/// the desired spec does not mention are owned by someone else (defaults,
/// controllers, the server) and never count as divergence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredSpec(Value);

impl DesiredSpec {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn matches(&self, observed: &Value) -> bool {
        is_subset(&self.0, observed)
    }
}

fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        // A null in the desired document asks for the key to be absent, as in a
        // JSON merge patch.
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            match (value, have.get(key)) {
                (Value::Null, observed) => observed.map_or(true, Value::is_null),
                (_, Some(observed)) => is_subset(value, observed),
                (_, None) => false,
            }
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        _ => desired == observed,
    }
}

/// Identity and desired state of one externally managed entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub desired: DesiredSpec,
}

impl ResourceDescriptor {
    pub fn new(
        kind: ResourceKind,
        namespace: Option<String>,
        name: impl Into<String>,
        desired: DesiredSpec,
    ) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
            desired,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProvisionError::Manifest(format!(
                "resource of kind {} has an empty name",
                self.kind
            )));
        }
        let kind_empty = match &self.kind {
            ResourceKind::K8sObject { api_version, kind } => {
                api_version.trim().is_empty() || kind.trim().is_empty()
            }
            ResourceKind::RestEntity { collection, .. } => collection.trim().is_empty(),
        };
        if kind_empty {
            return Err(ProvisionError::Manifest(format!(
                "resource {} has an incomplete kind",
                self.name
            )));
        }
        Ok(())
    }

    /// Two descriptors with the same identity refer to the same resource,
    /// even when their desired specs differ.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {ns}/{}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

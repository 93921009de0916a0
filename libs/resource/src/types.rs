//! Resource, identity and hold-marker types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ResourceError;

/// The only kind the gate operates on.
pub const WORKLOAD_KIND: &str = "Pod";

// =============================================================================
// Identity
// =============================================================================

/// Identity of a resource within the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ResourceError::InvalidKey(s.to_string())),
        }
    }
}

// =============================================================================
// Hold marker
// =============================================================================

/// The well-known hold marker identifier this gate attaches and releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HoldMarker(String);

impl HoldMarker {
    /// Validate and wrap a marker identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, ResourceError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ResourceError::InvalidMarker("marker cannot be empty".into()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(ResourceError::InvalidMarker(format!(
                "marker '{id}' contains whitespace"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HoldMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HoldMarker {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// One entry of the marker sequence (`spec.schedulingGates[*]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingGate {
    pub name: String,
}

impl From<&HoldMarker> for SchedulingGate {
    fn from(marker: &HoldMarker) -> Self {
        Self {
            name: marker.as_str().to_string(),
        }
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Object metadata. Only identity and the version token are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Opaque optimistic-concurrency token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workload specification. Only the marker sequence is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Hold markers. Omitted from the wire form when empty so that writing a
    /// cleared resource removes the field server-side.
    #[serde(
        rename = "schedulingGates",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub scheduling_gates: Vec<SchedulingGate>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A workload resource as held by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ResourceSpec,

    /// `apiVersion`, `kind`, `status` and anything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SchedulingGate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<SchedulingGate>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Resource {
    /// Create a bare workload resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("apiVersion".into(), Value::String("v1".into()));
        extra.insert("kind".into(), Value::String(WORKLOAD_KIND.into()));
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec: ResourceSpec::default(),
            extra,
        }
    }

    /// Decode a workload resource from raw JSON.
    ///
    /// A declared `kind` other than the workload kind is rejected; a missing
    /// `kind` is accepted.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ResourceError> {
        let resource: Resource = serde_json::from_slice(raw)?;
        resource.ensure_kind()?;
        Ok(resource)
    }

    /// Decode a workload resource from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ResourceError> {
        let resource: Resource = serde_json::from_value(value)?;
        resource.ensure_kind()?;
        Ok(resource)
    }

    fn ensure_kind(&self) -> Result<(), ResourceError> {
        match self.kind() {
            Some(kind) if kind != WORKLOAD_KIND => Err(ResourceError::UnexpectedKind {
                expected: WORKLOAD_KIND,
                actual: kind.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Result<Value, ResourceError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn kind(&self) -> Option<&str> {
        self.extra.get("kind").and_then(Value::as_str)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Marker identifiers in wire order.
    pub fn markers(&self) -> impl Iterator<Item = &str> + '_ {
        self.spec.scheduling_gates.iter().map(|g| g.name.as_str())
    }

    /// Returns true if any hold marker is present (not schedulable).
    pub fn is_held(&self) -> bool {
        !self.spec.scheduling_gates.is_empty()
    }

    pub fn has_marker(&self, marker: &HoldMarker) -> bool {
        self.markers().any(|m| m == marker.as_str())
    }

    /// Append `marker` unless it is already present. Returns true if added.
    pub fn attach_marker(&mut self, marker: &HoldMarker) -> bool {
        if self.has_marker(marker) {
            return false;
        }
        self.spec.scheduling_gates.push(marker.into());
        true
    }

    /// Remove every hold marker. Returns how many were removed.
    pub fn clear_markers(&mut self) -> usize {
        let removed = self.spec.scheduling_gates.len();
        self.spec.scheduling_gates.clear();
        removed
    }

    pub fn with_marker(mut self, marker: &HoldMarker) -> Self {
        self.attach_marker(marker);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.metadata.resource_version = Some(version.into());
        self
    }
}

//! Component manifests and the live-instance snapshot model.
//!
//! A [`ComponentManifest`] is the declared contract of a component kind: the
//! only properties an AI-generated patch may touch. A [`MountedInstance`] is
//! one live occurrence of a kind as reported by the client in a snapshot.
//!
//! Manifests come from two places:
//!
//! ```text
//! registry.json --ManifestRegistry::load--> static manifests (long-lived)
//! snapshot      --derive_manifest---------> derived manifests (per request)
//!                         |
//!                         v
//!               reconcile(static, snapshot, policy)
//! ```

pub mod derive;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use derive::{derive_manifest, derive_schema};
pub use registry::{ManifestRegistry, RegistryError, ShadowPolicy, reconcile};

/// A property map: property name to JSON value.
pub type PropMap = Map<String, Value>;

/// A partial property update. After validation every key is a writable
/// property of the target manifest.
pub type Patch = PropMap;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Primitive type of a single writable property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
}

/// Schema of one writable property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropSchema {
    #[serde(rename = "type", default)]
    pub prop_type: PropType,
    /// Allowed values, when the property is an enumeration.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Item schema for array properties, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl PropSchema {
    pub fn of(prop_type: PropType) -> Self {
        Self {
            prop_type,
            ..Self::default()
        }
    }

    pub fn with_allowed(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// The only schema kind a patch schema may have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    #[default]
    Object,
}

/// Object schema covering exactly a manifest's writable properties.
///
/// Serializes to a JSON Schema object, which is also what the generative
/// backend receives as a tool input schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSchema {
    #[serde(rename = "type", default)]
    pub kind: SchemaKind,
    #[serde(default)]
    pub properties: BTreeMap<String, PropSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default)]
    pub additional_properties: bool,
}

impl PatchSchema {
    /// Build a schema where every property has the same type and none is
    /// required. Mostly useful for hand-written manifests.
    pub fn uniform<S: AsRef<str>>(props: &[S], prop_type: PropType) -> Self {
        Self {
            kind: SchemaKind::Object,
            properties: props
                .iter()
                .map(|p| (p.as_ref().to_string(), PropSchema::of(prop_type)))
                .collect(),
            required: Vec::new(),
            additional_properties: false,
        }
    }

    /// Property names covered by this schema.
    pub fn property_names(&self) -> BTreeSet<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    /// Convert to a plain JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The declared contract of a component kind.
///
/// Accepts both the canonical field names and the ones emitted by the
/// component scanner (`aiWritableProps`, `propsJsonSchema`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "aiWritableProps")]
    pub writable_props: Vec<String>,
    #[serde(alias = "propsJsonSchema", default)]
    pub patch_schema: PatchSchema,
    /// Source file the manifest was scanned from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
}

impl ComponentManifest {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        writable_props: Vec<String>,
        patch_schema: PatchSchema,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            writable_props,
            patch_schema,
            file_path: None,
            context_summary: None,
        }
    }

    /// Manifest whose writable props are all plain strings.
    pub fn with_string_props<S: AsRef<str>>(
        key: impl Into<String>,
        description: impl Into<String>,
        props: &[S],
    ) -> Self {
        let writable = props.iter().map(|p| p.as_ref().to_string()).collect();
        Self::new(
            key,
            description,
            writable,
            PatchSchema::uniform(props, PropType::String),
        )
    }

    pub fn is_writable(&self, prop: &str) -> bool {
        self.writable_props.iter().any(|p| p == prop)
    }

    /// `true` when the schema covers exactly the writable props.
    pub fn schema_matches_props(&self) -> bool {
        let declared: BTreeSet<&str> = self.writable_props.iter().map(String::as_str).collect();
        declared == self.patch_schema.property_names()
    }

    /// Drop every writable prop not in `allowed`, keeping the schema in
    /// step. Returns the names that were dropped, in declaration order.
    pub fn restrict_to(&mut self, allowed: &[String]) -> Vec<String> {
        let (kept, dropped): (Vec<String>, Vec<String>) = self
            .writable_props
            .drain(..)
            .partition(|p| allowed.contains(p));
        self.writable_props = kept;
        for name in &dropped {
            self.patch_schema.properties.remove(name);
        }
        self.patch_schema.required.retain(|r| !dropped.contains(r));
        dropped
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One live, mounted component instance as reported by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountedInstance {
    pub key: String,
    pub instance_id: String,
    #[serde(default)]
    pub current_props: PropMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        alias = "aiWritableProps",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub writable_props: Option<Vec<String>>,
    /// Read-only per-property constraints (allowed values, ranges, labels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PropMap>,
}

impl MountedInstance {
    pub fn new(key: impl Into<String>, instance_id: impl Into<String>, current_props: PropMap) -> Self {
        Self {
            key: key.into(),
            instance_id: instance_id.into(),
            current_props,
            ..Self::default()
        }
    }

    /// An instance that declares its own contract (description plus
    /// writable props) and so yields a derived manifest.
    pub fn is_self_describing(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.is_empty()) && self.writable_props.is_some()
    }

    /// Merge a patch into the reported props.
    pub fn apply_patch(&mut self, patch: &Patch) {
        for (k, v) in patch {
            self.current_props.insert(k.clone(), v.clone());
        }
    }
}

//! Static manifest registry and per-request reconciliation.
//!
//! The registry is loaded once from the JSON file written by the component
//! scanner. Each orchestration request then reconciles it with the manifests
//! derived from self-describing instances in that request's snapshot.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::derive::derive_manifest;
use super::{ComponentManifest, MountedInstance, Patch};
use crate::validator::{self, ValidationReport};

/// Errors from loading a manifest registry file.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry file {path} is not a valid manifest list: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate component key in registry: {0:?}")]
    DuplicateKey(String),

    #[error("patch schema of {0:?} does not cover exactly its writable props")]
    SchemaMismatch(String),
}

/// What to do when a derived manifest shadows a static one and the two
/// disagree on which props are writable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowPolicy {
    /// Keep only props both manifests mark writable.
    #[default]
    Intersect,
    /// Trust the instance's declaration as-is.
    Instance,
}

impl std::fmt::Display for ShadowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intersect => write!(f, "intersect"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

impl std::str::FromStr for ShadowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intersect" => Ok(Self::Intersect),
            "instance" => Ok(Self::Instance),
            other => Err(format!(
                "invalid shadow policy {other:?} (expected intersect or instance)"
            )),
        }
    }
}

/// The statically known manifests, in file order.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    manifests: Vec<ComponentManifest>,
}

impl ManifestRegistry {
    /// Build a registry from manifests, checking key uniqueness and the
    /// schema/writable-props invariant.
    pub fn new(manifests: Vec<ComponentManifest>) -> Result<Self, RegistryError> {
        let mut keys = HashSet::new();
        for manifest in &manifests {
            if !keys.insert(manifest.key.as_str()) {
                return Err(RegistryError::DuplicateKey(manifest.key.clone()));
            }
            if !manifest.schema_matches_props() {
                return Err(RegistryError::SchemaMismatch(manifest.key.clone()));
            }
        }
        Ok(Self { manifests })
    }

    /// Load a registry from a JSON array of manifests.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let shown = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: shown.clone(),
            source,
        })?;
        let manifests: Vec<ComponentManifest> =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: shown.clone(),
                source,
            })?;
        let registry = Self::new(manifests)?;
        tracing::info!(path = %shown, count = registry.len(), "loaded manifest registry");
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<&ComponentManifest> {
        self.manifests.iter().find(|m| m.key == key)
    }

    pub fn manifests(&self) -> &[ComponentManifest] {
        &self.manifests
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Validate a patch against the manifest registered under `key`.
    ///
    /// An unknown key yields a single error.
    pub fn validate(&self, key: &str, patch: &Patch) -> ValidationReport {
        match self.get(key) {
            Some(manifest) => validator::validate(manifest, patch),
            None => ValidationReport::unknown_key(key),
        }
    }
}

/// Merge static manifests with the manifests derived from a snapshot.
///
/// Derived manifests shadow static ones with the same key; the first
/// self-describing instance of a key wins. The result lists the unshadowed
/// static manifests first, then the derived ones in snapshot order.
pub fn reconcile(
    registry: &ManifestRegistry,
    snapshot: &[MountedInstance],
    policy: ShadowPolicy,
) -> Vec<ComponentManifest> {
    let mut derived: Vec<ComponentManifest> = Vec::new();
    for instance in snapshot {
        if derived.iter().any(|m| m.key == instance.key) {
            continue;
        }
        let Some(mut manifest) = derive_manifest(instance) else {
            continue;
        };
        if let (ShadowPolicy::Intersect, Some(static_manifest)) =
            (policy, registry.get(&manifest.key))
        {
            let dropped = manifest.restrict_to(&static_manifest.writable_props);
            if !dropped.is_empty() {
                tracing::warn!(
                    key = %manifest.key,
                    instance_id = %instance.instance_id,
                    dropped = ?dropped,
                    "instance declares props writable that the registry does not; ignoring them"
                );
            }
        }
        derived.push(manifest);
    }

    let mut merged: Vec<ComponentManifest> = registry
        .manifests()
        .iter()
        .filter(|m| !derived.iter().any(|d| d.key == m.key))
        .cloned()
        .collect();
    merged.extend(derived);
    merged
}

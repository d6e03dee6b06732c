//! Patch validation: the safety boundary between generated patches and live
//! components.
//!
//! A patch is valid for a manifest exactly when every key it sets is one of
//! the manifest's writable props. Values are not checked here.

use serde::Serialize;

use crate::manifest::{ComponentManifest, Patch};

/// Outcome of validating one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Report for a patch aimed at a key no manifest declares.
    pub fn unknown_key(key: &str) -> Self {
        Self::from_errors(vec![unknown_key_message(key)])
    }

    /// All errors joined into a single line, as fed back to the generator.
    pub fn feedback(&self) -> String {
        self.errors.join("; ")
    }
}

pub(crate) fn unknown_key_message(key: &str) -> String {
    format!("unknown component key: {key}")
}

/// Check that every key of `patch` is writable on `manifest`.
///
/// Errors are reported in the patch's key order, one per offending key.
pub fn validate(manifest: &ComponentManifest, patch: &Patch) -> ValidationReport {
    let errors = patch
        .keys()
        .filter(|k| !manifest.is_writable(k))
        .map(|k| {
            format!(
                "property '{k}' is not AI-writable for component '{}'",
                manifest.key
            )
        })
        .collect();
    ValidationReport::from_errors(errors)
}

//! Bounded patch regeneration driven by validator feedback.
//!
//! ```text
//! candidate --validate--> ok ----------------------------> {patch, []}
//!               |
//!               +-- errors --regenerate(feedback)--> validate ... (at most MAX_RETRIES)
//!                                                       |
//!                                   still invalid ------+--> {{}, last errors}
//! ```
//!
//! Regenerations run strictly one after another since each one is fed the
//! previous attempt's errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{BackendClient, BackendError, Purpose, ToolCall};
use crate::manifest::{ComponentManifest, Patch, PropMap};
use crate::validator;

/// Maximum number of regeneration calls per resolution.
pub const MAX_RETRIES: u32 = 2;

/// Name of the forced tool used for patch regeneration.
pub const PATCH_TOOL: &str = "generate_patch";

/// Something that can produce a fresh patch for a manifest.
#[async_trait]
pub trait PatchSource: Send + Sync {
    /// Produce a new patch. `feedback` carries the previous attempt's
    /// validation errors.
    async fn regenerate(
        &self,
        prompt: &str,
        manifest: &ComponentManifest,
        current_state: &PropMap,
        feedback: Option<&str>,
    ) -> Result<Patch, BackendError>;
}

/// Render the user message for a patch generation call.
pub fn build_patch_message(
    prompt: &str,
    manifest: &ComponentManifest,
    current_state: &PropMap,
    feedback: Option<&str>,
) -> String {
    let error_section = feedback
        .map(|f| format!("\n\nPrevious patch was invalid: {f}\nPlease fix the issues."))
        .unwrap_or_default();
    format!(
        "User prompt: \"{prompt}\"\n\n\
         Component: {key}\n\
         Description: {description}\n\
         Current state: {state}\n\
         AI-writable props: {props}{error_section}\n\n\
         Generate a patch object with only AI-writable props that satisfies the user's request.",
        key = manifest.key,
        description = manifest.description,
        state = Value::Object(current_state.clone()),
        props = manifest.writable_props.join(", "),
    )
}

/// Patch source backed by the generative backend, constrained by the
/// manifest's patch schema.
#[derive(Debug, Clone)]
pub struct PatchGenerator {
    client: BackendClient,
}

impl PatchGenerator {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PatchSource for PatchGenerator {
    async fn regenerate(
        &self,
        prompt: &str,
        manifest: &ComponentManifest,
        current_state: &PropMap,
        feedback: Option<&str>,
    ) -> Result<Patch, BackendError> {
        let call = ToolCall {
            purpose: Purpose::Patch,
            tool_name: PATCH_TOOL.to_string(),
            tool_description: format!(
                "Generate a props patch for the \"{}\" component. Only include AI-writable props: {}.",
                manifest.key,
                manifest.writable_props.join(", ")
            ),
            input_schema: manifest.patch_schema.to_value(),
            user_message: build_patch_message(prompt, manifest, current_state, feedback),
        };

        match self.client.call(&call).await? {
            Value::Object(patch) => Ok(patch),
            other => Err(BackendError::Decode(format!(
                "generated patch is not a JSON object: {other}"
            ))),
        }
    }
}

/// Final outcome of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// The accepted patch, or empty when `errors` is non-empty.
    pub patch: Patch,
    pub errors: Vec<String>,
    /// How many regeneration calls were made.
    pub regenerations: u32,
}

impl RetryOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Wraps a patch source with validation and bounded regeneration.
#[derive(Clone)]
pub struct RetryValidator {
    source: Arc<dyn PatchSource>,
    max_retries: u32,
}

impl std::fmt::Debug for RetryValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryValidator")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryValidator {
    pub fn new(source: Arc<dyn PatchSource>) -> Self {
        Self {
            source,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Return a patch that only touches writable props of `manifest`.
    ///
    /// A backend error during regeneration is returned as-is; it is not
    /// retried.
    pub async fn resolve(
        &self,
        prompt: &str,
        manifest: &ComponentManifest,
        current_state: &PropMap,
        candidate: Patch,
    ) -> Result<RetryOutcome, BackendError> {
        let mut patch = candidate;
        let mut report = validator::validate(manifest, &patch);
        let mut regenerations = 0;

        while !report.valid && regenerations < self.max_retries {
            regenerations += 1;
            let feedback = report.feedback();
            tracing::info!(
                key = %manifest.key,
                attempt = regenerations,
                feedback = %feedback,
                "patch rejected, regenerating"
            );
            patch = self
                .source
                .regenerate(prompt, manifest, current_state, Some(&feedback))
                .await?;
            report = validator::validate(manifest, &patch);
        }

        if report.valid {
            Ok(RetryOutcome {
                patch,
                errors: Vec::new(),
                regenerations,
            })
        } else {
            tracing::warn!(
                key = %manifest.key,
                regenerations,
                "patch still invalid after regeneration budget"
            );
            Ok(RetryOutcome {
                patch: Patch::new(),
                errors: report.errors,
                regenerations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns queued patches in order and records the feedback it saw.
    struct QueuedSource {
        patches: Mutex<Vec<Patch>>,
        feedback: Mutex<Vec<Option<String>>>,
    }

    impl QueuedSource {
        fn new(patches: Vec<Value>) -> Arc<Self> {
            let mut patches: Vec<Patch> = patches
                .into_iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect();
            patches.reverse();
            Arc::new(Self {
                patches: Mutex::new(patches),
                feedback: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.feedback.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PatchSource for QueuedSource {
        async fn regenerate(
            &self,
            _prompt: &str,
            _manifest: &ComponentManifest,
            _current_state: &PropMap,
            feedback: Option<&str>,
        ) -> Result<Patch, BackendError> {
            self.feedback.lock().unwrap().push(feedback.map(str::to_string));
            self.patches
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::Transport("queue exhausted".to_string()))
        }
    }

    fn manifest() -> ComponentManifest {
        ComponentManifest::with_string_props("demo-card", "Card", &["title"])
    }

    fn patch(v: Value) -> Patch {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn valid_candidate_returns_without_regenerating() {
        let source = QueuedSource::new(vec![]);
        let retry = RetryValidator::new(source.clone());

        let outcome = retry
            .resolve("p", &manifest(), &PropMap::new(), patch(json!({ "title": "New" })))
            .await
            .unwrap();

        assert!(outcome.is_valid());
        assert_eq!(outcome.patch["title"], "New");
        assert_eq!(outcome.regenerations, 0);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn regeneration_fixes_the_patch() {
        let source = QueuedSource::new(vec![json!({ "title": "Fixed" })]);
        let retry = RetryValidator::new(source.clone());

        let outcome = retry
            .resolve("p", &manifest(), &PropMap::new(), patch(json!({ "onClick": "x" })))
            .await
            .unwrap();

        assert!(outcome.is_valid());
        assert_eq!(outcome.patch["title"], "Fixed");
        assert_eq!(outcome.regenerations, 1);
        assert_eq!(
            source.feedback.lock().unwrap()[0].as_deref(),
            Some("property 'onClick' is not AI-writable for component 'demo-card'")
        );
    }

    #[tokio::test]
    async fn regeneration_is_bounded() {
        let source = QueuedSource::new(vec![
            json!({ "onClick": "y" }),
            json!({ "onClick": "z" }),
            json!({ "title": "never reached" }),
        ]);
        let retry = RetryValidator::new(source.clone());

        let outcome = retry
            .resolve("p", &manifest(), &PropMap::new(), patch(json!({ "onClick": "x" })))
            .await
            .unwrap();

        assert!(!outcome.is_valid());
        assert!(outcome.patch.is_empty());
        assert_eq!(outcome.regenerations, MAX_RETRIES);
        assert_eq!(source.calls(), MAX_RETRIES as usize);
        assert_eq!(
            outcome.errors,
            vec!["property 'onClick' is not AI-writable for component 'demo-card'"]
        );
    }

    #[tokio::test]
    async fn last_errors_are_reported() {
        let source = QueuedSource::new(vec![json!({ "a": 1 }), json!({ "b": 2, "c": 3 })]);
        let retry = RetryValidator::new(source);

        let outcome = retry
            .resolve("p", &manifest(), &PropMap::new(), patch(json!({ "z": 0 })))
            .await
            .unwrap();

        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[0].contains("'b'"));
        assert!(outcome.errors[1].contains("'c'"));
    }

    #[tokio::test]
    async fn backend_error_during_regeneration_propagates() {
        let source = QueuedSource::new(vec![]);
        let retry = RetryValidator::new(source.clone());

        let err = retry
            .resolve("p", &manifest(), &PropMap::new(), patch(json!({ "bad": true })))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Transport(_)));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn patch_message_includes_feedback_only_when_present() {
        let state = patch(json!({ "title": "Old" }));
        let plain = build_patch_message("rename", &manifest(), &state, None);
        assert!(plain.contains("Component: demo-card"));
        assert!(plain.contains("Current state: {\"title\":\"Old\"}"));
        assert!(plain.contains("AI-writable props: title"));
        assert!(!plain.contains("Previous patch was invalid"));

        let corrected = build_patch_message("rename", &manifest(), &state, Some("bad prop"));
        assert!(corrected.contains("Previous patch was invalid: bad prop\nPlease fix the issues."));
    }
}

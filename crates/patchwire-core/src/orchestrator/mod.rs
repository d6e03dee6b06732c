//! Single-step prompt orchestration: select, ground, validate, publish.
//!
//! ```text
//! START -> SELECTING --backend error--> FAILED
//!              |
//!              +--unknown key / instance--> FAILED
//!              |
//!              v
//!          VALIDATING --errors after retries--> FAILED
//!              |
//!              v
//!           APPLIED (patch event published; continue mirrors the selection)
//! ```
//!
//! The orchestrator never loops on its own. A caller that sees
//! `continue == true` re-invokes it with a fresh snapshot (see
//! [`crate::turns`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::BackendClient;
use crate::broadcast::{BroadcastEvent, Broadcaster};
use crate::manifest::{
    ComponentManifest, ManifestRegistry, MountedInstance, Patch, ShadowPolicy, reconcile,
};
use crate::retry::{PatchGenerator, PatchSource, RetryValidator};
use crate::selector::{PageContext, SelectionResult, Selector};
use crate::validator::unknown_key_message;

/// One prompt plus the client's view of the page at the time it was sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub snapshot: Vec<MountedInstance>,
    #[serde(flatten)]
    pub page: PageContext,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>, snapshot: Vec<MountedInstance>) -> Self {
        Self {
            prompt: prompt.into(),
            snapshot,
            page: PageContext::default(),
        }
    }
}

/// The instance a patch was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub key: String,
    pub instance_id: String,
}

/// Which stage a failed orchestration stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The backend call failed, timed out, or returned nothing usable.
    Backend,
    /// The selection named a key or instance absent from the request.
    Grounding,
    /// The patch kept touching non-writable props.
    Safety,
}

/// Externally visible outcome of one orchestration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub target: Option<Target>,
    pub patch: Option<Patch>,
    pub applied: bool,
    pub errors: Vec<String>,
    /// Always `false` unless `applied`.
    #[serde(rename = "continue")]
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl OrchestrationResult {
    fn failed(kind: FailureKind, errors: Vec<String>) -> Self {
        Self {
            target: None,
            patch: None,
            applied: false,
            errors,
            should_continue: false,
            rationale: None,
            failure: Some(kind),
        }
    }

    fn applied(target: Target, patch: Patch, selection: &SelectionResult) -> Self {
        Self {
            target: Some(target),
            patch: Some(patch),
            applied: true,
            errors: Vec::new(),
            should_continue: selection.should_continue,
            rationale: rationale_of(selection),
            failure: None,
        }
    }

    /// `true` when the caller should not run another turn.
    pub fn is_done(&self) -> bool {
        !self.should_continue
    }
}

fn rationale_of(selection: &SelectionResult) -> Option<String> {
    Some(selection.rationale.clone()).filter(|r| !r.is_empty())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one prompt through selection, grounding, validation and publish.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ManifestRegistry>,
    selector: Selector,
    retry: RetryValidator,
    broadcaster: Arc<Broadcaster>,
    shadow_policy: ShadowPolicy,
}

impl Orchestrator {
    pub fn new(
        client: BackendClient,
        registry: Arc<ManifestRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let generator: Arc<dyn PatchSource> = Arc::new(PatchGenerator::new(client.clone()));
        Self {
            registry,
            selector: Selector::new(client),
            retry: RetryValidator::new(generator),
            broadcaster,
            shadow_policy: ShadowPolicy::default(),
        }
    }

    pub fn with_shadow_policy(mut self, policy: ShadowPolicy) -> Self {
        self.shadow_policy = policy;
        self
    }

    /// Replace the regeneration step used by the retry validator.
    pub fn with_patch_source(mut self, source: Arc<dyn PatchSource>) -> Self {
        self.retry = RetryValidator::new(source);
        self
    }

    pub fn registry(&self) -> &ManifestRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Manifests in effect for a snapshot: static ones plus those derived
    /// from self-describing instances.
    pub fn manifests_for(&self, snapshot: &[MountedInstance]) -> Vec<ComponentManifest> {
        reconcile(&self.registry, snapshot, self.shadow_policy)
    }

    /// Run one step against the reconciled manifests for this request.
    pub async fn run(&self, session_id: &str, request: &PromptRequest) -> OrchestrationResult {
        let manifests = self.manifests_for(&request.snapshot);
        self.run_with_manifests(session_id, request, &manifests).await
    }

    /// Run one step against an explicit manifest list.
    pub async fn run_with_manifests(
        &self,
        session_id: &str,
        request: &PromptRequest,
        manifests: &[ComponentManifest],
    ) -> OrchestrationResult {
        let selection = match self
            .selector
            .select(&request.prompt, manifests, &request.snapshot, &request.page)
            .await
        {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "selection failed");
                return OrchestrationResult::failed(FailureKind::Backend, vec![e.to_string()]);
            }
        };

        let Some(manifest) = manifests.iter().find(|m| m.key == selection.target_key) else {
            tracing::warn!(session_id, key = %selection.target_key, "selected unknown component key");
            return OrchestrationResult::failed(
                FailureKind::Grounding,
                vec![unknown_key_message(&selection.target_key)],
            );
        };

        let Some(instance) = request
            .snapshot
            .iter()
            .find(|i| i.instance_id == selection.target_instance_id)
        else {
            tracing::warn!(
                session_id,
                instance_id = %selection.target_instance_id,
                "selected instance is not in the snapshot"
            );
            return OrchestrationResult::failed(
                FailureKind::Grounding,
                vec![format!(
                    "instance '{}' not found — component may not be mounted",
                    selection.target_instance_id
                )],
            );
        };
        if instance.key != manifest.key {
            tracing::warn!(
                session_id,
                instance_id = %instance.instance_id,
                instance_key = %instance.key,
                key = %manifest.key,
                "selected instance belongs to another component"
            );
            return OrchestrationResult::failed(
                FailureKind::Grounding,
                vec![format!(
                    "instance '{}' is a '{}', not '{}'",
                    instance.instance_id, instance.key, manifest.key
                )],
            );
        }

        let outcome = match self
            .retry
            .resolve(
                &request.prompt,
                manifest,
                &instance.current_props,
                selection.patch.clone(),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(session_id, key = %manifest.key, error = %e, "patch regeneration failed");
                return OrchestrationResult::failed(FailureKind::Backend, vec![e.to_string()]);
            }
        };

        if !outcome.is_valid() {
            return OrchestrationResult::failed(FailureKind::Safety, outcome.errors);
        }

        let target = Target {
            key: manifest.key.clone(),
            instance_id: instance.instance_id.clone(),
        };
        let delivered = self.broadcaster.publish(
            session_id,
            &BroadcastEvent::patch(&target.key, &target.instance_id, outcome.patch.clone()),
        );
        tracing::info!(
            session_id,
            key = %target.key,
            instance_id = %target.instance_id,
            regenerations = outcome.regenerations,
            delivered,
            "patch applied"
        );

        OrchestrationResult::applied(target, outcome.patch, &selection)
    }
}

//! Combined component selection and patch generation.
//!
//! One backend call picks the target instance out of the live snapshot and
//! proposes a patch for it. This is the highest-variance step of the
//! pipeline; everything downstream exists to bound its mistakes.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{BackendClient, BackendError, Purpose, ToolCall};
use crate::manifest::{ComponentManifest, MountedInstance, Patch, PropMap};

/// Name of the forced tool used for selection.
pub const SELECT_TOOL: &str = "select_and_patch";

/// Optional page context the client sends alongside its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    /// Best-effort textual summary of on-screen structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_tree: Option<String>,
    /// Ambient facts about the current UI state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<PropMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
}

/// The backend's one-shot proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    #[serde(alias = "key")]
    pub target_key: String,
    #[serde(alias = "instanceId")]
    pub target_instance_id: String,
    #[serde(default)]
    pub patch: Patch,
    /// `true` when another orchestration turn is needed.
    #[serde(rename = "continue", default)]
    pub should_continue: bool,
    #[serde(default, alias = "intent")]
    pub rationale: String,
}

/// Errors from a selection call.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("malformed selection from backend: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

fn render_components(manifests: &[ComponentManifest]) -> String {
    manifests
        .iter()
        .map(|m| {
            format!(
                "- key: \"{}\"\n  description: \"{}\"\n  ai-writable props: {}",
                m.key,
                m.description,
                m.writable_props.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_instances(instances: &[MountedInstance]) -> String {
    if instances.is_empty() {
        return "(none registered yet)".to_string();
    }
    instances
        .iter()
        .map(|i| {
            let mut line = format!("- key: \"{}\", instanceId: \"{}\"", i.key, i.instance_id);
            if !i.current_props.is_empty() {
                let _ = write!(
                    line,
                    "\n  current state: {}",
                    Value::Object(i.current_props.clone())
                );
            }
            if let Some(context) = i.context.as_ref().filter(|c| !c.is_empty()) {
                let _ = write!(
                    line,
                    "\n  options/constraints: {}",
                    Value::Object(context.clone())
                );
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_markers(markers: Option<&PropMap>) -> String {
    match markers.filter(|m| !m.is_empty()) {
        Some(markers) => {
            let lines: Vec<String> = markers.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
            format!("Active markers:\n{}\n", lines.join("\n"))
        }
        None => String::new(),
    }
}

/// Render the user message describing the whole request context.
pub fn build_selection_message(
    prompt: &str,
    manifests: &[ComponentManifest],
    instances: &[MountedInstance],
    page: &PageContext,
) -> String {
    let url = page.current_url.as_deref().unwrap_or("(unknown)");
    let tree = page
        .accessibility_tree
        .as_deref()
        .map(|t| format!("\n## Page structure (DOM accessibility tree)\n```\n{t}\n```\n"))
        .unwrap_or_default();

    format!(
        "User prompt: \"{prompt}\"\n\n\
         Current URL: {url}\n\
         {markers}\n\
         Available components:\n{components}\n\n\
         Mounted instances (you MUST pick an instanceId from this exact list):\n{instances}\n\
         {tree}\n\
         Select the most appropriate component instance to modify and generate a patch with only its AI-writable props.",
        markers = render_markers(page.markers.as_ref()),
        components = render_components(manifests),
        instances = render_instances(instances),
    )
}

/// JSON Schema the backend's answer must satisfy.
pub fn selection_schema(manifests: &[ComponentManifest], instances: &[MountedInstance]) -> Value {
    let mut key = json!({ "type": "string", "description": "Component key to modify" });
    if !manifests.is_empty() {
        key["enum"] = manifests.iter().map(|m| json!(m.key)).collect();
    }
    let mut instance_id = json!({
        "type": "string",
        "description": "Instance ID to target. Must be from the mounted instances list."
    });
    if !instances.is_empty() {
        instance_id["enum"] = instances.iter().map(|i| json!(i.instance_id)).collect();
    }

    json!({
        "type": "object",
        "properties": {
            "targetKey": key,
            "targetInstanceId": instance_id,
            "patch": {
                "type": "object",
                "description": "Props to update. Only include AI-writable props of the selected component."
            },
            "continue": {
                "type": "boolean",
                "description": "Set false when this action fully satisfies the user request. Set true if more steps are needed (e.g. navigated to a page but still need to update a component there)."
            },
            "rationale": {
                "type": "string",
                "description": "One or two plain sentences describing what you are about to do and why. Shown to the user."
            }
        },
        "required": ["targetKey", "targetInstanceId", "patch", "continue", "rationale"]
    })
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Issues the combined selection call.
#[derive(Debug, Clone)]
pub struct Selector {
    client: BackendClient,
}

impl Selector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Ask the backend for one target instance and patch.
    pub async fn select(
        &self,
        prompt: &str,
        manifests: &[ComponentManifest],
        instances: &[MountedInstance],
        page: &PageContext,
    ) -> Result<SelectionResult, SelectError> {
        let call = ToolCall {
            purpose: Purpose::Select,
            tool_name: SELECT_TOOL.to_string(),
            tool_description:
                "Select the component instance to modify and generate the props patch in one step"
                    .to_string(),
            input_schema: selection_schema(manifests, instances),
            user_message: build_selection_message(prompt, manifests, instances, page),
        };

        let raw = self.client.call(&call).await?;
        let selection: SelectionResult =
            serde_json::from_value(raw).map_err(|e| SelectError::Malformed(e.to_string()))?;

        tracing::info!(
            key = %selection.target_key,
            instance_id = %selection.target_instance_id,
            should_continue = selection.should_continue,
            "backend selected target"
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct CannedBackend {
        answer: Value,
        seen: Mutex<Vec<ToolCall>>,
    }

    #[async_trait]
    impl Backend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }

        async fn invoke(&self, call: &ToolCall) -> Result<Value, BackendError> {
            self.seen.lock().unwrap().push(call.clone());
            Ok(self.answer.clone())
        }
    }

    fn card() -> ComponentManifest {
        ComponentManifest::with_string_props("demo-card", "A demo card", &["title", "body"])
    }

    fn instance() -> MountedInstance {
        let props = json!({ "title": "Old" }).as_object().cloned().unwrap();
        MountedInstance::new("demo-card", "inst-1", props)
    }

    #[test]
    fn message_lists_components_instances_and_context() {
        let mut inst = instance();
        inst.context = json!({ "title": ["Old", "New"] }).as_object().cloned();
        let page = PageContext {
            accessibility_tree: Some("main > h1".to_string()),
            markers: json!({ "page": "settings" }).as_object().cloned(),
            current_url: Some("http://localhost/settings".to_string()),
        };

        let msg = build_selection_message("make it new", &[card()], &[inst], &page);

        assert!(msg.starts_with("User prompt: \"make it new\""));
        assert!(msg.contains("Current URL: http://localhost/settings"));
        assert!(msg.contains("Active markers:\n- page: \"settings\""));
        assert!(msg.contains("- key: \"demo-card\"\n  description: \"A demo card\"\n  ai-writable props: title, body"));
        assert!(msg.contains("- key: \"demo-card\", instanceId: \"inst-1\"\n  current state: {\"title\":\"Old\"}"));
        assert!(msg.contains("options/constraints: {\"title\":[\"Old\",\"New\"]}"));
        assert!(msg.contains("main > h1"));
    }

    #[test]
    fn message_defaults_for_missing_context() {
        let msg = build_selection_message("p", &[card()], &[], &PageContext::default());
        assert!(msg.contains("Current URL: (unknown)"));
        assert!(msg.contains("(none registered yet)"));
        assert!(!msg.contains("Active markers"));
        assert!(!msg.contains("accessibility tree"));
    }

    #[test]
    fn schema_restricts_keys_and_instance_ids() {
        let schema = selection_schema(&[card()], &[instance()]);
        assert_eq!(schema["properties"]["targetKey"]["enum"], json!(["demo-card"]));
        assert_eq!(schema["properties"]["targetInstanceId"]["enum"], json!(["inst-1"]));
        assert_eq!(schema["required"].as_array().unwrap().len(), 5);

        let open = selection_schema(&[], &[]);
        assert!(open["properties"]["targetKey"].get("enum").is_none());
        assert!(open["properties"]["targetInstanceId"].get("enum").is_none());
    }

    #[tokio::test]
    async fn select_parses_backend_answer() {
        let backend = Arc::new(CannedBackend {
            answer: json!({
                "targetKey": "demo-card",
                "targetInstanceId": "inst-1",
                "patch": { "title": "New" },
                "continue": true,
                "rationale": "Renaming the card."
            }),
            seen: Mutex::new(Vec::new()),
        });
        let selector = Selector::new(BackendClient::new(backend.clone()));

        let selection = selector
            .select("rename", &[card()], &[instance()], &PageContext::default())
            .await
            .unwrap();

        assert_eq!(selection.target_key, "demo-card");
        assert_eq!(selection.target_instance_id, "inst-1");
        assert_eq!(selection.patch["title"], "New");
        assert!(selection.should_continue);
        assert_eq!(selection.rationale, "Renaming the card.");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].purpose, Purpose::Select);
        assert_eq!(seen[0].tool_name, SELECT_TOOL);
    }

    #[tokio::test]
    async fn select_accepts_legacy_field_names() {
        let backend = Arc::new(CannedBackend {
            answer: json!({ "key": "demo-card", "instanceId": "inst-1", "patch": {}, "intent": "noop" }),
            seen: Mutex::new(Vec::new()),
        });
        let selector = Selector::new(BackendClient::new(backend));
        let selection = selector
            .select("p", &[card()], &[instance()], &PageContext::default())
            .await
            .unwrap();
        assert_eq!(selection.target_key, "demo-card");
        assert!(!selection.should_continue);
        assert_eq!(selection.rationale, "noop");
    }

    #[tokio::test]
    async fn malformed_answer_is_an_error() {
        let backend = Arc::new(CannedBackend {
            answer: json!({ "targetKey": "demo-card", "patch": "not an object" }),
            seen: Mutex::new(Vec::new()),
        });
        let selector = Selector::new(BackendClient::new(backend));
        let err = selector
            .select("p", &[card()], &[instance()], &PageContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed selection from backend"));
    }
}

//! Shared test utilities for patchwire integration tests.
//!
//! Provides a scripted [`Backend`] that replays queued answers per call
//! purpose, plus the demo-card fixtures most scenarios start from.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use patchwire_core::backend::{Backend, BackendClient, BackendError, Purpose, ToolCall};
use patchwire_core::manifest::{ComponentManifest, ManifestRegistry, MountedInstance, Patch};

// ===========================================================================
// Scripted backend
// ===========================================================================

/// One queued backend answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Error(String),
    /// Never resolves; for timeout and cancellation tests.
    Hang,
}

/// Backend that answers from per-purpose queues and records every call.
///
/// An exhausted queue answers with a transport error so a test that makes
/// more calls than it scripted fails loudly.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<Purpose, VecDeque<Reply>>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, purpose: Purpose, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a selection answer.
    pub fn select(&self, answer: Value) -> &Self {
        self.push(Purpose::Select, Reply::Value(answer))
    }

    /// Queue a regenerated patch.
    pub fn patch(&self, answer: Value) -> &Self {
        self.push(Purpose::Patch, Reply::Value(answer))
    }

    pub fn fail(&self, purpose: Purpose, message: &str) -> &Self {
        self.push(purpose, Reply::Error(message.to_string()))
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, purpose: Purpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.purpose == purpose)
            .count()
    }

    /// A client wrapping this backend with the default timeout.
    pub fn client(self: &Arc<Self>) -> BackendClient {
        BackendClient::new(Arc::clone(self) as Arc<dyn Backend>)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, BackendError> {
        self.calls.lock().unwrap().push(call.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&call.purpose)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Value(v)) => Ok(v),
            Some(Reply::Error(msg)) => Err(BackendError::Transport(msg)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(BackendError::Transport(format!(
                "no scripted reply for {} call",
                call.purpose
            ))),
        }
    }
}

// ===========================================================================
// Fixtures
// ===========================================================================

/// Build a patch (or prop map) from a JSON object literal.
pub fn props(value: Value) -> Patch {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// `demo-card` with writable `title` and `body`.
pub fn demo_card_manifest() -> ComponentManifest {
    ComponentManifest::with_string_props("demo-card", "A simple demo card", &["title", "body"])
}

/// Mounted `demo-card` instance `inst-1` showing title "Old".
pub fn demo_card_instance() -> MountedInstance {
    MountedInstance::new("demo-card", "inst-1", props(json!({ "title": "Old" })))
}

pub fn registry(manifests: Vec<ComponentManifest>) -> Arc<ManifestRegistry> {
    Arc::new(ManifestRegistry::new(manifests).expect("fixture manifests are valid"))
}

/// Registry holding only the demo card.
pub fn demo_registry() -> Arc<ManifestRegistry> {
    registry(vec![demo_card_manifest()])
}

/// A well-formed selection answer.
pub fn selection(key: &str, instance_id: &str, patch: Value, should_continue: bool) -> Value {
    json!({
        "targetKey": key,
        "targetInstanceId": instance_id,
        "patch": patch,
        "continue": should_continue,
        "rationale": format!("Updating {key}."),
    })
}

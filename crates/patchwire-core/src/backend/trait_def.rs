//! The `Backend` trait -- the capability interface for the generative model.
//!
//! Everything above this trait treats the model as "given structured
//! context, return one structured object". Concrete backends (the Anthropic
//! Messages API, scripted fakes in tests) implement it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Which step of the pipeline a call serves. Backends may route the two
/// purposes to different models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Combined component selection and first patch.
    Select,
    /// Patch regeneration after a validation failure.
    Patch,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

/// One forced tool call: the backend must answer with a single object
/// matching `input_schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub purpose: Purpose,
    pub tool_name: String,
    pub tool_description: String,
    /// JSON Schema of the object the backend must return.
    pub input_schema: Value,
    /// Rendered user message carrying the full request context.
    pub user_message: String,
}

/// Errors from a backend call. All of them are terminal for the current
/// orchestration step.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("backend did not return a tool_use block for {0}")]
    MissingToolOutput(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend is not configured: {0}")]
    NotConfigured(String),
}

/// Adapter interface for a generative backend.
///
/// # Object Safety
///
/// The trait is object-safe so the pipeline can hold `Arc<dyn Backend>` and
/// tests can swap in a deterministic fake.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Perform one forced tool call and return the tool input object.
    async fn invoke(&self, call: &ToolCall) -> Result<Value, BackendError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Backend) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoBackend;

    #[async_trait]
    impl Backend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, call: &ToolCall) -> Result<Value, BackendError> {
            Ok(json!({ "tool": call.tool_name, "purpose": call.purpose.to_string() }))
        }
    }

    #[tokio::test]
    async fn backend_is_object_safe() {
        let backend: Box<dyn Backend> = Box::new(EchoBackend);
        assert_eq!(backend.name(), "echo");

        let call = ToolCall {
            purpose: Purpose::Patch,
            tool_name: "generate_patch".to_string(),
            tool_description: String::new(),
            input_schema: json!({ "type": "object" }),
            user_message: "hi".to_string(),
        };
        let out = backend.invoke(&call).await.unwrap();
        assert_eq!(out, json!({ "tool": "generate_patch", "purpose": "patch" }));
    }

    #[test]
    fn error_messages_are_readable() {
        let err = BackendError::MissingToolOutput("select_and_patch".to_string());
        assert_eq!(
            err.to_string(),
            "backend did not return a tool_use block for select_and_patch"
        );
        let err = BackendError::Status {
            status: 529,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned status 529: overloaded");
    }
}

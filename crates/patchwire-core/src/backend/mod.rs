//! Generative backend interface.
//!
//! This module defines the [`Backend`] trait that model adapters implement,
//! the [`ToolCall`] request shape, and [`BackendClient`], the wrapper the
//! pipeline actually talks to.
//!
//! # Architecture
//!
//! ```text
//! Selector / PatchGenerator
//!     |
//!     v
//! BackendClient --call(ToolCall)--> timeout( dyn Backend::invoke )
//!     |                                    |
//!     +-- tracing (patchwire::prompt)      +--> AnthropicBackend (HTTP)
//!     +-- PromptLog (optional file)        +--> scripted fakes (tests)
//! ```

pub mod anthropic;
pub mod prompt_log;
pub mod trait_def;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use prompt_log::PromptLog;
pub use trait_def::{Backend, BackendError, Purpose, ToolCall};

/// Shared handle to a backend with a per-call timeout and prompt logging.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    prompt_log: Option<PromptLog>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .field("prompt_log", &self.prompt_log)
            .finish()
    }
}

impl BackendClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            timeout: Self::DEFAULT_TIMEOUT,
            prompt_log: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt_log(mut self, log: PromptLog) -> Self {
        self.prompt_log = Some(log);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Perform one tool call, bounded by the configured timeout.
    pub async fn call(&self, call: &ToolCall) -> Result<Value, BackendError> {
        tracing::debug!(
            target: "patchwire::prompt",
            purpose = %call.purpose,
            tool = %call.tool_name,
            "{}",
            call.user_message
        );
        if let Some(log) = &self.prompt_log {
            log.append(&format!("{}: {}", call.purpose, call.tool_name), &call.user_message)
                .await;
        }

        match tokio::time::timeout(self.timeout, self.backend.invoke(call)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    purpose = %call.purpose,
                    timeout = ?self.timeout,
                    "backend call timed out"
                );
                Err(BackendError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowBackend(Duration);

    #[async_trait]
    impl Backend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _call: &ToolCall) -> Result<Value, BackendError> {
            tokio::time::sleep(self.0).await;
            Ok(json!({}))
        }
    }

    fn call() -> ToolCall {
        ToolCall {
            purpose: Purpose::Select,
            tool_name: "select_and_patch".to_string(),
            tool_description: String::new(),
            input_schema: json!({}),
            user_message: "prompt body".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let client = BackendClient::new(Arc::new(SlowBackend(Duration::from_secs(120))))
            .with_timeout(Duration::from_secs(5));
        let err = client.call(&call()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_backend_passes_through() {
        let client = BackendClient::new(Arc::new(SlowBackend(Duration::from_millis(10))));
        assert_eq!(client.call(&call()).await.unwrap(), json!({}));
        assert_eq!(client.backend_name(), "slow");
    }

    #[tokio::test]
    async fn prompts_are_appended_to_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.txt");
        let client = BackendClient::new(Arc::new(SlowBackend(Duration::ZERO)))
            .with_prompt_log(PromptLog::new(&path));

        client.call(&call()).await.unwrap();

        let logged = std::fs::read_to_string(&path).unwrap();
        assert!(logged.contains("select: select_and_patch"));
        assert!(logged.contains("prompt body"));
    }
}

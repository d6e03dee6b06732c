//! Assemble core components from resolved configuration.

use std::sync::Arc;

use anyhow::{Context, Result};

use patchwire_core::backend::{AnthropicBackend, BackendClient, PromptLog};
use patchwire_core::broadcast::Broadcaster;
use patchwire_core::manifest::ManifestRegistry;
use patchwire_core::orchestrator::Orchestrator;

use crate::config::PatchwireConfig;

/// Load the static registry, or an empty one when no path is configured.
pub fn load_registry(config: &PatchwireConfig) -> Result<ManifestRegistry> {
    match &config.registry_path {
        Some(path) => ManifestRegistry::load(path)
            .with_context(|| format!("failed to load manifest registry {}", path.display())),
        None => {
            tracing::info!("no manifest registry configured; relying on self-describing instances");
            Ok(ManifestRegistry::default())
        }
    }
}

/// Backend client for the configured Anthropic endpoint.
pub fn backend_client(config: &PatchwireConfig) -> Result<BackendClient> {
    config.require_api_key()?;
    let backend = AnthropicBackend::new(config.backend.clone())
        .context("failed to initialise generative backend")?;
    let mut client = BackendClient::new(Arc::new(backend)).with_timeout(config.backend.timeout);
    if let Some(path) = &config.prompt_log {
        tracing::info!(path = %path.display(), "logging backend prompts");
        client = client.with_prompt_log(PromptLog::new(path));
    }
    Ok(client)
}

/// Orchestrator wired to the configured backend and registry.
pub fn build_orchestrator(
    config: &PatchwireConfig,
    broadcaster: Arc<Broadcaster>,
) -> Result<Orchestrator> {
    let registry = Arc::new(load_registry(config)?);
    let client = backend_client(config)?;
    Ok(Orchestrator::new(client, registry, broadcaster).with_shadow_policy(config.shadow_policy))
}

mod config;
mod prompt_cmd;
mod runtime;
mod serve_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use patchwire_core::broadcast::Broadcaster;

use config::{CliOverrides, PatchwireConfig};

#[derive(Parser)]
#[command(name = "patchwire", about = "Prompt-to-patch orchestration server for live UI components")]
struct Cli {
    /// Manifest registry JSON file (overrides PATCHWIRE_REGISTRY env var)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a patchwire config file with every default spelled out
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides PATCHWIRE_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides PATCHWIRE_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the static manifest registry, or one manifest
    Registry {
        /// Component key to show (omit to list all)
        key: Option<String>,
    },
    /// Run a prompt file through the multi-turn loop and print the transcript
    Prompt {
        /// Request JSON file: {prompt, snapshot, markers?, currentUrl?, accessibilityTree?}
        file: PathBuf,
        /// Print the transcript as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute the `patchwire init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    config::save_config_to(&config::ConfigFile::initial(None), &path)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next: set backend.api_key in that file (or export ANTHROPIC_API_KEY),");
    println!("then run `patchwire serve`.");

    Ok(())
}

/// Execute the `patchwire registry` command.
fn cmd_registry(resolved: &PatchwireConfig, key: Option<&str>) -> anyhow::Result<()> {
    let registry = runtime::load_registry(resolved)?;
    let output = match key {
        Some(key) => {
            let manifest = registry
                .get(key)
                .with_context(|| format!("component '{key}' not found in registry"))?;
            serde_json::to_string_pretty(manifest)?
        }
        None => serde_json::to_string_pretty(registry.manifests())?,
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut overrides = CliOverrides {
        registry: cli.registry,
        ..CliOverrides::default()
    };

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Serve { bind, port } => {
            overrides.bind = bind;
            overrides.port = port;
            let resolved = PatchwireConfig::resolve(&overrides)?;
            let orchestrator =
                runtime::build_orchestrator(&resolved, Arc::new(Broadcaster::new()))?;
            let state = serve_cmd::AppState::new(orchestrator);
            serve_cmd::run_serve(state, &resolved.addr()).await?;
        }
        Commands::Registry { key } => {
            let resolved = PatchwireConfig::resolve(&overrides)?;
            cmd_registry(&resolved, key.as_deref())?;
        }
        Commands::Prompt { file, json } => {
            let resolved = PatchwireConfig::resolve(&overrides)?;
            prompt_cmd::run_prompt(&resolved, &file, json).await?;
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "patchwire",
            "--registry",
            "manifests.json",
            "serve",
            "--port",
            "8080",
        ])
        .unwrap();
        assert_eq!(cli.registry, Some(PathBuf::from("manifests.json")));
        match cli.command {
            Commands::Serve { bind, port } => {
                assert!(bind.is_none());
                assert_eq!(port, Some(8080));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn prompt_requires_a_file() {
        assert!(Cli::try_parse_from(["patchwire", "prompt"]).is_err());
    }
}

//! Configuration file management for patchwire.
//!
//! Provides a TOML-based config file at `~/.config/patchwire/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use patchwire_core::backend::AnthropicConfig;
use patchwire_core::manifest::ShadowPolicy;
use patchwire_core::turns::TurnOptions;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3001;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistrySection {
    /// JSON array of component manifests.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BackendSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub select_model: Option<String>,
    pub patch_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OrchestratorSection {
    pub shadow_policy: Option<ShadowPolicy>,
    pub max_turns: Option<u32>,
    pub turn_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Append every backend prompt to this file.
    pub prompt_log: Option<PathBuf>,
}

impl ConfigFile {
    /// The file `patchwire init` writes: every default spelled out, API key
    /// left for the user (or `ANTHROPIC_API_KEY`).
    pub fn initial(api_key: Option<String>) -> Self {
        Self {
            server: ServerSection {
                bind: Some(DEFAULT_BIND.to_string()),
                port: Some(DEFAULT_PORT),
            },
            registry: RegistrySection::default(),
            backend: BackendSection {
                api_key,
                base_url: Some(AnthropicConfig::DEFAULT_BASE_URL.to_string()),
                select_model: Some(AnthropicConfig::DEFAULT_SELECT_MODEL.to_string()),
                patch_model: Some(AnthropicConfig::DEFAULT_PATCH_MODEL.to_string()),
                max_tokens: Some(AnthropicConfig::DEFAULT_MAX_TOKENS),
                timeout_secs: Some(AnthropicConfig::DEFAULT_TIMEOUT.as_secs()),
            },
            orchestrator: OrchestratorSection {
                shadow_policy: Some(ShadowPolicy::default()),
                max_turns: Some(TurnOptions::DEFAULT_MAX_TURNS),
                turn_delay_ms: Some(TurnOptions::DEFAULT_TURN_DELAY.as_millis() as u64),
            },
            logging: LoggingSection::default(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the patchwire config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/patchwire` or
/// `~/.config/patchwire`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("patchwire");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("patchwire")
}

/// Return the path to the patchwire config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Like [`load_config_from`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<ConfigFile> {
    if path.exists() {
        load_config_from(path)
    } else {
        Ok(ConfigFile::default())
    }
}

/// Serialize and write a config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub registry: Option<PathBuf>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PatchwireConfig {
    pub bind: String,
    pub port: u16,
    pub registry_path: Option<PathBuf>,
    /// Empty when no key was found anywhere; checked by commands that call
    /// the backend.
    pub backend: AnthropicConfig,
    pub shadow_policy: ShadowPolicy,
    pub turns: TurnOptions,
    pub prompt_log: Option<PathBuf>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl PatchwireConfig {
    /// Resolve against the default config file location.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = load_config_or_default(&config_path())?;
        Self::resolve_with(cli, file)
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - bind: `--bind` > `PATCHWIRE_BIND` > `server.bind` > `127.0.0.1`
    /// - port: `--port` > `PATCHWIRE_PORT` > `server.port` > `3001`
    /// - registry: `--registry` > `PATCHWIRE_REGISTRY` > `registry.path`
    /// - API key: `ANTHROPIC_API_KEY` > `backend.api_key`
    /// - base URL: `PATCHWIRE_BACKEND_URL` > `backend.base_url` > Anthropic default
    /// - prompt log: `PATCHWIRE_PROMPT_LOG` > `logging.prompt_log`
    pub fn resolve_with(cli: &CliOverrides, file: ConfigFile) -> Result<Self> {
        let bind = cli
            .bind
            .clone()
            .or_else(|| env_var("PATCHWIRE_BIND"))
            .or(file.server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let port = match (cli.port, env_var("PATCHWIRE_PORT")) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .parse()
                .with_context(|| format!("PATCHWIRE_PORT is not a valid port: {raw}"))?,
            (None, None) => file.server.port.unwrap_or(DEFAULT_PORT),
        };

        let registry_path = cli
            .registry
            .clone()
            .or_else(|| env_var("PATCHWIRE_REGISTRY").map(PathBuf::from))
            .or(file.registry.path);

        let api_key = env_var("ANTHROPIC_API_KEY")
            .or(file.backend.api_key)
            .unwrap_or_default();
        let mut backend = AnthropicConfig::new(api_key);
        if let Some(url) = env_var("PATCHWIRE_BACKEND_URL").or(file.backend.base_url) {
            backend.base_url = url;
        }
        if let Some(model) = file.backend.select_model {
            backend.select_model = model;
        }
        if let Some(model) = file.backend.patch_model {
            backend.patch_model = model;
        }
        if let Some(max_tokens) = file.backend.max_tokens {
            backend.max_tokens = max_tokens;
        }
        if let Some(secs) = file.backend.timeout_secs {
            if secs == 0 {
                bail!("backend.timeout_secs must be greater than zero");
            }
            backend.timeout = Duration::from_secs(secs);
        }

        let defaults = TurnOptions::default();
        let turns = TurnOptions {
            max_turns: file.orchestrator.max_turns.unwrap_or(defaults.max_turns),
            turn_delay: file
                .orchestrator
                .turn_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.turn_delay),
        };

        let prompt_log = env_var("PATCHWIRE_PROMPT_LOG")
            .map(PathBuf::from)
            .or(file.logging.prompt_log);

        Ok(Self {
            bind,
            port,
            registry_path,
            backend,
            shadow_policy: file.orchestrator.shadow_policy.unwrap_or_default(),
            turns,
            prompt_log,
        })
    }

    /// `host:port` for the listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Fail early when a command needs the backend but no key is set.
    pub fn require_api_key(&self) -> Result<()> {
        if self.backend.api_key.is_empty() {
            bail!(
                "no API key found; set ANTHROPIC_API_KEY or backend.api_key in {}",
                config_path().display()
            );
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

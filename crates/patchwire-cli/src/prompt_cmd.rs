//! `patchwire prompt` command: run a prompt file through the multi-turn
//! driver in-process and print what happened.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use patchwire_core::broadcast::Broadcaster;
use patchwire_core::orchestrator::PromptRequest;
use patchwire_core::session::SessionRegistry;
use patchwire_core::turns::{self, Transcript};

use crate::config::PatchwireConfig;
use crate::runtime;

/// Read a request file: `{prompt, snapshot, markers?, currentUrl?,
/// accessibilityTree?}`.
pub fn load_request(path: &Path) -> Result<PromptRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    let request: PromptRequest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse request file {}", path.display()))?;
    if request.prompt.trim().is_empty() {
        bail!("request file {} has an empty prompt", path.display());
    }
    Ok(request)
}

/// Human-readable transcript.
pub fn render_transcript(transcript: &Transcript) -> String {
    let mut out = String::new();
    for record in &transcript.turns {
        let result = &record.result;
        match (&result.target, &result.patch) {
            (Some(target), Some(patch)) if result.applied => {
                let _ = writeln!(
                    out,
                    "turn {}: applied to {} ({}): {}",
                    record.turn,
                    target.key,
                    target.instance_id,
                    serde_json::Value::Object(patch.clone())
                );
            }
            _ => {
                let _ = writeln!(out, "turn {}: failed", record.turn);
                for error in &result.errors {
                    let _ = writeln!(out, "  - {error}");
                }
            }
        }
        if let Some(rationale) = &result.rationale {
            let _ = writeln!(out, "  {rationale}");
        }
    }
    let _ = writeln!(out, "stopped: {}", transcript.stop);
    out
}

/// Run the prompt command.
pub async fn run_prompt(config: &PatchwireConfig, file: &Path, json: bool) -> Result<()> {
    let request = load_request(file)?;
    let orchestrator = runtime::build_orchestrator(config, Arc::new(Broadcaster::new()))?;
    let session_id = SessionRegistry::new().create();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let transcript = turns::drive(&orchestrator, &session_id, request, config.turns, &cancel).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&transcript).context("failed to serialize transcript")?
        );
    } else {
        print!("{}", render_transcript(&transcript));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use patchwire_core::orchestrator::Orchestrator;
    use patchwire_core::turns::{StopReason, TurnOptions};
    use patchwire_test_utils::{ScriptedBackend, demo_registry, selection};
    use serde_json::json;

    fn write_request(dir: &Path, body: serde_json::Value) -> std::path::PathBuf {
        let path = dir.join("request.json");
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[test]
    fn load_request_reads_page_context() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_request(
            tmp.path(),
            json!({
                "prompt": "Make the title New",
                "snapshot": [{ "key": "demo-card", "instanceId": "inst-1", "currentProps": { "title": "Old" } }],
                "currentUrl": "http://localhost/"
            }),
        );

        let request = load_request(&path).unwrap();
        assert_eq!(request.snapshot.len(), 1);
        assert_eq!(request.page.current_url.as_deref(), Some("http://localhost/"));
    }

    #[test]
    fn load_request_rejects_empty_prompt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_request(tmp.path(), json!({ "prompt": "  ", "snapshot": [] }));
        let err = load_request(&path).unwrap_err();
        assert!(err.to_string().contains("empty prompt"));
    }

    #[test]
    fn load_request_reports_missing_file() {
        let err = load_request(Path::new("/nonexistent/request.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read request file"));
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_renders_each_turn() {
        let backend = ScriptedBackend::new();
        backend
            .select(selection("demo-card", "inst-1", json!({ "title": "New" }), true))
            .select(selection("ghost", "g", json!({}), true));
        let orchestrator =
            Orchestrator::new(backend.client(), demo_registry(), Arc::new(Broadcaster::new()));
        let request = PromptRequest::new(
            "two steps",
            vec![patchwire_test_utils::demo_card_instance()],
        );
        let options = TurnOptions {
            max_turns: 4,
            turn_delay: Duration::from_millis(10),
        };

        let transcript =
            turns::drive(&orchestrator, "s", request, options, &CancellationToken::new()).await;
        assert_eq!(transcript.stop, StopReason::Failed);

        let text = render_transcript(&transcript);
        assert!(text.contains("turn 1: applied to demo-card (inst-1): {\"title\":\"New\"}"));
        assert!(text.contains("  Updating demo-card."));
        assert!(text.contains("turn 2: failed\n  - unknown component key: ghost"));
        assert!(text.ends_with("stopped: failed\n"));
    }
}

//! Caller-side multi-turn loop over the single-step orchestrator.
//!
//! Each turn runs one orchestration step. An applied patch is merged into
//! the local snapshot so the next turn sees the updated state. The loop
//! stops on the first failure, when the backend reports it is done, at the
//! turn cap, or when the cancellation token fires.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{OrchestrationResult, Orchestrator, PromptRequest};

/// Bounds for one multi-turn run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    pub max_turns: u32,
    /// Pause between turns.
    pub turn_delay: Duration,
}

impl TurnOptions {
    pub const DEFAULT_MAX_TURNS: u32 = 4;
    pub const DEFAULT_TURN_DELAY: Duration = Duration::from_millis(300);
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_turns: Self::DEFAULT_MAX_TURNS,
            turn_delay: Self::DEFAULT_TURN_DELAY,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Done,
    Failed,
    TurnCap,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::TurnCap => write!(f, "turn cap reached"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    /// 1-based turn number.
    pub turn: u32,
    pub result: OrchestrationResult,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub turns: Vec<TurnRecord>,
    pub stop: StopReason,
    /// The snapshot after every applied patch was merged in.
    pub snapshot: Vec<crate::manifest::MountedInstance>,
}

impl Transcript {
    /// Number of turns that applied a patch.
    pub fn applied_count(&self) -> usize {
        self.turns.iter().filter(|t| t.result.applied).count()
    }
}

/// Run `request` for up to `options.max_turns` orchestration steps.
pub async fn drive(
    orchestrator: &Orchestrator,
    session_id: &str,
    mut request: PromptRequest,
    options: TurnOptions,
    cancel: &CancellationToken,
) -> Transcript {
    let mut turns = Vec::new();
    let mut turn = 0;

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if turn >= options.max_turns {
            break StopReason::TurnCap;
        }
        turn += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = orchestrator.run(session_id, &request) => Some(result),
        };
        let Some(result) = result else {
            break StopReason::Cancelled;
        };
        tracing::info!(
            session_id,
            turn,
            applied = result.applied,
            should_continue = result.should_continue,
            "turn finished"
        );

        if let (true, Some(target), Some(patch)) = (result.applied, &result.target, &result.patch) {
            if let Some(instance) = request
                .snapshot
                .iter_mut()
                .find(|i| i.instance_id == target.instance_id)
            {
                instance.apply_patch(patch);
            }
        }

        let applied = result.applied;
        let done = result.is_done();
        turns.push(TurnRecord { turn, result });

        if !applied {
            break StopReason::Failed;
        }
        if done {
            break StopReason::Done;
        }
        if turn >= options.max_turns {
            break StopReason::TurnCap;
        }

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(options.turn_delay) => false,
        };
        if cancelled {
            break StopReason::Cancelled;
        }
    };

    tracing::info!(session_id, turns = turns.len(), stop = %stop, "run finished");
    Transcript {
        turns,
        stop,
        snapshot: request.snapshot,
    }
}

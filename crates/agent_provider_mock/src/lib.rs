//! Deterministic scripted implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{
    CancelSignal, ProviderProfile, StreamEvent, StreamProvider, ToolCallRef, ToolResult,
    TurnRequest,
};
use uuid::Uuid;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const DEFAULT_TOKEN_DELAY_MS: u64 = 30;
const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// One scripted action of a mock turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Streams text word by word as `content` events.
    Text(String),
    /// Emits a `tool_calls` event, then executes each call through the host.
    ToolCalls(Vec<ToolCallRef>),
    TokenCount(u64),
    Pause(Duration),
    /// Aborts the turn with a provider failure.
    Fail(String),
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Single tool call with a generated call id.
    pub fn tool(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCalls(vec![tool_call(name, arguments)])
    }
}

/// Builds a tool call with a fresh `call_<uuid>` identifier.
pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> ToolCallRef {
    ToolCallRef::new(
        format!("call_{}", Uuid::new_v4().simple()),
        name,
        arguments.to_string(),
    )
}

/// Deterministic provider replaying one script per turn.
///
/// Turn scripts are used in order; the last script repeats once exhausted.
#[derive(Debug)]
pub struct ScriptedProvider {
    turns: Vec<Vec<ScriptStep>>,
    next_turn: Mutex<usize>,
    token_delay: Duration,
}

impl ScriptedProvider {
    /// Creates a provider that plays `steps` on every turn.
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::with_turns(vec![steps])
    }

    #[must_use]
    pub fn with_turns(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns,
            next_turn: Mutex::new(0),
            token_delay: Duration::from_millis(DEFAULT_TOKEN_DELAY_MS),
        }
    }

    /// Overrides the pause between streamed words.
    #[must_use]
    pub fn with_token_delay(mut self, token_delay: Duration) -> Self {
        self.token_delay = token_delay;
        self
    }

    fn script_for_next_turn(&self) -> Vec<ScriptStep> {
        let mut next_turn = lock_unpoisoned(&self.next_turn);
        let Some(last_index) = self.turns.len().checked_sub(1) else {
            return Vec::new();
        };

        let index = (*next_turn).min(last_index);
        *next_turn = next_turn.saturating_add(1);
        self.turns[index].clone()
    }

    fn stream_text(
        &self,
        text: &str,
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), String> {
        let mut pending_token = String::new();
        for ch in text.chars() {
            pending_token.push(ch);

            if matches!(ch, ' ' | '\n') {
                ensure_not_cancelled(cancel)?;
                emit(StreamEvent::Content {
                    text: std::mem::take(&mut pending_token),
                });
                self.pause();
            }
        }

        if !pending_token.is_empty() {
            ensure_not_cancelled(cancel)?;
            emit(StreamEvent::Content {
                text: pending_token,
            });
            self.pause();
        }

        Ok(())
    }

    fn pause(&self) {
        if !self.token_delay.is_zero() {
            thread::sleep(self.token_delay);
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::with_turns(vec![vec![
            ScriptStep::text("Let me look at the workspace first.\n"),
            ScriptStep::tool("bash", serde_json::json!({ "command": "ls -la" })),
            ScriptStep::text("Here is what I found. "),
            ScriptStep::text("The listing above shows the current workspace contents.\n"),
            ScriptStep::tool(
                "create_todo_list",
                serde_json::json!({
                    "todos": [
                        { "id": "1", "content": "Review workspace layout", "status": "completed", "priority": "high" },
                        { "id": "2", "content": "Propose next steps", "status": "pending", "priority": "medium" }
                    ]
                }),
            ),
            ScriptStep::text("Done.\n"),
        ]])
    }
}

impl StreamProvider for ScriptedProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: "mock-scripted".to_string(),
        }
    }

    fn run(
        &self,
        _req: TurnRequest,
        cancel: CancelSignal,
        execute_tool: &mut dyn FnMut(ToolCallRef) -> ToolResult,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), String> {
        let mut streamed_chars = 0u64;

        for step in self.script_for_next_turn() {
            ensure_not_cancelled(&cancel)?;

            match step {
                ScriptStep::Text(text) => {
                    self.stream_text(&text, &cancel, emit)?;
                    streamed_chars += text.chars().count() as u64;
                    emit(StreamEvent::TokenCount {
                        count: streamed_chars.div_ceil(4),
                    });
                }
                ScriptStep::ToolCalls(calls) => {
                    emit(StreamEvent::ToolCalls {
                        calls: calls.clone(),
                    });
                    for call in calls {
                        ensure_not_cancelled(&cancel)?;
                        let _ = execute_tool(call);
                    }
                }
                ScriptStep::TokenCount(count) => emit(StreamEvent::TokenCount { count }),
                ScriptStep::Pause(duration) => pause_unless_cancelled(duration, &cancel)?,
                ScriptStep::Fail(error) => return Err(error),
            }
        }

        ensure_not_cancelled(&cancel)?;
        emit(StreamEvent::Done);
        Ok(())
    }
}

/// Sleeps in short slices so a cancel lands mid-pause.
fn pause_unless_cancelled(duration: Duration, cancel: &CancelSignal) -> Result<(), String> {
    let deadline = Instant::now() + duration;
    loop {
        ensure_not_cancelled(cancel)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        thread::sleep(remaining.min(PAUSE_SLICE));
    }
}

fn ensure_not_cancelled(cancel: &CancelSignal) -> Result<(), String> {
    if cancel.load(Ordering::SeqCst) {
        Err("Turn cancelled".to_string())
    } else {
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

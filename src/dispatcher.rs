//! Per-turn state machine that turns stream events into history entries.
//!
//! The dispatcher is the only writer of [`HistoryStore`] besides the
//! coalescer flush it drives, and both run on the caller's thread.

use std::fmt;
use std::time::{Duration, Instant};

use agent_provider::{RunMessage, StreamEvent, ToolCallRef, ToolResult, TurnId};

use crate::coalescer::ContentCoalescer;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::history::{ChatEntry, EntryKind, HistoryStore};

/// Prefix of the synthetic entry appended when a turn fails.
pub const TURN_ERROR_PREFIX: &str = "Sorry, I encountered an error: ";

/// Result recorded for tool calls still pending when a turn fails.
pub const INTERRUPTED_TOOL_MESSAGE: &str = "Tool call interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    ToolPending,
    ToolExecuting,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::ToolPending => "tool_pending",
            Self::ToolExecuting => "tool_executing",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Indicators the renderer shows next to the display window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStatus {
    pub processing: bool,
    pub streaming: bool,
    pub awaiting_confirmation: bool,
    pub token_count: u64,
    pub elapsed: Duration,
}

/// Model-facing record of the turn in progress.
#[derive(Debug, Default)]
struct TurnTranscript {
    messages: Vec<RunMessage>,
    assistant_text: String,
}

impl TurnTranscript {
    fn flush_assistant_text(&mut self) {
        if !self.assistant_text.is_empty() {
            self.messages.push(RunMessage::AssistantText {
                text: std::mem::take(&mut self.assistant_text),
            });
        }
    }
}

#[derive(Debug)]
pub struct StreamDispatcher {
    history: HistoryStore,
    coalescer: ContentCoalescer,
    state: TurnState,
    turn_id: TurnId,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    token_count: u64,
    processing: bool,
    streaming: bool,
    awaiting_confirmation: bool,
    failure: Option<String>,
    transcript: TurnTranscript,
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        Self::new(HistoryStore::default(), ContentCoalescer::default())
    }
}

impl StreamDispatcher {
    pub fn new(history: HistoryStore, coalescer: ContentCoalescer) -> Self {
        Self {
            history,
            coalescer,
            state: TurnState::Done,
            turn_id: 0,
            started_at: None,
            finished_at: None,
            token_count: 0,
            processing: false,
            streaming: false,
            awaiting_confirmation: false,
            failure: None,
            transcript: TurnTranscript::default(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        Ok(Self::new(
            HistoryStore::new(config.history_cap, config.display_window)?,
            ContentCoalescer::new(config.quiescence),
        ))
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn is_done(&self) -> bool {
        self.state == TurnState::Done
    }

    /// Failure message of the last turn, if it ended through [`Self::fail`].
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn display_window(&self) -> Vec<&ChatEntry> {
        self.history.display_window()
    }

    pub fn status(&self, now: Instant) -> RenderStatus {
        let elapsed = self
            .started_at
            .map(|started| self.finished_at.unwrap_or(now).saturating_duration_since(started))
            .unwrap_or_default();

        RenderStatus {
            processing: self.processing,
            streaming: self.streaming,
            awaiting_confirmation: self.awaiting_confirmation,
            token_count: self.token_count,
            elapsed,
        }
    }

    /// Opens a new turn with the operator's prompt.
    ///
    /// Fails with [`AgentError::TurnInProgress`] until the previous turn is done.
    pub fn begin_turn(
        &mut self,
        turn_id: TurnId,
        prompt: &str,
        now: Instant,
    ) -> Result<(), AgentError> {
        if !self.is_done() {
            return Err(AgentError::TurnInProgress);
        }

        self.history.append(ChatEntry::user(prompt));
        self.turn_id = turn_id;
        self.started_at = Some(now);
        self.finished_at = None;
        self.token_count = 0;
        self.processing = true;
        self.streaming = false;
        self.awaiting_confirmation = false;
        self.failure = None;
        self.transcript = TurnTranscript::default();
        self.transcript.messages.push(RunMessage::UserText {
            text: prompt.to_string(),
        });
        self.transition(TurnState::Idle);
        Ok(())
    }

    /// Applies one stream event. Events after the turn is done are dropped.
    pub fn handle_event(&mut self, event: StreamEvent, now: Instant) {
        if self.is_done() {
            tracing::debug!(turn_id = self.turn_id, event = event.kind(), "event after done ignored");
            return;
        }
        self.processing = true;

        match event {
            StreamEvent::Content { text } => self.on_content(text, now),
            StreamEvent::TokenCount { count } => self.token_count = count,
            StreamEvent::ToolCalls { calls } => self.on_tool_calls(calls),
            StreamEvent::ToolResult { id, result } => self.on_tool_result(&id, result),
            StreamEvent::Done => self.finish(now),
        }
    }

    fn on_content(&mut self, text: String, now: Instant) {
        self.transcript.assistant_text.push_str(&text);
        if self.history.streaming_entry().is_some() {
            self.coalescer.accumulate(&text, now);
        } else {
            self.history.append(ChatEntry::streaming_assistant(text));
        }
        self.streaming = true;
        self.transition(TurnState::Streaming);
    }

    fn on_tool_calls(&mut self, calls: Vec<ToolCallRef>) {
        self.coalescer.flush(&mut self.history);
        if let Some(entry) = self.history.streaming_entry_mut() {
            entry.is_streaming = false;
            entry.tool_calls = calls.clone();
        }
        self.streaming = false;

        self.transcript.flush_assistant_text();
        for call in &calls {
            self.transcript.messages.push(RunMessage::ToolCall {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.raw_arguments.clone(),
            });
        }

        self.history
            .extend(calls.into_iter().map(ChatEntry::pending_tool_call));
        self.transition(TurnState::ToolPending);
    }

    fn on_tool_result(&mut self, call_id: &str, result: ToolResult) {
        self.coalescer.flush(&mut self.history);

        let transcript_entry = RunMessage::ToolResult {
            call_id: call_id.to_string(),
            content: result.display_text().to_string(),
            is_error: !result.success,
        };
        if !self.history.resolve_tool_call(call_id, result) {
            tracing::debug!(turn_id = self.turn_id, call_id, "tool result matched no pending call");
            return;
        }

        self.transcript.messages.push(transcript_entry);
        if self.history.pending_tool_calls() > 0 {
            self.transition(TurnState::ToolPending);
        }
    }

    /// Marks a tool call as running.
    pub fn tool_started(&mut self, call_id: &str) {
        if self.is_done() {
            return;
        }
        tracing::debug!(turn_id = self.turn_id, call_id, "tool execution started");
        self.transition(TurnState::ToolExecuting);
    }

    pub fn set_awaiting_confirmation(&mut self, awaiting: bool) {
        self.awaiting_confirmation = awaiting;
    }

    /// Clears busy indicators after the operator rejects an operation.
    pub fn confirmation_rejected(&mut self) {
        self.awaiting_confirmation = false;
        self.processing = false;
        self.streaming = false;
    }

    /// Flushes buffered text whose quiescence deadline has passed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.coalescer.flush_if_due(&mut self.history, now) > 0
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    fn finish(&mut self, now: Instant) {
        self.coalescer.flush(&mut self.history);
        self.history.clear_streaming();
        self.transcript.flush_assistant_text();
        self.close(now);
    }

    /// Ends the turn after a fault, appending one synthetic error entry.
    pub fn fail(&mut self, message: &str, now: Instant) {
        if self.is_done() {
            return;
        }

        self.coalescer.flush(&mut self.history);
        self.history.clear_streaming();
        let orphaned: Vec<String> = self
            .history
            .entries()
            .filter(|entry| entry.kind == EntryKind::ToolCall)
            .filter_map(|entry| entry.call_id().map(str::to_string))
            .collect();
        for call_id in orphaned {
            self.history
                .resolve_tool_call(&call_id, ToolResult::failure(INTERRUPTED_TOOL_MESSAGE));
        }
        self.history
            .append(ChatEntry::assistant(format!("{TURN_ERROR_PREFIX}{message}")));
        tracing::warn!(turn_id = self.turn_id, error = message, "turn failed");
        self.failure = Some(message.to_string());
        self.transcript = TurnTranscript::default();
        self.close(now);
    }

    fn close(&mut self, now: Instant) {
        self.processing = false;
        self.streaming = false;
        self.awaiting_confirmation = false;
        self.finished_at = Some(now);
        self.transition(TurnState::Done);
    }

    /// Hands over the model-facing messages of a completed turn.
    ///
    /// Returns nothing for failed turns or while the turn is still running.
    pub fn take_transcript(&mut self) -> Vec<RunMessage> {
        if !self.is_done() || self.failure.is_some() {
            return Vec::new();
        }
        std::mem::take(&mut self.transcript.messages)
    }

    pub fn clear_history(&mut self) -> Result<(), AgentError> {
        if !self.is_done() {
            return Err(AgentError::TurnInProgress);
        }
        self.history.clear();
        self.coalescer.discard();
        self.started_at = None;
        self.finished_at = None;
        self.token_count = 0;
        Ok(())
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            tracing::debug!(turn_id = self.turn_id, from = %self.state, to = %next, "turn state");
            self.state = next;
        }
    }
}

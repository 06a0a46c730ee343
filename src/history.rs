//! Bounded conversation log consumed by the renderer.

use std::collections::VecDeque;

use agent_provider::{ToolCallRef, ToolResult};
use time::OffsetDateTime;

use crate::config::{DEFAULT_DISPLAY_WINDOW, DEFAULT_HISTORY_CAP};
use crate::error::AgentError;

pub type EntryId = u64;

/// Placeholder content of a tool call whose result has not arrived yet.
pub const PENDING_TOOL_MARKER: &str = "Executing...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Assigned by [`HistoryStore::append`]; zero until then.
    pub id: EntryId,
    pub kind: EntryKind,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub is_streaming: bool,
    /// Calls announced by an assistant entry.
    pub tool_calls: Vec<ToolCallRef>,
    /// The call a `ToolCall`/`ToolResult` entry belongs to.
    pub tool_call: Option<ToolCallRef>,
    pub tool_result: Option<ToolResult>,
}

impl ChatEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            content: content.into(),
            timestamp: OffsetDateTime::now_utc(),
            is_streaming: false,
            tool_calls: Vec::new(),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(EntryKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Assistant, content)
    }

    pub fn streaming_assistant(content: impl Into<String>) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(EntryKind::Assistant, content)
        }
    }

    pub fn pending_tool_call(call: ToolCallRef) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::new(EntryKind::ToolCall, PENDING_TOOL_MARKER)
        }
    }

    pub fn tool_result(call: ToolCallRef, result: ToolResult) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::new(EntryKind::ToolResult, result.display_text())
        }
        .with_result(result)
    }

    fn with_result(mut self, result: ToolResult) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|call| call.id.as_str())
    }
}

/// Ordered, size-capped log of conversation entries.
///
/// Appends trim from the oldest end once the cap is exceeded. The display
/// window is always the newest `display_window` entries.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<ChatEntry>,
    cap: usize,
    display_window: usize,
    next_id: EntryId,
    evicted: u64,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(DEFAULT_HISTORY_CAP + 1),
            cap: DEFAULT_HISTORY_CAP,
            display_window: DEFAULT_DISPLAY_WINDOW,
            next_id: 1,
            evicted: 0,
        }
    }
}

impl HistoryStore {
    pub fn new(cap: usize, display_window: usize) -> Result<Self, AgentError> {
        if cap == 0 {
            return Err(AgentError::configuration("history cap must be > 0"));
        }
        if display_window == 0 || display_window > cap {
            return Err(AgentError::configuration(format!(
                "display window {display_window} must be within 1..={cap}"
            )));
        }

        Ok(Self {
            entries: VecDeque::with_capacity(cap + 1),
            cap,
            display_window,
            ..Self::default()
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries dropped from the oldest end since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn append(&mut self, mut entry: ChatEntry) -> EntryId {
        if entry.is_streaming {
            // At most one entry streams at a time.
            self.clear_streaming();
        }

        entry.id = self.next_id;
        self.next_id += 1;
        let id = entry.id;
        self.entries.push_back(entry);
        self.trim();
        id
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ChatEntry>) {
        for entry in entries {
            self.append(entry);
        }
    }

    fn trim(&mut self) {
        while self.entries.len() > self.cap {
            if let Some(evicted) = self.entries.pop_front() {
                debug_assert!(
                    !evicted.is_streaming,
                    "history cap {} evicted the streaming entry",
                    self.cap
                );
                self.evicted += 1;
            }
        }
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &ChatEntry> + '_ {
        self.entries.iter()
    }

    /// The newest entries exposed to the renderer, oldest first.
    pub fn display_window(&self) -> Vec<&ChatEntry> {
        let start = self.entries.len().saturating_sub(self.display_window);
        self.entries.range(start..).collect()
    }

    pub fn last(&self) -> Option<&ChatEntry> {
        self.entries.back()
    }

    pub fn get(&self, id: EntryId) -> Option<&ChatEntry> {
        self.entries.iter().rev().find(|entry| entry.id == id)
    }

    pub fn streaming_entry(&self) -> Option<&ChatEntry> {
        self.entries.iter().rev().find(|entry| entry.is_streaming)
    }

    pub fn streaming_entry_mut(&mut self) -> Option<&mut ChatEntry> {
        self.entries.iter_mut().rev().find(|entry| entry.is_streaming)
    }

    /// Marks every entry non-streaming; returns how many were still streaming.
    pub fn clear_streaming(&mut self) -> usize {
        let mut cleared = 0;
        for entry in self.entries.iter_mut().filter(|entry| entry.is_streaming) {
            entry.is_streaming = false;
            cleared += 1;
        }
        cleared
    }

    /// Replaces the pending `ToolCall` entry for `call_id` with its result.
    ///
    /// Returns false, leaving history untouched, when no pending entry matches.
    pub fn resolve_tool_call(&mut self, call_id: &str, result: ToolResult) -> bool {
        let Some(slot) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.kind == EntryKind::ToolCall && entry.call_id() == Some(call_id))
        else {
            return false;
        };

        let Some(call) = slot.tool_call.clone() else {
            return false;
        };

        let mut resolved = ChatEntry::tool_result(call, result);
        resolved.id = slot.id;
        *slot = resolved;
        true
    }

    pub fn pending_tool_calls(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::ToolCall)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

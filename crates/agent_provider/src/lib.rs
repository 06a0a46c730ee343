//! Minimal provider-agnostic contract for streaming one model turn.
//!
//! This crate defines only the ordered stream-event vocabulary, the
//! host-mediated tool-calling envelopes, and the provider trait. Transport,
//! credentials, and history management stay with the host.

use std::sync::{atomic::AtomicBool, Arc};

/// Identifier for one model turn.
pub type TurnId = u64;

/// Shared cancellation flag for a turn.
pub type CancelSignal = Arc<AtomicBool>;

/// One tool invocation requested by the model.
///
/// `raw_arguments` is the undecoded JSON text exactly as streamed; decoding
/// happens at the host's tool router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
}

impl ToolCallRef {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

/// Uniform outcome of every tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    /// Constructs a failed tool result.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Returns the text a transcript should show for this result.
    #[must_use]
    pub fn display_text(&self) -> &str {
        if self.success {
            self.output.as_deref().unwrap_or("Success")
        } else {
            self.error.as_deref().unwrap_or("Error occurred")
        }
    }
}

/// Provider-emitted record for one model turn, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content { text: String },
    TokenCount { count: u64 },
    ToolCalls { calls: Vec<ToolCallRef> },
    ToolResult { id: String, result: ToolResult },
    Done,
}

impl StreamEvent {
    /// Returns true when this event terminates the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Short event label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::TokenCount { .. } => "token_count",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolResult { .. } => "tool_result",
            Self::Done => "done",
        }
    }
}

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMessage {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

/// Input required to start one provider turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub turn_id: TurnId,
    pub messages: Vec<RunMessage>,
}

impl TurnRequest {
    /// Returns the newest user text in the request, if any.
    #[must_use]
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|message| match message {
            RunMessage::UserText { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Immutable metadata describing a stream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for streaming one turn.
pub trait StreamProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Streams one turn, emitting events in order and finishing with
    /// [`StreamEvent::Done`].
    ///
    /// Providers request host tool execution synchronously through
    /// `execute_tool`; calls are serial and results come back in call order.
    /// The host delivers each result to its own history, so providers need not
    /// echo `tool_result` events.
    fn run(
        &self,
        req: TurnRequest,
        cancel: CancelSignal,
        execute_tool: &mut dyn FnMut(ToolCallRef) -> ToolResult,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), String>;
}

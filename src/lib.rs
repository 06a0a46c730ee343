//! Streaming tool-execution loop for an interactive coding agent.
//!
//! A provider streams one model turn as ordered [`StreamEvent`]s. The
//! [`StreamDispatcher`] folds them into a bounded [`HistoryStore`],
//! debouncing text through the [`ContentCoalescer`], while tool calls run
//! through the [`ToolRouter`] behind the shell safety gate, the rate limiter
//! and operator confirmation.
//!
//! # Public API Overview
//! - [`Session`] runs turns against a [`agent_provider::StreamProvider`] and
//!   an [`Operator`] that answers confirmations and redraws.
//! - [`StreamDispatcher::display_window`] and [`StreamDispatcher::status`]
//!   are the renderer's view.
//! - [`tools`] holds the router, built-in tools, [`CommandGate`],
//!   [`RateLimiter`] and [`ConfirmationBroker`].
//! - [`AgentConfig::from_env`] and [`logging::init`] cover process setup.

pub mod coalescer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod logging;
pub mod session;
pub mod tools;

pub use agent_provider::{
    CancelSignal, RunMessage, StreamEvent, StreamProvider, ToolCallRef, ToolResult, TurnId,
    TurnRequest,
};

pub use crate::coalescer::ContentCoalescer;
pub use crate::config::AgentConfig;
pub use crate::dispatcher::{RenderStatus, StreamDispatcher, TurnState};
pub use crate::error::AgentError;
pub use crate::history::{ChatEntry, EntryKind, HistoryStore};
pub use crate::session::{Operator, Session, TurnOutcome};
pub use crate::tools::confirm::{
    ConfirmCategory, ConfirmationBroker, ConfirmationRequest, Decision,
};
pub use crate::tools::gate::{CommandGate, Severity, ValidationResult};
pub use crate::tools::rate_limit::{Admission, RateLimiter, RateStats};
pub use crate::tools::workspace::Workspace;
pub use crate::tools::{ExternalToolProvider, ToolAccess, ToolContext, ToolHandler, ToolRouter};

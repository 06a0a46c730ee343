//! Headless line-mode host for the `agent_stream` runtime.
//!
//! ## Provider bootstrap
//!
//! The binary runs turns against the deterministic scripted provider from
//! `agent_provider_mock`; transport-backed providers plug in through the same
//! `agent_provider::StreamProvider` trait.
//!
//! ## Configuration
//!
//! Runtime limits come from `AGENT_STREAM_*` environment variables (see
//! `agent_stream::config`). Logs go to stderr unless `AGENT_STREAM_LOG_FILE`
//! is set.
//!
//! ## Operator protocol
//!
//! Each input line is a prompt, or a slash command (`/help`, `/clear`,
//! `/quit`). Confirmation requests are answered on the same input with
//! `y`, `a` (yes, and stop asking for that category) or `n[: feedback]`.
//! Ctrl-C cancels the running turn; a second Ctrl-C exits.

pub mod commands;
pub mod console;

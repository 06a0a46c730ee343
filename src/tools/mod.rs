//! Tool registry and the router that turns tool calls into [`ToolResult`]s.

pub mod confirm;
pub mod files;
pub mod gate;
pub mod rate_limit;
pub mod search;
pub mod shell;
pub mod todo;
pub mod workspace;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use agent_provider::{CancelSignal, ToolCallRef, ToolResult, TurnId};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::AgentError;

use self::confirm::{ConfirmCategory, ConfirmationBroker, ConfirmationRequest};
use self::files::{CreateFileTool, StrReplaceEditorTool, ViewFileTool};
use self::search::SearchTool;
use self::shell::BashTool;
use self::todo::{CreateTodoListTool, TodoList, UpdateTodoListTool};
use self::workspace::Workspace;

/// Separator between provider and tool in external tool names.
pub const EXTERNAL_TOOL_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    Read,
    Write,
}

/// Per-call view of the session services a handler may use.
pub struct ToolContext<'a> {
    pub turn_id: TurnId,
    pub cancel: &'a CancelSignal,
    pub broker: &'a ConfirmationBroker,
}

impl ToolContext<'_> {
    pub fn confirm(
        &self,
        category: ConfirmCategory,
        operation: impl Into<String>,
        description: impl Into<String>,
        forced: bool,
    ) -> Result<(), AgentError> {
        self.broker.request(
            ConfirmationRequest {
                turn_id: self.turn_id,
                category,
                operation: operation.into(),
                description: description.into(),
                forced,
            },
            self.cancel,
        )
    }
}

pub trait ToolHandler: Send {
    fn name(&self) -> &'static str;

    fn access(&self) -> ToolAccess;

    /// Checks argument shape before anything runs.
    fn validate_args(&self, args: &Value) -> Result<(), AgentError>;

    fn execute(&mut self, args: Value, ctx: &ToolContext<'_>) -> Result<String, AgentError>;
}

/// Tools served by another process, addressed as `provider__tool`.
pub trait ExternalToolProvider: Send {
    fn name(&self) -> &str;

    fn has_tool(&self, tool: &str) -> bool;

    fn call(&mut self, tool: &str, args: Value, cancel: &CancelSignal)
        -> Result<String, AgentError>;
}

/// Deserializes tool arguments, mapping failures to [`AgentError::ArgumentParse`].
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|error| AgentError::ArgumentParse(error.to_string()))
}

fn parse_raw_arguments(raw: &str) -> Result<Value, AgentError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|error| AgentError::ArgumentParse(error.to_string()))?;
    if !value.is_object() {
        return Err(AgentError::ArgumentParse(
            "arguments must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

pub fn split_external_name(name: &str) -> Option<(&str, &str)> {
    let (provider, tool) = name.split_once(EXTERNAL_TOOL_SEPARATOR)?;
    if provider.is_empty() || tool.is_empty() {
        return None;
    }
    Some((provider, tool))
}

#[derive(Default)]
pub struct ToolRouter {
    handlers: BTreeMap<&'static str, Box<dyn ToolHandler>>,
    external: Vec<Box<dyn ExternalToolProvider>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in tool against `workspace`.
    pub fn with_builtin_tools(workspace: Workspace, config: &AgentConfig) -> Self {
        let todos = Arc::new(Mutex::new(TodoList::default()));
        let mut router = Self::new();
        router.register(ViewFileTool::new(workspace.clone()));
        router.register(CreateFileTool::new(workspace.clone()));
        router.register(StrReplaceEditorTool::new(workspace.clone()));
        router.register(SearchTool::new(workspace.clone()));
        router.register(BashTool::from_config(workspace, config));
        router.register(CreateTodoListTool::new(Arc::clone(&todos)));
        router.register(UpdateTodoListTool::new(todos));
        router
    }

    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn register_external(&mut self, provider: impl ExternalToolProvider + 'static) {
        self.external.push(Box::new(provider));
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn access(&self, name: &str) -> Option<ToolAccess> {
        self.handlers.get(name).map(|handler| handler.access())
    }

    /// Runs one tool call to completion and normalizes the outcome.
    ///
    /// Never panics and never returns an error: every failure, including a
    /// handler panic, becomes `ToolResult { success: false, .. }`.
    pub fn dispatch(&mut self, call: &ToolCallRef, ctx: &ToolContext<'_>) -> ToolResult {
        let started = Instant::now();
        tracing::info!(tool = %call.name, call_id = %call.id, "dispatching tool call");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch_inner(call, ctx)))
            .unwrap_or_else(|panic| {
                Err(AgentError::execution(
                    call.name.clone(),
                    format!("tool panicked: {}", panic_message(panic.as_ref())),
                ))
            });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                tracing::info!(tool = %call.name, call_id = %call.id, elapsed_ms, "tool call succeeded");
                ToolResult::success(output)
            }
            Err(error) => {
                match &error {
                    AgentError::Validation { .. }
                    | AgentError::RateLimited { .. }
                    | AgentError::UserCancellation { .. } => {
                        tracing::warn!(tool = %call.name, call_id = %call.id, %error, "tool call refused");
                    }
                    _ => {
                        tracing::info!(tool = %call.name, call_id = %call.id, elapsed_ms, %error, "tool call failed");
                    }
                }
                ToolResult::failure(error.to_string())
            }
        }
    }

    fn dispatch_inner(
        &mut self,
        call: &ToolCallRef,
        ctx: &ToolContext<'_>,
    ) -> Result<String, AgentError> {
        let args = parse_raw_arguments(&call.raw_arguments)?;

        if let Some(handler) = self.handlers.get_mut(call.name.as_str()) {
            handler.validate_args(&args)?;
            return handler.execute(args, ctx);
        }

        let not_found = || AgentError::ToolNotFound {
            name: call.name.clone(),
        };
        let (provider_name, tool) = split_external_name(&call.name).ok_or_else(not_found)?;
        let provider = self
            .external
            .iter_mut()
            .find(|provider| provider.name() == provider_name && provider.has_tool(tool))
            .ok_or_else(not_found)?;

        provider.call(tool, args, ctx.cancel)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use super::confirm::{ConfirmationBroker, ConfirmationPrompt, Decision, PendingConfirmation};
    use super::ToolContext;
    use crate::error::AgentError;
    use agent_provider::CancelSignal;

    /// Answers every confirmation with a fixed decision and records descriptions.
    pub(crate) struct FixedPrompt {
        decision: Decision,
        pub(crate) descriptions: Mutex<Vec<String>>,
    }

    impl ConfirmationPrompt for FixedPrompt {
        fn submit(&self, pending: PendingConfirmation) -> Result<(), AgentError> {
            if let Ok(mut descriptions) = self.descriptions.lock() {
                descriptions.push(pending.request().description.clone());
            }
            pending.resolve(self.decision.clone());
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub(crate) prompt: Arc<FixedPrompt>,
        pub(crate) broker: ConfirmationBroker,
        pub(crate) cancel: CancelSignal,
    }

    impl Harness {
        pub(crate) fn answering(decision: Decision) -> Self {
            let prompt = Arc::new(FixedPrompt {
                decision,
                descriptions: Mutex::new(Vec::new()),
            });
            Self {
                broker: ConfirmationBroker::new(prompt.clone()),
                prompt,
                cancel: Arc::new(AtomicBool::new(false)),
            }
        }

        pub(crate) fn confirming() -> Self {
            Self::answering(Decision::confirmed())
        }

        pub(crate) fn ctx(&self) -> ToolContext<'_> {
            ToolContext {
                turn_id: 1,
                cancel: &self.cancel,
                broker: &self.broker,
            }
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompt
                .descriptions
                .lock()
                .map(|descriptions| descriptions.clone())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::Harness;
    use super::*;

    struct EchoTool;

    impl ToolHandler for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn access(&self) -> ToolAccess {
            ToolAccess::Read
        }

        fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
            match args.get("text") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(AgentError::ArgumentParse("missing field `text`".to_string())),
            }
        }

        fn execute(&mut self, args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct PanickingTool;

    impl ToolHandler for PanickingTool {
        fn name(&self) -> &'static str {
            "explode"
        }

        fn access(&self) -> ToolAccess {
            ToolAccess::Write
        }

        fn validate_args(&self, _args: &Value) -> Result<(), AgentError> {
            Ok(())
        }

        fn execute(&mut self, _args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
            panic!("handler bug");
        }
    }

    struct Weather;

    impl ExternalToolProvider for Weather {
        fn name(&self) -> &str {
            "weather"
        }

        fn has_tool(&self, tool: &str) -> bool {
            tool == "forecast"
        }

        fn call(
            &mut self,
            _tool: &str,
            args: Value,
            _cancel: &CancelSignal,
        ) -> Result<String, AgentError> {
            Ok(format!("sunny in {}", args["city"].as_str().unwrap_or("?")))
        }
    }

    fn router() -> ToolRouter {
        let mut router = ToolRouter::new();
        router.register(EchoTool);
        router.register(PanickingTool);
        router.register_external(Weather);
        router
    }

    #[test]
    fn successful_handler_output_becomes_success_result() {
        let harness = Harness::confirming();
        let call = ToolCallRef::new("c1", "echo", r#"{"text":"hi"}"#);

        assert_eq!(router().dispatch(&call, &harness.ctx()), ToolResult::success("hi"));
    }

    #[test]
    fn malformed_arguments_yield_parse_error_result() {
        let harness = Harness::confirming();
        let call = ToolCallRef::new("c1", "echo", "{not json");

        let result = router().dispatch(&call, &harness.ctx());
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .is_some_and(|error| error.starts_with("argument parse error")));
    }

    #[test]
    fn non_object_arguments_are_parse_errors() {
        let harness = Harness::confirming();
        let call = ToolCallRef::new("c1", "echo", "[1,2]");

        let result = router().dispatch(&call, &harness.ctx());
        assert_eq!(
            result.error.as_deref(),
            Some("argument parse error: arguments must be a JSON object")
        );
    }

    #[test]
    fn unknown_tool_is_reported_not_raised() {
        let harness = Harness::confirming();
        let call = ToolCallRef::new("c1", "teleport", "{}");

        assert_eq!(
            router().dispatch(&call, &harness.ctx()),
            ToolResult::failure("Tool not found: teleport")
        );
    }

    #[test]
    fn handler_panic_is_contained() {
        let harness = Harness::confirming();
        let mut router = router();
        let call = ToolCallRef::new("c1", "explode", "{}");

        let result = router.dispatch(&call, &harness.ctx());
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("explode failed: tool panicked: handler bug")
        );

        let again = ToolCallRef::new("c2", "echo", &json!({"text": "still fine"}).to_string());
        assert!(router.dispatch(&again, &harness.ctx()).success);
    }

    #[test]
    fn namespaced_names_reach_external_providers() {
        let harness = Harness::confirming();
        let mut router = router();

        let call = ToolCallRef::new("c1", "weather__forecast", r#"{"city":"Oslo"}"#);
        assert_eq!(
            router.dispatch(&call, &harness.ctx()),
            ToolResult::success("sunny in Oslo")
        );

        let missing = ToolCallRef::new("c2", "weather__radar", "{}");
        assert_eq!(
            router.dispatch(&missing, &harness.ctx()).error.as_deref(),
            Some("Tool not found: weather__radar")
        );
    }

    #[test]
    fn external_name_split_requires_both_halves() {
        assert_eq!(split_external_name("mcp__read"), Some(("mcp", "read")));
        assert_eq!(split_external_name("__read"), None);
        assert_eq!(split_external_name("mcp__"), None);
        assert_eq!(split_external_name("view_file"), None);
    }

    #[test]
    fn builtin_registry_exposes_every_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(dir.path()).expect("workspace");
        let router = ToolRouter::with_builtin_tools(workspace, &AgentConfig::default());

        assert_eq!(
            router.tool_names(),
            vec![
                "bash",
                "create_file",
                "create_todo_list",
                "search",
                "str_replace_editor",
                "update_todo_list",
                "view_file",
            ]
        );
        assert_eq!(router.access("bash"), Some(ToolAccess::Write));
        assert_eq!(router.access("search"), Some(ToolAccess::Read));
    }
}

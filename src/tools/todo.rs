use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::Value;

use crate::error::AgentError;

use super::{parse_args, ToolAccess, ToolContext, ToolHandler};

pub const CREATE_TODO_TOOL_NAME: &str = "create_todo_list";
pub const UPDATE_TODO_TOOL_NAME: &str = "update_todo_list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

impl fmt::Display for TodoPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TodoUpdate {
    pub id: String,
    #[serde(default)]
    pub status: Option<TodoStatus>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub priority: Option<TodoPriority>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTodoArgs {
    todos: Vec<TodoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateTodoArgs {
    updates: Vec<TodoUpdate>,
}

/// Session-scoped task list shared by the two todo tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoList {
    items: Vec<TodoItem>,
}

impl TodoList {
    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn replace(&mut self, items: Vec<TodoItem>) {
        self.items = items;
    }

    /// Applies every update or none of them.
    pub fn apply(&mut self, updates: &[TodoUpdate]) -> Result<(), String> {
        if let Some(missing) = updates
            .iter()
            .find(|update| !self.items.iter().any(|item| item.id == update.id))
        {
            return Err(format!("Todo item not found: {}", missing.id));
        }

        for update in updates {
            let Some(item) = self.items.iter_mut().find(|item| item.id == update.id) else {
                continue;
            };
            if let Some(status) = update.status {
                item.status = status;
            }
            if let Some(content) = &update.content {
                item.content = content.clone();
            }
            if let Some(priority) = update.priority {
                item.priority = priority;
            }
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        if self.items.is_empty() {
            return "Todo list is empty".to_string();
        }

        let lines: Vec<String> = self
            .items
            .iter()
            .map(|item| {
                format!(
                    "{} {} ({}) {}",
                    item.status.marker(),
                    item.id,
                    item.priority,
                    item.content
                )
            })
            .collect();
        format!("Todo list:\n{}", lines.join("\n"))
    }
}

fn lock_todos(todos: &Mutex<TodoList>) -> MutexGuard<'_, TodoList> {
    match todos.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct CreateTodoListTool {
    todos: Arc<Mutex<TodoList>>,
}

impl CreateTodoListTool {
    pub fn new(todos: Arc<Mutex<TodoList>>) -> Self {
        Self { todos }
    }
}

impl ToolHandler for CreateTodoListTool {
    fn name(&self) -> &'static str {
        CREATE_TODO_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Read
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        let args: CreateTodoArgs = parse_args(args.clone())?;
        let mut seen = HashSet::new();
        for item in &args.todos {
            if item.id.trim().is_empty() {
                return Err(AgentError::ArgumentParse(
                    "todo id must not be empty".to_string(),
                ));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(AgentError::ArgumentParse(format!(
                    "duplicate todo id: {}",
                    item.id
                )));
            }
        }
        Ok(())
    }

    fn execute(&mut self, args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let CreateTodoArgs { todos } = parse_args(args)?;
        let mut list = lock_todos(&self.todos);
        list.replace(todos);
        Ok(list.render())
    }
}

pub struct UpdateTodoListTool {
    todos: Arc<Mutex<TodoList>>,
}

impl UpdateTodoListTool {
    pub fn new(todos: Arc<Mutex<TodoList>>) -> Self {
        Self { todos }
    }
}

impl ToolHandler for UpdateTodoListTool {
    fn name(&self) -> &'static str {
        UPDATE_TODO_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Read
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        parse_args::<UpdateTodoArgs>(args.clone()).map(|_| ())
    }

    fn execute(&mut self, args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let UpdateTodoArgs { updates } = parse_args(args)?;
        let mut list = lock_todos(&self.todos);
        list.apply(&updates)
            .map_err(|message| AgentError::execution(UPDATE_TODO_TOOL_NAME, message))?;
        Ok(list.render())
    }
}

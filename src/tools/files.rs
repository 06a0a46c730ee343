use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::AgentError;

use super::confirm::ConfirmCategory;
use super::workspace::Workspace;
use super::{parse_args, ToolAccess, ToolContext, ToolHandler};

pub const VIEW_FILE_TOOL_NAME: &str = "view_file";
pub const CREATE_FILE_TOOL_NAME: &str = "create_file";
pub const STR_REPLACE_TOOL_NAME: &str = "str_replace_editor";

const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ViewFileArgs {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrReplaceArgs {
    path: String,
    old_str: String,
    new_str: String,
    #[serde(default)]
    replace_all: bool,
}

fn failed(tool: &str) -> impl Fn(String) -> AgentError + '_ {
    move |message| AgentError::execution(tool, message)
}

fn read_text(tool: &str, path: &Path, max_bytes: usize) -> Result<String, AgentError> {
    let bytes = fs::read(path).map_err(|error| {
        AgentError::execution(tool, format!("Failed to read file {}: {error}", path.display()))
    })?;

    if bytes.len() > max_bytes {
        return Err(AgentError::execution(
            tool,
            format!(
                "File exceeds max read size ({} bytes > {max_bytes} bytes)",
                bytes.len()
            ),
        ));
    }

    String::from_utf8(bytes)
        .map_err(|_| AgentError::execution(tool, "File is not valid UTF-8 text"))
}

/// Reads a file (optionally a 1-based inclusive line range) or lists a
/// directory.
pub struct ViewFileTool {
    workspace: Workspace,
    read_max_bytes: usize,
}

impl ViewFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        }
    }

    fn list_directory(&self, directory: &Path) -> Result<String, AgentError> {
        let entries = fs::read_dir(directory).map_err(|error| {
            AgentError::execution(
                VIEW_FILE_TOOL_NAME,
                format!("Failed to list directory {}: {error}", directory.display()),
            )
        })?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();

        let relative = self.workspace.relative_display(directory);
        if names.is_empty() {
            return Ok(format!("Directory {relative} is empty"));
        }
        Ok(format!("Directory contents of {relative}:\n{}", names.join("\n")))
    }
}

impl ToolHandler for ViewFileTool {
    fn name(&self) -> &'static str {
        VIEW_FILE_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Read
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        let args: ViewFileArgs = parse_args(args.clone())?;
        if args.start_line == Some(0) || args.end_line == Some(0) {
            return Err(AgentError::ArgumentParse(
                "line numbers start at 1".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (args.start_line, args.end_line) {
            if end < start {
                return Err(AgentError::ArgumentParse(format!(
                    "end_line {end} is before start_line {start}"
                )));
            }
        }
        Ok(())
    }

    fn execute(&mut self, args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let args: ViewFileArgs = parse_args(args)?;
        let resolved = self
            .workspace
            .resolve_existing(&args.path)
            .map_err(failed(VIEW_FILE_TOOL_NAME))?;

        if resolved.is_dir() {
            return self.list_directory(&resolved);
        }

        let content = read_text(VIEW_FILE_TOOL_NAME, &resolved, self.read_max_bytes)?;
        let relative = self.workspace.relative_display(&resolved);
        if args.start_line.is_none() && args.end_line.is_none() {
            return Ok(format!("Contents of {relative}:\n{content}"));
        }

        let lines: Vec<&str> = content.lines().collect();
        let start = args.start_line.unwrap_or(1);
        if start > lines.len() {
            return Err(AgentError::execution(
                VIEW_FILE_TOOL_NAME,
                format!(
                    "start_line {start} is past the end of {relative} ({} lines)",
                    lines.len()
                ),
            ));
        }
        let end = args.end_line.unwrap_or(lines.len()).min(lines.len());

        let numbered: Vec<String> = lines[start - 1..end]
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{}: {line}", start + offset))
            .collect();
        Ok(format!(
            "Lines {start}-{end} of {relative}:\n{}",
            numbered.join("\n")
        ))
    }
}

pub struct CreateFileTool {
    workspace: Workspace,
}

impl CreateFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl ToolHandler for CreateFileTool {
    fn name(&self) -> &'static str {
        CREATE_FILE_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Write
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        parse_args::<CreateFileArgs>(args.clone()).map(|_| ())
    }

    fn execute(&mut self, args: Value, ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let CreateFileArgs { path, content } = parse_args(args)?;
        let resolved = self
            .workspace
            .resolve_write(&path)
            .map_err(failed(CREATE_FILE_TOOL_NAME))?;
        if resolved.is_dir() {
            return Err(AgentError::execution(
                CREATE_FILE_TOOL_NAME,
                format!("{path} is a directory"),
            ));
        }

        let relative = self.workspace.relative_display(&resolved);
        ctx.confirm(
            ConfirmCategory::FileOperations,
            "Create file",
            format!("Create {relative} ({} lines)", content.lines().count()),
            false,
        )?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                AgentError::execution(
                    CREATE_FILE_TOOL_NAME,
                    format!(
                        "Failed to create parent directories {}: {error}",
                        parent.display()
                    ),
                )
            })?;

            let canonical_parent = parent.canonicalize().map_err(|error| {
                AgentError::execution(
                    CREATE_FILE_TOOL_NAME,
                    format!("Failed to resolve write parent {}: {error}", parent.display()),
                )
            })?;
            self.workspace
                .ensure_inside(&canonical_parent)
                .map_err(failed(CREATE_FILE_TOOL_NAME))?;
        }

        fs::write(&resolved, content).map_err(|error| {
            AgentError::execution(
                CREATE_FILE_TOOL_NAME,
                format!("Failed to write file {}: {error}", resolved.display()),
            )
        })?;

        Ok(format!("Created {relative}"))
    }
}

/// Literal search-and-replace inside one existing file.
pub struct StrReplaceEditorTool {
    workspace: Workspace,
}

impl StrReplaceEditorTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl ToolHandler for StrReplaceEditorTool {
    fn name(&self) -> &'static str {
        STR_REPLACE_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Write
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        let args: StrReplaceArgs = parse_args(args.clone())?;
        if args.old_str.is_empty() {
            return Err(AgentError::ArgumentParse(
                "old_str must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn execute(&mut self, args: Value, ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let StrReplaceArgs {
            path,
            old_str,
            new_str,
            replace_all,
        } = parse_args(args)?;
        let resolved = self
            .workspace
            .resolve_existing(&path)
            .map_err(failed(STR_REPLACE_TOOL_NAME))?;
        let relative = self.workspace.relative_display(&resolved);

        let current = read_text(STR_REPLACE_TOOL_NAME, &resolved, usize::MAX)?;
        let occurrences = current.match_indices(&old_str).count();
        match occurrences {
            0 => {
                return Err(AgentError::execution(
                    STR_REPLACE_TOOL_NAME,
                    format!("old_str not found in {relative}"),
                ))
            }
            1 => {}
            found if !replace_all => {
                return Err(AgentError::execution(
                    STR_REPLACE_TOOL_NAME,
                    format!(
                        "old_str matches {found} times in {relative}; add context or set replace_all"
                    ),
                ))
            }
            _ => {}
        }

        ctx.confirm(
            ConfirmCategory::FileOperations,
            "Edit file",
            format!("Edit {relative}: replace {occurrences} occurrence(s)"),
            false,
        )?;

        let updated = if replace_all {
            current.replace(&old_str, &new_str)
        } else {
            current.replacen(&old_str, &new_str, 1)
        };
        fs::write(&resolved, updated).map_err(|error| {
            AgentError::execution(
                STR_REPLACE_TOOL_NAME,
                format!("Failed to write file {}: {error}", resolved.display()),
            )
        })?;

        Ok(format!(
            "Updated {relative} ({occurrences} replacement{})",
            if occurrences == 1 { "" } else { "s" }
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::tools::confirm::Decision;
    use crate::tools::test_support::Harness;

    fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
        let dir = tempdir().expect("tempdir");
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(full, content).expect("write");
        }
        let workspace = Workspace::new(dir.path()).expect("workspace");
        (dir, workspace)
    }

    #[test]
    fn view_file_returns_contents() {
        let (_dir, workspace) = workspace_with(&[("notes.txt", "alpha\nbeta\n")]);
        let harness = Harness::confirming();

        let output = ViewFileTool::new(workspace)
            .execute(json!({"path": "notes.txt"}), &harness.ctx())
            .expect("view");
        assert_eq!(output, "Contents of notes.txt:\nalpha\nbeta\n");
    }

    #[test]
    fn view_file_line_range_is_numbered_and_clamped() {
        let (_dir, workspace) = workspace_with(&[("lines.txt", "one\ntwo\nthree\nfour")]);
        let harness = Harness::confirming();
        let mut tool = ViewFileTool::new(workspace);

        let output = tool
            .execute(
                json!({"path": "lines.txt", "start_line": 2, "end_line": 9}),
                &harness.ctx(),
            )
            .expect("range");
        assert_eq!(output, "Lines 2-4 of lines.txt:\n2: two\n3: three\n4: four");

        let error = tool
            .execute(json!({"path": "lines.txt", "start_line": 7}), &harness.ctx())
            .expect_err("past end");
        assert!(error.to_string().contains("past the end"), "{error}");
    }

    #[test]
    fn view_file_rejects_inverted_range_during_validation() {
        let (_dir, workspace) = workspace_with(&[]);
        let tool = ViewFileTool::new(workspace);

        assert!(matches!(
            tool.validate_args(&json!({"path": "x", "start_line": 5, "end_line": 2})),
            Err(AgentError::ArgumentParse(_))
        ));
        assert!(matches!(
            tool.validate_args(&json!({"file": "x"})),
            Err(AgentError::ArgumentParse(_))
        ));
    }

    #[test]
    fn view_directory_lists_sorted_entries() {
        let (_dir, workspace) = workspace_with(&[("src/main.rs", ""), ("b.txt", ""), ("a.txt", "")]);
        let harness = Harness::confirming();

        let output = ViewFileTool::new(workspace)
            .execute(json!({"path": "."}), &harness.ctx())
            .expect("listing");
        assert_eq!(output, "Directory contents of .:\na.txt\nb.txt\nsrc/");
    }

    #[test]
    fn create_file_writes_nested_path_after_confirmation() {
        let (dir, workspace) = workspace_with(&[]);
        let harness = Harness::confirming();

        let output = CreateFileTool::new(workspace)
            .execute(
                json!({"path": "pkg/mod.rs", "content": "pub fn f() {}\n"}),
                &harness.ctx(),
            )
            .expect("create");

        assert_eq!(output, "Created pkg/mod.rs");
        assert_eq!(
            fs::read_to_string(dir.path().join("pkg/mod.rs")).expect("read back"),
            "pub fn f() {}\n"
        );
        assert_eq!(harness.prompts(), vec!["Create pkg/mod.rs (1 lines)".to_string()]);
    }

    #[test]
    fn create_file_rejected_leaves_no_file() {
        let (dir, workspace) = workspace_with(&[]);
        let harness = Harness::answering(Decision::rejected(None));

        let error = CreateFileTool::new(workspace)
            .execute(json!({"path": "x.txt", "content": "x"}), &harness.ctx())
            .expect_err("rejected");
        assert!(error.is_user_cancellation());
        assert!(!dir.path().join("x.txt").exists());
    }

    #[test]
    fn create_file_outside_workspace_fails() {
        let (_dir, workspace) = workspace_with(&[]);
        let harness = Harness::confirming();

        let error = CreateFileTool::new(workspace)
            .execute(json!({"path": "../escape.txt", "content": "x"}), &harness.ctx())
            .expect_err("escape");
        assert!(error.to_string().contains("Path escapes workspace root"), "{error}");
        assert!(harness.prompts().is_empty());
    }

    #[test]
    fn str_replace_requires_a_unique_match() {
        let (dir, workspace) = workspace_with(&[("lib.rs", "let a = 1;\nlet a = 1;\n")]);
        let harness = Harness::confirming();
        let mut tool = StrReplaceEditorTool::new(workspace);

        let error = tool
            .execute(
                json!({"path": "lib.rs", "old_str": "let a = 1;", "new_str": "let a = 2;"}),
                &harness.ctx(),
            )
            .expect_err("ambiguous");
        assert!(error.to_string().contains("matches 2 times"), "{error}");

        let output = tool
            .execute(
                json!({
                    "path": "lib.rs",
                    "old_str": "let a = 1;",
                    "new_str": "let a = 2;",
                    "replace_all": true
                }),
                &harness.ctx(),
            )
            .expect("replace all");
        assert_eq!(output, "Updated lib.rs (2 replacements)");
        assert_eq!(
            fs::read_to_string(dir.path().join("lib.rs")).expect("read back"),
            "let a = 2;\nlet a = 2;\n"
        );
    }

    #[test]
    fn str_replace_reports_missing_text() {
        let (_dir, workspace) = workspace_with(&[("lib.rs", "fn main() {}\n")]);
        let harness = Harness::confirming();

        let error = StrReplaceEditorTool::new(workspace)
            .execute(
                json!({"path": "lib.rs", "old_str": "fn helper", "new_str": ""}),
                &harness.ctx(),
            )
            .expect_err("not found");
        assert_eq!(error.to_string(), "str_replace_editor failed: old_str not found in lib.rs");
        assert!(harness.prompts().is_empty());
    }

    #[test]
    fn str_replace_rejects_empty_old_str() {
        let (_dir, workspace) = workspace_with(&[]);
        let tool = StrReplaceEditorTool::new(workspace);
        assert!(matches!(
            tool.validate_args(&json!({"path": "a", "old_str": "", "new_str": "b"})),
            Err(AgentError::ArgumentParse(_))
        ));
    }
}

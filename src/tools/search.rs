use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AgentError;

use super::workspace::Workspace;
use super::{parse_args, ToolAccess, ToolContext, ToolHandler};

pub const SEARCH_TOOL_NAME: &str = "search";

const DEFAULT_MAX_RESULTS: usize = 50;
const MAX_LINE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Text,
    Files,
    #[default]
    Both,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    search_type: SearchType,
    #[serde(default)]
    include_pattern: Option<String>,
    #[serde(default)]
    exclude_pattern: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    regex: bool,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchHit {
    File(String),
    Line {
        path: String,
        line: usize,
        text: String,
    },
}

impl SearchHit {
    fn render(&self) -> String {
        match self {
            Self::File(path) => path.clone(),
            Self::Line { path, line, text } => format!("{path}:{line}: {text}"),
        }
    }
}

/// Gitignore-aware file name and content search across the workspace.
pub struct SearchTool {
    workspace: Workspace,
}

impl SearchTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>, AgentError> {
    let Some(pattern) = pattern.map(str::trim).filter(|pattern| !pattern.is_empty()) else {
        return Ok(None);
    };

    let mut builder = GlobSetBuilder::new();
    for part in pattern.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let glob = Glob::new(part).map_err(|error| {
            AgentError::ArgumentParse(format!("invalid glob pattern {part:?}: {error}"))
        })?;
        builder.add(glob);
        // Bare patterns like `*.rs` should also match inside subdirectories.
        if !part.contains('/') {
            if let Ok(nested) = Glob::new(&format!("**/{part}")) {
                builder.add(nested);
            }
        }
    }

    builder
        .build()
        .map(Some)
        .map_err(|error| AgentError::ArgumentParse(format!("invalid glob pattern: {error}")))
}

fn build_matcher(args: &SearchArgs) -> Result<Regex, AgentError> {
    let pattern = if args.regex {
        args.query.clone()
    } else {
        regex::escape(&args.query)
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(!args.case_sensitive)
        .build()
        .map_err(|error| AgentError::ArgumentParse(format!("invalid search regex: {error}")))
}

fn clip_line(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_LINE_CHARS {
        return trimmed.to_string();
    }
    let clipped: String = trimmed.chars().take(MAX_LINE_CHARS).collect();
    format!("{clipped}...")
}

impl SearchTool {
    fn collect_hits(&self, args: &SearchArgs) -> Result<(Vec<SearchHit>, bool), AgentError> {
        let matcher = build_matcher(args)?;
        let include = build_globset(args.include_pattern.as_deref())?;
        let exclude = build_globset(args.exclude_pattern.as_deref())?;
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
        let root = self.workspace.root();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .ignore(true)
            .parents(false)
            .follow_links(false)
            .require_git(false)
            .sort_by_file_path(Path::cmp)
            .build();

        let mut hits = Vec::new();
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if include.as_ref().is_some_and(|set| !set.is_match(relative)) {
                continue;
            }
            if exclude.as_ref().is_some_and(|set| set.is_match(relative)) {
                continue;
            }
            let relative = relative.to_string_lossy().into_owned();

            if args.search_type != SearchType::Text && matcher.is_match(&relative) {
                hits.push(SearchHit::File(relative.clone()));
                if hits.len() >= max_results {
                    return Ok((hits, true));
                }
            }

            if args.search_type == SearchType::Files {
                continue;
            }

            // Binary and non-UTF-8 files are skipped.
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            for (index, line) in content.lines().enumerate() {
                if !matcher.is_match(line) {
                    continue;
                }
                hits.push(SearchHit::Line {
                    path: relative.clone(),
                    line: index + 1,
                    text: clip_line(line),
                });
                if hits.len() >= max_results {
                    return Ok((hits, true));
                }
            }
        }

        Ok((hits, false))
    }
}

impl ToolHandler for SearchTool {
    fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Read
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        let args: SearchArgs = parse_args(args.clone())?;
        if args.query.is_empty() {
            return Err(AgentError::ArgumentParse(
                "query must not be empty".to_string(),
            ));
        }
        build_matcher(&args)?;
        build_globset(args.include_pattern.as_deref())?;
        build_globset(args.exclude_pattern.as_deref())?;
        Ok(())
    }

    fn execute(&mut self, args: Value, _ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let args: SearchArgs = parse_args(args)?;
        let (hits, limited) = self.collect_hits(&args)?;
        tracing::debug!(query = %args.query, hits = hits.len(), limited, "search finished");

        if hits.is_empty() {
            return Ok(format!("No results found for \"{}\"", args.query));
        }

        let mut output = format!("Found {} results for \"{}\":\n", hits.len(), args.query);
        output.push_str(
            &hits
                .iter()
                .map(SearchHit::render)
                .collect::<Vec<_>>()
                .join("\n"),
        );
        if limited {
            output.push_str("\n[results limited; narrow the query or raise max_results]");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::tools::test_support::Harness;

    fn fixture() -> (TempDir, SearchTool) {
        let dir = tempdir().expect("tempdir");
        let files = [
            ("src/lib.rs", "pub fn parse() {}\n// TODO: Parse faster\n"),
            ("src/parser.rs", "struct Parser;\n"),
            ("README.md", "Parsing notes\n"),
            ("target/debug/out.rs", "fn parse() {}\n"),
            (".gitignore", "target/\n"),
        ];
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            fs::write(full, content).expect("write");
        }
        let workspace = Workspace::new(dir.path()).expect("workspace");
        (dir, SearchTool::new(workspace))
    }

    fn search(tool: &mut SearchTool, args: Value) -> String {
        let harness = Harness::confirming();
        tool.execute(args, &harness.ctx()).expect("search runs")
    }

    #[test]
    fn text_hits_are_path_line_text_and_skip_ignored_dirs() {
        let (_dir, mut tool) = fixture();

        let output = search(
            &mut tool,
            json!({"query": "parse", "search_type": "text", "case_sensitive": true}),
        );
        assert_eq!(
            output,
            "Found 1 results for \"parse\":\nsrc/lib.rs:1: pub fn parse() {}"
        );
    }

    #[test]
    fn file_search_matches_relative_paths() {
        let (_dir, mut tool) = fixture();

        let output = search(&mut tool, json!({"query": "parser", "search_type": "files"}));
        assert_eq!(output, "Found 1 results for \"parser\":\nsrc/parser.rs");
    }

    #[test]
    fn include_pattern_filters_candidates() {
        let (_dir, mut tool) = fixture();

        let output = search(
            &mut tool,
            json!({"query": "pars", "search_type": "text", "include_pattern": "*.md"}),
        );
        assert_eq!(output, "Found 1 results for \"pars\":\nREADME.md:1: Parsing notes");
    }

    #[test]
    fn regex_queries_and_limits() {
        let (_dir, mut tool) = fixture();

        let output = search(
            &mut tool,
            json!({"query": "^(pub fn|struct)", "regex": true, "search_type": "text", "max_results": 1}),
        );
        assert!(output.starts_with("Found 1 results"), "{output}");
        assert!(output.ends_with("[results limited; narrow the query or raise max_results]"));
    }

    #[test]
    fn no_hits_is_a_successful_empty_answer() {
        let (_dir, mut tool) = fixture();
        assert_eq!(
            search(&mut tool, json!({"query": "zebra"})),
            "No results found for \"zebra\""
        );
    }

    #[test]
    fn invalid_regex_fails_validation() {
        let (_dir, tool) = fixture();
        assert!(matches!(
            tool.validate_args(&json!({"query": "(", "regex": true})),
            Err(AgentError::ArgumentParse(_))
        ));
        assert!(matches!(
            tool.validate_args(&json!({"query": "x", "search_type": "everything"})),
            Err(AgentError::ArgumentParse(_))
        ));
    }
}

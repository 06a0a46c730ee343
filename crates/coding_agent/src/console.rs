//! Line-mode operator: reads prompts and confirmation answers from one input
//! stream and prints settled history entries as they appear.

use std::io::{self, BufRead, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use agent_stream::history::EntryId;
use agent_stream::{
    CancelSignal, ChatEntry, ConfirmationRequest, Decision, EntryKind, Operator, RenderStatus,
    Session, StreamDispatcher, TurnOutcome,
};

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};

const MAX_TOOL_OUTPUT_LINES: usize = 12;

/// Parses an answer to a confirmation prompt.
///
/// `y`/`yes` confirms, `a`/`always` confirms and skips later prompts of the
/// same category, and `n`/`no` rejects with optional feedback after a colon.
pub fn parse_decision(input: &str) -> Option<Decision> {
    let trimmed = input.trim();
    let (answer, feedback) = match trimmed.split_once(':') {
        Some((answer, feedback)) => (answer.trim(), Some(feedback.trim().to_string())),
        None => (trimmed, None),
    };

    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" if feedback.is_none() => Some(Decision::confirmed()),
        "a" | "always" if feedback.is_none() => Some(Decision::Confirmed {
            dont_ask_again: true,
        }),
        "n" | "no" => Some(Decision::rejected(feedback)),
        _ => None,
    }
}

pub fn render_entry(entry: &ChatEntry) -> String {
    match entry.kind {
        EntryKind::User => format!("> {}", entry.content),
        EntryKind::Assistant => entry.content.trim_end().to_string(),
        EntryKind::ToolCall | EntryKind::ToolResult => {
            let name = entry
                .tool_call
                .as_ref()
                .map(|call| call.name.as_str())
                .unwrap_or("tool");
            let label = match &entry.tool_result {
                Some(result) if result.success => "ok",
                Some(_) => "error",
                None => "running",
            };
            format!("[{name}] {label}\n{}", indent_clipped(&entry.content))
        }
    }
}

fn indent_clipped(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut shown: Vec<String> = lines
        .iter()
        .take(MAX_TOOL_OUTPUT_LINES)
        .map(|line| format!("  {line}"))
        .collect();
    if lines.len() > MAX_TOOL_OUTPUT_LINES {
        shown.push(format!(
            "  ... (+{} more lines)",
            lines.len() - MAX_TOOL_OUTPUT_LINES
        ));
    }
    shown.join("\n")
}

pub fn render_status(outcome: &TurnOutcome, status: &RenderStatus) -> String {
    let label = match outcome {
        TurnOutcome::Completed => "done",
        TurnOutcome::Failed(_) => "failed",
        TurnOutcome::Cancelled => "cancelled",
    };
    format!(
        "({label}; {} tokens, {:.1}s)",
        status.token_count,
        status.elapsed.as_secs_f64()
    )
}

pub struct ConsoleOperator<R, W> {
    input: R,
    output: W,
    printed_through: EntryId,
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            printed_through: 0,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Prints entries that can no longer change, oldest first, stopping at
    /// the first one still streaming or waiting for its tool result.
    fn print_settled(&mut self, dispatcher: &StreamDispatcher) -> io::Result<()> {
        let turn_open = !dispatcher.is_done();
        for entry in dispatcher.history().entries() {
            if entry.id <= self.printed_through {
                continue;
            }
            if entry.is_streaming || (turn_open && entry.kind == EntryKind::ToolCall) {
                break;
            }
            writeln!(self.output, "{}", render_entry(entry))?;
            self.printed_through = entry.id;
        }
        self.output.flush()
    }
}

impl<R: BufRead, W: Write> Operator for ConsoleOperator<R, W> {
    fn confirm(&mut self, request: &ConfirmationRequest) -> Decision {
        loop {
            let asked = writeln!(
                self.output,
                "{}: {}\nAllow? [y]es / [n]o[: feedback] / [a]lways for {}",
                request.operation, request.description, request.category
            )
            .and_then(|()| self.output.flush());
            if asked.is_err() {
                return Decision::rejected(Some("Operator console unavailable".to_string()));
            }

            match self.read_line() {
                Ok(Some(answer)) => {
                    if let Some(decision) = parse_decision(&answer) {
                        return decision;
                    }
                    let _ = writeln!(self.output, "Please answer y, n, or a.");
                }
                Ok(None) | Err(_) => {
                    return Decision::rejected(Some("No operator response".to_string()));
                }
            }
        }
    }

    fn refresh(&mut self, dispatcher: &StreamDispatcher) {
        if let Err(error) = self.print_settled(dispatcher) {
            tracing::warn!(%error, "failed to write console output");
        }
    }
}

/// Reads prompts until `/quit` or end of input, running each as one turn.
pub fn run<R: BufRead, W: Write>(
    session: &mut Session,
    operator: &mut ConsoleOperator<R, W>,
    cancel: &CancelSignal,
) -> io::Result<()> {
    loop {
        let Some(line) = operator.read_line()? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        match parse_slash_command(prompt) {
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Help) => writeln!(operator.output, "{HELP_TEXT}")?,
            Some(SlashCommand::Clear) => match session.clear() {
                Ok(()) => writeln!(operator.output, "Conversation cleared.")?,
                Err(error) => writeln!(operator.output, "{error}")?,
            },
            Some(SlashCommand::Unknown(command)) => {
                writeln!(operator.output, "Unknown command: {command} (try /help)")?
            }
            None => {
                cancel.store(false, Ordering::SeqCst);
                match session.submit(prompt, operator, Arc::clone(cancel)) {
                    Ok(outcome) => {
                        let status = session.dispatcher().status(Instant::now());
                        writeln!(operator.output, "{}", render_status(&outcome, &status))?;
                    }
                    Err(error) => writeln!(operator.output, "{error}")?,
                }
            }
        }
        operator.output.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use agent_stream::{ToolCallRef, ToolResult};

    use super::*;

    #[test]
    fn decisions_cover_all_answer_forms() {
        assert_eq!(parse_decision("y"), Some(Decision::confirmed()));
        assert_eq!(parse_decision(" YES "), Some(Decision::confirmed()));
        assert_eq!(
            parse_decision("a"),
            Some(Decision::Confirmed {
                dont_ask_again: true
            })
        );
        assert_eq!(parse_decision("n"), Some(Decision::rejected(None)));
        assert_eq!(
            parse_decision("no: use cargo test instead"),
            Some(Decision::Rejected {
                feedback: Some("use cargo test instead".to_string())
            })
        );
        assert_eq!(parse_decision("n:   "), Some(Decision::rejected(None)));
        assert_eq!(parse_decision("maybe"), None);
        assert_eq!(parse_decision("y: but"), None);
    }

    #[test]
    fn tool_output_is_clipped_for_display() {
        let output: Vec<String> = (1..=20).map(|line| format!("line {line}")).collect();
        let mut entry = ChatEntry::tool_result(
            ToolCallRef::new("c1", "bash", "{}"),
            ToolResult::success(output.join("\n")),
        );
        entry.id = 3;

        let rendered = render_entry(&entry);
        assert!(rendered.starts_with("[bash] ok\n  line 1\n"), "{rendered}");
        assert!(rendered.ends_with("  ... (+8 more lines)"), "{rendered}");
    }

    #[test]
    fn unanswerable_confirmation_is_rejected() {
        let mut operator = ConsoleOperator::new(Cursor::new("perhaps\n"), Vec::new());
        let request = ConfirmationRequest {
            turn_id: 1,
            category: agent_stream::ConfirmCategory::ShellCommands,
            operation: "Run bash command".to_string(),
            description: "ls".to_string(),
            forced: false,
        };

        let decision = operator.confirm(&request);
        assert_eq!(
            decision,
            Decision::Rejected {
                feedback: Some("No operator response".to_string())
            }
        );
        let printed = String::from_utf8(operator.into_output()).expect("utf8 output");
        assert!(printed.contains("Please answer y, n, or a."));
    }

    #[test]
    fn status_line_reports_tokens_and_time() {
        let status = RenderStatus {
            processing: false,
            streaming: false,
            awaiting_confirmation: false,
            token_count: 42,
            elapsed: Duration::from_millis(1300),
        };
        assert_eq!(
            render_status(&TurnOutcome::Completed, &status),
            "(done; 42 tokens, 1.3s)"
        );
    }
}

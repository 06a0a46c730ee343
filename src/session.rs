//! One conversation: a provider worker thread feeding the dispatcher.
//!
//! The provider runs on a named worker thread and requests tool execution
//! through the host callback. Everything it produces (stream events, tool
//! start notices, confirmation requests, failures) travels through one
//! ordered channel tagged with the turn id, and the caller's thread applies
//! it to the [`StreamDispatcher`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use agent_provider::{
    CancelSignal, RunMessage, StreamEvent, StreamProvider, ToolCallRef, ToolResult, TurnId,
    TurnRequest,
};

use crate::config::AgentConfig;
use crate::dispatcher::StreamDispatcher;
use crate::error::AgentError;
use crate::tools::confirm::{
    ConfirmationBroker, ConfirmationPrompt, ConfirmationRequest, Decision, PendingConfirmation,
};
use crate::tools::workspace::Workspace;
use crate::tools::{ToolContext, ToolRouter};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Longest a new turn waits for the previous turn's worker to wind down.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Operator-facing side of a session: answers confirmations and redraws.
pub trait Operator {
    fn confirm(&mut self, request: &ConfirmationRequest) -> Decision;

    /// Called after every change a renderer could show.
    fn refresh(&mut self, _dispatcher: &StreamDispatcher) {}
}

#[derive(Debug)]
pub enum SessionMessage {
    Event(StreamEvent),
    ToolStarted { call_id: String },
    Confirmation(PendingConfirmation),
    Failed(String),
}

#[derive(Debug)]
struct Envelope {
    turn_id: TurnId,
    message: SessionMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Routes confirmation requests into the session channel.
struct ChannelPrompt {
    sender: Sender<Envelope>,
}

impl ConfirmationPrompt for ChannelPrompt {
    fn submit(&self, pending: PendingConfirmation) -> Result<(), AgentError> {
        let turn_id = pending.request().turn_id;
        self.sender
            .send(Envelope {
                turn_id,
                message: SessionMessage::Confirmation(pending),
            })
            .map_err(|_| AgentError::Aborted)
    }
}

pub struct Session {
    dispatcher: StreamDispatcher,
    provider: Arc<dyn StreamProvider>,
    router: Arc<Mutex<ToolRouter>>,
    broker: Arc<ConfirmationBroker>,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    memory: Vec<RunMessage>,
    next_turn_id: TurnId,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        dispatcher: StreamDispatcher,
        provider: Arc<dyn StreamProvider>,
        router: ToolRouter,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let broker = Arc::new(ConfirmationBroker::new(Arc::new(ChannelPrompt {
            sender: sender.clone(),
        })));

        Self {
            dispatcher,
            provider,
            router: Arc::new(Mutex::new(router)),
            broker,
            sender,
            receiver,
            memory: Vec::new(),
            next_turn_id: 1,
            worker: None,
        }
    }

    /// Builds a session with the built-in tools rooted at the configured
    /// workspace (or the current directory).
    pub fn from_config(
        config: &AgentConfig,
        provider: Arc<dyn StreamProvider>,
    ) -> Result<Self, AgentError> {
        let root = match &config.workspace_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|error| {
                AgentError::configuration(format!("failed to read current directory: {error}"))
            })?,
        };
        let workspace = Workspace::new(root)?;
        tracing::info!(workspace = %workspace.root().display(), "session workspace ready");

        Ok(Self::new(
            StreamDispatcher::from_config(config)?,
            provider,
            ToolRouter::with_builtin_tools(workspace, config),
        ))
    }

    pub fn dispatcher(&self) -> &StreamDispatcher {
        &self.dispatcher
    }

    pub fn broker(&self) -> &ConfirmationBroker {
        &self.broker
    }

    /// Committed model-facing conversation replayed on each turn.
    pub fn memory(&self) -> &[RunMessage] {
        &self.memory
    }

    /// Starts a fresh conversation; session approvals and rate history stay.
    pub fn clear(&mut self) -> Result<(), AgentError> {
        self.dispatcher.clear_history()?;
        self.memory.clear();
        Ok(())
    }

    /// Runs one turn to completion.
    ///
    /// Blocks the calling thread until the turn reaches done, fails, or
    /// `interrupt` is raised. The worker gets its own cancel flag, raised
    /// whenever the turn ends, so a worker that outlives its turn cannot
    /// run tools once the next turn starts.
    pub fn submit(
        &mut self,
        prompt: &str,
        operator: &mut dyn Operator,
        interrupt: CancelSignal,
    ) -> Result<TurnOutcome, AgentError> {
        self.reap_worker();

        let turn_id = self.next_turn_id;
        self.dispatcher.begin_turn(turn_id, prompt, Instant::now())?;
        self.next_turn_id += 1;
        operator.refresh(&self.dispatcher);

        let mut messages = self.memory.clone();
        messages.push(RunMessage::UserText {
            text: prompt.to_string(),
        });
        let request = TurnRequest { turn_id, messages };

        tracing::info!(turn_id, provider = %self.provider.profile().provider_id, "turn started");
        let turn_cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        match self.spawn_worker(request, Arc::clone(&turn_cancel)) {
            Ok(handle) => self.worker = Some(handle),
            Err(error) => {
                self.dispatcher.fail(&error, Instant::now());
                operator.refresh(&self.dispatcher);
                return Ok(TurnOutcome::Failed(error));
            }
        }

        let outcome = self.drive(turn_id, operator, &interrupt);
        turn_cancel.store(true, Ordering::SeqCst);
        match &outcome {
            TurnOutcome::Completed => {
                let transcript = self.dispatcher.take_transcript();
                self.memory.extend(transcript);
                tracing::info!(turn_id, "turn completed");
            }
            TurnOutcome::Failed(_) | TurnOutcome::Cancelled => {
                tracing::info!(turn_id, ?outcome, "turn ended without commit");
            }
        }

        Ok(outcome)
    }

    fn drive(
        &mut self,
        turn_id: TurnId,
        operator: &mut dyn Operator,
        interrupt: &CancelSignal,
    ) -> TurnOutcome {
        loop {
            if self.dispatcher.is_done() {
                return match self.dispatcher.failure() {
                    Some(error) => TurnOutcome::Failed(error.to_string()),
                    None => TurnOutcome::Completed,
                };
            }

            if interrupt.load(Ordering::SeqCst) {
                self.dispatcher
                    .fail(&AgentError::Aborted.to_string(), Instant::now());
                operator.refresh(&self.dispatcher);
                return TurnOutcome::Cancelled;
            }

            let now = Instant::now();
            let mut changed = self.dispatcher.tick(now);
            let wait = self
                .dispatcher
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(POLL_INTERVAL)
                .min(POLL_INTERVAL);

            match self.receiver.recv_timeout(wait) {
                Ok(envelope) if envelope.turn_id != turn_id => {
                    drop_stale(envelope, turn_id);
                }
                Ok(envelope) => {
                    self.apply(envelope.message, operator);
                    changed = true;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.dispatcher
                        .fail("session channel closed", Instant::now());
                    changed = true;
                }
            }

            if changed {
                operator.refresh(&self.dispatcher);
            }
        }
    }

    fn apply(&mut self, message: SessionMessage, operator: &mut dyn Operator) {
        match message {
            SessionMessage::Event(event) => self.dispatcher.handle_event(event, Instant::now()),
            SessionMessage::ToolStarted { call_id } => self.dispatcher.tool_started(&call_id),
            SessionMessage::Confirmation(pending) => {
                self.dispatcher.set_awaiting_confirmation(true);
                operator.refresh(&self.dispatcher);

                let decision = operator.confirm(pending.request());
                if decision.is_confirmed() {
                    self.dispatcher.set_awaiting_confirmation(false);
                } else {
                    self.dispatcher.confirmation_rejected();
                }
                pending.resolve(decision);
            }
            SessionMessage::Failed(error) => self.dispatcher.fail(&error, Instant::now()),
        }
    }

    fn spawn_worker(
        &self,
        request: TurnRequest,
        cancel: CancelSignal,
    ) -> Result<JoinHandle<()>, String> {
        let turn_id = request.turn_id;
        let worker = TurnWorker {
            provider: Arc::clone(&self.provider),
            router: Arc::clone(&self.router),
            broker: Arc::clone(&self.broker),
            sender: self.sender.clone(),
        };

        thread::Builder::new()
            .name(format!("agent-turn-{turn_id}"))
            .spawn(move || worker.run(request, cancel))
            .map_err(|error| format!("Failed to spawn turn worker: {error}"))
    }

    /// Joins the previous turn's worker, which has already been told to
    /// stop. A worker stuck past the drain timeout is detached.
    fn reap_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + WORKER_DRAIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("previous turn worker still running; detaching it");
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let _ = handle.join();
    }
}

fn drop_stale(envelope: Envelope, current: TurnId) {
    tracing::warn!(
        turn_id = envelope.turn_id,
        current_turn = current,
        "dropping message from a finished turn"
    );
    if let SessionMessage::Confirmation(pending) = envelope.message {
        pending.resolve(Decision::rejected(Some(
            "Turn already finished".to_string(),
        )));
    }
}

struct TurnWorker {
    provider: Arc<dyn StreamProvider>,
    router: Arc<Mutex<ToolRouter>>,
    broker: Arc<ConfirmationBroker>,
    sender: Sender<Envelope>,
}

impl TurnWorker {
    fn send(&self, turn_id: TurnId, message: SessionMessage) {
        // The session may have moved on; late messages are dropped there.
        let _ = self.sender.send(Envelope { turn_id, message });
    }

    fn run(self, request: TurnRequest, cancel: CancelSignal) {
        let turn_id = request.turn_id;
        let terminal_emitted = AtomicBool::new(false);

        let mut emit = |event: StreamEvent| {
            if event.is_terminal() {
                terminal_emitted.store(true, Ordering::SeqCst);
            }
            self.send(turn_id, SessionMessage::Event(event));
        };
        let mut execute_tool = |call: ToolCallRef| -> ToolResult {
            self.send(
                turn_id,
                SessionMessage::ToolStarted {
                    call_id: call.id.clone(),
                },
            );

            let result = {
                let mut router = lock_unpoisoned(&self.router);
                if cancel.load(Ordering::SeqCst) {
                    tracing::warn!(turn_id, tool = %call.name, "tool call skipped after cancel");
                    return ToolResult::failure(AgentError::Aborted.to_string());
                }
                router.dispatch(
                    &call,
                    &ToolContext {
                        turn_id,
                        cancel: &cancel,
                        broker: &self.broker,
                    },
                )
            };

            self.send(
                turn_id,
                SessionMessage::Event(StreamEvent::ToolResult {
                    id: call.id,
                    result: result.clone(),
                }),
            );
            result
        };

        let provider = Arc::clone(&self.provider);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            provider.run(request, Arc::clone(&cancel), &mut execute_tool, &mut emit)
        }));

        match outcome {
            Ok(Ok(())) => {
                if !terminal_emitted.load(Ordering::SeqCst) {
                    self.send(
                        turn_id,
                        SessionMessage::Failed(
                            "Provider exited without terminal event".to_string(),
                        ),
                    );
                }
            }
            Ok(Err(error)) => self.send(turn_id, SessionMessage::Failed(error)),
            Err(_) => self.send(
                turn_id,
                SessionMessage::Failed("Provider panicked".to_string()),
            ),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::ProviderProfile;

    use super::*;

    struct AutoOperator {
        decision: Decision,
        confirmations: usize,
        refreshes: usize,
    }

    impl AutoOperator {
        fn new(decision: Decision) -> Self {
            Self {
                decision,
                confirmations: 0,
                refreshes: 0,
            }
        }
    }

    impl Operator for AutoOperator {
        fn confirm(&mut self, _request: &ConfirmationRequest) -> Decision {
            self.confirmations += 1;
            self.decision.clone()
        }

        fn refresh(&mut self, _dispatcher: &StreamDispatcher) {
            self.refreshes += 1;
        }
    }

    struct Silent;

    impl StreamProvider for Silent {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "silent".to_string(),
                model_id: "none".to_string(),
            }
        }

        fn run(
            &self,
            _req: TurnRequest,
            _cancel: CancelSignal,
            _execute_tool: &mut dyn FnMut(ToolCallRef) -> ToolResult,
            emit: &mut dyn FnMut(StreamEvent),
        ) -> Result<(), String> {
            emit(StreamEvent::Content {
                text: "half".to_string(),
            });
            Ok(())
        }
    }

    struct Panicking;

    impl StreamProvider for Panicking {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "panicking".to_string(),
                model_id: "none".to_string(),
            }
        }

        fn run(
            &self,
            _req: TurnRequest,
            _cancel: CancelSignal,
            _execute_tool: &mut dyn FnMut(ToolCallRef) -> ToolResult,
            _emit: &mut dyn FnMut(StreamEvent),
        ) -> Result<(), String> {
            panic!("provider bug");
        }
    }

    fn session_with(provider: impl StreamProvider) -> Session {
        Session::new(
            StreamDispatcher::default(),
            Arc::new(provider),
            ToolRouter::new(),
        )
    }

    fn not_cancelled() -> CancelSignal {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn provider_without_done_fails_the_turn() {
        let mut session = session_with(Silent);
        let mut operator = AutoOperator::new(Decision::confirmed());

        let outcome = session
            .submit("hi", &mut operator, not_cancelled())
            .expect("turn runs");

        assert_eq!(
            outcome,
            TurnOutcome::Failed("Provider exited without terminal event".to_string())
        );
        let entries: Vec<_> = session.dispatcher().history().entries().collect();
        assert_eq!(entries[1].content, "half");
        assert!(!entries[1].is_streaming);
        assert_eq!(
            entries[2].content,
            "Sorry, I encountered an error: Provider exited without terminal event"
        );
        assert!(session.memory().is_empty());
        assert!(operator.refreshes > 0);
    }

    #[test]
    fn provider_panic_is_reported_as_failure() {
        let mut session = session_with(Panicking);
        let mut operator = AutoOperator::new(Decision::confirmed());

        let outcome = session
            .submit("hi", &mut operator, not_cancelled())
            .expect("turn runs");

        assert_eq!(outcome, TurnOutcome::Failed("Provider panicked".to_string()));
        assert!(session.dispatcher().is_done());
    }

    #[test]
    fn raised_cancel_ends_turn_immediately() {
        let mut session = session_with(Silent);
        let mut operator = AutoOperator::new(Decision::confirmed());
        let cancel = Arc::new(AtomicBool::new(true));

        let outcome = session
            .submit("hi", &mut operator, cancel)
            .expect("turn runs");

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(session.dispatcher().failure(), Some("Operation aborted"));
        assert_eq!(operator.confirmations, 0);
    }
}

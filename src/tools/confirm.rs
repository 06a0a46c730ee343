//! Human approval for risky tool operations.
//!
//! The broker blocks the calling tool until the operator answers. Requests
//! leave through a [`ConfirmationPrompt`], which hands a
//! [`PendingConfirmation`] to whatever owns the operator-facing UI.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{CancelSignal, TurnId};

use crate::error::AgentError;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Scope of a session-wide "don't ask again" answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmCategory {
    FileOperations,
    ShellCommands,
}

impl fmt::Display for ConfirmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileOperations => f.write_str("file operations"),
            Self::ShellCommands => f.write_str("shell commands"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub turn_id: TurnId,
    pub category: ConfirmCategory,
    pub operation: String,
    /// Human-readable summary; credentials are already masked.
    pub description: String,
    /// Prompt even when the category was approved for the session.
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Confirmed { dont_ask_again: bool },
    Rejected { feedback: Option<String> },
}

impl Decision {
    pub fn confirmed() -> Self {
        Self::Confirmed {
            dont_ask_again: false,
        }
    }

    pub fn rejected(feedback: Option<String>) -> Self {
        Self::Rejected {
            feedback: feedback.filter(|text| !text.trim().is_empty()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// An outstanding request waiting for exactly one operator decision.
#[derive(Debug)]
pub struct PendingConfirmation {
    request: ConfirmationRequest,
    reply: Sender<Decision>,
}

impl PendingConfirmation {
    pub fn request(&self) -> &ConfirmationRequest {
        &self.request
    }

    pub fn resolve(self, decision: Decision) {
        // The requester may already have given up after an abort.
        let _ = self.reply.send(decision);
    }
}

/// Delivery seam between the broker and the operator-facing UI.
pub trait ConfirmationPrompt: Send + Sync {
    fn submit(&self, pending: PendingConfirmation) -> Result<(), AgentError>;
}

pub struct ConfirmationBroker {
    prompt: Arc<dyn ConfirmationPrompt>,
    approved_categories: Mutex<HashSet<ConfirmCategory>>,
    in_flight: AtomicBool,
}

impl fmt::Debug for ConfirmationBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationBroker")
            .field("approved_categories", &*self.lock_approved())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConfirmationBroker {
    pub fn new(prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        Self {
            prompt,
            approved_categories: Mutex::new(HashSet::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Asks the operator and waits for the answer.
    ///
    /// Returns `Ok(())` on confirmation (or when the category is already
    /// approved for this session), [`AgentError::UserCancellation`] on
    /// rejection, and [`AgentError::Aborted`] when `cancel` fires first.
    pub fn request(
        &self,
        request: ConfirmationRequest,
        cancel: &CancelSignal,
    ) -> Result<(), AgentError> {
        if !request.forced && self.is_approved(request.category) {
            tracing::debug!(category = %request.category, "confirmation skipped for session");
            return Ok(());
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::ConfirmationInFlight);
        }
        let _flight = FlightGuard(&self.in_flight);

        let category = request.category;
        let (reply, decisions) = mpsc::channel();
        tracing::info!(
            operation = %request.operation,
            category = %category,
            forced = request.forced,
            "awaiting operator confirmation"
        );
        self.prompt.submit(PendingConfirmation { request, reply })?;

        let decision = loop {
            match decisions.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(decision) => break decision,
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(AgentError::Aborted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AgentError::UserCancellation {
                        feedback: Some("Confirmation request was dismissed".to_string()),
                    });
                }
            }
        };

        match decision {
            Decision::Confirmed { dont_ask_again } => {
                if dont_ask_again {
                    self.lock_approved().insert(category);
                }
                Ok(())
            }
            Decision::Rejected { feedback } => {
                tracing::warn!(category = %category, "operation rejected by operator");
                Err(AgentError::UserCancellation { feedback })
            }
        }
    }

    pub fn is_approved(&self, category: ConfirmCategory) -> bool {
        self.lock_approved().contains(&category)
    }

    pub fn is_outstanding(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn lock_approved(&self) -> MutexGuard<'_, HashSet<ConfirmCategory>> {
        match self.approved_categories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

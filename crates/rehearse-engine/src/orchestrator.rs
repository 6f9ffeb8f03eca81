//! Ties one workflow run to one ledger session.
//!
//! The session is opened before the state machine starts and closed exactly
//! once on the way out, whether the machine was cancelled, hit its limit or
//! failed. If this future is dropped mid-run the session guard closes it.

use crate::backend::{Backend, BackendError};
use crate::debug::DebugRecorder;
use crate::formatter::status_line;
use crate::ledger::{Ledger, LedgerError, SessionRecord};
use crate::workflow::{CancelToken, StateMachine, WorkflowError, WorkflowSummary};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: WorkflowSummary,
    pub session: SessionRecord,
    /// Whether the user has reached the target after this run.
    pub completed: bool,
}

pub struct Orchestrator {
    ledger: Ledger,
    machine: StateMachine,
    debug: DebugRecorder,
}

impl Orchestrator {
    pub fn new(ledger: Ledger, machine: StateMachine, debug: DebugRecorder) -> Self {
        Self {
            ledger,
            machine: machine.with_debug(debug.clone()),
            debug,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub async fn run(
        &mut self,
        backend: &mut dyn Backend,
        cancel: &CancelToken,
    ) -> Result<RunReport, OrchestratorError> {
        if !backend.is_ready().await {
            info!("Launching backend");
            backend.launch().await?;
        }

        info!("{}: {}", self.ledger.user_id(), status_line(self.ledger.data()));
        if self.ledger.is_complete() {
            info!("Target already reached; practice time keeps accumulating");
        }

        let workflow = self.machine.name().to_string();
        let guard = self.ledger.session(&workflow)?;
        self.debug.dump(backend, "run-start").await;

        let outcome = self.machine.run(backend, cancel).await;
        let session = guard.finish();

        if let Err(e) = backend.close().await {
            warn!("Failed to close backend: {}", e);
        }

        match outcome {
            Ok(summary) => {
                let session = session?;
                Ok(RunReport {
                    summary,
                    session,
                    completed: self.ledger.is_complete(),
                })
            }
            Err(e) => {
                error!("Workflow '{}' stopped: {}", workflow, e);
                if let Err(le) = session {
                    error!("Failed to record session: {}", le);
                }
                Err(e.into())
            }
        }
    }
}

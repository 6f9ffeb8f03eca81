use crate::config::RehearseConfig;
use crate::debug::DebugRecorder;
use crate::executor::ActionExecutor;
use crate::formatter::format_status_table;
use crate::ledger::{self, Ledger, LedgerError};
use crate::orchestrator::Orchestrator;
use crate::pack::{PackLoadError, PackLoader};
use crate::resolution::ResolutionEngine;
use crate::workflow::{CancelToken, StateMachine, WorkflowError, WorkflowOptions};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("No user configured (set `user` in rehearse.yaml, REHEARSE_EMAIL, or --user)")]
    MissingUser,
    #[error("Pack error: {0}")]
    Pack(#[from] PackLoadError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Variables a pack may reference.
pub fn pack_variables(config: &RehearseConfig) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    if let Some(user) = &config.user {
        vars.insert("EMAIL".to_string(), user.trim().to_string());
    }
    if let Some(password) = &config.password {
        vars.insert("PASSWORD".to_string(), password.clone());
    }
    vars.insert("LESSON".to_string(), config.lesson.clone());
    vars
}

/// Load the pack, build the state machine and open the user's ledger.
pub async fn prepare_run(
    config: &RehearseConfig,
    max_iterations: Option<u64>,
) -> Result<Orchestrator, PrepareError> {
    let user = config
        .user
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or(PrepareError::MissingUser)?;

    let pack = match &config.pack {
        Some(path) => PackLoader::load_from(path).await?,
        None => PackLoader::builtin_for(config.mode)?,
    };
    let definition = PackLoader::build(&pack, &pack_variables(config))?;
    info!(
        "Pack '{}': {} setup steps, {} cycle steps, {} completion signals, {} items",
        definition.name,
        definition.setup.len(),
        definition.cycle.len(),
        definition.completion.len(),
        definition.rotation.as_ref().map_or(0, |r| r.items.len())
    );

    let workflow = &config.workflow;
    let executor = ActionExecutor::new(
        ResolutionEngine::with_tick(Duration::from_millis(workflow.resolution_tick_ms)),
        Duration::from_millis(workflow.action_timeout_ms),
    )
    .with_navigation_timeout(Duration::from_millis(workflow.navigation_timeout_ms));
    let options = WorkflowOptions {
        max_steps_per_cycle: workflow.max_steps_per_cycle,
        max_consecutive_failures: workflow.max_consecutive_failures,
        max_iterations,
    };
    let machine = StateMachine::new(definition, options, executor)?;
    let ledger = Ledger::open(&config.data_dir, user, config.target_seconds())?;
    let debug = DebugRecorder::new(config.debug.dir.clone(), config.debug.enabled);

    Ok(Orchestrator::new(ledger, machine, debug))
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub fn spawn_interrupt_listener(token: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_interrupt().await;
        info!("Interrupt received, stopping after the current step");
        token.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Print every user's progress. Never fails; an unreadable store lists nobody.
pub fn print_status(data_dir: &Path, output: OutputHandlers) {
    let store = ledger::LedgerStore::in_dir(data_dir);
    if !store.path().exists() {
        (output.err)(&format!("No ledger found at {}", store.path().display()));
    }
    let users = store.list_users();
    (output.out)(&format_status_table(&users));
}

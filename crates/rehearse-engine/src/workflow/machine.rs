//! The repeating act, observe, recover loop.
//!
//! ```text
//! Idle -> Setup -> Running -> Completing -> Restarting -> Running
//!                     |            |
//!                     |            +-> Failing -> Running | Stopped
//!                     +-> Running (budget spent, new pass)
//! ```
//!
//! Completion is only evaluated between steps, so once it is signalled no
//! further cycle step runs before the recovery step.
//!
//! With an [`ItemRotation`] the machine visits items (stories, chapters) in
//! turn. An item is entered, cycled until it completes or runs out of passes,
//! then left through the recovery step. Items whose entry fails are skipped;
//! a round in which no item can be entered counts as a failed recovery.

use super::cancel::CancelToken;
use super::state::{CycleState, StopReason, WorkflowOptions, WorkflowState, WorkflowSummary};
use super::step::Step;
use crate::backend::Backend;
use crate::debug::DebugRecorder;
use crate::executor::ActionExecutor;
use rehearse_common::protocol::{ActionResult, Target};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Setup step '{step}' failed: {reason}")]
    SetupFailed { step: String, reason: String },
    #[error("Workflow exhausted after {failures} consecutive recovery failures")]
    WorkflowExhausted { failures: u32 },
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

/// Steps, signals and recovery for one workflow. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub setup: Vec<Step>,
    pub cycle: Vec<Step>,
    /// Any of these being present means the cycle is complete.
    pub completion: Vec<Target>,
    pub recovery: Step,
    pub rotation: Option<ItemRotation>,
}

/// Items visited one after another, wrapping after the last.
#[derive(Debug, Clone)]
pub struct ItemRotation {
    pub items: Vec<WorkItem>,
    /// Passes an item gets before it is left incomplete. A pass runs the
    /// cycle list once.
    pub passes_per_item: u32,
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub name: String,
    /// Opens the item. A failed required step skips it.
    pub enter: Vec<Step>,
}

impl WorkflowDefinition {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow name is empty".into(),
            ));
        }
        if self.cycle.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' has no cycle steps",
                self.name
            )));
        }
        if let Some(rotation) = &self.rotation {
            if rotation.items.is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow '{}' rotates over no items",
                    self.name
                )));
            }
            if rotation.passes_per_item == 0 {
                return Err(WorkflowError::InvalidDefinition(
                    "passes_per_item must be at least 1".into(),
                ));
            }
            if let Some(item) = rotation.items.iter().find(|i| i.enter.is_empty()) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "item '{}' has no entry steps",
                    item.name
                )));
            }
        }
        Ok(())
    }
}

enum PassOutcome {
    Completed,
    BudgetSpent,
    Cancelled,
}

enum EnterOutcome {
    Entered,
    NoneAvailable,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
struct ItemCursor {
    next: usize,
    current: Option<usize>,
    passes: u32,
}

pub struct StateMachine {
    definition: WorkflowDefinition,
    options: WorkflowOptions,
    executor: ActionExecutor,
    debug: Option<DebugRecorder>,
    state: WorkflowState,
    cycle: CycleState,
    history: Vec<WorkflowState>,
    cursor: ItemCursor,
    recoveries: u64,
    items_entered: u64,
    steps_executed: u64,
    step_failures: u64,
}

impl StateMachine {
    pub fn new(
        definition: WorkflowDefinition,
        options: WorkflowOptions,
        executor: ActionExecutor,
    ) -> Result<Self, WorkflowError> {
        definition.validate()?;
        if options.max_steps_per_cycle == 0 {
            return Err(WorkflowError::InvalidDefinition(
                "max_steps_per_cycle must be at least 1".into(),
            ));
        }

        Ok(Self {
            definition,
            options,
            executor,
            debug: None,
            state: WorkflowState::Idle,
            cycle: CycleState::default(),
            history: vec![WorkflowState::Idle],
            cursor: ItemCursor::default(),
            recoveries: 0,
            items_entered: 0,
            steps_executed: 0,
            step_failures: 0,
        })
    }

    /// Capture screenshots when setup or recovery fails.
    pub fn with_debug(mut self, recorder: DebugRecorder) -> Self {
        self.debug = Some(recorder);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn cycle_state(&self) -> &CycleState {
        &self.cycle
    }

    /// The item being worked on, when the workflow rotates over items.
    pub fn current_item(&self) -> Option<&str> {
        let rotation = self.definition.rotation.as_ref()?;
        self.cursor
            .current
            .map(|index| rotation.items[index].name.as_str())
    }

    /// Every state entered during the last run, in order.
    pub fn history(&self) -> &[WorkflowState] {
        &self.history
    }

    /// Drive the workflow until it is cancelled, hits its iteration limit, or fails.
    pub async fn run(
        &mut self,
        backend: &mut dyn Backend,
        cancel: &CancelToken,
    ) -> Result<WorkflowSummary, WorkflowError> {
        self.reset();
        info!("Workflow '{}' starting", self.definition.name);

        self.transition(WorkflowState::Setup);
        if !self.run_setup(backend, cancel).await? {
            return Ok(self.stop(StopReason::Cancelled));
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(self.stop(StopReason::Cancelled));
            }
            if let Some(max) = self.options.max_iterations
                && self.cycle.iteration >= max
            {
                return Ok(self.stop(StopReason::IterationLimit));
            }

            if self.definition.rotation.is_some() && self.cursor.current.is_none() {
                match self.enter_next_item(backend, cancel).await {
                    EnterOutcome::Entered => {}
                    EnterOutcome::Cancelled => return Ok(self.stop(StopReason::Cancelled)),
                    EnterOutcome::NoneAvailable => {
                        self.fail(backend, "no item could be entered").await?;
                        continue;
                    }
                }
            }

            self.transition(WorkflowState::Running);
            self.cycle.iteration += 1;
            self.cycle.last_completion_check = false;
            debug!("Running pass {}", self.cycle.iteration);

            match self.running_pass(backend, cancel).await {
                PassOutcome::Cancelled => return Ok(self.stop(StopReason::Cancelled)),
                PassOutcome::BudgetSpent => {
                    debug!(
                        "Pass {} spent its step budget without completion",
                        self.cycle.iteration
                    );
                    if self.item_out_of_passes() {
                        if cancel.is_cancelled() {
                            return Ok(self.stop(StopReason::Cancelled));
                        }
                        self.complete(backend).await?;
                    }
                }
                PassOutcome::Completed => {
                    if cancel.is_cancelled() {
                        return Ok(self.stop(StopReason::Cancelled));
                    }
                    self.complete(backend).await?;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = WorkflowState::Idle;
        self.cycle = CycleState::default();
        self.history = vec![WorkflowState::Idle];
        self.cursor = ItemCursor::default();
        self.recoveries = 0;
        self.items_entered = 0;
        self.steps_executed = 0;
        self.step_failures = 0;
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn stop(&mut self, reason: StopReason) -> WorkflowSummary {
        self.transition(WorkflowState::Stopped);
        info!(
            "Workflow '{}' stopped ({}) after {} passes, {} recoveries",
            self.definition.name, reason, self.cycle.iteration, self.recoveries
        );
        WorkflowSummary {
            workflow: self.definition.name.clone(),
            iterations: self.cycle.iteration,
            recoveries: self.recoveries,
            items_entered: self.items_entered,
            steps_executed: self.steps_executed,
            step_failures: self.step_failures,
            stop_reason: reason,
        }
    }

    /// Returns `Ok(false)` when cancelled part-way.
    async fn run_setup(
        &mut self,
        backend: &mut dyn Backend,
        cancel: &CancelToken,
    ) -> Result<bool, WorkflowError> {
        let steps = self.definition.setup.clone();
        for step in &steps {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let result = self.execute(step, backend).await;
            if !result.ok {
                if step.optional {
                    debug!("Optional setup step '{}' skipped: {}", step.name, result);
                } else {
                    error!("Setup step '{}' failed: {}", step.name, result);
                    self.dump(backend, &format!("setup-{}", step.name)).await;
                    self.transition(WorkflowState::Stopped);
                    return Err(WorkflowError::SetupFailed {
                        step: step.name.clone(),
                        reason: result.detail.clone().unwrap_or_else(|| result.to_string()),
                    });
                }
            }

            if settle(step.settle, cancel).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Enter the next item that opens, starting after the last one tried.
    async fn enter_next_item(
        &mut self,
        backend: &mut dyn Backend,
        cancel: &CancelToken,
    ) -> EnterOutcome {
        let Some(rotation) = self.definition.rotation.clone() else {
            return EnterOutcome::Entered;
        };

        for _ in 0..rotation.items.len() {
            let index = self.cursor.next;
            self.cursor.next = (index + 1) % rotation.items.len();
            let item = &rotation.items[index];

            match self.run_entry(item, backend, cancel).await {
                None => return EnterOutcome::Cancelled,
                Some(false) => continue,
                Some(true) => {
                    self.cursor.current = Some(index);
                    self.cursor.passes = 0;
                    self.items_entered += 1;
                    info!(
                        "Entered item '{}' ({}/{})",
                        item.name,
                        index + 1,
                        rotation.items.len()
                    );
                    return EnterOutcome::Entered;
                }
            }
        }

        warn!("None of the {} items could be entered", rotation.items.len());
        EnterOutcome::NoneAvailable
    }

    /// `Some(true)` once every required entry step passed, `None` if cancelled.
    async fn run_entry(
        &mut self,
        item: &WorkItem,
        backend: &mut dyn Backend,
        cancel: &CancelToken,
    ) -> Option<bool> {
        for (position, step) in item.enter.iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }

            let result = self.execute(step, backend).await;
            if !result.ok && !step.optional {
                debug!("Skipping item '{}': '{}' failed: {}", item.name, step.name, result);
                if position > 0 {
                    // partly inside the item; go back to the listing
                    let recovery = self.definition.recovery.clone();
                    self.execute(&recovery, backend).await;
                }
                return Some(false);
            }

            if settle(step.settle, cancel).await {
                return None;
            }
        }
        Some(true)
    }

    /// Count a spent pass against the current item. True when it has none left.
    fn item_out_of_passes(&mut self) -> bool {
        let Some(rotation) = &self.definition.rotation else {
            return false;
        };
        let Some(index) = self.cursor.current else {
            return false;
        };

        self.cursor.passes += 1;
        if self.cursor.passes < rotation.passes_per_item {
            return false;
        }
        info!(
            "Item '{}' not completed after {} passes, moving on",
            rotation.items[index].name, self.cursor.passes
        );
        true
    }

    fn pass_budget(&self) -> usize {
        match &self.definition.rotation {
            Some(_) => self
                .options
                .max_steps_per_cycle
                .min(self.definition.cycle.len()),
            None => self.options.max_steps_per_cycle,
        }
    }

    async fn running_pass(&mut self, backend: &mut dyn Backend, cancel: &CancelToken) -> PassOutcome {
        let cycle = self.definition.cycle.clone();
        for invocation in 0..self.pass_budget() {
            if cancel.is_cancelled() {
                return PassOutcome::Cancelled;
            }

            let step = &cycle[invocation % cycle.len()];
            let result = self.execute(step, backend).await;
            if !result.ok && !step.optional {
                debug!("Cycle step '{}' failed: {}", step.name, result);
            }

            if settle(step.settle, cancel).await {
                return PassOutcome::Cancelled;
            }

            if self.completion_signaled(step, backend).await {
                self.cycle.last_completion_check = true;
                info!(
                    "Completion detected after '{}' in pass {}",
                    step.name, self.cycle.iteration
                );
                return PassOutcome::Completed;
            }
        }
        PassOutcome::BudgetSpent
    }

    async fn complete(&mut self, backend: &mut dyn Backend) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Completing);
        let recovery = self.definition.recovery.clone();
        let result = self.execute(&recovery, backend).await;
        // done with the item whatever the recovery did
        self.cursor.current = None;

        if result.ok {
            self.recoveries += 1;
            self.cycle.consecutive_failures = 0;
            self.transition(WorkflowState::Restarting);
            info!("Recovery '{}' succeeded, restarting cycle", recovery.name);
            return Ok(());
        }

        self.fail(backend, &format!("recovery '{}': {}", recovery.name, result))
            .await
    }

    /// Count a failed recovery; `WorkflowExhausted` once past the limit.
    async fn fail(&mut self, backend: &mut dyn Backend, what: &str) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Failing);
        self.cycle.consecutive_failures += 1;
        warn!(
            "Failed ({}/{}): {}",
            self.cycle.consecutive_failures, self.options.max_consecutive_failures, what
        );
        self.dump(backend, "recovery-failed").await;

        if self.cycle.consecutive_failures > self.options.max_consecutive_failures {
            error!(
                "Giving up on '{}' after {} failed recoveries",
                self.definition.name, self.cycle.consecutive_failures
            );
            self.transition(WorkflowState::Stopped);
            return Err(WorkflowError::WorkflowExhausted {
                failures: self.cycle.consecutive_failures,
            });
        }
        Ok(())
    }

    async fn execute(&mut self, step: &Step, backend: &mut dyn Backend) -> ActionResult {
        debug!("Step '{}': {}", step.name, step.action.describe());
        let result = step.action.run(backend, &self.executor).await;
        self.steps_executed += 1;
        if !result.ok && !step.optional {
            self.step_failures += 1;
        }
        result
    }

    /// The step's own terminal check, then the workflow's signals. A check
    /// that cannot be evaluated counts as "not complete".
    async fn completion_signaled(&self, step: &Step, backend: &mut dyn Backend) -> bool {
        if let Some(check) = &step.terminal_check
            && self.executor.is_present(&*backend, check).await
        {
            return true;
        }
        self.executor
            .any_present(&*backend, &self.definition.completion)
            .await
    }

    async fn dump(&self, backend: &mut dyn Backend, tag: &str) {
        if let Some(recorder) = &self.debug {
            recorder.dump(backend, tag).await;
        }
    }
}

/// Pause between steps. Returns true when cancelled during the pause.
async fn settle(duration: Duration, cancel: &CancelToken) -> bool {
    if duration.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

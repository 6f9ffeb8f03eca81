use crate::backend::Backend;
use crate::executor::ActionExecutor;
use async_trait::async_trait;
use rehearse_common::protocol::{ActionKind, ActionResult, Target};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a step does when it runs. Implementations never return `Err`; every
/// outcome is an [`ActionResult`].
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult;

    fn describe(&self) -> String;
}

pub type ActionRef = Arc<dyn StepAction>;

/// Resolve a target and act on it, optionally requiring a post-condition.
pub struct Perform {
    pub target: Target,
    pub action: ActionKind,
    pub post: Option<Target>,
}

impl Perform {
    pub fn new(target: Target, action: ActionKind) -> Self {
        Self {
            target,
            action,
            post: None,
        }
    }

    pub fn click(target: Target) -> Self {
        Self::new(target, ActionKind::Click)
    }

    pub fn then_wait_for(mut self, post: Target) -> Self {
        self.post = Some(post);
        self
    }
}

#[async_trait]
impl StepAction for Perform {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        match &self.post {
            Some(post) => {
                executor
                    .perform_and_wait(&*backend, &self.target, &self.action, post)
                    .await
            }
            None => executor.perform(&*backend, &self.target, &self.action).await,
        }
    }

    fn describe(&self) -> String {
        format!("{} {}", self.action.verb(), self.target.name)
    }
}

pub struct Navigate {
    pub url: String,
}

#[async_trait]
impl StepAction for Navigate {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        let limit = executor.navigation_timeout();
        match tokio::time::timeout(limit, backend.navigate(&self.url)).await {
            Ok(Ok(nav)) => {
                debug!("Navigated to {} ({})", nav.url, nav.title);
                ActionResult::success()
            }
            Ok(Err(e)) => ActionResult::failed(format!("navigate to {}: {}", self.url, e)),
            Err(_) => {
                warn!("Navigation to {} timed out after {:?}", self.url, limit);
                ActionResult::failed(format!("navigate to {}: timed out after {:?}", self.url, limit))
            }
        }
    }

    fn describe(&self) -> String {
        format!("navigate {}", self.url)
    }
}

pub struct Reload;

#[async_trait]
impl StepAction for Reload {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        let limit = executor.navigation_timeout();
        match tokio::time::timeout(limit, backend.refresh()).await {
            Ok(Ok(_)) => ActionResult::success(),
            Ok(Err(e)) => ActionResult::failed(format!("reload: {}", e)),
            Err(_) => {
                warn!("Reload timed out after {:?}", limit);
                ActionResult::failed(format!("reload: timed out after {:?}", limit))
            }
        }
    }

    fn describe(&self) -> String {
        "reload".to_string()
    }
}

/// Succeeds when the target is currently present. Acts on nothing.
pub struct Expect {
    pub target: Target,
}

#[async_trait]
impl StepAction for Expect {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        if executor.is_present(&*backend, &self.target).await {
            ActionResult::success()
        } else {
            ActionResult::not_found(format!("'{}' not present", self.target.name))
        }
    }

    fn describe(&self) -> String {
        format!("expect {}", self.target.name)
    }
}

/// Try alternatives in order; the first success wins.
pub struct FirstSuccess(pub Vec<ActionRef>);

#[async_trait]
impl StepAction for FirstSuccess {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        let mut last = ActionResult::failed("no alternatives");
        for alternative in &self.0 {
            let result = alternative.run(&mut *backend, executor).await;
            if result.ok {
                return result;
            }
            debug!("Alternative '{}' failed: {}", alternative.describe(), result);
            last = result;
        }
        last
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|a| a.describe()).collect();
        format!("first of [{}]", parts.join(" | "))
    }
}

/// Run every action in order; stop at the first failure.
pub struct Sequence(pub Vec<ActionRef>);

#[async_trait]
impl StepAction for Sequence {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        for action in &self.0 {
            let result = action.run(&mut *backend, executor).await;
            if !result.ok {
                return result;
            }
        }
        ActionResult::success()
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|a| a.describe()).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Run the inner action and report success regardless of its outcome.
pub struct Attempt(pub ActionRef);

#[async_trait]
impl StepAction for Attempt {
    async fn run(&self, backend: &mut dyn Backend, executor: &ActionExecutor) -> ActionResult {
        let result = self.0.run(backend, executor).await;
        if !result.ok {
            debug!("Ignoring failure of '{}': {}", self.0.describe(), result);
        }
        ActionResult::success()
    }

    fn describe(&self) -> String {
        format!("try {}", self.0.describe())
    }
}

/// A named unit of setup, cycle or recovery. Immutable once built.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub action: ActionRef,
    pub terminal_check: Option<Target>,
    pub settle: Duration,
    pub optional: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self::from_ref(name, Arc::new(action))
    }

    pub fn from_ref(name: impl Into<String>, action: ActionRef) -> Self {
        Self {
            name: name.into(),
            action,
            terminal_check: None,
            settle: Duration::ZERO,
            optional: false,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_terminal_check(mut self, target: Target) -> Self {
        self.terminal_check = Some(target);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("action", &self.action.describe())
            .field("terminal_check", &self.terminal_check.as_ref().map(|t| &t.name))
            .field("settle", &self.settle)
            .field("optional", &self.optional)
            .finish()
    }
}

//! Action executor: resolve, act, report.
//!
//! This is the one place where "the DOM changed under us" is absorbed. Every
//! call returns an [`ActionResult`]; nothing here returns `Err` or panics on a
//! misbehaving page.

use crate::backend::Backend;
use crate::formatter::mask_sensitive;
use crate::resolution::{Resolution, ResolutionEngine, ResolvedElement};
use rehearse_common::protocol::{ActionKind, ActionResult, Target};
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single click/fill/press.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a navigation or reload.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ActionExecutor {
    resolver: ResolutionEngine,
    action_timeout: Duration,
    navigation_timeout: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(ResolutionEngine::new(), DEFAULT_ACTION_TIMEOUT)
    }
}

impl ActionExecutor {
    pub fn new(resolver: ResolutionEngine, action_timeout: Duration) -> Self {
        Self {
            resolver,
            action_timeout,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    pub fn resolver(&self) -> &ResolutionEngine {
        &self.resolver
    }

    /// Resolve `target` and apply `action` to it.
    pub async fn perform<B: Backend + ?Sized>(
        &self,
        backend: &B,
        target: &Target,
        action: &ActionKind,
    ) -> ActionResult {
        let element = match self.resolver.resolve(backend, &target.strategies).await {
            Resolution::Found(element) => element,
            Resolution::NotFound {
                strategies_tried,
                contexts_tried,
            } => {
                debug!(
                    "{} '{}': not found ({} strategies, {} probes)",
                    action.verb(),
                    target.name,
                    strategies_tried,
                    contexts_tried
                );
                return ActionResult::not_found(format!(
                    "'{}' not found after {} strategies across {} context probes",
                    target.name, strategies_tried, contexts_tried
                ));
            }
        };

        self.apply(&element, target, action).await
    }

    /// Like [`perform`](Self::perform), then require `post` to become visible.
    pub async fn perform_and_wait<B: Backend + ?Sized>(
        &self,
        backend: &B,
        target: &Target,
        action: &ActionKind,
        post: &Target,
    ) -> ActionResult {
        let result = self.perform(backend, target, action).await;
        if !result.ok {
            return result;
        }

        if self.is_present(backend, post).await {
            result
        } else {
            ActionResult::failed(format!(
                "'{}' did not appear after {} '{}'",
                post.name,
                action.verb(),
                target.name
            ))
        }
    }

    /// True when any strategy of `target` currently resolves to a visible element.
    pub async fn is_present<B: Backend + ?Sized>(&self, backend: &B, target: &Target) -> bool {
        self.resolver
            .resolve(backend, &target.strategies)
            .await
            .is_found()
    }

    /// OR-combination of several presence checks, in order.
    pub async fn any_present<B: Backend + ?Sized>(&self, backend: &B, targets: &[Target]) -> bool {
        for target in targets {
            if self.is_present(backend, target).await {
                debug!("Signal '{}' present", target.name);
                return true;
            }
        }
        false
    }

    async fn apply(
        &self,
        element: &ResolvedElement,
        target: &Target,
        action: &ActionKind,
    ) -> ActionResult {
        let context = &element.context;
        let handle = &element.handle;

        let outcome = match action {
            ActionKind::Click => {
                tokio::time::timeout(self.action_timeout, context.click(handle)).await
            }
            ActionKind::Fill(text) => {
                debug!(
                    "Filling '{}' with {}",
                    target.name,
                    mask_sensitive(text, &target.name, &[])
                );
                tokio::time::timeout(self.action_timeout, context.fill(handle, text)).await
            }
            ActionKind::Press(key) => {
                tokio::time::timeout(self.action_timeout, context.press(handle, key)).await
            }
        };

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    "{} '{}' in {} succeeded",
                    action.verb(),
                    target.name,
                    context.label()
                );
                ActionResult::success()
            }
            Ok(Err(e)) => {
                warn!("{} '{}' failed: {}", action.verb(), target.name, e);
                ActionResult::failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    "{} '{}' timed out after {:?}",
                    action.verb(),
                    target.name,
                    self.action_timeout
                );
                ActionResult::failed(format!("timed out after {:?}", self.action_timeout))
            }
        }
    }
}

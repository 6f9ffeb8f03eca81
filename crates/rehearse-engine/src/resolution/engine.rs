//! Frame-aware fallback resolution.
//!
//! Strategies are tried strictly in order. For each strategy the top-level
//! document is probed first with the strategy's full budget, then every
//! attached frame in attachment order with half of it. The first visible match
//! wins. A context that errors while being probed (detached frame, cross-origin
//! document, navigation in flight) is a non-match for that context only.

use super::result::{Resolution, ResolvedElement};
use crate::backend::{Backend, BackendError, ContextRef};
use rehearse_common::protocol::{ElementHandle, Scope, Selector, Strategy};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Polling interval while waiting for an element, and the minimum frame budget.
pub const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    tick: Duration,
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionEngine {
    pub fn new() -> Self {
        Self { tick: TICK }
    }

    pub fn with_tick(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Budget for probing one frame, derived from the document budget.
    pub fn frame_timeout(&self, document_timeout: Duration) -> Duration {
        (document_timeout / 2).max(self.tick)
    }

    /// Return the first visible match for `strategies`, or `NotFound`.
    pub async fn resolve<B: Backend + ?Sized>(
        &self,
        backend: &B,
        strategies: &[Strategy],
    ) -> Resolution {
        let mut contexts_tried = 0;

        let document = match backend.document() {
            Ok(document) => Some(document),
            Err(e) => {
                debug!("Document context unavailable: {}", e);
                None
            }
        };

        for (index, strategy) in strategies.iter().enumerate() {
            if let Some(document) = &document {
                contexts_tried += 1;
                if let Some(handle) = self
                    .probe_isolated(document, &strategy.selector, strategy.timeout)
                    .await
                {
                    return Self::found(document, handle, index);
                }
            }

            if strategy.scope == Scope::DocumentOnly {
                continue;
            }

            // Frames come and go while we search, so re-read them per strategy.
            let frames = match backend.frames().await {
                Ok(frames) => frames,
                Err(e) => {
                    debug!("Could not list frames for {}: {}", strategy.selector, e);
                    Vec::new()
                }
            };

            let budget = self.frame_timeout(strategy.timeout);
            for frame in &frames {
                contexts_tried += 1;
                if let Some(handle) = self.probe_isolated(frame, &strategy.selector, budget).await {
                    return Self::found(frame, handle, index);
                }
            }
        }

        Resolution::NotFound {
            strategies_tried: strategies.len(),
            contexts_tried,
        }
    }

    fn found(context: &ContextRef, handle: ElementHandle, strategy_index: usize) -> Resolution {
        debug!(
            "Resolved element {:?} in {} (strategy #{})",
            handle,
            context.label(),
            strategy_index
        );
        Resolution::Found(ResolvedElement {
            context: context.clone(),
            handle,
            strategy_index,
        })
    }

    /// Probe one context, converting every failure into a non-match.
    async fn probe_isolated(
        &self,
        context: &ContextRef,
        selector: &Selector,
        budget: Duration,
    ) -> Option<ElementHandle> {
        // A hung backend call must not stall the search past the budget.
        let hard_limit = budget + self.tick;
        match tokio::time::timeout(hard_limit, self.probe(context, selector, budget)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                debug!("Probe of {} in {} failed: {}", selector, context.label(), e);
                None
            }
            Err(_) => {
                debug!("Probe of {} in {} timed out", selector, context.label());
                None
            }
        }
    }

    /// Poll `locate` + `wait_visible` until the budget elapses. Always makes at
    /// least one attempt, even with a zero budget.
    async fn probe(
        &self,
        context: &ContextRef,
        selector: &Selector,
        budget: Duration,
    ) -> Result<Option<ElementHandle>, BackendError> {
        let deadline = Instant::now() + budget;
        loop {
            if let Some(handle) = context.locate(selector).await? {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if context.wait_visible(&handle, remaining).await? {
                    return Ok(Some(handle));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.tick.min(deadline - now)).await;
        }
    }
}

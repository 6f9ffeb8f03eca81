use crate::backend::ContextRef;
use rehearse_common::protocol::ElementHandle;
use std::fmt;

/// A visible element, together with the context it lives in.
#[derive(Clone)]
pub struct ResolvedElement {
    pub context: ContextRef,
    pub handle: ElementHandle,
    /// Index of the strategy that produced the match.
    pub strategy_index: usize,
}

impl fmt::Debug for ResolvedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedElement")
            .field("context", &self.context.label())
            .field("handle", &self.handle)
            .field("strategy_index", &self.strategy_index)
            .finish()
    }
}

/// Result of a resolution attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(ResolvedElement),

    /// Every strategy was exhausted across every context.
    NotFound {
        strategies_tried: usize,
        contexts_tried: usize,
    },
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn found(self) -> Option<ResolvedElement> {
        match self {
            Resolution::Found(element) => Some(element),
            Resolution::NotFound { .. } => None,
        }
    }
}

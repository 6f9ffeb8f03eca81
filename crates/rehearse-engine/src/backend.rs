use async_trait::async_trait;
pub use rehearse_common::error::backend_error::BackendError;
use rehearse_common::protocol::{ElementHandle, Selector};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16, // generic status code (e.g. 200)
}

/// A searchable surface: the top-level document or one nested frame.
///
/// Handles are only meaningful inside the context that produced them.
#[async_trait]
pub trait ElementContext: Send + Sync {
    /// Human readable name used in logs ("document", "frame[0]", ...).
    fn label(&self) -> String;

    /// Look up the selector right now. Zero or one handle, no waiting.
    async fn locate(&self, selector: &Selector) -> Result<Option<ElementHandle>, BackendError>;

    /// Wait up to `timeout` for the element to become visible.
    async fn wait_visible(
        &self,
        handle: &ElementHandle,
        timeout: Duration,
    ) -> Result<bool, BackendError>;

    async fn click(&self, handle: &ElementHandle) -> Result<(), BackendError>;

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), BackendError>;

    async fn press(&self, handle: &ElementHandle, key: &str) -> Result<(), BackendError>;
}

/// Shared reference to a context, as handed out by a backend.
pub type ContextRef = Arc<dyn ElementContext>;

/// The Backend trait is the browser-driving primitive the engine consumes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Launch the backend (start browser, connect to remote, etc.)
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the backend and cleanup resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Check if the backend is ready to accept commands.
    async fn is_ready(&self) -> bool;

    /// Navigate to a specific URL.
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError>;

    /// Refresh the current page.
    async fn refresh(&mut self) -> Result<NavigationResult, BackendError> {
        Err(BackendError::NotSupported("refresh".into()))
    }

    /// Capture a screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::NotSupported("screenshot".into()))
    }

    /// The top-level document.
    fn document(&self) -> Result<ContextRef, BackendError>;

    /// Every currently attached frame, in attachment order.
    async fn frames(&self) -> Result<Vec<ContextRef>, BackendError>;
}

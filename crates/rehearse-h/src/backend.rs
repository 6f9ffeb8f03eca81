use crate::cdp::{CdpClient, LaunchOptions};
use crate::dom;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use rehearse_engine::backend::{Backend, BackendError, ContextRef, ElementContext, NavigationResult};
use rehearse_engine::protocol::{ElementHandle, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Interval between visibility checks while waiting on an element.
const VISIBILITY_POLL: Duration = Duration::from_millis(50);

pub struct HeadlessBackend {
    client: Option<CdpClient>,
    options: LaunchOptions,
}

impl HeadlessBackend {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            client: None,
            options,
        }
    }

    fn page(&self) -> Result<&Page, BackendError> {
        self.client
            .as_ref()
            .map(|client| &client.page)
            .ok_or(BackendError::NotReady)
    }

    async fn get_navigation_result(page: &Page) -> Result<NavigationResult, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult {
            url,
            title,
            status: 200,
        })
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(LaunchOptions::default())
    }
}

#[async_trait]
impl Backend for HeadlessBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching Headless Backend (Chromium)...");
        let client = CdpClient::launch(&self.options)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let page = self.page()?;

        info!("Navigating to: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;

        Self::get_navigation_result(page).await
    }

    async fn refresh(&mut self) -> Result<NavigationResult, BackendError> {
        let page = self.page()?;
        page.reload()
            .await
            .map_err(|e| BackendError::Navigation(format!("refresh failed: {}", e)))?;
        Self::get_navigation_result(page).await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let page = self.page()?;
        let bytes = page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| BackendError::Other(format!("Screenshot failed: {}", e)))?;

        Ok(bytes)
    }

    fn document(&self) -> Result<ContextRef, BackendError> {
        let page = self.page()?.clone();
        Ok(Arc::new(CdpContext::new(page, Vec::new(), "document")))
    }

    async fn frames(&self) -> Result<Vec<ContextRef>, BackendError> {
        let page = self.page()?;
        let paths = dom::frame_paths(page).await?;
        Ok(paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                Arc::new(CdpContext::new(page.clone(), path, format!("frame[{}]", i))) as ContextRef
            })
            .collect())
    }
}

/// One document of the page, addressed by its iframe index path from the top.
pub struct CdpContext {
    page: Page,
    path: Vec<usize>,
    label: String,
}

impl CdpContext {
    fn new(page: Page, path: Vec<usize>, label: impl Into<String>) -> Self {
        Self {
            page,
            path,
            label: label.into(),
        }
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }
}

#[async_trait]
impl ElementContext for CdpContext {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn locate(&self, selector: &Selector) -> Result<Option<ElementHandle>, BackendError> {
        let id = dom::locate(&self.page, &self.path, selector).await?;
        Ok(id.map(ElementHandle::new))
    }

    async fn wait_visible(
        &self,
        handle: &ElementHandle,
        timeout: Duration,
    ) -> Result<bool, BackendError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if dom::is_visible(&self.page, &self.path, handle.id()).await? {
                return Ok(true);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(VISIBILITY_POLL.min(deadline - now)).await;
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), BackendError> {
        dom::click(&self.page, &self.path, handle.id()).await
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), BackendError> {
        dom::fill(&self.page, &self.path, handle.id(), text).await
    }

    async fn press(&self, handle: &ElementHandle, key: &str) -> Result<(), BackendError> {
        dom::focus(&self.page, &self.path, handle.id()).await?;

        // Key events go to whichever element holds focus, frames included.
        let text = key_text(key);
        let mut key_down = DispatchKeyEventParams::builder()
            .r#type(if text.is_some() {
                DispatchKeyEventType::KeyDown
            } else {
                DispatchKeyEventType::RawKeyDown
            })
            .key(key);
        if let Some(text) = &text {
            key_down = key_down.text(text.clone());
        }
        if let Some(code) = virtual_key_code(key) {
            key_down = key_down.windows_virtual_key_code(code);
        }
        let key_down = key_down
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to build key event: {:?}", e)))?;

        self.page
            .execute(key_down)
            .await
            .map_err(|e| BackendError::Other(format!("press down failed: {}", e)))?;

        let mut key_up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key);
        if let Some(code) = virtual_key_code(key) {
            key_up = key_up.windows_virtual_key_code(code);
        }
        let key_up = key_up
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to build key event: {:?}", e)))?;

        self.page
            .execute(key_up)
            .await
            .map_err(|e| BackendError::Other(format!("press up failed: {}", e)))?;

        Ok(())
    }
}

/// Text a key inserts, if any. Enter must carry "\r" to submit forms.
fn key_text(key: &str) -> Option<String> {
    match key {
        "Enter" => Some("\r".to_string()),
        "Tab" => None,
        k if k.chars().count() == 1 => Some(k.to_string()),
        _ => None,
    }
}

fn virtual_key_code(key: &str) -> Option<i64> {
    match key {
        "Enter" => Some(13),
        "Tab" => Some(9),
        "Escape" => Some(27),
        "Backspace" => Some(8),
        "Space" | " " => Some(32),
        "ArrowLeft" => Some(37),
        "ArrowUp" => Some(38),
        "ArrowRight" => Some(39),
        "ArrowDown" => Some(40),
        _ => None,
    }
}

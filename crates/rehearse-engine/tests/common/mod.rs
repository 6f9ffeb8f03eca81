#![allow(dead_code)]

use async_trait::async_trait;
use rehearse_engine::backend::{Backend, BackendError, ContextRef, ElementContext, NavigationResult};
use rehearse_engine::protocol::{ElementHandle, Selector};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of everything that happened, shared by a backend and its contexts.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct MockElement {
    selector: Selector,
    id: u64,
    visible: bool,
}

/// What a click on an element does to the page.
#[derive(Clone)]
enum Effect {
    Show(Selector),
    Hide(Selector),
}

pub struct MockContext {
    label: String,
    elements: Mutex<Vec<MockElement>>,
    effects: Mutex<Vec<(Selector, Effect)>>,
    broken: AtomicBool,
    hang: AtomicBool,
    fail_actions: AtomicBool,
    probes: AtomicUsize,
    events: EventLog,
}

impl MockContext {
    pub fn new(label: &str, events: EventLog) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            elements: Mutex::new(Vec::new()),
            effects: Mutex::new(Vec::new()),
            broken: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            fail_actions: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            events,
        })
    }

    pub fn add(&self, selector: Selector, visible: bool) -> ElementHandle {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        self.elements.lock().unwrap().push(MockElement {
            selector,
            id,
            visible,
        });
        ElementHandle::new(id)
    }

    pub fn add_css(&self, css: &str) -> ElementHandle {
        self.add(Selector::Css(css.to_string()), true)
    }

    pub fn set_visible(&self, selector: &Selector, visible: bool) {
        for element in self.elements.lock().unwrap().iter_mut() {
            if &element.selector == selector {
                element.visible = visible;
            }
        }
    }

    /// Clicking `trigger` makes `revealed` visible.
    pub fn reveal_on_click(&self, trigger: Selector, revealed: Selector) {
        self.effects
            .lock()
            .unwrap()
            .push((trigger, Effect::Show(revealed)));
    }

    /// Clicking `trigger` hides `hidden`.
    pub fn hide_on_click(&self, trigger: Selector, hidden: Selector) {
        self.effects
            .lock()
            .unwrap()
            .push((trigger, Effect::Hide(hidden)));
    }

    /// Every probe errors, like a detached or cross-origin frame.
    pub fn break_context(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Every probe blocks forever.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn fail_actions(&self) {
        self.fail_actions.store(true, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn selector_of(&self, handle: &ElementHandle) -> Option<Selector> {
        self.elements
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == handle.id())
            .map(|e| e.selector.clone())
    }

    fn act(&self, verb: &str, handle: &ElementHandle) -> Result<Selector, BackendError> {
        let selector = self
            .selector_of(handle)
            .ok_or_else(|| BackendError::StaleElement(format!("{:?}", handle)))?;
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(BackendError::ScriptError(format!("{} refused", verb)));
        }
        self.events.push(format!("{} {}", verb, selector_name(&selector)));
        Ok(selector)
    }
}

/// Short event name for a selector: the css query, text pattern or role.
pub fn selector_name(selector: &Selector) -> String {
    match selector {
        Selector::Css(css) => css.clone(),
        Selector::NthCss { css, index } => format!("{}[{}]", css, index),
        Selector::Text(text) => text.clone(),
        Selector::Role { role, name } => match name {
            Some(name) => format!("{}:{}", role, name),
            None => role.clone(),
        },
    }
}

#[async_trait]
impl ElementContext for MockContext {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn locate(&self, selector: &Selector) -> Result<Option<ElementHandle>, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(BackendError::ContextUnavailable(self.label.clone()));
        }
        Ok(self
            .elements
            .lock()
            .unwrap()
            .iter()
            .find(|e| &e.selector == selector)
            .map(|e| ElementHandle::new(e.id)))
    }

    async fn wait_visible(
        &self,
        handle: &ElementHandle,
        _timeout: Duration,
    ) -> Result<bool, BackendError> {
        Ok(self
            .elements
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.id == handle.id() && e.visible))
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), BackendError> {
        let selector = self.act("click", handle)?;
        let effects: Vec<Effect> = self
            .effects
            .lock()
            .unwrap()
            .iter()
            .filter(|(trigger, _)| trigger == &selector)
            .map(|(_, effect)| effect.clone())
            .collect();
        for effect in effects {
            match effect {
                Effect::Show(target) => self.set_visible(&target, true),
                Effect::Hide(target) => self.set_visible(&target, false),
            }
        }
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), BackendError> {
        let selector = self.act("fill", handle)?;
        self.events
            .push(format!("value {}={}", selector_name(&selector), text));
        Ok(())
    }

    async fn press(&self, handle: &ElementHandle, key: &str) -> Result<(), BackendError> {
        let selector = self.act("press", handle)?;
        self.events
            .push(format!("key {}={}", selector_name(&selector), key));
        Ok(())
    }
}

pub struct MockBackend {
    pub document: Arc<MockContext>,
    pub frames: Vec<Arc<MockContext>>,
    pub events: EventLog,
    pub ready: bool,
    pub launches: usize,
    pub closes: usize,
    pub frames_error: bool,
    pub document_error: bool,
    pub fail_navigation: bool,
    /// Navigations and reloads never finish.
    pub hang_navigation: bool,
    pub screenshot: Option<Vec<u8>>,
    hidden_on_navigate: Vec<Selector>,
}

impl MockBackend {
    pub fn new() -> Self {
        let events = EventLog::default();
        Self {
            document: MockContext::new("document", events.clone()),
            frames: Vec::new(),
            events,
            ready: true,
            launches: 0,
            closes: 0,
            frames_error: false,
            document_error: false,
            fail_navigation: false,
            hang_navigation: false,
            screenshot: None,
            hidden_on_navigate: Vec::new(),
        }
    }

    pub fn add_frame(&mut self) -> Arc<MockContext> {
        let label = format!("frame[{}]", self.frames.len());
        let frame = MockContext::new(&label, self.events.clone());
        self.frames.push(frame.clone());
        frame
    }

    /// Every navigation leaves `selector` hidden in the document, like a page
    /// that starts over.
    pub fn hide_on_navigate(&mut self, selector: Selector) {
        self.hidden_on_navigate.push(selector);
    }

    async fn stall(&self) {
        if self.hang_navigation {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        self.launches += 1;
        self.ready = true;
        self.events.push("launch");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.closes += 1;
        self.ready = false;
        self.events.push("close");
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        self.stall().await;
        if self.fail_navigation {
            return Err(BackendError::Navigation(format!("cannot reach {}", url)));
        }
        self.events.push(format!("navigate {}", url));
        for selector in &self.hidden_on_navigate {
            self.document.set_visible(selector, false);
        }
        Ok(NavigationResult {
            url: url.to_string(),
            title: "Mock".into(),
            status: 200,
        })
    }

    async fn refresh(&mut self) -> Result<NavigationResult, BackendError> {
        self.stall().await;
        self.events.push("reload");
        Ok(NavigationResult {
            url: "mock://current".into(),
            title: "Mock".into(),
            status: 200,
        })
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        self.screenshot
            .clone()
            .ok_or_else(|| BackendError::NotSupported("screenshot".into()))
    }

    fn document(&self) -> Result<ContextRef, BackendError> {
        if self.document_error {
            return Err(BackendError::NotReady);
        }
        Ok(self.document.clone())
    }

    async fn frames(&self) -> Result<Vec<ContextRef>, BackendError> {
        if self.frames_error {
            return Err(BackendError::ContextUnavailable("frame tree".into()));
        }
        Ok(self
            .frames
            .iter()
            .map(|f| f.clone() as ContextRef)
            .collect())
    }
}

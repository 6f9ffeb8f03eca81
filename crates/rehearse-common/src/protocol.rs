use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default per-strategy budget for finding a visible element.
pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_millis(3000);

/// A typed element query.
///
/// `Text` and the `name` of `Role` are case-insensitive regular expressions so
/// that one strategy can cover every locale the site ships.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Structural CSS query, first match.
    Css(String),
    /// Structural CSS query, `index`-th match (zero based).
    NthCss { css: String, index: usize },
    /// Innermost element whose visible text matches the pattern.
    Text(String),
    /// Element with the given ARIA role, optionally filtered by accessible name.
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "css({})", css),
            Selector::NthCss { css, index } => write!(f, "css({})[{}]", css, index),
            Selector::Text(pattern) => write!(f, "text(/{}/i)", pattern),
            Selector::Role { role, name: None } => write!(f, "role({})", role),
            Selector::Role {
                role,
                name: Some(name),
            } => write!(f, "role({}, /{}/i)", role, name),
        }
    }
}

/// Which contexts a strategy is allowed to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    DocumentOnly,
    #[default]
    AllFrames,
}

/// One candidate way to find an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub selector: Selector,
    pub scope: Scope,
    pub timeout: Duration,
}

impl Strategy {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            scope: Scope::AllFrames,
            timeout: DEFAULT_STRATEGY_TIMEOUT,
        }
    }

    pub fn css(query: impl Into<String>) -> Self {
        Self::new(Selector::Css(query.into()))
    }

    pub fn text(pattern: impl Into<String>) -> Self {
        Self::new(Selector::Text(pattern.into()))
    }

    pub fn document_only(mut self) -> Self {
        self.scope = Scope::DocumentOnly;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A named logical target: the ordered fallback strategies for one UI element.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub strategies: Vec<Strategy>,
}

impl Target {
    pub fn new(name: impl Into<String>, strategies: Vec<Strategy>) -> Self {
        Self {
            name: name.into(),
            strategies,
        }
    }
}

/// Opaque reference to an element inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The act applied to a resolved element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Fill(String),
    Press(String),
}

impl ActionKind {
    pub fn verb(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Fill(_) => "fill",
            ActionKind::Press(_) => "press",
        }
    }
}

/// Why an action did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every strategy was exhausted across every context.
    ElementNotFound,
    /// The element resolved but the act itself failed.
    ActionFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ElementNotFound => write!(f, "element not found"),
            FailureReason::ActionFailed => write!(f, "action failed"),
        }
    }
}

/// Outcome of one logical action. Never carries an error past the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    pub reason: Option<FailureReason>,
    pub detail: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            reason: None,
            detail: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(FailureReason::ElementNotFound),
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(FailureReason::ActionFailed),
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ok, self.reason, &self.detail) {
            (true, _, _) => write!(f, "ok"),
            (false, Some(reason), Some(detail)) => write!(f, "{}: {}", reason, detail),
            (false, Some(reason), None) => write!(f, "{}", reason),
            (false, None, _) => write!(f, "failed"),
        }
    }
}

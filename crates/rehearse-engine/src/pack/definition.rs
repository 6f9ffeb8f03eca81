use rehearse_common::protocol::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Pack file schema
// =============================================================================

/// A site pack: named targets plus the steps that use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Target name -> ordered fallback strategies.
    #[serde(default)]
    pub targets: BTreeMap<String, Vec<StrategySpec>>,
    #[serde(default)]
    pub setup: Vec<StepSpec>,
    pub cycle: Vec<StepSpec>,
    /// Target names whose presence means the cycle is complete.
    #[serde(default)]
    pub completion: Vec<String>,
    pub recovery: StepSpec,
    /// Rotate the cycle over these items instead of looping one page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ItemsSpec>,
}

/// Items the cycle rotates over. Each value is bound to `${<var>}` (raw)
/// and `${<var>_RE}` (regex-escaped) while its `enter` steps are built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsSpec {
    pub var: String,
    pub values: Vec<String>,
    /// Cycle passes per item before moving on.
    #[serde(default = "default_passes")]
    pub passes: u32,
    pub enter: Vec<StepSpec>,
}

fn default_passes() -> u32 {
    5
}

/// One strategy. Exactly one of `css`, `text` or `role` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    /// With `css`: pick the n-th match (zero based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// With `role`: accessible-name pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillSpec {
    pub target: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressSpec {
    pub target: String,
    pub key: String,
}

/// What a step does. Exactly one action key must be set; `wait_for` is a
/// post-condition for `click`, `fill` and `press`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub press: Option<PressSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigate: Option<String>,
    #[serde(default)]
    pub reload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_of: Option<Vec<ActionSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<ActionSpec>>,
    /// Run the inner action, ignore its failure.
    #[serde(rename = "try", default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<Box<ActionSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
}

impl ActionSpec {
    /// Names of the action keys that are set.
    pub fn kinds(&self) -> Vec<&'static str> {
        [
            self.click.as_ref().map(|_| "click"),
            self.fill.as_ref().map(|_| "fill"),
            self.press.as_ref().map(|_| "press"),
            self.navigate.as_ref().map(|_| "navigate"),
            self.reload.then_some("reload"),
            self.expect.as_ref().map(|_| "expect"),
            self.first_of.as_ref().map(|_| "first_of"),
            self.sequence.as_ref().map(|_| "sequence"),
            self.attempt.as_ref().map(|_| "try"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(flatten)]
    pub action: ActionSpec,
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_check: Option<String>,
}

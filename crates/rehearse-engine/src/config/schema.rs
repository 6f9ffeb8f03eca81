use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehearseConfig {
    /// Login identity; also the ledger key.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_target_hours")]
    pub target_hours: f64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Lesson title pattern; alternatives separated by `|`.
    #[serde(default = "default_lesson")]
    pub lesson: String,
    /// Which built-in pack to run when `pack` is not set.
    #[serde(default)]
    pub mode: RunMode,
    /// Pack file to use instead of the built-in one.
    #[serde(default)]
    pub pack: Option<PathBuf>,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Default for RehearseConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            target_hours: default_target_hours(),
            data_dir: default_data_dir(),
            lesson: default_lesson(),
            mode: RunMode::default(),
            pack: None,
            browser: BrowserConfig::default(),
            workflow: WorkflowConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl RehearseConfig {
    pub fn target_seconds(&self) -> f64 {
        self.target_hours * 3600.0
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.target_hours.is_finite() || self.target_hours <= 0.0 {
            return Err(format!(
                "target_hours must be a positive number, got {}",
                self.target_hours
            ));
        }
        if self.workflow.max_steps_per_cycle == 0 {
            return Err("workflow.max_steps_per_cycle must be at least 1".into());
        }
        if self.workflow.navigation_timeout_ms == 0 {
            return Err("workflow.navigation_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

/// Built-in workflow to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Loop one lesson.
    #[default]
    Lesson,
    /// Rotate through the story catalogue.
    Stories,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Lesson => write!(f, "lesson"),
            RunMode::Stories => write!(f, "stories"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lesson" => Ok(RunMode::Lesson),
            "stories" => Ok(RunMode::Stories),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

fn default_target_hours() -> f64 {
    35.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_lesson() -> String {
    "A Visit to Hollywood|Una visita a Hollywood".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_bin: Option<PathBuf>,
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            chrome_bin: None,
            user_data_dir: None,
        }
    }
}

fn default_headless() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_steps_per_cycle")]
    pub max_steps_per_cycle: usize,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_resolution_tick_ms")]
    pub resolution_tick_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps_per_cycle: default_max_steps_per_cycle(),
            max_consecutive_failures: default_max_consecutive_failures(),
            action_timeout_ms: default_action_timeout_ms(),
            resolution_tick_ms: default_resolution_tick_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

fn default_max_steps_per_cycle() -> usize {
    10
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_action_timeout_ms() -> u64 {
    5000
}

fn default_resolution_tick_ms() -> u64 {
    50
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debug_dir")]
    pub dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_debug_dir(),
        }
    }
}

fn default_debug_dir() -> PathBuf {
    PathBuf::from("debug")
}

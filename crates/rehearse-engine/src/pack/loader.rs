use super::definition::{ActionSpec, ItemsSpec, PackDefinition, StepSpec, StrategySpec};
use crate::workflow::step::{
    ActionRef, Attempt, Expect, FirstSuccess, Navigate, Perform, Reload, Sequence, Step,
};
use crate::config::RunMode;
use crate::workflow::{ItemRotation, WorkItem, WorkflowDefinition, WorkflowError};
use regex::{Regex, RegexBuilder};
use rehearse_common::protocol::{ActionKind, DEFAULT_STRATEGY_TIMEOUT, Selector, Strategy, Target};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// The lesson pack shipped with the binary.
pub const BUILTIN_LESSON_PACK: &str = include_str!("../../packs/lesson.yaml");

/// The story rotation pack shipped with the binary.
pub const BUILTIN_STORIES_PACK: &str = include_str!("../../packs/stories.yaml");

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Error)]
pub enum PackLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Variable '{0}' is referenced but not bound")]
    UnboundVariable(String),
    #[error("Step '{step}' references unknown target '{target}'")]
    UnknownTarget { step: String, target: String },
    #[error("Invalid strategy for target '{target}': {reason}")]
    InvalidStrategy { target: String, reason: String },
    #[error("Invalid action in step '{step}': {reason}")]
    InvalidAction { step: String, reason: String },
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Pattern '{pattern}' uses {reason}, which page-side matching does not support")]
    UnsupportedPattern { pattern: String, reason: &'static str },
    #[error("Invalid items: {0}")]
    InvalidItems(String),
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

pub struct PackLoader;

impl PackLoader {
    pub async fn load_from(path: &Path) -> Result<PackDefinition, PackLoadError> {
        debug!("Loading pack from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<PackDefinition, PackLoadError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn builtin() -> Result<PackDefinition, PackLoadError> {
        Self::builtin_for(RunMode::Lesson)
    }

    pub fn builtin_for(mode: RunMode) -> Result<PackDefinition, PackLoadError> {
        match mode {
            RunMode::Lesson => Self::parse(BUILTIN_LESSON_PACK),
            RunMode::Stories => Self::parse(BUILTIN_STORIES_PACK),
        }
    }

    /// Bind `${VAR}` placeholders and turn the pack into a workflow.
    pub fn build(
        pack: &PackDefinition,
        vars: &HashMap<String, String>,
    ) -> Result<WorkflowDefinition, PackLoadError> {
        // Item variables are bound to the first item here so every target is
        // checked once; only `enter` steps see per-item bindings.
        let mut shared = vars.clone();
        if let Some(items) = &pack.items {
            let first = items.values.first().ok_or_else(|| {
                PackLoadError::InvalidItems(format!("'{}' lists no values", items.var))
            })?;
            bind_item(&mut shared, &items.var, first);
        }
        let builder = Builder::new(pack, shared)?;

        let setup = pack
            .setup
            .iter()
            .map(|spec| builder.step(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let cycle = pack
            .cycle
            .iter()
            .map(|spec| builder.step(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let completion = pack
            .completion
            .iter()
            .map(|name| builder.target("completion", name))
            .collect::<Result<Vec<_>, _>>()?;
        let recovery = builder.step(&pack.recovery)?;
        let rotation = pack
            .items
            .as_ref()
            .map(|items| rotation(pack, items, vars))
            .transpose()?;

        let definition = WorkflowDefinition {
            name: pack.name.clone(),
            setup,
            cycle,
            completion,
            recovery,
            rotation,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Replace every `${VAR}` in `input` with its binding.
pub fn substitute(input: &str, vars: &HashMap<String, String>) -> Result<String, PackLoadError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in VAR_RE.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| PackLoadError::UnboundVariable(name.as_str().to_string()))?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn bind_item(vars: &mut HashMap<String, String>, var: &str, value: &str) {
    vars.insert(var.to_string(), value.to_string());
    vars.insert(format!("{}_RE", var), regex::escape(value));
}

fn rotation(
    pack: &PackDefinition,
    spec: &ItemsSpec,
    vars: &HashMap<String, String>,
) -> Result<ItemRotation, PackLoadError> {
    if spec.var.trim().is_empty() {
        return Err(PackLoadError::InvalidItems("var is empty".into()));
    }

    let items = spec
        .values
        .iter()
        .map(|value| {
            let mut bound = vars.clone();
            bind_item(&mut bound, &spec.var, value);
            let builder = Builder::new(pack, bound)?;
            let enter = spec
                .enter
                .iter()
                .map(|step| builder.step(step))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(WorkItem {
                name: value.clone(),
                enter,
            })
        })
        .collect::<Result<Vec<_>, PackLoadError>>()?;

    Ok(ItemRotation {
        items,
        passes_per_item: spec.passes,
    })
}

/// Check that `pattern` compiles and means the same thing when the page
/// evaluates it as a case-insensitive JavaScript `RegExp`.
pub fn check_pattern(pattern: &str) -> Result<(), PackLoadError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| PackLoadError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

    match page_incompatibility(pattern) {
        Some(reason) => Err(PackLoadError::UnsupportedPattern {
            pattern: pattern.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Constructs the Rust engine accepts but a browser rejects or reads differently.
fn page_incompatibility(pattern: &str) -> Option<&'static str> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut in_class = false;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let next = chars.get(i + 1).copied();
                match next {
                    Some('A' | 'z' | 'Z') => return Some("a \\A, \\z or \\Z anchor"),
                    Some('p' | 'P') => return Some("a \\p Unicode class"),
                    Some('Q' | 'E') => return Some("a \\Q..\\E literal block"),
                    Some('<' | '>') => return Some("a \\< or \\> word boundary"),
                    Some('b' | 'B') if chars.get(i + 2) == Some(&'{') => {
                        return Some("a \\b{..} boundary");
                    }
                    _ => {}
                }
                i += 2;
                continue;
            }
            '[' if !in_class => {
                in_class = true;
                if chars.get(i + 1) == Some(&'^') {
                    i += 1;
                }
                // a leading ']' is a literal inside the class
                if chars.get(i + 1) == Some(&']') {
                    i += 1;
                }
            }
            '[' if chars.get(i + 1) == Some(&':') => return Some("a POSIX [[:class:]]"),
            '[' => return Some("a nested character class"),
            ']' if in_class => in_class = false,
            '(' if !in_class && chars.get(i + 1) == Some(&'?') => {
                match (chars.get(i + 2), chars.get(i + 3)) {
                    (Some(':' | '=' | '!'), _) => {}
                    (Some('<'), Some('=' | '!')) => {}
                    (Some('<'), Some(c)) if c.is_alphabetic() || *c == '_' => {}
                    (Some('P'), _) => return Some("a (?P<name>) group"),
                    _ => return Some("an inline (?flags) group"),
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

struct Builder {
    vars: HashMap<String, String>,
    targets: HashMap<String, Target>,
}

impl Builder {
    fn new(pack: &PackDefinition, vars: HashMap<String, String>) -> Result<Self, PackLoadError> {
        let mut targets = HashMap::new();
        for (name, specs) in &pack.targets {
            if specs.is_empty() {
                return Err(PackLoadError::InvalidStrategy {
                    target: name.clone(),
                    reason: "no strategies".into(),
                });
            }
            let strategies = specs
                .iter()
                .map(|spec| strategy(name, spec, &vars))
                .collect::<Result<Vec<_>, _>>()?;
            targets.insert(name.clone(), Target::new(name.clone(), strategies));
        }
        Ok(Self { vars, targets })
    }

    fn target(&self, step: &str, name: &str) -> Result<Target, PackLoadError> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| PackLoadError::UnknownTarget {
                step: step.to_string(),
                target: name.to_string(),
            })
    }

    fn step(&self, spec: &StepSpec) -> Result<Step, PackLoadError> {
        let action = self.action(&spec.name, &spec.action)?;
        let mut step =
            Step::from_ref(spec.name.clone(), action).with_settle(Duration::from_millis(spec.settle_ms));
        if let Some(check) = &spec.terminal_check {
            step = step.with_terminal_check(self.target(&spec.name, check)?);
        }
        if spec.optional {
            step = step.optional();
        }
        Ok(step)
    }

    fn action(&self, step: &str, spec: &ActionSpec) -> Result<ActionRef, PackLoadError> {
        let kinds = spec.kinds();
        if kinds.len() != 1 {
            return Err(PackLoadError::InvalidAction {
                step: step.to_string(),
                reason: format!("expected exactly one action, found {:?}", kinds),
            });
        }

        let post = match &spec.wait_for {
            Some(name) if !matches!(kinds[0], "click" | "fill" | "press") => {
                return Err(PackLoadError::InvalidAction {
                    step: step.to_string(),
                    reason: format!("wait_for '{}' cannot follow {}", name, kinds[0]),
                });
            }
            Some(name) => Some(self.target(step, name)?),
            None => None,
        };

        let perform = |target: &str, action: ActionKind| -> Result<ActionRef, PackLoadError> {
            let mut perform = Perform::new(self.target(step, target)?, action);
            perform.post = post.clone();
            Ok(Arc::new(perform))
        };

        if let Some(target) = &spec.click {
            return perform(target, ActionKind::Click);
        }
        if let Some(fill) = &spec.fill {
            let text = substitute(&fill.text, &self.vars)?;
            return perform(&fill.target, ActionKind::Fill(text));
        }
        if let Some(press) = &spec.press {
            return perform(&press.target, ActionKind::Press(press.key.clone()));
        }
        if let Some(url) = &spec.navigate {
            let url = substitute(url, &self.vars)?;
            url::Url::parse(&url).map_err(|source| PackLoadError::InvalidUrl {
                url: url.clone(),
                source,
            })?;
            return Ok(Arc::new(Navigate { url }));
        }
        if spec.reload {
            return Ok(Arc::new(Reload));
        }
        if let Some(target) = &spec.expect {
            return Ok(Arc::new(Expect {
                target: self.target(step, target)?,
            }));
        }
        if let Some(alternatives) = &spec.first_of {
            return Ok(Arc::new(FirstSuccess(self.actions(step, alternatives)?)));
        }
        if let Some(actions) = &spec.sequence {
            return Ok(Arc::new(Sequence(self.actions(step, actions)?)));
        }
        if let Some(inner) = &spec.attempt {
            return Ok(Arc::new(Attempt(self.action(step, inner)?)));
        }

        Err(PackLoadError::InvalidAction {
            step: step.to_string(),
            reason: "no action".into(),
        })
    }

    fn actions(&self, step: &str, specs: &[ActionSpec]) -> Result<Vec<ActionRef>, PackLoadError> {
        if specs.is_empty() {
            return Err(PackLoadError::InvalidAction {
                step: step.to_string(),
                reason: "empty action list".into(),
            });
        }
        specs.iter().map(|spec| self.action(step, spec)).collect()
    }
}

fn strategy(
    target: &str,
    spec: &StrategySpec,
    vars: &HashMap<String, String>,
) -> Result<Strategy, PackLoadError> {
    let invalid = |reason: &str| PackLoadError::InvalidStrategy {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    let selector = match (&spec.css, &spec.text, &spec.role) {
        (Some(css), None, None) => {
            let css = substitute(css, vars)?;
            match spec.nth {
                Some(index) => Selector::NthCss { css, index },
                None => Selector::Css(css),
            }
        }
        (None, Some(text), None) => {
            let pattern = substitute(text, vars)?;
            check_pattern(&pattern)?;
            Selector::Text(pattern)
        }
        (None, None, Some(role)) => {
            let name = match &spec.name {
                Some(name) => {
                    let pattern = substitute(name, vars)?;
                    check_pattern(&pattern)?;
                    Some(pattern)
                }
                None => None,
            };
            Selector::Role {
                role: role.clone(),
                name,
            }
        }
        _ => return Err(invalid("exactly one of css, text or role is required")),
    };

    if spec.nth.is_some() && spec.css.is_none() {
        return Err(invalid("nth requires css"));
    }
    if spec.name.is_some() && spec.role.is_none() {
        return Err(invalid("name requires role"));
    }

    Ok(Strategy {
        selector,
        scope: spec.scope,
        timeout: spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STRATEGY_TIMEOUT),
    })
}

pub mod definition;
pub mod loader;

pub use definition::{
    ActionSpec, FillSpec, ItemsSpec, PackDefinition, PressSpec, StepSpec, StrategySpec,
};
pub use loader::{
    BUILTIN_LESSON_PACK, BUILTIN_STORIES_PACK, PackLoadError, PackLoader, check_pattern, substitute,
};

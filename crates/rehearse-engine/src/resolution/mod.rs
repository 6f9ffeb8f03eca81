pub mod engine;
pub mod result;

pub use engine::{ResolutionEngine, TICK};
pub use result::{Resolution, ResolvedElement};

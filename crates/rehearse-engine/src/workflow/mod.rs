pub mod cancel;
pub mod machine;
pub mod state;
pub mod step;

pub use cancel::CancelToken;
pub use machine::{ItemRotation, StateMachine, WorkItem, WorkflowDefinition, WorkflowError};
pub use state::{CycleState, StopReason, WorkflowOptions, WorkflowState, WorkflowSummary};
pub use step::{
    ActionRef, Attempt, Expect, FirstSuccess, Navigate, Perform, Reload, Sequence, Step,
    StepAction,
};

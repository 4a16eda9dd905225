// Lifecycle state machines for transactions and workflow steps
//
// Statuses are plain enums; events are applied through `apply`, which rejects
// transitions the lifecycle does not allow.

pub mod errors;
pub mod events;
pub mod states;

pub use errors::TransitionError;
pub use events::{StepEvent, TransactionEvent};
pub use states::{StepStatus, TransactionStatus, WorkflowStatus};

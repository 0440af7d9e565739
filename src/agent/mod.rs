pub mod coordinator;
pub mod interpreter;
pub mod step;

pub use coordinator::{ExecutionCoordinator, TaskOutcome};
pub use interpreter::TaskInterpreter;

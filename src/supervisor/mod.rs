//! Execution Supervisor: one actor per firing, driven by a pure state machine.

mod actor;
mod registry;
pub mod state;
mod status;

pub use actor::FinishedExecution;
pub use registry::ExecutionSupervisor;
pub use state::{Effect, ExecutionMachine, Step, SupervisorEvent};
pub use status::AlarmStatusView;

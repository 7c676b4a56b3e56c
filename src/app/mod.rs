mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::SortyxOrchestrator;
pub use types::{ComponentState, ShutdownReason};

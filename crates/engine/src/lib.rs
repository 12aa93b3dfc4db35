pub mod actor;
pub mod commands;
pub mod entry;
pub mod executor;
pub mod handle;
pub mod registry;
pub mod risk;

#[cfg(test)]
pub(crate) mod testutil;

pub use actor::EngineActor;
pub use commands::{EngineCommand, StartAck, StopMode};
pub use handle::EngineHandle;
pub use registry::EngineRegistry;

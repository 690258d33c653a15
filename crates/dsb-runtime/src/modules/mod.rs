//! Sample algorithm modules.

pub mod heartbeat;
pub mod hello_world;

pub use heartbeat::{Beat, HeartbeatModule};
pub use hello_world::HelloWorldModule;

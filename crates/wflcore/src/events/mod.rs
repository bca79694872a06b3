// crates/wflcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, LaunchEvent, RunMessage};

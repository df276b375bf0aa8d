// crates/relightcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, PredictionEvent, PredictionId, ProgressEvent};

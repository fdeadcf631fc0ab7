//! In-process publish/subscribe for generation lifecycle events.

pub mod bus;

pub use bus::{EventBus, GenerationEvent};

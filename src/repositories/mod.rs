//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! trigger runtime tables.

pub mod trigger_event;
pub mod trigger_instance;
pub mod trigger_state;

pub use trigger_event::TriggerEventRepository;
pub use trigger_instance::{NewTriggerInstance, TriggerInstanceRepository};
pub use trigger_state::TriggerStateRepository;

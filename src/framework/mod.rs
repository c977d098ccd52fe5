//! # Piece framework
//!
//! Building blocks every vendor piece is written against: property schemas,
//! auth shapes, actions, triggers, the per-instance state store and the
//! registry the runtime resolves pieces from.

pub mod action;
pub mod auth;
pub mod context;
pub mod error;
pub mod piece;
pub mod property;
pub mod registry;
pub mod store;
pub mod trigger;

pub use action::Action;
pub use auth::{AuthValue, PieceAuth};
pub use context::{ActionContext, PropsExt, TriggerContext, WebhookPayload};
pub use error::PieceError;
pub use piece::{AuthValidator, OptionsProvider, Piece, PieceMetadata};
pub use property::{DropdownOption, DropdownState, Property, PropertyMap};
pub use registry::{Registry, RegistryError};
pub use store::{MemoryStore, Store};
pub use trigger::{Trigger, TriggerStrategy};

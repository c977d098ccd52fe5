//! # Data Models
//!
//! SeaORM entities for the trigger runtime plus small API response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod trigger_event;
pub mod trigger_instance;
pub mod trigger_state;

pub use trigger_event::Entity as TriggerEvent;
pub use trigger_instance::Entity as TriggerInstance;
pub use trigger_state::Entity as TriggerState;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "pieces".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

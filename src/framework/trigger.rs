//! Triggers: sources of events the host turns into flow runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::framework::context::TriggerContext;
use crate::framework::error::PieceError;
use crate::framework::property::PropertyMap;

/// How a trigger receives new events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStrategy {
    /// The host calls `run` on a schedule
    Polling,
    /// The vendor calls the host, which calls `run` with the payload
    Webhook,
}

impl TriggerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStrategy::Polling => "polling",
            TriggerStrategy::Webhook => "webhook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "polling" => Some(TriggerStrategy::Polling),
            "webhook" => Some(TriggerStrategy::Webhook),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    fn props(&self) -> PropertyMap;

    fn strategy(&self) -> TriggerStrategy;

    /// Example event shown to users while building a flow
    fn sample_data(&self) -> Value {
        Value::Null
    }

    /// Called once when the trigger instance is enabled
    async fn on_enable(&self, ctx: &TriggerContext) -> Result<(), PieceError>;

    /// Called once when the trigger instance is disabled
    async fn on_disable(&self, ctx: &TriggerContext) -> Result<(), PieceError>;

    /// Produce the new events for this run
    async fn run(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError>;

    /// Sample events for the flow builder, must not move any cursor
    async fn test(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError> {
        self.run(ctx).await
    }

    /// Reply for vendors that challenge the webhook endpoint before delivering
    /// events. `None` means the payload is a regular event.
    async fn handshake(&self, _ctx: &TriggerContext) -> Result<Option<Value>, PieceError> {
        Ok(None)
    }
}

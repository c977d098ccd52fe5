//! Actions: one-shot vendor operations invoked by the host.

use async_trait::async_trait;
use serde_json::Value;

use crate::framework::context::ActionContext;
use crate::framework::error::PieceError;
use crate::framework::property::PropertyMap;

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    fn props(&self) -> PropertyMap;

    /// Run the action with validated props; returns the vendor response body
    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError>;
}

//! # Trigger runtime
//!
//! Host-side lifecycle for trigger instances: enabling a trigger persists it
//! and calls the piece's `on_enable` hook, polls and webhook deliveries run
//! the trigger against a database-backed [`DbStore`] and record the emitted
//! events. Actions and dropdown lookups are stateless and go straight to the
//! piece.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::framework::property::validate_props;
use crate::framework::{
    ActionContext, AuthValue, DropdownState, PieceError, Registry, RegistryError, Trigger,
    TriggerContext, TriggerStrategy, WebhookPayload,
};
use crate::http::HttpClientFactory;
use crate::models::trigger_event::{EventSource, Model as TriggerEventModel};
use crate::models::trigger_instance::Model as TriggerInstanceModel;
use crate::repositories::{
    NewTriggerInstance, TriggerEventRepository, TriggerInstanceRepository, TriggerStateRepository,
};
use crate::scheduler::next_poll_after;
use crate::store::DbStore;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Piece(#[from] PieceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Trigger instance '{id}' not found")]
    InstanceNotFound { id: Uuid },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Trigger instance '{id}' cannot {operation}: {reason}")]
    InvalidState {
        id: Uuid,
        operation: &'static str,
        reason: String,
    },
}

/// Request to enable a trigger
#[derive(Debug, Clone)]
pub struct EnableTrigger {
    pub piece: String,
    pub trigger: String,
    pub auth: AuthValue,
    pub props: Map<String, Value>,
    pub poll_interval_seconds: Option<u64>,
}

/// Result of a webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// The vendor challenged the endpoint; reply with this body
    Handshake(Value),
    /// Regular delivery; these events were recorded
    Events(Vec<Value>),
}

#[derive(Clone)]
pub struct TriggerRuntime {
    db: DatabaseConnection,
    registry: Arc<Registry>,
    http: HttpClientFactory,
    config: Arc<AppConfig>,
    instances: TriggerInstanceRepository,
    states: TriggerStateRepository,
    events: TriggerEventRepository,
}

impl TriggerRuntime {
    pub fn new(
        db: DatabaseConnection,
        registry: Arc<Registry>,
        http: HttpClientFactory,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            instances: TriggerInstanceRepository::new(db.clone()),
            states: TriggerStateRepository::new(db.clone()),
            events: TriggerEventRepository::new(db.clone()),
            db,
            registry,
            http,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn http(&self) -> &HttpClientFactory {
        &self.http
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Validate, persist and enable a trigger. The row is removed again when
    /// the piece's `on_enable` fails.
    pub async fn enable(&self, request: EnableTrigger) -> Result<TriggerInstanceModel, RuntimeError> {
        let piece = self.registry.get(&request.piece)?;
        let trigger = piece.trigger(&request.trigger)?;
        let auth = piece.auth.check(&request.auth)?;
        let props = validate_props(&trigger.props(), &request.props).map_err(PieceError::from)?;
        let strategy = trigger.strategy();
        let interval = self
            .config
            .polling
            .effective_interval(request.poll_interval_seconds)
            .ok_or_else(|| {
                RuntimeError::InvalidRequest(format!(
                    "poll_interval_seconds must not exceed {}",
                    self.config.polling.max_interval_seconds
                ))
            })?;

        let instance = self
            .instances
            .create(NewTriggerInstance {
                piece_name: piece.name.clone(),
                trigger_name: trigger.name().to_string(),
                strategy,
                props: Value::Object(props.clone()),
                auth: serde_json::to_value(&auth).map_err(|e| PieceError::Store(e.to_string()))?,
                poll_interval_seconds: i64::try_from(interval).unwrap_or(i64::MAX),
            })
            .await?;

        let ctx = self.trigger_context(instance.id, auth, props, None);
        if let Err(err) = trigger.on_enable(&ctx).await {
            warn!(
                instance_id = %instance.id,
                piece = %instance.piece_name,
                trigger = %instance.trigger_name,
                error = %err,
                "on_enable failed; removing trigger instance"
            );
            self.states.clear(instance.id).await?;
            self.instances.delete(instance.id).await?;
            return Err(err.into());
        }

        info!(
            instance_id = %instance.id,
            piece = %instance.piece_name,
            trigger = %instance.trigger_name,
            "Trigger enabled"
        );
        Ok(instance)
    }

    /// Disable an instance. Vendor-side cleanup failures are logged and do
    /// not keep the instance enabled.
    pub async fn disable(&self, id: Uuid) -> Result<TriggerInstanceModel, RuntimeError> {
        let instance = self.get(id).await?;
        if !instance.is_enabled() {
            return Ok(instance);
        }

        let (trigger, ctx) = self.resolve(&instance, None)?;
        if let Err(err) = trigger.on_disable(&ctx).await {
            warn!(instance_id = %id, error = %err, "on_disable failed; disabling anyway");
        }

        let instance = self.instances.mark_disabled(instance).await?;
        self.states.clear(id).await?;

        info!(instance_id = %id, "Trigger disabled");
        Ok(instance)
    }

    pub async fn get(&self, id: Uuid) -> Result<TriggerInstanceModel, RuntimeError> {
        self.instances
            .find(id)
            .await?
            .ok_or(RuntimeError::InstanceNotFound { id })
    }

    /// Sample events; cursors are left untouched
    pub async fn test(&self, id: Uuid) -> Result<Vec<Value>, RuntimeError> {
        let instance = self.get(id).await?;
        let (trigger, ctx) = self.resolve(&instance, None)?;
        let events = trigger.test(&ctx).await?;
        self.events.record(id, EventSource::Test, &events).await?;
        Ok(events)
    }

    /// Poll an instance now, regardless of its schedule
    pub async fn poll(&self, id: Uuid) -> Result<Vec<Value>, RuntimeError> {
        let instance = self.get(id).await?;
        self.poll_instance(instance).await
    }

    /// Run one poll and reschedule the instance. Failures are stored in
    /// `last_error` before being returned.
    pub async fn poll_instance(
        &self,
        instance: TriggerInstanceModel,
    ) -> Result<Vec<Value>, RuntimeError> {
        let id = instance.id;
        if !instance.is_enabled() {
            return Err(RuntimeError::InvalidState {
                id,
                operation: "poll",
                reason: "instance is disabled".to_string(),
            });
        }
        if TriggerStrategy::parse(&instance.strategy) != Some(TriggerStrategy::Polling) {
            return Err(RuntimeError::InvalidState {
                id,
                operation: "poll",
                reason: "trigger is not a polling trigger".to_string(),
            });
        }

        let (trigger, ctx) = self.resolve(&instance, None)?;
        let started = Utc::now();
        let interval = u64::try_from(instance.poll_interval_seconds).unwrap_or(0);

        match trigger.run(&ctx).await {
            Ok(events) => {
                self.events.record(id, EventSource::Poll, &events).await?;
                let next = next_poll_after(started, interval, self.config.polling.jitter_pct_max);
                self.instances
                    .record_run(instance, started, Some(next), None)
                    .await?;
                counter!("trigger_events_emitted_total", "source" => "poll")
                    .increment(events.len() as u64);
                debug!(instance_id = %id, events = events.len(), "Poll completed");
                Ok(events)
            }
            Err(err) => {
                let next = retry_at(started, interval, &err, self.config.polling.jitter_pct_max);
                self.instances
                    .record_run(instance, started, Some(next), Some(err.to_json()))
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Handle a vendor webhook delivery for an enabled webhook instance
    pub async fn deliver_webhook(
        &self,
        id: Uuid,
        payload: WebhookPayload,
    ) -> Result<WebhookOutcome, RuntimeError> {
        let instance = self.get(id).await?;
        if !instance.is_enabled() {
            return Err(RuntimeError::InvalidState {
                id,
                operation: "accept webhooks",
                reason: "instance is disabled".to_string(),
            });
        }
        if TriggerStrategy::parse(&instance.strategy) != Some(TriggerStrategy::Webhook) {
            return Err(RuntimeError::InvalidState {
                id,
                operation: "accept webhooks",
                reason: "trigger is not a webhook trigger".to_string(),
            });
        }

        let (trigger, ctx) = self.resolve(&instance, Some(payload))?;
        if let Some(reply) = trigger.handshake(&ctx).await? {
            debug!(instance_id = %id, "Webhook handshake answered");
            return Ok(WebhookOutcome::Handshake(reply));
        }

        let received = Utc::now();
        match trigger.run(&ctx).await {
            Ok(events) => {
                self.events.record(id, EventSource::Webhook, &events).await?;
                self.instances
                    .record_run(instance, received, None, None)
                    .await?;
                counter!("trigger_events_emitted_total", "source" => "webhook")
                    .increment(events.len() as u64);
                Ok(WebhookOutcome::Events(events))
            }
            Err(err) => {
                // Signature failures are not recorded; anyone can hit the endpoint
                if !matches!(err, PieceError::Verification(_)) {
                    self.instances
                        .record_run(instance, received, None, Some(err.to_json()))
                        .await?;
                }
                Err(err.into())
            }
        }
    }

    /// Recorded events, newest first
    pub async fn events(
        &self,
        id: Uuid,
        limit: u64,
    ) -> Result<Vec<TriggerEventModel>, RuntimeError> {
        self.get(id).await?;
        Ok(self.events.list_recent(id, limit).await?)
    }

    pub async fn run_action(
        &self,
        piece: &str,
        action: &str,
        auth: &AuthValue,
        props: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let piece = self.registry.get(piece)?;
        let action = piece.action(action)?;
        let auth = piece.auth.check(auth)?;
        let props = validate_props(&action.props(), props).map_err(PieceError::from)?;

        let ctx = ActionContext::new(auth, props, self.http.clone());
        let started = std::time::Instant::now();
        let output = action.run(&ctx).await;
        info!(
            piece = %piece.name,
            action = action.name(),
            ok = output.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Action run"
        );
        Ok(output?)
    }

    /// Dynamic dropdown options. Props are passed through unvalidated since
    /// the form is usually only partly filled in.
    pub async fn options(
        &self,
        piece: &str,
        prop: &str,
        auth: Option<&AuthValue>,
        props: Map<String, Value>,
    ) -> Result<DropdownState, RuntimeError> {
        let piece = self.registry.get(piece)?;
        let auth = match auth {
            Some(auth) => piece.auth.check(auth)?,
            None => AuthValue::None,
        };
        let ctx = ActionContext::new(auth, props, self.http.clone());
        Ok(piece.options(prop, &ctx).await?)
    }

    pub async fn validate_auth(&self, piece: &str, auth: &AuthValue) -> Result<(), RuntimeError> {
        let piece = self.registry.get(piece)?;
        piece.validate_auth(auth, &self.http).await?;
        Ok(())
    }

    fn trigger_context(
        &self,
        id: Uuid,
        auth: AuthValue,
        props: Map<String, Value>,
        payload: Option<WebhookPayload>,
    ) -> TriggerContext {
        TriggerContext {
            auth,
            props,
            store: Arc::new(DbStore::new(self.db.clone(), id)),
            webhook_url: Some(self.config.webhook_url(&id)),
            payload,
            http: self.http.clone(),
        }
    }

    /// Look up the trigger of a stored instance and rebuild its context
    fn resolve(
        &self,
        instance: &TriggerInstanceModel,
        payload: Option<WebhookPayload>,
    ) -> Result<(Arc<dyn Trigger>, TriggerContext), RuntimeError> {
        let piece = self.registry.get(&instance.piece_name)?;
        let trigger = piece.trigger(&instance.trigger_name)?;
        let auth: AuthValue = serde_json::from_value(instance.auth.clone()).map_err(|e| {
            PieceError::Store(format!("stored auth for {} is unreadable: {}", instance.id, e))
        })?;
        let props = instance.props.as_object().cloned().unwrap_or_default();
        Ok((trigger, self.trigger_context(instance.id, auth, props, payload)))
    }
}

/// When to try again after a failed poll: the regular interval, or later if
/// the vendor asked for it
fn retry_at(
    now: DateTime<Utc>,
    interval_seconds: u64,
    err: &PieceError,
    jitter_pct_max: f64,
) -> DateTime<Utc> {
    let wait = match err {
        PieceError::RateLimited {
            retry_after: Some(seconds),
        } => interval_seconds.max(*seconds),
        _ => interval_seconds,
    };
    next_poll_after(now, wait, jitter_pct_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_at_honours_retry_after() {
        let now = Utc::now();
        let err = PieceError::RateLimited {
            retry_after: Some(900),
        };
        let next = retry_at(now, 60, &err, 0.0);
        assert_eq!((next - now).num_seconds(), 900);

        let err = PieceError::Http {
            status: 500,
            body: None,
        };
        let next = retry_at(now, 60, &err, 0.0);
        assert_eq!((next - now).num_seconds(), 60);
    }
}

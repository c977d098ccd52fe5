//! Execution contexts handed to actions, triggers and option lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::framework::auth::AuthValue;
use crate::framework::error::PieceError;
use crate::framework::property::PropertyError;
use crate::framework::store::Store;
use crate::http::HttpClientFactory;

/// Context for running an action or resolving dropdown options
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub auth: AuthValue,
    pub props: Map<String, Value>,
    pub http: HttpClientFactory,
}

impl ActionContext {
    pub fn new(auth: AuthValue, props: Map<String, Value>, http: HttpClientFactory) -> Self {
        Self { auth, props, http }
    }
}

/// Inbound webhook request as received by the runtime
#[derive(Debug, Clone, Default)]
pub struct WebhookPayload {
    pub body: Value,
    pub raw_body: Vec<u8>,
    /// Header names are lower-cased
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl WebhookPayload {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Context for trigger lifecycle hooks and runs
#[derive(Clone)]
pub struct TriggerContext {
    pub auth: AuthValue,
    pub props: Map<String, Value>,
    pub store: Arc<dyn Store>,
    pub webhook_url: Option<String>,
    pub payload: Option<WebhookPayload>,
    pub http: HttpClientFactory,
}

impl TriggerContext {
    pub fn webhook_url(&self) -> Result<&str, PieceError> {
        self.webhook_url.as_deref().ok_or_else(|| PieceError::Configuration {
            details: "trigger requires a webhook URL".to_string(),
        })
    }

    pub fn payload(&self) -> Result<&WebhookPayload, PieceError> {
        self.payload
            .as_ref()
            .ok_or_else(|| PieceError::malformed("webhook run without a payload"))
    }
}

/// Typed accessors over validated property values
pub trait PropsExt {
    fn prop_str(&self, name: &str) -> Result<&str, PieceError>;
    fn opt_str(&self, name: &str) -> Option<&str>;
    fn prop_i64(&self, name: &str) -> Result<i64, PieceError>;
    fn opt_i64(&self, name: &str) -> Option<i64>;
    fn opt_f64(&self, name: &str) -> Option<f64>;
    fn opt_bool(&self, name: &str) -> Option<bool>;
    fn opt_value(&self, name: &str) -> Option<&Value>;
}

fn missing(name: &str) -> PieceError {
    PieceError::InvalidProps(PropertyError::Missing {
        name: name.to_string(),
    })
}

impl PropsExt for Map<String, Value> {
    fn prop_str(&self, name: &str) -> Result<&str, PieceError> {
        self.opt_str(name).ok_or_else(|| missing(name))
    }

    /// Empty strings count as absent
    fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    fn prop_i64(&self, name: &str) -> Result<i64, PieceError> {
        self.opt_i64(name).ok_or_else(|| missing(name))
    }

    fn opt_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn opt_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn opt_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    fn opt_value(&self, name: &str) -> Option<&Value> {
        self.get(name).filter(|v| !v.is_null())
    }
}

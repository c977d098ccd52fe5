//! Piece definition: a vendor integration bundling auth, actions and triggers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::framework::action::Action;
use crate::framework::auth::{AuthValue, PieceAuth};
use crate::framework::context::ActionContext;
use crate::framework::error::PieceError;
use crate::framework::property::DropdownState;
use crate::framework::registry::RegistryError;
use crate::framework::trigger::{Trigger, TriggerStrategy};
use crate::http::HttpClientFactory;

/// Resolves dynamic dropdown options, e.g. a vendor's list of views or indexes
#[async_trait]
pub trait OptionsProvider: Send + Sync {
    async fn options(&self, prop: &str, ctx: &ActionContext) -> Result<DropdownState, PieceError>;
}

/// Vendor round-trip that proves a credential works
#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, auth: &AuthValue, http: &HttpClientFactory) -> Result<(), PieceError>;
}

pub struct Piece {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub logo_url: String,
    pub categories: Vec<String>,
    pub auth: PieceAuth,
    actions: Vec<Arc<dyn Action>>,
    triggers: Vec<Arc<dyn Trigger>>,
    options: Option<Arc<dyn OptionsProvider>>,
    auth_validator: Option<Arc<dyn AuthValidator>>,
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("name", &self.name)
            .field("auth", &self.auth.kind())
            .field("actions", &self.actions.len())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

impl Piece {
    pub fn builder<N: Into<String>, D: Into<String>>(name: N, display_name: D) -> PieceBuilder {
        PieceBuilder {
            piece: Piece {
                name: name.into(),
                display_name: display_name.into(),
                description: String::new(),
                logo_url: String::new(),
                categories: Vec::new(),
                auth: PieceAuth::None,
                actions: Vec::new(),
                triggers: Vec::new(),
                options: None,
                auth_validator: None,
            },
        }
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    pub fn triggers(&self) -> &[Arc<dyn Trigger>] {
        &self.triggers
    }

    pub fn action(&self, name: &str) -> Result<Arc<dyn Action>, RegistryError> {
        self.actions
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::ActionNotFound {
                piece: self.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn trigger(&self, name: &str) -> Result<Arc<dyn Trigger>, RegistryError> {
        self.triggers
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::TriggerNotFound {
                piece: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Resolve dropdown options for `prop`
    pub async fn options(
        &self,
        prop: &str,
        ctx: &ActionContext,
    ) -> Result<DropdownState, PieceError> {
        match &self.options {
            Some(provider) => provider.options(prop, ctx).await,
            None => Err(PieceError::not_found(format!(
                "options for property '{}' of piece '{}'",
                prop, self.name
            ))),
        }
    }

    /// Check the credential shape, then ask the vendor if a validator is set.
    pub async fn validate_auth(
        &self,
        auth: &AuthValue,
        http: &HttpClientFactory,
    ) -> Result<AuthValue, PieceError> {
        let auth = self.auth.check(auth)?;
        if let Some(validator) = &self.auth_validator {
            validator.validate(&auth, http).await?;
        }
        Ok(auth)
    }

    pub fn metadata(&self) -> PieceMetadata {
        PieceMetadata {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            logo_url: self.logo_url.clone(),
            categories: self.categories.clone(),
            auth: serde_json::to_value(&self.auth).unwrap_or_default(),
            actions: self
                .actions
                .iter()
                .map(|a| ActionMetadata {
                    name: a.name().to_string(),
                    display_name: a.display_name().to_string(),
                    description: a.description().to_string(),
                    props: serde_json::to_value(a.props()).unwrap_or_default(),
                })
                .collect(),
            triggers: self
                .triggers
                .iter()
                .map(|t| TriggerMetadata {
                    name: t.name().to_string(),
                    display_name: t.display_name().to_string(),
                    description: t.description().to_string(),
                    props: serde_json::to_value(t.props()).unwrap_or_default(),
                    strategy: t.strategy(),
                    sample_data: t.sample_data(),
                })
                .collect(),
        }
    }
}

pub struct PieceBuilder {
    piece: Piece,
}

impl PieceBuilder {
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.piece.description = description.into();
        self
    }

    pub fn logo_url<S: Into<String>>(mut self, logo_url: S) -> Self {
        self.piece.logo_url = logo_url.into();
        self
    }

    pub fn categories(mut self, categories: &[&str]) -> Self {
        self.piece.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn auth(mut self, auth: PieceAuth) -> Self {
        self.piece.auth = auth;
        self
    }

    pub fn action<A: Action + 'static>(mut self, action: A) -> Self {
        self.piece.actions.push(Arc::new(action));
        self
    }

    pub fn trigger<T: Trigger + 'static>(mut self, trigger: T) -> Self {
        self.piece.triggers.push(Arc::new(trigger));
        self
    }

    pub fn options(mut self, provider: Arc<dyn OptionsProvider>) -> Self {
        self.piece.options = Some(provider);
        self
    }

    pub fn auth_validator(mut self, validator: Arc<dyn AuthValidator>) -> Self {
        self.piece.auth_validator = Some(validator);
        self
    }

    pub fn build(self) -> Piece {
        self.piece
    }
}

/// Serializable description of a piece
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PieceMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub logo_url: String,
    pub categories: Vec<String>,
    #[schema(value_type = Object)]
    pub auth: Value,
    pub actions: Vec<ActionMetadata>,
    pub triggers: Vec<TriggerMetadata>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActionMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TriggerMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub props: Value,
    pub strategy: TriggerStrategy,
    #[schema(value_type = Object)]
    pub sample_data: Value,
}

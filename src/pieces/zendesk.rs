//! # Zendesk
//!
//! Ticketing. Authenticates with an agent email plus API token against the
//! account's subdomain. The `new_ticket` trigger registers a Zendesk webhook
//! and a ticket trigger that notifies it; deliveries are signed with the
//! webhook's signing secret.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::PiecesConfig;
use crate::framework::{
    Action, ActionContext, AuthValidator, AuthValue, DropdownOption, DropdownState,
    OptionsProvider, Piece, PieceAuth, PieceError, Property, PropertyMap, PropsExt, Trigger,
    TriggerContext, TriggerStrategy,
};
use crate::http::{HttpClientFactory, VendorAuth, VendorClient};
use crate::pieces::{insert_opt, list_field};
use crate::polling::{DedupeStrategy, PolledItem, PollingFetch, PollingSource, PollingTrigger};
use crate::webhook_verification::{SignatureHeaders, verify_timestamped_signature};

pub const SIGNATURE_HEADER: &str = "x-zendesk-webhook-signature";
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "x-zendesk-webhook-signature-timestamp";

const WEBHOOK_ID_KEY: &str = "webhookId";
const TRIGGER_ID_KEY: &str = "triggerId";
const SIGNING_SECRET_KEY: &str = "signingSecret";

const VIEW_PAGE_SIZE: u32 = 200;
const TEST_TICKET_COUNT: u32 = 5;

#[derive(Debug, Clone)]
struct ZendeskApi {
    base_override: Option<String>,
}

impl ZendeskApi {
    fn client(&self, http: &HttpClientFactory, auth: &AuthValue) -> Result<VendorClient, PieceError> {
        let email = auth.custom_str("email")?;
        let token = auth.custom_str("token")?;
        let origin = match &self.base_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.zendesk.com", auth.custom_str("subdomain")?),
        };
        Ok(http.client(
            format!("{}/api/v2", origin),
            VendorAuth::Basic {
                username: format!("{}/token", email),
                password: token.to_string(),
            },
        ))
    }
}

fn auth_schema() -> PieceAuth {
    PieceAuth::Custom {
        props: PropertyMap::new()
            .with(
                "email",
                Property::short_text("Agent Email")
                    .description("Email address you use to log in to Zendesk")
                    .required(),
            )
            .with(
                "token",
                Property::short_text("Token")
                    .description("API token from Admin Center > Apps and integrations > Zendesk API")
                    .required(),
            )
            .with(
                "subdomain",
                Property::short_text("Organization")
                    .description("The subdomain of your Zendesk account, e.g. `acme` for acme.zendesk.com")
                    .required(),
            ),
    }
}

pub fn piece(config: &PiecesConfig) -> Piece {
    let api = ZendeskApi {
        base_override: config.zendesk_base_override.clone(),
    };

    Piece::builder("zendesk", "Zendesk")
        .description("Customer service software and support ticket system")
        .logo_url("https://cdn.activepieces.com/pieces/zendesk.png")
        .categories(&["CUSTOMER_SUPPORT"])
        .auth(auth_schema())
        .action(CreateTicket { api: api.clone() })
        .action(UpdateTicket { api: api.clone() })
        .action(AddComment { api: api.clone() })
        .trigger(
            PollingTrigger::new(
                "new_ticket_in_view",
                "New ticket in view",
                "Triggers when a new ticket appears in the selected view",
                ViewTickets { api: api.clone() },
            )
            .with_props(
                PropertyMap::new().with("view_id", Property::dropdown("View", &[]).required()),
            )
            .with_sample_data(sample_ticket()),
        )
        .trigger(NewTicket {
            api: api.clone(),
            tolerance_seconds: config.webhook_signature_tolerance_seconds,
        })
        .options(Arc::new(ZendeskOptions { api: api.clone() }))
        .auth_validator(Arc::new(ZendeskAuthValidator { api }))
        .build()
}

fn sample_ticket() -> Value {
    json!({
        "id": 35436,
        "url": "https://company.zendesk.com/api/v2/tickets/35436.json",
        "subject": "Help, my printer is on fire!",
        "description": "The fire is very colorful.",
        "status": "open",
        "priority": "high",
        "requester_id": 20978392,
        "tags": ["enterprise", "other_tag"],
        "created_at": "2009-07-20T22:55:29Z"
    })
}

fn priority_options() -> Vec<DropdownOption> {
    ["urgent", "high", "normal", "low"]
        .iter()
        .map(|p| DropdownOption::new(*p, *p))
        .collect()
}

struct ZendeskAuthValidator {
    api: ZendeskApi,
}

#[async_trait]
impl AuthValidator for ZendeskAuthValidator {
    async fn validate(&self, auth: &AuthValue, http: &HttpClientFactory) -> Result<(), PieceError> {
        let me = self.api.client(http, auth)?.get("/users/me.json").send_json().await?;
        // Zendesk answers bad credentials with an anonymous user rather than 401
        match me.pointer("/user/id") {
            Some(Value::Number(_)) => Ok(()),
            _ => Err(PieceError::invalid_auth("Zendesk did not recognise these credentials")),
        }
    }
}

struct ZendeskOptions {
    api: ZendeskApi,
}

#[async_trait]
impl OptionsProvider for ZendeskOptions {
    async fn options(&self, prop: &str, ctx: &ActionContext) -> Result<DropdownState, PieceError> {
        if prop != "view_id" {
            return Err(PieceError::not_found(format!("options for property '{}'", prop)));
        }
        let Ok(client) = self.api.client(&ctx.http, &ctx.auth) else {
            return Ok(DropdownState::disabled("Connect your Zendesk account first"));
        };

        let response = client.get("/views.json").send_json().await?;
        Ok(DropdownState::options(
            list_field(&response, "views")?
                .iter()
                .filter_map(|view| {
                    let id = view.get("id")?.clone();
                    let title = view.get("title").and_then(Value::as_str).unwrap_or("Untitled");
                    Some(DropdownOption::new(title, id))
                })
                .collect(),
        ))
    }
}

struct CreateTicket {
    api: ZendeskApi,
}

#[async_trait]
impl Action for CreateTicket {
    fn name(&self) -> &str {
        "create_ticket"
    }

    fn display_name(&self) -> &str {
        "Create Ticket"
    }

    fn description(&self) -> &str {
        "Create a new support ticket"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("subject", Property::short_text("Subject").required())
            .with(
                "comment_body",
                Property::long_text("Comment Body")
                    .description("First comment of the ticket, shown as its description")
                    .required(),
            )
            .with("priority", Property::static_dropdown("Priority", priority_options()))
            .with("requester_email", Property::short_text("Requester Email"))
            .with("tags", Property::array("Tags"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut ticket = Map::new();
        ticket.insert("subject".into(), props.prop_str("subject")?.into());
        ticket.insert("comment".into(), json!({ "body": props.prop_str("comment_body")? }));
        insert_opt(&mut ticket, "priority", props.opt_str("priority"));
        if let Some(email) = props.opt_str("requester_email") {
            ticket.insert("requester".into(), json!({ "email": email }));
        }
        insert_opt(&mut ticket, "tags", props.opt_value("tags").cloned());

        self.api
            .client(&ctx.http, &ctx.auth)?
            .post("/tickets.json")
            .json(&json!({ "ticket": ticket }))
            .send_json()
            .await
    }
}

struct UpdateTicket {
    api: ZendeskApi,
}

#[async_trait]
impl Action for UpdateTicket {
    fn name(&self) -> &str {
        "update_ticket"
    }

    fn display_name(&self) -> &str {
        "Update Ticket"
    }

    fn description(&self) -> &str {
        "Change a ticket's status or priority, optionally with a comment"
    }

    fn props(&self) -> PropertyMap {
        let statuses = ["new", "open", "pending", "hold", "solved", "closed"]
            .iter()
            .map(|s| DropdownOption::new(*s, *s))
            .collect();
        PropertyMap::new()
            .with("ticket_id", Property::number("Ticket ID").required())
            .with("status", Property::static_dropdown("Status", statuses))
            .with("priority", Property::static_dropdown("Priority", priority_options()))
            .with("comment", Property::long_text("Comment"))
            .with("public", Property::checkbox("Public Comment").default_value(true))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let ticket_id = props.prop_i64("ticket_id")?;
        let mut ticket = Map::new();
        insert_opt(&mut ticket, "status", props.opt_str("status"));
        insert_opt(&mut ticket, "priority", props.opt_str("priority"));
        if let Some(body) = props.opt_str("comment") {
            ticket.insert(
                "comment".into(),
                json!({ "body": body, "public": props.opt_bool("public").unwrap_or(true) }),
            );
        }

        self.api
            .client(&ctx.http, &ctx.auth)?
            .put(&format!("/tickets/{}.json", ticket_id))
            .json(&json!({ "ticket": ticket }))
            .send_json()
            .await
    }
}

struct AddComment {
    api: ZendeskApi,
}

#[async_trait]
impl Action for AddComment {
    fn name(&self) -> &str {
        "add_comment"
    }

    fn display_name(&self) -> &str {
        "Add Comment"
    }

    fn description(&self) -> &str {
        "Add a public reply or internal note to a ticket"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("ticket_id", Property::number("Ticket ID").required())
            .with("body", Property::long_text("Comment").required())
            .with(
                "public",
                Property::checkbox("Public")
                    .description("Uncheck to add an internal note")
                    .default_value(true),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let ticket_id = props.prop_i64("ticket_id")?;
        let body = json!({
            "ticket": {
                "comment": {
                    "body": props.prop_str("body")?,
                    "public": props.opt_bool("public").unwrap_or(true),
                }
            }
        });

        self.api
            .client(&ctx.http, &ctx.auth)?
            .put(&format!("/tickets/{}.json", ticket_id))
            .json(&body)
            .send_json()
            .await
    }
}

/// Tickets of one view, newest first
struct ViewTickets {
    api: ZendeskApi,
}

#[async_trait]
impl PollingSource for ViewTickets {
    fn strategy(&self) -> DedupeStrategy {
        DedupeStrategy::LastItem
    }

    async fn items(
        &self,
        ctx: &TriggerContext,
        _fetch: &PollingFetch,
    ) -> Result<Vec<PolledItem>, PieceError> {
        let view_id = match ctx.props.opt_value("view_id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => ctx.props.prop_str("view_id")?.to_string(),
        };

        let response = self
            .api
            .client(&ctx.http, &ctx.auth)?
            .get(&format!("/views/{}/tickets.json", view_id))
            .query(&[
                ("sort_order", "desc".to_string()),
                ("sort_by", "created_at".to_string()),
                ("per_page", VIEW_PAGE_SIZE.to_string()),
            ])
            .send_json()
            .await?;

        Ok(list_field(&response, "tickets")?
            .into_iter()
            .map(|ticket| {
                let id = ticket.get("id").cloned().unwrap_or(Value::Null);
                PolledItem::keyed(id, ticket)
            })
            .collect())
    }
}

/// Webhook trigger fired by a Zendesk ticket trigger on ticket creation
struct NewTicket {
    api: ZendeskApi,
    tolerance_seconds: u64,
}

/// Body Zendesk sends for each new ticket; placeholders are filled by Zendesk
fn notification_body() -> String {
    json!({
        "ticket": {
            "id": "{{ticket.id}}",
            "url": "{{ticket.url}}",
            "subject": "{{ticket.title}}",
            "description": "{{ticket.description}}",
            "status": "{{ticket.status}}",
            "priority": "{{ticket.priority}}",
            "requester_email": "{{ticket.requester.email}}",
            "tags": "{{ticket.tags}}",
            "created_at": "{{ticket.created_at_with_timestamp}}"
        }
    })
    .to_string()
}

fn id_of(response: &Value, pointer: &str) -> Result<Value, PieceError> {
    response
        .pointer(pointer)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| PieceError::malformed(format!("response is missing {}", pointer)))
}

fn id_path(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fetch the webhook's signing secret and create the ticket trigger that
/// notifies it. Returns the trigger id. A trigger created here is removed
/// again when a later step fails; the caller owns the webhook.
async fn subscribe(
    client: &VendorClient,
    ctx: &TriggerContext,
    webhook_id: &Value,
) -> Result<Value, PieceError> {
    ctx.store.put(WEBHOOK_ID_KEY, webhook_id.clone()).await?;

    let secret = client
        .get(&format!("/webhooks/{}/signing_secret", id_path(webhook_id)))
        .send_json()
        .await?;
    let secret = id_of(&secret, "/signing_secret/secret")?;
    ctx.store.put(SIGNING_SECRET_KEY, secret).await?;

    let trigger = client
        .post("/triggers")
        .json(&json!({
            "trigger": {
                "title": "Automation: notify on new ticket",
                "conditions": {
                    "all": [{ "field": "update_type", "operator": "is", "value": "Create" }]
                },
                "actions": [{
                    "field": "notification_webhook",
                    "value": [id_path(webhook_id), notification_body()]
                }]
            }
        }))
        .send_json()
        .await?;
    let trigger_id = id_of(&trigger, "/trigger/id")?;

    if let Err(err) = ctx.store.put(TRIGGER_ID_KEY, trigger_id.clone()).await {
        if let Err(cleanup) = delete_resource(client, "triggers", &trigger_id).await {
            warn!(
                trigger_id = %id_path(&trigger_id),
                error = %cleanup,
                "Failed to remove Zendesk trigger after enabling failed"
            );
        }
        return Err(err);
    }
    Ok(trigger_id)
}

/// Delete `/{kind}/{id}`; a resource that is already gone counts as removed
async fn delete_resource(client: &VendorClient, kind: &str, id: &Value) -> Result<(), PieceError> {
    match client
        .delete(&format!("/{}/{}", kind, id_path(id)))
        .send_empty()
        .await
    {
        Err(PieceError::Http { status: 404, .. }) => {
            debug!(resource = kind, id = %id_path(id), "Zendesk resource already removed");
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl Trigger for NewTicket {
    fn name(&self) -> &str {
        "new_ticket"
    }

    fn display_name(&self) -> &str {
        "New Ticket"
    }

    fn description(&self) -> &str {
        "Triggers instantly when a ticket is created"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new().with(
            "instructions",
            Property::markdown("A Zendesk webhook and ticket trigger are created for you when this trigger is enabled, and removed when it is disabled."),
        )
    }

    fn strategy(&self) -> TriggerStrategy {
        TriggerStrategy::Webhook
    }

    fn sample_data(&self) -> Value {
        json!({ "ticket": sample_ticket() })
    }

    async fn on_enable(&self, ctx: &TriggerContext) -> Result<(), PieceError> {
        let client = self.api.client(&ctx.http, &ctx.auth)?;
        let endpoint = ctx.webhook_url()?;

        let webhook = client
            .post("/webhooks")
            .json(&json!({
                "webhook": {
                    "name": "Automation: new ticket",
                    "status": "active",
                    "endpoint": endpoint,
                    "http_method": "POST",
                    "request_format": "json",
                    "subscriptions": ["conditional_ticket_events"]
                }
            }))
            .send_json()
            .await?;
        let webhook_id = id_of(&webhook, "/webhook/id")?;

        match subscribe(&client, ctx, &webhook_id).await {
            Ok(trigger_id) => {
                info!(
                    webhook_id = %id_path(&webhook_id),
                    trigger_id = %id_path(&trigger_id),
                    "Zendesk webhook subscription created"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = delete_resource(&client, "webhooks", &webhook_id).await {
                    warn!(
                        webhook_id = %id_path(&webhook_id),
                        error = %cleanup,
                        "Failed to remove Zendesk webhook after enabling failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn on_disable(&self, ctx: &TriggerContext) -> Result<(), PieceError> {
        let client = self.api.client(&ctx.http, &ctx.auth)?;

        let mut outcome = Ok(());
        for (key, kind) in [(TRIGGER_ID_KEY, "triggers"), (WEBHOOK_ID_KEY, "webhooks")] {
            if let Some(id) = ctx.store.get(key).await?
                && let Err(err) = delete_resource(&client, kind, &id).await
            {
                warn!(resource = kind, id = %id_path(&id), error = %err, "Failed to remove Zendesk resource");
                outcome = outcome.and(Err(err));
            }
        }

        ctx.store.delete(TRIGGER_ID_KEY).await?;
        ctx.store.delete(WEBHOOK_ID_KEY).await?;
        ctx.store.delete(SIGNING_SECRET_KEY).await?;
        outcome
    }

    async fn run(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError> {
        let payload = ctx.payload()?;
        let secret = ctx
            .store
            .get(SIGNING_SECRET_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| PieceError::Configuration {
                details: "no Zendesk signing secret stored for this trigger".to_string(),
            })?;

        verify_timestamped_signature(
            &payload.raw_body,
            payload.header(SIGNATURE_HEADER).unwrap_or_default(),
            payload.header(SIGNATURE_TIMESTAMP_HEADER).unwrap_or_default(),
            &secret,
            self.tolerance_seconds,
            SignatureHeaders {
                signature: SIGNATURE_HEADER,
                timestamp: SIGNATURE_TIMESTAMP_HEADER,
            },
        )?;

        debug!("Zendesk webhook signature verified");
        Ok(vec![payload.body.clone()])
    }

    async fn test(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError> {
        let response = self
            .api
            .client(&ctx.http, &ctx.auth)?
            .get("/tickets.json")
            .query(&[
                ("sort_by", "created_at".to_string()),
                ("sort_order", "desc".to_string()),
                ("per_page", TEST_TICKET_COUNT.to_string()),
            ])
            .send_json()
            .await?;

        Ok(list_field(&response, "tickets")?
            .into_iter()
            .map(|ticket| json!({ "ticket": ticket }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{MemoryStore, WebhookPayload};
    use crate::pieces::piece_for_tests;
    use crate::webhook_verification::{SignatureEncoding, sign_hmac_sha256};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> PiecesConfig {
        PiecesConfig {
            zendesk_base_override: Some(server.uri()),
            ..Default::default()
        }
    }

    fn auth() -> AuthValue {
        AuthValue::Custom {
            props: json!({"email": "agent@acme.com", "token": "tok", "subdomain": "acme"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    fn trigger_ctx(props: Value) -> TriggerContext {
        TriggerContext {
            auth: auth(),
            props: props.as_object().cloned().unwrap_or_default(),
            store: Arc::new(MemoryStore::new()),
            webhook_url: Some("https://pieces.example.com/webhooks/abc".into()),
            payload: None,
            http: HttpClientFactory::default(),
        }
    }

    fn basic_header() -> String {
        crate::http::basic_credentials("agent@acme.com/token", "tok")
    }

    #[test]
    fn test_client_uses_subdomain_without_override() {
        let api = ZendeskApi { base_override: None };
        let client = api.client(&HttpClientFactory::default(), &auth()).unwrap();
        assert_eq!(
            client.url("/tickets.json"),
            "https://acme.zendesk.com/api/v2/tickets.json"
        );
    }

    #[tokio::test]
    async fn test_create_ticket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tickets.json"))
            .and(header("authorization", basic_header().as_str()))
            .and(body_partial_json(json!({
                "ticket": {
                    "subject": "Printer on fire",
                    "comment": {"body": "Please help"},
                    "priority": "urgent",
                    "requester": {"email": "customer@example.com"}
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": {"id": 99}})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let ctx = ActionContext::new(
            auth(),
            json!({
                "subject": "Printer on fire",
                "comment_body": "Please help",
                "priority": "urgent",
                "requester_email": "customer@example.com"
            })
            .as_object()
            .cloned()
            .unwrap(),
            HttpClientFactory::default(),
        );
        let output = piece.action("create_ticket").unwrap().run(&ctx).await.unwrap();
        assert_eq!(output["ticket"]["id"], 99);
    }

    #[tokio::test]
    async fn test_add_comment_defaults_to_public() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v2/tickets/12.json"))
            .and(body_partial_json(json!({
                "ticket": {"comment": {"body": "On it", "public": true}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": {"id": 12}})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let ctx = ActionContext::new(
            auth(),
            json!({"ticket_id": 12, "body": "On it"}).as_object().cloned().unwrap(),
            HttpClientFactory::default(),
        );
        piece.action("add_comment").unwrap().run(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_auth_rejects_anonymous_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users/me.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"id": null, "name": "Anonymous user"}})))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let err = piece
            .validate_auth(&auth(), &HttpClientFactory::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PieceError::InvalidAuth { .. }));
    }

    #[tokio::test]
    async fn test_view_dropdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/views.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "views": [{"id": 25, "title": "Unassigned"}, {"id": 26, "title": "Urgent"}]
            })))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let ctx = ActionContext::new(auth(), Map::new(), HttpClientFactory::default());
        let state = piece.options("view_id", &ctx).await.unwrap();
        assert_eq!(state.options[0], DropdownOption::new("Unassigned", 25));
        assert_eq!(state.options.len(), 2);
    }

    #[tokio::test]
    async fn test_new_ticket_in_view_polls_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/views/25/tickets.json"))
            .and(query_param("sort_order", "desc"))
            .and(query_param("sort_by", "created_at"))
            .and(query_param("per_page", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tickets": [{"id": 3}, {"id": 2}, {"id": 1}]
            })))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket_in_view").unwrap();
        let ctx = trigger_ctx(json!({"view_id": 25}));

        trigger.on_enable(&ctx).await.unwrap();
        assert_eq!(ctx.store.get("lastItem").await.unwrap(), Some(json!(3)));
        assert!(trigger.run(&ctx).await.unwrap().is_empty());

        let sample = trigger.test(&ctx).await.unwrap();
        assert_eq!(sample.len(), 3);
    }

    async fn mount_subscription(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v2/webhooks"))
            .and(body_partial_json(json!({
                "webhook": {"endpoint": "https://pieces.example.com/webhooks/abc"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"webhook": {"id": "01GWH"}})))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/webhooks/01GWH/signing_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signing_secret": {"algorithm": "SHA256", "secret": "shh"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_new_ticket_subscription_lifecycle() {
        let server = MockServer::start().await;
        mount_subscription(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/triggers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"trigger": {"id": 360}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/triggers/360"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/webhooks/01GWH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket").unwrap();
        let mut ctx = trigger_ctx(json!({}));

        trigger.on_enable(&ctx).await.unwrap();
        assert_eq!(ctx.store.get("signingSecret").await.unwrap(), Some(json!("shh")));
        assert_eq!(ctx.store.get("triggerId").await.unwrap(), Some(json!(360)));

        let body = br#"{"ticket":{"id":"7","subject":"Hello"}}"#;
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        let signature = sign_hmac_sha256(&message, "shh", SignatureEncoding::Base64);

        let mut payload = WebhookPayload {
            body: serde_json::from_slice(body).unwrap(),
            raw_body: body.to_vec(),
            ..Default::default()
        };
        payload.headers.insert(SIGNATURE_HEADER.into(), signature);
        payload
            .headers
            .insert(SIGNATURE_TIMESTAMP_HEADER.into(), timestamp);
        ctx.payload = Some(payload.clone());

        let events = trigger.run(&ctx).await.unwrap();
        assert_eq!(events, vec![json!({"ticket": {"id": "7", "subject": "Hello"}})]);

        payload.raw_body = br#"{"ticket":{"id":"8"}}"#.to_vec();
        ctx.payload = Some(payload);
        assert!(matches!(
            trigger.run(&ctx).await,
            Err(PieceError::Verification(_))
        ));

        trigger.on_disable(&ctx).await.unwrap();
        assert_eq!(ctx.store.get("signingSecret").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_new_ticket_removes_webhook_when_trigger_creation_fails() {
        let server = MockServer::start().await;
        mount_subscription(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/triggers"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "RecordInvalid"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/webhooks/01GWH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket").unwrap();
        let ctx = trigger_ctx(json!({}));

        let err = trigger.on_enable(&ctx).await.unwrap_err();
        assert!(matches!(err, PieceError::Http { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_new_ticket_removes_webhook_when_signing_secret_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/webhooks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"webhook": {"id": "W1"}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/webhooks/W1/signing_secret"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/triggers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"trigger": {"id": 1}})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/webhooks/W1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket").unwrap();
        let err = trigger.on_enable(&trigger_ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, PieceError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_new_ticket_removes_webhook_when_trigger_id_is_missing() {
        let server = MockServer::start().await;
        mount_subscription(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/triggers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"trigger": {}})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/webhooks/01GWH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket").unwrap();
        let err = trigger.on_enable(&trigger_ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, PieceError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_new_ticket_disable_tolerates_already_removed_trigger() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/triggers/360"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "RecordNotFound"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/webhooks/01GWH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "zendesk");
        let trigger = piece.trigger("new_ticket").unwrap();
        let ctx = trigger_ctx(json!({}));
        ctx.store.put("triggerId", json!(360)).await.unwrap();
        ctx.store.put("webhookId", json!("01GWH")).await.unwrap();
        ctx.store.put("signingSecret", json!("shh")).await.unwrap();

        trigger.on_disable(&ctx).await.unwrap();
        assert_eq!(ctx.store.get("triggerId").await.unwrap(), None);
        assert_eq!(ctx.store.get("webhookId").await.unwrap(), None);
        assert_eq!(ctx.store.get("signingSecret").await.unwrap(), None);
    }
}

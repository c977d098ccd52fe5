//! # Xero
//!
//! Accounting API. Every call is scoped to one organisation through the
//! `Xero-tenant-id` header, chosen by the user from their connections.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::config::PiecesConfig;
use crate::framework::{
    Action, ActionContext, AuthValue, DropdownOption, DropdownState, OptionsProvider, Piece,
    PieceAuth, PieceError, Property, PropertyMap, PropsExt, TriggerContext,
};
use crate::http::{HttpClientFactory, VendorAuth, VendorClient};
use crate::pieces::{insert_opt, list_field};
use crate::polling::{DedupeStrategy, PolledItem, PollingFetch, PollingSource, PollingTrigger};

const TENANT_HEADER: &str = "Xero-tenant-id";

/// `/Date(1573755038314+0000)/`
static MS_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/Date\((-?\d+)([+-]\d{4})?\)/$").expect("valid Microsoft JSON date regex")
});

/// Epoch millis from Xero's Microsoft JSON date, with an RFC 3339 fallback
pub fn parse_xero_date(value: &str) -> Option<i64> {
    if let Some(captures) = MS_DATE.captures(value.trim()) {
        return captures.get(1)?.as_str().parse().ok();
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.timestamp_millis())
}

/// `If-Modified-Since` value; Xero compares at second precision in UTC
fn if_modified_since(epoch_millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(epoch_millis).map(|ts| ts.format("%Y-%m-%dT%H:%M:%S").to_string())
}

#[derive(Debug, Clone)]
struct XeroApi {
    base_url: String,
    connections_url: String,
}

impl XeroApi {
    fn client(
        &self,
        http: &HttpClientFactory,
        auth: &AuthValue,
        props: &Map<String, Value>,
    ) -> Result<VendorClient, PieceError> {
        Ok(http
            .client(
                &self.base_url,
                VendorAuth::Bearer(auth.access_token()?.to_string()),
            )
            .with_header(TENANT_HEADER, props.prop_str("tenant_id")?))
    }
}

fn tenant_prop() -> Property {
    Property::dropdown("Organization", &[])
        .description("Xero organisation to work in")
        .required()
}

pub fn piece(config: &PiecesConfig) -> Piece {
    let api = XeroApi {
        base_url: config.xero_api_base.clone(),
        connections_url: config.xero_connections_url.clone(),
    };

    Piece::builder("xero", "Xero")
        .description("Beautiful accounting software")
        .logo_url("https://cdn.activepieces.com/pieces/xero.png")
        .categories(&["ACCOUNTING"])
        .auth(PieceAuth::OAuth2 {
            auth_url: "https://login.xero.com/identity/connect/authorize".into(),
            token_url: "https://identity.xero.com/connect/token".into(),
            scopes: ["accounting.transactions", "accounting.contacts", "offline_access"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
        .action(CreateOrUpdateContact { api: api.clone() })
        .action(CreateInvoice { api: api.clone() })
        .action(CreatePayment { api: api.clone() })
        .trigger(
            PollingTrigger::new(
                "new_contact",
                "New Contact",
                "Triggers when a contact is created or updated",
                ModifiedSince {
                    api: api.clone(),
                    path: "/Contacts",
                    field: "Contacts",
                },
            )
            .with_props(PropertyMap::new().with("tenant_id", tenant_prop()))
            .with_sample_data(json!({
                "ContactID": "bd2270c3-8706-4c11-9cfb-000b551c3f51",
                "ContactStatus": "ACTIVE",
                "Name": "ABC Limited",
                "EmailAddress": "john@abc.com",
                "UpdatedDateUTC": "/Date(1573755038314+0000)/"
            })),
        )
        .trigger(
            PollingTrigger::new(
                "new_invoice",
                "New Invoice",
                "Triggers when an invoice is created or updated",
                ModifiedSince {
                    api: api.clone(),
                    path: "/Invoices",
                    field: "Invoices",
                },
            )
            .with_props(PropertyMap::new().with("tenant_id", tenant_prop()))
            .with_sample_data(json!({
                "Type": "ACCREC",
                "InvoiceID": "243216c5-369e-4056-ac67-05388f86dc81",
                "InvoiceNumber": "INV-0001",
                "Status": "DRAFT",
                "Total": 100.0,
                "UpdatedDateUTC": "/Date(1573755038314+0000)/"
            })),
        )
        .options(Arc::new(XeroOptions { api }))
        .build()
}

struct XeroOptions {
    api: XeroApi,
}

#[async_trait]
impl OptionsProvider for XeroOptions {
    async fn options(&self, prop: &str, ctx: &ActionContext) -> Result<DropdownState, PieceError> {
        if prop != "tenant_id" {
            return Err(PieceError::not_found(format!("options for property '{}'", prop)));
        }
        let Ok(token) = ctx.auth.access_token() else {
            return Ok(DropdownState::disabled("Connect your Xero account first"));
        };

        let connections = ctx
            .http
            .client(&self.api.connections_url, VendorAuth::Bearer(token.to_string()))
            .get("")
            .send_json()
            .await?;
        let connections = match connections {
            Value::Array(items) => items,
            _ => return Err(PieceError::malformed("expected a list of connections")),
        };

        Ok(DropdownState::options(
            connections
                .iter()
                .filter_map(|c| {
                    let id = c.get("tenantId")?.as_str()?;
                    let name = c.get("tenantName").and_then(Value::as_str).unwrap_or(id);
                    Some(DropdownOption::new(name, id))
                })
                .collect(),
        ))
    }
}

struct CreateOrUpdateContact {
    api: XeroApi,
}

#[async_trait]
impl Action for CreateOrUpdateContact {
    fn name(&self) -> &str {
        "create_or_update_contact"
    }

    fn display_name(&self) -> &str {
        "Create or Update Contact"
    }

    fn description(&self) -> &str {
        "Creates a contact, or updates it when a contact ID is given"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("tenant_id", tenant_prop())
            .with(
                "contact_id",
                Property::short_text("Contact ID").description("Leave empty to create a new contact"),
            )
            .with("name", Property::short_text("Name").required())
            .with("email", Property::short_text("Email"))
            .with("first_name", Property::short_text("First Name"))
            .with("last_name", Property::short_text("Last Name"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut contact = Map::new();
        insert_opt(&mut contact, "ContactID", props.opt_str("contact_id"));
        contact.insert("Name".into(), props.prop_str("name")?.into());
        insert_opt(&mut contact, "EmailAddress", props.opt_str("email"));
        insert_opt(&mut contact, "FirstName", props.opt_str("first_name"));
        insert_opt(&mut contact, "LastName", props.opt_str("last_name"));

        self.api
            .client(&ctx.http, &ctx.auth, props)?
            .post("/Contacts")
            .json(&json!({ "Contacts": [contact] }))
            .send_json()
            .await
    }
}

struct CreateInvoice {
    api: XeroApi,
}

#[async_trait]
impl Action for CreateInvoice {
    fn name(&self) -> &str {
        "create_invoice"
    }

    fn display_name(&self) -> &str {
        "Create Invoice"
    }

    fn description(&self) -> &str {
        "Create a sales or purchase invoice with one line item"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("tenant_id", tenant_prop())
            .with(
                "type",
                Property::static_dropdown(
                    "Type",
                    vec![
                        DropdownOption::new("Sales invoice", "ACCREC"),
                        DropdownOption::new("Bill", "ACCPAY"),
                    ],
                )
                .default_value("ACCREC")
                .required(),
            )
            .with("contact_id", Property::short_text("Contact ID").required())
            .with("description", Property::long_text("Line Description").required())
            .with("quantity", Property::number("Quantity").default_value(1))
            .with("unit_amount", Property::number("Unit Amount").required())
            .with("account_code", Property::short_text("Account Code"))
            .with("date", Property::short_text("Date").description("YYYY-MM-DD"))
            .with("due_date", Property::short_text("Due Date").description("YYYY-MM-DD"))
            .with("reference", Property::short_text("Reference"))
            .with(
                "status",
                Property::static_dropdown(
                    "Status",
                    vec![
                        DropdownOption::new("Draft", "DRAFT"),
                        DropdownOption::new("Submitted", "SUBMITTED"),
                        DropdownOption::new("Authorised", "AUTHORISED"),
                    ],
                )
                .default_value("DRAFT"),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut line = Map::new();
        line.insert("Description".into(), props.prop_str("description")?.into());
        line.insert("Quantity".into(), props.opt_f64("quantity").unwrap_or(1.0).into());
        line.insert(
            "UnitAmount".into(),
            props
                .opt_f64("unit_amount")
                .ok_or_else(|| PieceError::InvalidProps(crate::framework::property::PropertyError::Missing {
                    name: "unit_amount".into(),
                }))?
                .into(),
        );
        insert_opt(&mut line, "AccountCode", props.opt_str("account_code"));

        let mut invoice = Map::new();
        invoice.insert("Type".into(), props.opt_str("type").unwrap_or("ACCREC").into());
        invoice.insert("Contact".into(), json!({ "ContactID": props.prop_str("contact_id")? }));
        invoice.insert("LineItems".into(), json!([line]));
        invoice.insert("Status".into(), props.opt_str("status").unwrap_or("DRAFT").into());
        insert_opt(&mut invoice, "Date", props.opt_str("date"));
        insert_opt(&mut invoice, "DueDate", props.opt_str("due_date"));
        insert_opt(&mut invoice, "Reference", props.opt_str("reference"));

        self.api
            .client(&ctx.http, &ctx.auth, props)?
            .put("/Invoices")
            .json(&json!({ "Invoices": [invoice] }))
            .send_json()
            .await
    }
}

struct CreatePayment {
    api: XeroApi,
}

#[async_trait]
impl Action for CreatePayment {
    fn name(&self) -> &str {
        "create_payment"
    }

    fn display_name(&self) -> &str {
        "Create Payment"
    }

    fn description(&self) -> &str {
        "Apply a payment to an invoice"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("tenant_id", tenant_prop())
            .with("invoice_id", Property::short_text("Invoice ID").required())
            .with(
                "account_code",
                Property::short_text("Account Code").description("Bank account the payment is made from or to").required(),
            )
            .with("amount", Property::number("Amount").required())
            .with("date", Property::short_text("Date").description("YYYY-MM-DD, defaults to today"))
            .with("reference", Property::short_text("Reference"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let amount = props.opt_f64("amount").ok_or_else(|| {
            PieceError::InvalidProps(crate::framework::property::PropertyError::Missing {
                name: "amount".into(),
            })
        })?;

        let mut payment = Map::new();
        payment.insert("Invoice".into(), json!({ "InvoiceID": props.prop_str("invoice_id")? }));
        payment.insert("Account".into(), json!({ "Code": props.prop_str("account_code")? }));
        payment.insert("Amount".into(), amount.into());
        let date = props
            .opt_str("date")
            .map(str::to_string)
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());
        payment.insert("Date".into(), date.into());
        insert_opt(&mut payment, "Reference", props.opt_str("reference"));

        self.api
            .client(&ctx.http, &ctx.auth, props)?
            .put("/Payments")
            .json(&json!({ "Payments": [payment] }))
            .send_json()
            .await
    }
}

/// Lists records changed since the last poll via `If-Modified-Since`
struct ModifiedSince {
    api: XeroApi,
    path: &'static str,
    field: &'static str,
}

#[async_trait]
impl PollingSource for ModifiedSince {
    fn strategy(&self) -> DedupeStrategy {
        DedupeStrategy::TimeBased
    }

    async fn items(
        &self,
        ctx: &TriggerContext,
        fetch: &PollingFetch,
    ) -> Result<Vec<PolledItem>, PieceError> {
        let mut request = self
            .api
            .client(&ctx.http, &ctx.auth, &ctx.props)?
            .get(self.path)
            .query(&[("order", "UpdatedDateUTC DESC")]);
        if fetch.last_fetch_epoch_millis > 0
            && let Some(since) = if_modified_since(fetch.last_fetch_epoch_millis)
        {
            request = request.header("If-Modified-Since", since);
        }

        let response = request.send_json().await?;
        Ok(list_field(&response, self.field)?
            .into_iter()
            .filter_map(|record| {
                let updated = record
                    .get("UpdatedDateUTC")
                    .and_then(Value::as_str)
                    .and_then(parse_xero_date)?;
                Some(PolledItem::timed(updated, record))
            })
            .collect())
    }
}

//! # Bexio
//!
//! Swiss accounting: contacts, articles and invoices. Credentials are OAuth2
//! access tokens obtained by the host.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::PiecesConfig;
use crate::framework::{
    Action, ActionContext, AuthValue, DropdownOption, Piece, PieceAuth, PieceError, Property,
    PropertyMap, PropsExt, TriggerContext,
};
use crate::http::{HttpClientFactory, VendorAuth, VendorClient};
use crate::pieces::{insert_opt, list_field};
use crate::polling::{DedupeStrategy, PolledItem, PollingFetch, PollingSource, PollingTrigger};

const CONTACT_TYPE_COMPANY: i64 = 1;
const CONTACT_TYPE_PERSON: i64 = 2;
const ARTICLE_TYPE_PHYSICAL: i64 = 1;
const POLL_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
struct BexioApi {
    base_url: String,
}

impl BexioApi {
    fn client(&self, http: &HttpClientFactory, auth: &AuthValue) -> Result<VendorClient, PieceError> {
        Ok(http.client(
            &self.base_url,
            VendorAuth::Bearer(auth.access_token()?.to_string()),
        ))
    }
}

pub fn piece(config: &PiecesConfig) -> Piece {
    let api = BexioApi {
        base_url: config.bexio_api_base.clone(),
    };

    Piece::builder("bexio", "Bexio")
        .description("Business software for Swiss SMEs: contacts, products and invoices")
        .logo_url("https://cdn.activepieces.com/pieces/bexio.png")
        .categories(&["ACCOUNTING"])
        .auth(PieceAuth::OAuth2 {
            auth_url: "https://auth.bexio.com/realms/bexio/protocol/openid-connect/auth".into(),
            token_url: "https://auth.bexio.com/realms/bexio/protocol/openid-connect/token".into(),
            scopes: ["openid", "offline_access", "contact_edit", "article_edit", "kb_invoice_edit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
        .action(CreateCompany { api: api.clone() })
        .action(CreatePerson { api: api.clone() })
        .action(SearchContacts { api: api.clone() })
        .action(CreateProduct { api: api.clone() })
        .action(CreateInvoice { api: api.clone() })
        .trigger(
            PollingTrigger::new(
                "new_contact",
                "New Contact",
                "Triggers when a contact is created",
                NewestFirst {
                    api: api.clone(),
                    path: "/2.0/contact",
                },
            )
            .with_sample_data(json!({
                "id": 4,
                "nr": "000004",
                "contact_type_id": 1,
                "name_1": "Example Company",
                "mail": "contact@example.com",
                "user_id": 1,
                "owner_id": 1
            })),
        )
        .trigger(
            PollingTrigger::new(
                "new_invoice",
                "New Invoice",
                "Triggers when an invoice is created",
                NewestFirst {
                    api,
                    path: "/2.0/kb_invoice",
                },
            )
            .with_sample_data(json!({
                "id": 4,
                "document_nr": "RE-00004",
                "title": "Consulting",
                "contact_id": 14,
                "total": "1250.000000",
                "kb_item_status_id": 7
            })),
        )
        .build()
}

fn ownership_props(props: PropertyMap) -> PropertyMap {
    props
        .with(
            "owner_id",
            Property::number("Owner ID")
                .description("Bexio user that owns the record")
                .required(),
        )
        .with(
            "user_id",
            Property::number("User ID")
                .description("Bexio user responsible for the record")
                .required(),
        )
}

fn contact_fields(body: &mut Map<String, Value>, props: &Map<String, Value>) {
    insert_opt(body, "mail", props.opt_str("mail"));
    insert_opt(body, "phone_fixed", props.opt_str("phone"));
    insert_opt(body, "address", props.opt_str("address"));
    insert_opt(body, "postcode", props.opt_str("postcode"));
    insert_opt(body, "city", props.opt_str("city"));
    insert_opt(body, "country_id", props.opt_i64("country_id"));
    insert_opt(body, "remarks", props.opt_str("remarks"));
}

struct CreateCompany {
    api: BexioApi,
}

#[async_trait]
impl Action for CreateCompany {
    fn name(&self) -> &str {
        "create_company"
    }

    fn display_name(&self) -> &str {
        "Create Company"
    }

    fn description(&self) -> &str {
        "Create a company contact"
    }

    fn props(&self) -> PropertyMap {
        ownership_props(PropertyMap::new().with("name", Property::short_text("Company Name").required()))
            .with("mail", Property::short_text("Email"))
            .with("phone", Property::short_text("Phone"))
            .with("address", Property::short_text("Address"))
            .with("postcode", Property::short_text("Postcode"))
            .with("city", Property::short_text("City"))
            .with("country_id", Property::number("Country ID"))
            .with("remarks", Property::long_text("Remarks"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut body = Map::new();
        body.insert("contact_type_id".into(), CONTACT_TYPE_COMPANY.into());
        body.insert("name_1".into(), props.prop_str("name")?.into());
        body.insert("owner_id".into(), props.prop_i64("owner_id")?.into());
        body.insert("user_id".into(), props.prop_i64("user_id")?.into());
        contact_fields(&mut body, props);

        self.api
            .client(&ctx.http, &ctx.auth)?
            .post("/2.0/contact")
            .json(&body)
            .send_json()
            .await
    }
}

struct CreatePerson {
    api: BexioApi,
}

#[async_trait]
impl Action for CreatePerson {
    fn name(&self) -> &str {
        "create_person"
    }

    fn display_name(&self) -> &str {
        "Create Person"
    }

    fn description(&self) -> &str {
        "Create a person contact"
    }

    fn props(&self) -> PropertyMap {
        ownership_props(
            PropertyMap::new()
                .with("first_name", Property::short_text("First Name"))
                .with("last_name", Property::short_text("Last Name").required()),
        )
        .with("mail", Property::short_text("Email"))
        .with("phone", Property::short_text("Phone"))
        .with("address", Property::short_text("Address"))
        .with("postcode", Property::short_text("Postcode"))
        .with("city", Property::short_text("City"))
        .with("country_id", Property::number("Country ID"))
        .with("remarks", Property::long_text("Remarks"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut body = Map::new();
        body.insert("contact_type_id".into(), CONTACT_TYPE_PERSON.into());
        // name_1 is the family name for persons
        body.insert("name_1".into(), props.prop_str("last_name")?.into());
        insert_opt(&mut body, "name_2", props.opt_str("first_name"));
        body.insert("owner_id".into(), props.prop_i64("owner_id")?.into());
        body.insert("user_id".into(), props.prop_i64("user_id")?.into());
        contact_fields(&mut body, props);

        self.api
            .client(&ctx.http, &ctx.auth)?
            .post("/2.0/contact")
            .json(&body)
            .send_json()
            .await
    }
}

struct SearchContacts {
    api: BexioApi,
}

#[async_trait]
impl Action for SearchContacts {
    fn name(&self) -> &str {
        "search_contacts"
    }

    fn display_name(&self) -> &str {
        "Search Contacts"
    }

    fn description(&self) -> &str {
        "Search contacts by a single field"
    }

    fn props(&self) -> PropertyMap {
        let fields = ["name_1", "name_2", "nr", "mail", "city", "postcode", "phone_fixed"]
            .iter()
            .map(|f| DropdownOption::new(*f, *f))
            .collect();
        let criteria = [
            ("Equals", "="),
            ("Contains", "like"),
            ("Does not equal", "!="),
            ("Not contains", "not_like"),
            ("Is empty", "is_null"),
            ("Is not empty", "not_null"),
        ]
        .iter()
        .map(|(label, value)| DropdownOption::new(*label, *value))
        .collect();

        PropertyMap::new()
            .with("field", Property::static_dropdown("Field", fields).required())
            .with("value", Property::short_text("Value"))
            .with(
                "criteria",
                Property::static_dropdown("Criteria", criteria).default_value("like"),
            )
            .with(
                "limit",
                Property::number("Limit").description("Maximum number of contacts to return"),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let criteria = props.opt_str("criteria").unwrap_or("like");
        let search = json!([{
            "field": props.prop_str("field")?,
            "value": props.opt_str("value").unwrap_or_default(),
            "criteria": criteria,
        }]);

        let mut request = self
            .api
            .client(&ctx.http, &ctx.auth)?
            .post("/2.0/contact/search");
        if let Some(limit) = props.opt_i64("limit") {
            request = request.query(&[("limit", limit)]);
        }
        request.json(&search).send_json().await
    }
}

struct CreateProduct {
    api: BexioApi,
}

#[async_trait]
impl Action for CreateProduct {
    fn name(&self) -> &str {
        "create_product"
    }

    fn display_name(&self) -> &str {
        "Create Product"
    }

    fn description(&self) -> &str {
        "Create an article in the product catalogue"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("intern_code", Property::short_text("Product Code").required())
            .with("intern_name", Property::short_text("Product Name").required())
            .with("intern_description", Property::long_text("Description"))
            .with("user_id", Property::number("User ID"))
            .with("sale_price", Property::number("Sale Price"))
            .with("purchase_price", Property::number("Purchase Price"))
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut body = Map::new();
        body.insert("article_type_id".into(), ARTICLE_TYPE_PHYSICAL.into());
        body.insert("intern_code".into(), props.prop_str("intern_code")?.into());
        body.insert("intern_name".into(), props.prop_str("intern_name")?.into());
        insert_opt(&mut body, "intern_description", props.opt_str("intern_description"));
        insert_opt(&mut body, "user_id", props.opt_i64("user_id"));
        // Bexio expects prices as decimal strings
        insert_opt(
            &mut body,
            "sale_price",
            props.opt_f64("sale_price").map(|p| p.to_string()),
        );
        insert_opt(
            &mut body,
            "purchase_price",
            props.opt_f64("purchase_price").map(|p| p.to_string()),
        );

        self.api
            .client(&ctx.http, &ctx.auth)?
            .post("/2.0/article")
            .json(&body)
            .send_json()
            .await
    }
}

struct CreateInvoice {
    api: BexioApi,
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
        "Create a draft invoice"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("title", Property::short_text("Title"))
            .with("contact_id", Property::number("Contact ID").required())
            .with("user_id", Property::number("User ID").required())
            .with(
                "positions",
                Property::json("Positions")
                    .description("Invoice positions as a JSON array, e.g. [{\"type\":\"KbPositionCustom\",\"amount\":\"1\",\"text\":\"Consulting\",\"unit_price\":\"100\",\"tax_id\":3}]")
                    .default_value(json!([])),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let positions = match props.opt_value("positions") {
            None => Value::Array(Vec::new()),
            Some(Value::Array(items)) => Value::Array(items.clone()),
            Some(_) => {
                return Err(PieceError::InvalidProps(
                    crate::framework::property::PropertyError::InvalidType {
                        name: "positions".into(),
                        expected: "JSON array".into(),
                    },
                ));
            }
        };

        let mut body = Map::new();
        insert_opt(&mut body, "title", props.opt_str("title"));
        body.insert("contact_id".into(), props.prop_i64("contact_id")?.into());
        body.insert("user_id".into(), props.prop_i64("user_id")?.into());
        body.insert("positions".into(), positions);

        self.api
            .client(&ctx.http, &ctx.auth)?
            .post("/2.0/kb_invoice")
            .json(&body)
            .send_json()
            .await
    }
}

/// Lists a Bexio collection by descending id
struct NewestFirst {
    api: BexioApi,
    path: &'static str,
}

#[async_trait]
impl PollingSource for NewestFirst {
    fn strategy(&self) -> DedupeStrategy {
        DedupeStrategy::LastItem
    }

    async fn items(
        &self,
        ctx: &TriggerContext,
        _fetch: &PollingFetch,
    ) -> Result<Vec<PolledItem>, PieceError> {
        let response = self
            .api
            .client(&ctx.http, &ctx.auth)?
            .get(self.path)
            .query(&[
                ("order_by", "id_desc".to_string()),
                ("limit", POLL_PAGE_SIZE.to_string()),
            ])
            .send_json()
            .await?;

        let records = match response {
            Value::Array(records) => records,
            Value::Null => Vec::new(),
            other => list_field(&other, "data")?,
        };
        debug!(path = self.path, records = records.len(), "Fetched Bexio records");

        Ok(records
            .into_iter()
            .map(|record| {
                let id = record.get("id").cloned().unwrap_or(Value::Null);
                PolledItem::keyed(id, record)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::MemoryStore;
    use crate::pieces::piece_for_tests;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> PiecesConfig {
        PiecesConfig {
            bexio_api_base: server.uri(),
            ..Default::default()
        }
    }

    fn oauth() -> AuthValue {
        AuthValue::OAuth2 {
            access_token: "bexio-token".into(),
            data: Map::new(),
        }
    }

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn trigger_ctx() -> TriggerContext {
        TriggerContext {
            auth: oauth(),
            props: Map::new(),
            store: Arc::new(MemoryStore::new()),
            webhook_url: None,
            payload: None,
            http: HttpClientFactory::default(),
        }
    }

    #[tokio::test]
    async fn test_create_company_posts_contact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2.0/contact"))
            .and(header("authorization", "Bearer bexio-token"))
            .and(body_json(json!({
                "contact_type_id": 1,
                "name_1": "Acme AG",
                "owner_id": 1,
                "user_id": 2,
                "mail": "info@acme.ch",
                "city": "Zürich"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42, "name_1": "Acme AG"})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "bexio");
        let action = piece.action("create_company").unwrap();
        let values = crate::framework::property::validate_props(
            &action.props(),
            &props(json!({
                "name": "Acme AG",
                "owner_id": "1",
                "user_id": 2,
                "mail": "info@acme.ch",
                "city": "Zürich",
                "phone": ""
            })),
        )
        .unwrap();

        let ctx = ActionContext::new(oauth(), values, HttpClientFactory::default());
        let output = action.run(&ctx).await.unwrap();
        assert_eq!(output["id"], 42);
    }

    #[tokio::test]
    async fn test_create_person_maps_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2.0/contact"))
            .and(body_json(json!({
                "contact_type_id": 2,
                "name_1": "Muster",
                "name_2": "Max",
                "owner_id": 1,
                "user_id": 1
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "bexio");
        let ctx = ActionContext::new(
            oauth(),
            props(json!({"first_name": "Max", "last_name": "Muster", "owner_id": 1, "user_id": 1})),
            HttpClientFactory::default(),
        );
        let output = piece.action("create_person").unwrap().run(&ctx).await.unwrap();
        assert_eq!(output["id"], 7);
    }

    #[tokio::test]
    async fn test_search_contacts_builds_criteria() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2.0/contact/search"))
            .and(body_json(json!([{"field": "mail", "value": "acme", "criteria": "like"}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "bexio");
        let ctx = ActionContext::new(
            oauth(),
            props(json!({"field": "mail", "value": "acme"})),
            HttpClientFactory::default(),
        );
        let output = piece.action("search_contacts").unwrap().run(&ctx).await.unwrap();
        assert_eq!(output.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_invoice_rejects_non_array_positions() {
        let piece = piece_for_tests(&PiecesConfig::default(), "bexio");
        let ctx = ActionContext::new(
            oauth(),
            props(json!({"contact_id": 1, "user_id": 1, "positions": {"text": "x"}})),
            HttpClientFactory::default(),
        );
        let err = piece.action("create_invoice").unwrap().run(&ctx).await.unwrap_err();
        assert!(matches!(err, PieceError::InvalidProps(_)));
    }

    #[tokio::test]
    async fn test_new_contact_trigger_emits_only_unseen_contacts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2.0/contact"))
            .and(query_param("order_by", "id_desc"))
            .and(query_param("limit", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": 12}, {"id": 11}, {"id": 10}])),
            )
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "bexio");
        let trigger = piece.trigger("new_contact").unwrap();
        let ctx = trigger_ctx();

        ctx.store.put("lastItem", json!(10)).await.unwrap();
        let events = trigger.run(&ctx).await.unwrap();
        assert_eq!(events, vec![json!({"id": 12}), json!({"id": 11})]);
        assert_eq!(ctx.store.get("lastItem").await.unwrap(), Some(json!(12)));

        let events = trigger.run(&ctx).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_action_requires_oauth_token() {
        let piece = piece_for_tests(&PiecesConfig::default(), "bexio");
        let ctx = ActionContext::new(
            AuthValue::None,
            props(json!({"name": "Acme", "owner_id": 1, "user_id": 1})),
            HttpClientFactory::default(),
        );
        let err = piece.action("create_company").unwrap().run(&ctx).await.unwrap_err();
        assert!(matches!(err, PieceError::InvalidAuth { .. }));
    }
}

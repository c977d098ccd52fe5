//! # Pinecone
//!
//! Vector database. Index management goes through the control plane; vector
//! operations go to the per-index data plane host, which is looked up with a
//! describe call before each request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::PiecesConfig;
use crate::framework::{
    Action, ActionContext, AuthValidator, AuthValue, DropdownOption, DropdownState,
    OptionsProvider, Piece, PieceAuth, PieceError, Property, PropertyMap, PropsExt,
    property::PropertyError,
};
use crate::http::{HttpClientFactory, VendorAuth, VendorClient};
use crate::pieces::{insert_opt, list_field};

pub const API_VERSION: &str = "2024-10";
const DEFAULT_TOP_K: i64 = 10;

#[derive(Debug, Clone)]
struct PineconeApi {
    control_base: String,
}

impl PineconeApi {
    fn control(&self, http: &HttpClientFactory, auth: &AuthValue) -> Result<VendorClient, PieceError> {
        self.with_key(http, &self.control_base, auth)
    }

    fn with_key(
        &self,
        http: &HttpClientFactory,
        base_url: &str,
        auth: &AuthValue,
    ) -> Result<VendorClient, PieceError> {
        Ok(http
            .client(
                base_url,
                VendorAuth::Header {
                    name: "Api-Key".to_string(),
                    value: auth.secret()?.to_string(),
                },
            )
            .with_header("X-Pinecone-API-Version", API_VERSION))
    }

    /// Client bound to the data plane host of `index`
    async fn data_plane(
        &self,
        http: &HttpClientFactory,
        auth: &AuthValue,
        index: &str,
    ) -> Result<VendorClient, PieceError> {
        let description = self
            .control(http, auth)?
            .get(&format!("/indexes/{}", index))
            .send_json()
            .await?;
        let host = description
            .get("host")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PieceError::malformed(format!("index '{}' has no host yet", index)))?;

        debug!(index, host, "Resolved Pinecone index host");
        self.with_key(http, &data_plane_url(host), auth)
    }
}

/// Index hosts come back without a scheme
fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn index_prop() -> Property {
    Property::dropdown("Index", &[]).required()
}

fn namespace_prop() -> Property {
    Property::short_text("Namespace").description("Leave empty for the default namespace")
}

pub fn piece(config: &PiecesConfig) -> Piece {
    let api = PineconeApi {
        control_base: config.pinecone_control_base.clone(),
    };

    Piece::builder("pinecone", "Pinecone")
        .description("Managed vector database for similarity search")
        .logo_url("https://cdn.activepieces.com/pieces/pinecone.png")
        .categories(&["ARTIFICIAL_INTELLIGENCE"])
        .auth(PieceAuth::SecretText {
            display_name: "API Key".into(),
            description: Some("Create a key in the Pinecone console under API Keys".into()),
        })
        .action(CreateIndex { api: api.clone() })
        .action(DescribeIndex { api: api.clone() })
        .action(DeleteIndex { api: api.clone() })
        .action(UpsertVectors { api: api.clone() })
        .action(QueryVectors { api: api.clone() })
        .action(FetchVectors { api: api.clone() })
        .action(DeleteVectors { api: api.clone() })
        .options(Arc::new(PineconeOptions { api: api.clone() }))
        .auth_validator(Arc::new(PineconeAuthValidator { api }))
        .build()
}

struct PineconeAuthValidator {
    api: PineconeApi,
}

#[async_trait]
impl AuthValidator for PineconeAuthValidator {
    async fn validate(&self, auth: &AuthValue, http: &HttpClientFactory) -> Result<(), PieceError> {
        self.api.control(http, auth)?.get("/indexes").send_empty().await
    }
}

struct PineconeOptions {
    api: PineconeApi,
}

#[async_trait]
impl OptionsProvider for PineconeOptions {
    async fn options(&self, prop: &str, ctx: &ActionContext) -> Result<DropdownState, PieceError> {
        if prop != "index" {
            return Err(PieceError::not_found(format!("options for property '{}'", prop)));
        }
        let Ok(client) = self.api.control(&ctx.http, &ctx.auth) else {
            return Ok(DropdownState::disabled("Connect your Pinecone account first"));
        };

        let response = client.get("/indexes").send_json().await?;
        Ok(DropdownState::options(
            list_field(&response, "indexes")?
                .iter()
                .filter_map(|index| index.get("name").and_then(Value::as_str))
                .map(|name| DropdownOption::new(name, name))
                .collect(),
        ))
    }
}

struct CreateIndex {
    api: PineconeApi,
}

#[async_trait]
impl Action for CreateIndex {
    fn name(&self) -> &str {
        "create_index"
    }

    fn display_name(&self) -> &str {
        "Create Index"
    }

    fn description(&self) -> &str {
        "Create a serverless index"
    }

    fn props(&self) -> PropertyMap {
        let metrics = ["cosine", "euclidean", "dotproduct"]
            .iter()
            .map(|m| DropdownOption::new(*m, *m))
            .collect();
        let clouds = [("AWS", "aws"), ("Google Cloud", "gcp"), ("Azure", "azure")]
            .iter()
            .map(|(label, value)| DropdownOption::new(*label, *value))
            .collect();
        PropertyMap::new()
            .with(
                "name",
                Property::short_text("Index Name")
                    .description("Lowercase alphanumeric characters and hyphens")
                    .required(),
            )
            .with("dimension", Property::number("Dimension").required())
            .with(
                "metric",
                Property::static_dropdown("Metric", metrics).default_value("cosine"),
            )
            .with(
                "cloud",
                Property::static_dropdown("Cloud", clouds).default_value("aws"),
            )
            .with(
                "region",
                Property::short_text("Region").default_value("us-east-1"),
            )
            .with(
                "deletion_protection",
                Property::checkbox("Deletion Protection").default_value(false),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let dimension = props.prop_i64("dimension")?;
        if dimension <= 0 {
            return Err(PropertyError::InvalidType {
                name: "dimension".to_string(),
                expected: "positive number".to_string(),
            }
            .into());
        }

        let protection = if props.opt_bool("deletion_protection").unwrap_or(false) {
            "enabled"
        } else {
            "disabled"
        };
        let body = json!({
            "name": props.prop_str("name")?,
            "dimension": dimension,
            "metric": props.opt_str("metric").unwrap_or("cosine"),
            "deletion_protection": protection,
            "spec": {
                "serverless": {
                    "cloud": props.opt_str("cloud").unwrap_or("aws"),
                    "region": props.opt_str("region").unwrap_or("us-east-1"),
                }
            }
        });

        self.api
            .control(&ctx.http, &ctx.auth)?
            .post("/indexes")
            .json(&body)
            .send_json()
            .await
    }
}

struct DescribeIndex {
    api: PineconeApi,
}

#[async_trait]
impl Action for DescribeIndex {
    fn name(&self) -> &str {
        "describe_index"
    }

    fn display_name(&self) -> &str {
        "Describe Index"
    }

    fn description(&self) -> &str {
        "Get an index's configuration and status"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new().with("index", index_prop())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let index = ctx.props.prop_str("index")?;
        self.api
            .control(&ctx.http, &ctx.auth)?
            .get(&format!("/indexes/{}", index))
            .send_json()
            .await
    }
}

struct DeleteIndex {
    api: PineconeApi,
}

#[async_trait]
impl Action for DeleteIndex {
    fn name(&self) -> &str {
        "delete_index"
    }

    fn display_name(&self) -> &str {
        "Delete Index"
    }

    fn description(&self) -> &str {
        "Delete an index and all of its vectors"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new().with("index", index_prop())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let index = ctx.props.prop_str("index")?;
        self.api
            .control(&ctx.http, &ctx.auth)?
            .delete(&format!("/indexes/{}", index))
            .send_empty()
            .await?;
        Ok(json!({ "deleted": true, "index": index }))
    }
}

struct UpsertVectors {
    api: PineconeApi,
}

#[async_trait]
impl Action for UpsertVectors {
    fn name(&self) -> &str {
        "upsert_vectors"
    }

    fn display_name(&self) -> &str {
        "Upsert Vectors"
    }

    fn description(&self) -> &str {
        "Write vectors into a namespace, overwriting existing ids"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("index", index_prop())
            .with(
                "vectors",
                Property::json("Vectors")
                    .description(r#"Array of {"id", "values", "metadata"} objects"#)
                    .required(),
            )
            .with("namespace", namespace_prop())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let vectors = match props.opt_value("vectors") {
            Some(Value::Array(vectors)) if !vectors.is_empty() => vectors.clone(),
            _ => {
                return Err(PropertyError::InvalidType {
                    name: "vectors".to_string(),
                    expected: "non-empty array".to_string(),
                }
                .into());
            }
        };

        let mut body = Map::new();
        body.insert("vectors".into(), Value::Array(vectors));
        insert_opt(&mut body, "namespace", props.opt_str("namespace"));

        self.api
            .data_plane(&ctx.http, &ctx.auth, props.prop_str("index")?)
            .await?
            .post("/vectors/upsert")
            .json(&body)
            .send_json()
            .await
    }
}

struct QueryVectors {
    api: PineconeApi,
}

#[async_trait]
impl Action for QueryVectors {
    fn name(&self) -> &str {
        "query_vectors"
    }

    fn display_name(&self) -> &str {
        "Query Vectors"
    }

    fn description(&self) -> &str {
        "Find the vectors most similar to a query vector or stored id"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("index", index_prop())
            .with(
                "vector",
                Property::json("Query Vector").description("Array of numbers; leave empty to query by id"),
            )
            .with("id", Property::short_text("Vector ID"))
            .with("top_k", Property::number("Top K").default_value(DEFAULT_TOP_K))
            .with("namespace", namespace_prop())
            .with("filter", Property::json("Metadata Filter"))
            .with("include_values", Property::checkbox("Include Values").default_value(false))
            .with(
                "include_metadata",
                Property::checkbox("Include Metadata").default_value(true),
            )
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut body = Map::new();
        match (props.opt_value("vector"), props.opt_str("id")) {
            (Some(Value::Array(vector)), _) if !vector.is_empty() => {
                body.insert("vector".into(), Value::Array(vector.clone()));
            }
            (_, Some(id)) => {
                body.insert("id".into(), id.into());
            }
            _ => {
                return Err(PropertyError::Missing {
                    name: "vector".to_string(),
                }
                .into());
            }
        }
        body.insert(
            "topK".into(),
            props.opt_i64("top_k").unwrap_or(DEFAULT_TOP_K).max(1).into(),
        );
        body.insert(
            "includeValues".into(),
            props.opt_bool("include_values").unwrap_or(false).into(),
        );
        body.insert(
            "includeMetadata".into(),
            props.opt_bool("include_metadata").unwrap_or(true).into(),
        );
        insert_opt(&mut body, "namespace", props.opt_str("namespace"));
        if let Some(filter @ Value::Object(_)) = props.opt_value("filter") {
            body.insert("filter".into(), filter.clone());
        }

        self.api
            .data_plane(&ctx.http, &ctx.auth, props.prop_str("index")?)
            .await?
            .post("/query")
            .json(&body)
            .send_json()
            .await
    }
}

/// String ids from an array property; ids given as numbers are stringified
fn vector_ids(props: &Map<String, Value>) -> Vec<String> {
    match props.opt_value("ids") {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|id| match id {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

struct FetchVectors {
    api: PineconeApi,
}

#[async_trait]
impl Action for FetchVectors {
    fn name(&self) -> &str {
        "fetch_vectors"
    }

    fn display_name(&self) -> &str {
        "Fetch Vectors"
    }

    fn description(&self) -> &str {
        "Look up vectors by id"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("index", index_prop())
            .with("ids", Property::array("IDs").required())
            .with("namespace", namespace_prop())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let ids = vector_ids(props);
        if ids.is_empty() {
            return Err(PropertyError::Missing {
                name: "ids".to_string(),
            }
            .into());
        }

        let mut query: Vec<(&str, String)> = ids.into_iter().map(|id| ("ids", id)).collect();
        if let Some(namespace) = props.opt_str("namespace") {
            query.push(("namespace", namespace.to_string()));
        }

        self.api
            .data_plane(&ctx.http, &ctx.auth, props.prop_str("index")?)
            .await?
            .get("/vectors/fetch")
            .query(&query)
            .send_json()
            .await
    }
}

struct DeleteVectors {
    api: PineconeApi,
}

#[async_trait]
impl Action for DeleteVectors {
    fn name(&self) -> &str {
        "delete_vectors"
    }

    fn display_name(&self) -> &str {
        "Delete Vectors"
    }

    fn description(&self) -> &str {
        "Delete vectors by id, or every vector in a namespace"
    }

    fn props(&self) -> PropertyMap {
        PropertyMap::new()
            .with("index", index_prop())
            .with("ids", Property::array("IDs"))
            .with(
                "delete_all",
                Property::checkbox("Delete All")
                    .description("Delete every vector in the namespace; IDs are ignored")
                    .default_value(false),
            )
            .with("namespace", namespace_prop())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Value, PieceError> {
        let props = &ctx.props;
        let mut body = Map::new();
        if props.opt_bool("delete_all").unwrap_or(false) {
            body.insert("deleteAll".into(), true.into());
        } else {
            let ids = vector_ids(props);
            if ids.is_empty() {
                return Err(PropertyError::Missing {
                    name: "ids".to_string(),
                }
                .into());
            }
            body.insert("ids".into(), ids.into());
        }
        insert_opt(&mut body, "namespace", props.opt_str("namespace"));

        self.api
            .data_plane(&ctx.http, &ctx.auth, props.prop_str("index")?)
            .await?
            .post("/vectors/delete")
            .json(&body)
            .send_json()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::piece_for_tests;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> PiecesConfig {
        PiecesConfig {
            pinecone_control_base: server.uri(),
            ..Default::default()
        }
    }

    fn key() -> AuthValue {
        AuthValue::SecretText {
            secret: "pc-key".into(),
        }
    }

    fn ctx(props: Value) -> ActionContext {
        ActionContext::new(
            key(),
            props.as_object().cloned().unwrap_or_default(),
            HttpClientFactory::default(),
        )
    }

    /// Describe call pointing the data plane back at the mock server
    async fn mount_describe(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/indexes/docs"))
            .and(header("Api-Key", "pc-key"))
            .and(header("X-Pinecone-API-Version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "docs",
                "dimension": 3,
                "host": server.uri(),
                "status": {"ready": true}
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_data_plane_url_adds_scheme() {
        assert_eq!(
            data_plane_url("docs-abc.svc.pinecone.io"),
            "https://docs-abc.svc.pinecone.io"
        );
        assert_eq!(data_plane_url("http://127.0.0.1:9000"), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_create_index_builds_serverless_spec() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .and(body_json(json!({
                "name": "docs",
                "dimension": 1536,
                "metric": "cosine",
                "deletion_protection": "disabled",
                "spec": {"serverless": {"cloud": "aws", "region": "us-east-1"}}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "docs"})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        let output = piece
            .action("create_index")
            .unwrap()
            .run(&ctx(json!({"name": "docs", "dimension": 1536})))
            .await
            .unwrap();
        assert_eq!(output["name"], "docs");
    }

    #[tokio::test]
    async fn test_query_resolves_host_and_defaults_top_k() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_json(json!({
                "vector": [0.1, 0.2, 0.3],
                "topK": 10,
                "includeValues": false,
                "includeMetadata": true,
                "namespace": "articles"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{"id": "a", "score": 0.98}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        let output = piece
            .action("query_vectors")
            .unwrap()
            .run(&ctx(json!({
                "index": "docs",
                "vector": [0.1, 0.2, 0.3],
                "namespace": "articles"
            })))
            .await
            .unwrap();
        assert_eq!(output["matches"][0]["id"], "a");
    }

    #[tokio::test]
    async fn test_query_requires_vector_or_id() {
        let server = MockServer::start().await;
        let piece = piece_for_tests(&config(&server), "pinecone");
        let err = piece
            .action("query_vectors")
            .unwrap()
            .run(&ctx(json!({"index": "docs"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PieceError::InvalidProps(PropertyError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_vectors_repeats_ids() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        Mock::given(method("GET"))
            .and(path("/vectors/fetch"))
            .and(query_param("ids", "a"))
            .and(query_param("ids", "b"))
            .and(query_param("namespace", "articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vectors": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        piece
            .action("fetch_vectors")
            .unwrap()
            .run(&ctx(json!({"index": "docs", "ids": ["a", "b"], "namespace": "articles"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_all_ignores_ids() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        Mock::given(method("POST"))
            .and(path("/vectors/delete"))
            .and(body_json(json!({"deleteAll": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        piece
            .action("delete_vectors")
            .unwrap()
            .run(&ctx(json!({"index": "docs", "ids": ["a"], "delete_all": true})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_rejects_non_array() {
        let server = MockServer::start().await;
        let piece = piece_for_tests(&config(&server), "pinecone");
        let err = piece
            .action("upsert_vectors")
            .unwrap()
            .run(&ctx(json!({"index": "docs", "vectors": {"id": "a"}})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PieceError::InvalidProps(PropertyError::InvalidType { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_dropdown_and_auth_validation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "indexes": [{"name": "docs"}, {"name": "images"}]
            })))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        let state = piece.options("index", &ctx(json!({}))).await.unwrap();
        assert_eq!(
            state.options,
            vec![
                DropdownOption::new("docs", "docs"),
                DropdownOption::new("images", "images")
            ]
        );

        piece
            .validate_auth(&key(), &HttpClientFactory::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API Key"))
            .mount(&server)
            .await;

        let piece = piece_for_tests(&config(&server), "pinecone");
        let err = piece
            .validate_auth(&key(), &HttpClientFactory::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PieceError::Unauthorized { .. }));
    }
}

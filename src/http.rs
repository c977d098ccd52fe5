//! # Vendor HTTP client
//!
//! Thin wrapper around `reqwest` shared by all pieces. It joins paths onto a
//! vendor base URL, applies the piece's credentials and turns non-success
//! responses into [`PieceError`] variants the runtime knows how to classify.

use std::time::Duration;

use base64::Engine;
use metrics::counter;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::framework::PieceError;

/// Upstream bodies are truncated to this many bytes inside errors
const MAX_ERROR_BODY_BYTES: usize = 1024;

/// How a vendor request is authenticated
#[derive(Debug, Clone)]
pub enum VendorAuth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

/// Shared `reqwest` client plus request defaults
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    client: reqwest::Client,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, PieceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PieceError::Configuration {
                details: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Client bound to one vendor base URL and credential
    pub fn client<S: Into<String>>(&self, base_url: S, auth: VendorAuth) -> VendorClient {
        VendorClient {
            http: self.client.clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            default_headers: Vec::new(),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VendorClient {
    http: reqwest::Client,
    base_url: String,
    auth: VendorAuth,
    default_headers: Vec<(String, String)>,
}

impl VendorClient {
    /// Header sent with every request made through this client
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Absolute URLs pass through untouched, anything else is joined onto the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn get(&self, path: &str) -> VendorRequest {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> VendorRequest {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> VendorRequest {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> VendorRequest {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> VendorRequest {
        self.request(Method::DELETE, path)
    }

    pub fn request(&self, method: Method, path: &str) -> VendorRequest {
        let url = self.url(path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");

        builder = match &self.auth {
            VendorAuth::None => builder,
            VendorAuth::Bearer(token) => builder.bearer_auth(token),
            VendorAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            VendorAuth::Header { name, value } => builder.header(name.as_str(), value.as_str()),
        };

        for (name, value) in &self.default_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        VendorRequest {
            builder,
            method,
            url,
        }
    }
}

/// A request under construction
#[derive(Debug)]
pub struct VendorRequest {
    builder: RequestBuilder,
    method: Method,
    url: String,
}

impl VendorRequest {
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.builder = self.builder.query(query);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.builder = self.builder.json(body);
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(mut self, name: K, value: V) -> Self {
        self.builder = self.builder.header(name.as_ref(), value.as_ref());
        self
    }

    /// Send and parse the response body as JSON; empty bodies become `null`
    pub async fn send_json(self) -> Result<Value, PieceError> {
        let response = self.send().await?;
        let bytes = response.bytes().await.map_err(|e| PieceError::Network {
            details: format!("failed to read response body: {}", e),
            retryable: true,
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| PieceError::malformed(format!("response is not valid JSON: {}", e)))
    }

    /// Send and discard the response body
    pub async fn send_empty(self) -> Result<(), PieceError> {
        self.send().await.map(|_| ())
    }

    async fn send(self) -> Result<Response, PieceError> {
        let VendorRequest {
            builder,
            method,
            url,
        } = self;

        let response = builder.send().await.map_err(|e| {
            counter!("piece_http_requests_total", "outcome" => "network_error").increment(1);
            PieceError::Network {
                details: format!("{} {} failed: {}", method, url, e),
                retryable: e.is_timeout() || e.is_connect() || e.is_request(),
            }
        })?;

        debug!(
            method = %method,
            url = %url,
            status = response.status().as_u16(),
            "Vendor request completed"
        );

        classify(response).await
    }
}

/// Map a vendor response onto `Ok(response)` or the matching [`PieceError`]
pub async fn classify(response: Response) -> Result<Response, PieceError> {
    let status = response.status();
    if status.is_success() {
        counter!("piece_http_requests_total", "outcome" => "success").increment(1);
        return Ok(response);
    }
    counter!("piece_http_requests_total", "outcome" => "error").increment(1);

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = response.text().await.ok().map(truncate_body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PieceError::Unauthorized {
            details: body.unwrap_or_else(|| status.to_string()),
        },
        StatusCode::TOO_MANY_REQUESTS => PieceError::RateLimited { retry_after },
        _ => PieceError::Http {
            status: status.as_u16(),
            body: body.filter(|b| !b.is_empty()),
        },
    })
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut cut = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// `Basic` header value for vendors that want it as a custom header
pub fn basic_credentials(username: &str, password: &str) -> String {
    let raw = format!("{}:{}", username, password);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory() -> HttpClientFactory {
        HttpClientFactory::new(Duration::from_secs(5), "pieces-test").unwrap()
    }

    #[test]
    fn test_url_joining() {
        let client = factory().client("https://api.example.com/v2/", VendorAuth::None);
        assert_eq!(client.url("/items"), "https://api.example.com/v2/items");
        assert_eq!(client.url("items"), "https://api.example.com/v2/items");
        assert_eq!(
            client.url("https://idx-1.svc.pinecone.io/query"),
            "https://idx-1.svc.pinecone.io/query"
        );
    }

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn test_send_json_with_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("limit", "5"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let client = factory().client(server.uri(), VendorAuth::Bearer("tok".into()));
        let body = client
            .get("/items")
            .query(&[("limit", "5")])
            .send_json()
            .await
            .unwrap();
        assert_eq!(body, json!([{"id": 1}]));
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/items/1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = factory().client(server.uri(), VendorAuth::None);
        assert_eq!(client.delete("/items/1").send_json().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/unauthorized"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;
        Mock::given(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let client = factory().client(server.uri(), VendorAuth::None);

        let err = client.get("/unauthorized").send_json().await.unwrap_err();
        assert!(matches!(err, PieceError::Unauthorized { ref details } if details == "bad token"));

        let err = client.get("/limited").send_json().await.unwrap_err();
        assert!(matches!(
            err,
            PieceError::RateLimited {
                retry_after: Some(17)
            }
        ));

        let err = client.get("/broken").send_json().await.unwrap_err();
        match err {
            PieceError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.unwrap().len(), MAX_ERROR_BODY_BYTES);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

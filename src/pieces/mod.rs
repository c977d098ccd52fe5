//! # Built-in pieces
//!
//! Vendor integrations shipped with the service. Each submodule exposes a
//! constructor returning a ready [`Piece`]; base URLs come from
//! [`PiecesConfig`] so tests can point them at a mock server.

use serde_json::{Map, Value};

use crate::config::PiecesConfig;
use crate::framework::{Piece, PieceError, Registry};

pub mod bexio;
pub mod pinecone;
pub mod xero;
pub mod zendesk;

impl Registry {
    /// Registry holding every built-in piece
    pub fn with_builtin_pieces(config: &PiecesConfig) -> Self {
        let mut registry = Registry::new();
        registry.register(bexio::piece(config));
        registry.register(xero::piece(config));
        registry.register(zendesk::piece(config));
        registry.register(pinecone::piece(config));
        registry
    }
}

/// Insert `value` under `key` unless it is absent
pub(crate) fn insert_opt<V: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<V>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

/// Array field of a vendor list response; a missing field reads as empty
pub(crate) fn list_field(response: &Value, field: &str) -> Result<Vec<Value>, PieceError> {
    match response.get(field) {
        Some(Value::Array(items)) => Ok(items.clone()),
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err(PieceError::malformed(format!(
            "expected '{}' to be an array",
            field
        ))),
    }
}

/// Piece lookup used by unit tests
#[cfg(test)]
pub(crate) fn piece_for_tests(config: &PiecesConfig, name: &str) -> std::sync::Arc<Piece> {
    Registry::with_builtin_pieces(config)
        .get(name)
        .expect("built-in piece")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = Registry::with_builtin_pieces(&PiecesConfig::default());
        let names: Vec<String> = registry
            .list_metadata()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["bexio", "pinecone", "xero", "zendesk"]);
    }

    #[test]
    fn test_list_field() {
        let response = json!({"items": [1, 2], "other": "x"});
        assert_eq!(list_field(&response, "items").unwrap().len(), 2);
        assert!(list_field(&response, "missing").unwrap().is_empty());
        assert!(matches!(
            list_field(&response, "other"),
            Err(PieceError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_insert_opt_skips_none() {
        let mut body = Map::new();
        insert_opt(&mut body, "a", Some("x"));
        insert_opt::<&str>(&mut body, "b", None);
        assert_eq!(Value::Object(body), json!({"a": "x"}));
    }
}

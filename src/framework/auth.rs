//! Piece authentication
//!
//! A piece declares which credential shape it needs ([`PieceAuth`]); callers
//! supply the matching [`AuthValue`]. OAuth2 access tokens are obtained and
//! refreshed by the host, pieces only ever see the resulting token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::framework::error::PieceError;
use crate::framework::property::{PropertyMap, validate_props};

/// Credential shape required by a piece
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PieceAuth {
    None,
    #[serde(rename = "oauth2")]
    OAuth2 {
        auth_url: String,
        token_url: String,
        scopes: Vec<String>,
    },
    SecretText {
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Basic {
        username_label: String,
        password_label: String,
    },
    Custom {
        props: PropertyMap,
    },
}

/// Credentials supplied for one action run or trigger instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthValue {
    None,
    #[serde(rename = "oauth2")]
    OAuth2 {
        access_token: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    SecretText {
        secret: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Custom {
        #[serde(default)]
        props: Map<String, Value>,
    },
}

impl PieceAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            PieceAuth::None => "none",
            PieceAuth::OAuth2 { .. } => "oauth2",
            PieceAuth::SecretText { .. } => "secret_text",
            PieceAuth::Basic { .. } => "basic",
            PieceAuth::Custom { .. } => "custom",
        }
    }

    /// Check that `value` has the declared shape, normalizing custom auth props.
    pub fn check(&self, value: &AuthValue) -> Result<AuthValue, PieceError> {
        match (self, value) {
            (PieceAuth::None, _) => Ok(AuthValue::None),
            (PieceAuth::OAuth2 { .. }, AuthValue::OAuth2 { access_token, .. }) => {
                if access_token.trim().is_empty() {
                    Err(PieceError::invalid_auth("access token is empty"))
                } else {
                    Ok(value.clone())
                }
            }
            (PieceAuth::SecretText { .. }, AuthValue::SecretText { secret }) => {
                if secret.trim().is_empty() {
                    Err(PieceError::invalid_auth("secret is empty"))
                } else {
                    Ok(value.clone())
                }
            }
            (PieceAuth::Basic { .. }, AuthValue::Basic { username, .. }) => {
                if username.is_empty() {
                    Err(PieceError::invalid_auth("username is empty"))
                } else {
                    Ok(value.clone())
                }
            }
            (PieceAuth::Custom { props: schema }, AuthValue::Custom { props }) => {
                let props = validate_props(schema, props)
                    .map_err(|e| PieceError::invalid_auth(e.to_string()))?;
                Ok(AuthValue::Custom { props })
            }
            (expected, _) => Err(PieceError::invalid_auth(format!(
                "expected {} credentials",
                expected.kind()
            ))),
        }
    }
}

impl AuthValue {
    /// OAuth2 access token, if these are OAuth2 credentials
    pub fn access_token(&self) -> Result<&str, PieceError> {
        match self {
            AuthValue::OAuth2 { access_token, .. } => Ok(access_token),
            _ => Err(PieceError::invalid_auth("OAuth2 access token required")),
        }
    }

    pub fn secret(&self) -> Result<&str, PieceError> {
        match self {
            AuthValue::SecretText { secret } => Ok(secret),
            _ => Err(PieceError::invalid_auth("secret text required")),
        }
    }

    /// String field of custom auth props
    pub fn custom_str(&self, name: &str) -> Result<&str, PieceError> {
        match self {
            AuthValue::Custom { props } => props
                .get(name)
                .and_then(|v| v.as_str())
                .ok_or_else(|| PieceError::invalid_auth(format!("auth field '{}' missing", name))),
            _ => Err(PieceError::invalid_auth("custom auth required")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::property::Property;
    use serde_json::json;

    #[test]
    fn test_auth_value_wire_format() {
        let value: AuthValue =
            serde_json::from_value(json!({"type": "oauth2", "access_token": "tok"})).unwrap();
        assert_eq!(value.access_token().unwrap(), "tok");

        let value: AuthValue =
            serde_json::from_value(json!({"type": "secret_text", "secret": "s3"})).unwrap();
        assert_eq!(value.secret().unwrap(), "s3");
        assert!(value.access_token().is_err());
    }

    #[test]
    fn test_check_rejects_mismatched_shape() {
        let auth = PieceAuth::OAuth2 {
            auth_url: "https://example.com/auth".into(),
            token_url: "https://example.com/token".into(),
            scopes: vec![],
        };
        let err = auth
            .check(&AuthValue::SecretText {
                secret: "x".into(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("expected oauth2 credentials"));
    }

    #[test]
    fn test_check_validates_custom_props() {
        let auth = PieceAuth::Custom {
            props: PropertyMap::new()
                .with("email", Property::short_text("Email").required())
                .with("subdomain", Property::short_text("Subdomain").required()),
        };

        let missing = AuthValue::Custom {
            props: json!({"email": "a@b.c"}).as_object().unwrap().clone(),
        };
        assert!(matches!(
            auth.check(&missing),
            Err(PieceError::InvalidAuth { .. })
        ));

        let ok = AuthValue::Custom {
            props: json!({"email": "a@b.c", "subdomain": "acme"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let checked = auth.check(&ok).unwrap();
        assert_eq!(checked.custom_str("subdomain").unwrap(), "acme");
    }
}

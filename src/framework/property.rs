//! Declarative property schemas
//!
//! Pieces describe the inputs of their actions, triggers and custom auth as an
//! ordered [`PropertyMap`]. The runtime only checks submitted values against
//! the schema (presence and JSON type); rendering forms is the host's job.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// A selectable option in a dropdown property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DropdownOption {
    pub label: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

impl DropdownOption {
    pub fn new<L: Into<String>, V: Into<Value>>(label: L, value: V) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Resolved state of a dynamic dropdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DropdownState {
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub options: Vec<DropdownOption>,
}

impl DropdownState {
    pub fn options(options: Vec<DropdownOption>) -> Self {
        Self {
            disabled: false,
            placeholder: None,
            options,
        }
    }

    /// A disabled dropdown with a hint, used when auth or a parent prop is missing
    pub fn disabled<S: Into<String>>(placeholder: S) -> Self {
        Self {
            disabled: true,
            placeholder: Some(placeholder.into()),
            options: Vec::new(),
        }
    }
}

/// Kind of a property, determining which JSON values it accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyKind {
    ShortText,
    LongText,
    Number,
    Checkbox,
    DateTime,
    Json,
    Array,
    StaticDropdown { options: Vec<DropdownOption> },
    StaticMultiSelectDropdown { options: Vec<DropdownOption> },
    /// Options are resolved by the piece's options provider
    Dropdown { refreshers: Vec<String> },
    MultiSelectDropdown { refreshers: Vec<String> },
    /// Display-only text
    Markdown { value: String },
}

impl PropertyKind {
    fn expected(&self) -> &'static str {
        match self {
            PropertyKind::ShortText | PropertyKind::LongText => "string",
            PropertyKind::Number => "number",
            PropertyKind::Checkbox => "boolean",
            PropertyKind::DateTime => "RFC 3339 date-time string",
            PropertyKind::Json => "JSON value",
            PropertyKind::Array
            | PropertyKind::StaticMultiSelectDropdown { .. }
            | PropertyKind::MultiSelectDropdown { .. } => "array",
            PropertyKind::StaticDropdown { .. } | PropertyKind::Dropdown { .. } => "option value",
            PropertyKind::Markdown { .. } => "nothing",
        }
    }
}

/// A single declared input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub kind: PropertyKind,
}

impl Property {
    fn of<S: Into<String>>(display_name: S, kind: PropertyKind) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            required: false,
            default: None,
            kind,
        }
    }

    pub fn short_text<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::ShortText)
    }

    pub fn long_text<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::LongText)
    }

    pub fn number<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::Number)
    }

    pub fn checkbox<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::Checkbox)
    }

    pub fn date_time<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::DateTime)
    }

    pub fn json<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::Json)
    }

    pub fn array<S: Into<String>>(display_name: S) -> Self {
        Self::of(display_name, PropertyKind::Array)
    }

    pub fn static_dropdown<S: Into<String>>(display_name: S, options: Vec<DropdownOption>) -> Self {
        Self::of(display_name, PropertyKind::StaticDropdown { options })
    }

    pub fn dropdown<S: Into<String>>(display_name: S, refreshers: &[&str]) -> Self {
        Self::of(
            display_name,
            PropertyKind::Dropdown {
                refreshers: refreshers.iter().map(|r| r.to_string()).collect(),
            },
        )
    }

    pub fn markdown<S: Into<String>>(value: S) -> Self {
        Self::of(
            "",
            PropertyKind::Markdown {
                value: value.into(),
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value<V: Into<Value>>(mut self, value: V) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Ordered collection of named properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap(Vec<(String, Property)>);

impl PropertyMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a property; a second insert under the same name replaces the first
    pub fn with<S: Into<String>>(mut self, name: S, property: Property) -> Self {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = property;
        } else {
            self.0.push((name, property));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.0.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for PropertyMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, property) in &self.0 {
            map.serialize_entry(name, property)?;
        }
        map.end()
    }
}

/// Errors raised when submitted values do not match a schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("property '{name}' is required")]
    Missing { name: String },
    #[error("property '{name}' must be a {expected}")]
    InvalidType { name: String, expected: String },
    #[error("property '{name}' must be one of the dropdown options")]
    NotAnOption { name: String },
}

/// Check `values` against `schema`, returning the normalized value map.
///
/// Defaults are filled in, numeric strings become numbers and JSON properties
/// submitted as text are parsed. Keys not declared in the schema pass through.
pub fn validate_props(
    schema: &PropertyMap,
    values: &Map<String, Value>,
) -> Result<Map<String, Value>, PropertyError> {
    let mut out = values.clone();

    for (name, property) in schema.iter() {
        if matches!(property.kind, PropertyKind::Markdown { .. }) {
            continue;
        }

        let submitted = values.get(name).filter(|v| !v.is_null()).cloned();
        let value = match submitted.or_else(|| property.default.clone()) {
            Some(value) => value,
            None => {
                if property.required {
                    return Err(PropertyError::Missing {
                        name: name.to_string(),
                    });
                }
                continue;
            }
        };

        let normalized = normalize_value(name, property, value)?;
        if property.required && is_blank(&normalized) {
            return Err(PropertyError::Missing {
                name: name.to_string(),
            });
        }
        out.insert(name.to_string(), normalized);
    }

    Ok(out)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn normalize_value(name: &str, property: &Property, value: Value) -> Result<Value, PropertyError> {
    let invalid = || PropertyError::InvalidType {
        name: name.to_string(),
        expected: property.kind.expected().to_string(),
    };

    match &property.kind {
        PropertyKind::ShortText | PropertyKind::LongText => match value {
            Value::String(_) => Ok(value),
            _ => Err(invalid()),
        },
        PropertyKind::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(ref s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(int) = trimmed.parse::<i64>() {
                    Ok(Value::from(int))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .ok_or_else(invalid)
                }
            }
            _ => Err(invalid()),
        },
        PropertyKind::Checkbox => match value {
            Value::Bool(_) => Ok(value),
            _ => Err(invalid()),
        },
        PropertyKind::DateTime => match value {
            Value::String(ref s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Ok(value),
            _ => Err(invalid()),
        },
        PropertyKind::Json => match value {
            Value::String(s) => Ok(serde_json::from_str(&s).unwrap_or(Value::String(s))),
            other => Ok(other),
        },
        PropertyKind::Array
        | PropertyKind::StaticMultiSelectDropdown { .. }
        | PropertyKind::MultiSelectDropdown { .. } => match value {
            Value::Array(ref items) => {
                if let PropertyKind::StaticMultiSelectDropdown { options } = &property.kind
                    && items.iter().any(|item| !options.iter().any(|o| &o.value == item))
                {
                    return Err(PropertyError::NotAnOption {
                        name: name.to_string(),
                    });
                }
                Ok(value)
            }
            _ => Err(invalid()),
        },
        PropertyKind::StaticDropdown { options } => {
            if options.iter().any(|o| o.value == value) {
                Ok(value)
            } else {
                Err(PropertyError::NotAnOption {
                    name: name.to_string(),
                })
            }
        }
        PropertyKind::Dropdown { .. } => Ok(value),
        PropertyKind::Markdown { .. } => Ok(value),
    }
}

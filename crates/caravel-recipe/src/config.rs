//! Runtime configuration schemas for recipes
//!
//! Recipes declare their user-tunable fields as data, not as derive-annotated
//! structs: the set of fields differs per recipe and is rendered by the UI at
//! runtime. Validation fills in declared defaults for omitted fields and
//! rejects unknown keys, so the engine always works with a complete,
//! well-typed config map.

use crate::error::{RecipeError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Regex for validating Kubernetes resource quantities (e.g., "10Gi", "500Mi")
static QUANTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").unwrap());

/// Regex for validating instance and resource names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate an instance name (RFC 1123, max 63 characters).
///
/// Instance names become Kubernetes resource names and label values, so the
/// same rules apply to both.
pub fn validate_name(value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 63 {
        return Err(RecipeError::InvalidConfig(format!(
            "name '{}' must be 1-63 characters",
            value
        )));
    }
    if !NAME_REGEX.is_match(value) {
        return Err(RecipeError::InvalidConfig(format!(
            "'{}' is not a valid name (lowercase RFC 1123)",
            value
        )));
    }
    Ok(())
}

/// The type of a single configuration field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free-form string
    Text,
    /// Signed integer with optional bounds
    Integer,
    /// true/false toggle
    Boolean,
    /// One of a fixed set of string values
    Choice(Vec<String>),
    /// Kubernetes resource quantity ("10Gi", "250m")
    Quantity,
}

/// One user-tunable field in a recipe's configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    /// Key in the config map
    pub key: String,
    /// Human-readable label for UIs
    pub label: String,
    /// Value type
    pub kind: FieldKind,
    /// Default used when the caller omits the field
    pub default: Option<Value>,
    /// Whether the caller must supply a value when no default exists
    pub required: bool,
    /// Lower bound for integers
    pub min: Option<i64>,
    /// Upper bound for integers
    pub max: Option<i64>,
}

impl ConfigField {
    /// A text field with a default value
    pub fn text(key: &str, label: &str, default: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: FieldKind::Text,
            default: Some(Value::String(default.to_string())),
            required: false,
            min: None,
            max: None,
        }
    }

    /// An integer field with a default and inclusive bounds
    pub fn integer(key: &str, label: &str, default: i64, min: i64, max: i64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: FieldKind::Integer,
            default: Some(Value::from(default)),
            required: false,
            min: Some(min),
            max: Some(max),
        }
    }

    /// A boolean toggle
    pub fn boolean(key: &str, label: &str, default: bool) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: FieldKind::Boolean,
            default: Some(Value::Bool(default)),
            required: false,
            min: None,
            max: None,
        }
    }

    /// A Kubernetes quantity field (storage sizes)
    pub fn quantity(key: &str, label: &str, default: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: FieldKind::Quantity,
            default: Some(Value::String(default.to_string())),
            required: false,
            min: None,
            max: None,
        }
    }

    /// A choice field; the default must be one of the allowed values
    pub fn choice(key: &str, label: &str, values: &[&str], default: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: FieldKind::Choice(values.iter().map(|v| v.to_string()).collect()),
            default: Some(Value::String(default.to_string())),
            required: false,
            min: None,
            max: None,
        }
    }

    fn check(&self, value: &Value) -> Result<()> {
        match &self.kind {
            FieldKind::Text => {
                if !value.is_string() {
                    return Err(self.type_error("a string", value));
                }
            }
            FieldKind::Integer => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| self.type_error("an integer", value))?;
                if let Some(min) = self.min {
                    if n < min {
                        return Err(RecipeError::InvalidConfig(format!(
                            "field '{}' must be at least {}",
                            self.key, min
                        )));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        return Err(RecipeError::InvalidConfig(format!(
                            "field '{}' must be at most {}",
                            self.key, max
                        )));
                    }
                }
            }
            FieldKind::Boolean => {
                if !value.is_boolean() {
                    return Err(self.type_error("a boolean", value));
                }
            }
            FieldKind::Choice(allowed) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.type_error("a string", value))?;
                if !allowed.iter().any(|a| a == s) {
                    return Err(RecipeError::InvalidConfig(format!(
                        "field '{}' must be one of [{}]",
                        self.key,
                        allowed.join(", ")
                    )));
                }
            }
            FieldKind::Quantity => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.type_error("a quantity string", value))?;
                if !QUANTITY_REGEX.is_match(s) {
                    return Err(RecipeError::InvalidConfig(format!(
                        "field '{}': '{}' is not a valid Kubernetes quantity",
                        self.key, s
                    )));
                }
            }
        }
        Ok(())
    }

    fn type_error(&self, expected: &str, got: &Value) -> RecipeError {
        RecipeError::InvalidConfig(format!(
            "field '{}' must be {}, got {}",
            self.key, expected, got
        ))
    }
}

/// The declared set of tunable fields for one recipe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// An empty schema (recipes with nothing to tune)
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    /// Validate a caller-supplied config against the schema.
    ///
    /// Returns a complete map: declared defaults are filled in for omitted
    /// fields. Unknown keys and type/range violations are rejected with a
    /// message naming the offending field.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<Map<String, Value>> {
        for key in input.keys() {
            if !self.fields.iter().any(|f| &f.key == key) {
                return Err(RecipeError::InvalidConfig(format!(
                    "unknown config field '{}'",
                    key
                )));
            }
        }

        let mut out = Map::new();
        for field in &self.fields {
            match input.get(&field.key) {
                Some(value) => {
                    field.check(value)?;
                    out.insert(field.key.clone(), value.clone());
                }
                None => match &field.default {
                    Some(default) => {
                        out.insert(field.key.clone(), default.clone());
                    }
                    None if field.required => {
                        return Err(RecipeError::InvalidConfig(format!(
                            "required field '{}' is missing",
                            field.key
                        )));
                    }
                    None => {}
                },
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::text("database", "Database name", "app"),
            ConfigField::integer("replicas", "Replicas", 1, 1, 5),
            ConfigField::quantity("storage", "Storage size", "10Gi"),
        ])
    }

    #[test]
    fn test_defaults_filled() {
        let out = schema().validate(&Map::new()).unwrap();
        assert_eq!(out["database"], json!("app"));
        assert_eq!(out["replicas"], json!(1));
        assert_eq!(out["storage"], json!("10Gi"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut input = Map::new();
        input.insert("bogus".to_string(), json!(1));
        let err = schema().validate(&input).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_range_enforced() {
        let mut input = Map::new();
        input.insert("replicas".to_string(), json!(9));
        assert!(schema().validate(&input).is_err());
    }

    #[test]
    fn test_bad_quantity_rejected() {
        let mut input = Map::new();
        input.insert("storage".to_string(), json!("10 gigabytes"));
        assert!(schema().validate(&input).is_err());
    }

    #[test]
    fn test_valid_override_kept() {
        let mut input = Map::new();
        input.insert("storage".to_string(), json!("50Gi"));
        let out = schema().validate(&input).unwrap();
        assert_eq!(out["storage"], json!("50Gi"));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("my-postgres").is_ok());
        assert!(validate_name("My-Postgres").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
    }
}

/// Executor config schemas and validation
///
/// Each executor declares the shape of the config it accepts as a small
/// JSON-schema-like property map. Validation walks every declared property
/// and collects ALL violations instead of failing on the first one, so the
/// operator sees the complete repair list in a single round trip. A node
/// with a non-empty violation list is never admitted into a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Value types a config property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Array => value.is_array(),
            PropertyType::Object => value.is_object(),
        }
    }
}

/// Declared constraints for one config property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default)]
    pub required: bool,
    /// Allowed values, when the property is an enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Default applied by the UI layer; not consulted during validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySpec {
    fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            required: false,
            options: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(PropertyType::String)
    }

    pub fn number() -> Self {
        Self::new(PropertyType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(PropertyType::Array)
    }

    pub fn object() -> Self {
        Self::new(PropertyType::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Schema for one executor's config object.
///
/// Properties live in a `BTreeMap` so validation output is deterministic
/// regardless of declaration or insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub properties: BTreeMap<String, PropertySpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, key: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(key.into(), spec);
        self
    }

    /// Validate a config object against this schema, returning every
    /// violation found. An empty vec means the config is admissible.
    pub fn validate(&self, config: &Value) -> Vec<String> {
        let mut violations = Vec::new();

        for (key, spec) in &self.properties {
            let value = config.get(key);

            let missing = match value {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };

            if missing {
                if spec.required {
                    violations.push(format!("{key} is required"));
                }
                continue;
            }
            let Some(value) = value else { continue };

            if !spec.kind.matches(value) {
                violations.push(format!("{key} must be a {}", spec.kind.as_str()));
                // Bound checks against a value of the wrong type are noise.
                continue;
            }

            if let Some(options) = &spec.options {
                if !options.contains(value) {
                    let allowed = options
                        .iter()
                        .map(render_option)
                        .collect::<Vec<_>>()
                        .join(", ");
                    violations.push(format!("{key} must be one of: {allowed}"));
                }
            }

            if let Some(n) = value.as_f64() {
                if let Some(min) = spec.minimum {
                    if n < min {
                        violations.push(format!("{key} must be at least {min}"));
                    }
                }
                if let Some(max) = spec.maximum {
                    if n > max {
                        violations.push(format!("{key} must be at most {max}"));
                    }
                }
            }

            if let Some(s) = value.as_str() {
                let len = s.chars().count();
                if let Some(min) = spec.min_length {
                    if len < min {
                        violations.push(format!("{key} must be at least {min} characters"));
                    }
                }
                if let Some(max) = spec.max_length {
                    if len > max {
                        violations.push(format!("{key} must be at most {max} characters"));
                    }
                }
            }
        }

        violations
    }
}

fn render_option(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> ConfigSchema {
        ConfigSchema::new()
            .property("name", PropertySpec::string().required())
            .property(
                "channel",
                PropertySpec::string().options(["email", "sms", "push"]),
            )
            .property("budget", PropertySpec::number().minimum(1.0).maximum(10_000.0))
            .property("subject", PropertySpec::string().min_length(3).max_length(80))
    }

    #[test]
    fn type_mismatch_yields_exactly_one_error_naming_key_and_type() {
        let schema = ConfigSchema::new().property("name", PropertySpec::string().required());
        let violations = schema.validate(&json!({ "name": 123 }));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("name"));
        assert!(violations[0].contains("string"));
    }

    #[test]
    fn missing_required_property_is_reported() {
        let violations = sample_schema().validate(&json!({}));
        assert_eq!(violations, vec!["name is required".to_string()]);
    }

    #[test]
    fn empty_string_counts_as_missing() {
        let violations = sample_schema().validate(&json!({ "name": "" }));
        assert_eq!(violations, vec!["name is required".to_string()]);
    }

    #[test]
    fn all_violations_are_collected_not_just_the_first() {
        let violations = sample_schema().validate(&json!({
            "channel": "fax",
            "budget": 0,
            "subject": "hi",
        }));
        assert_eq!(violations.len(), 4);
        assert!(violations.iter().any(|v| v == "name is required"));
        assert!(violations
            .iter()
            .any(|v| v == "channel must be one of: email, sms, push"));
        assert!(violations.iter().any(|v| v == "budget must be at least 1"));
        assert!(violations
            .iter()
            .any(|v| v == "subject must be at least 3 characters"));
    }

    #[test]
    fn validation_is_deterministic_across_runs() {
        let config = json!({ "channel": "fax", "budget": 99_999 });
        let first = sample_schema().validate(&config);
        for _ in 0..10 {
            assert_eq!(sample_schema().validate(&config), first);
        }
    }

    #[test]
    fn bounds_are_not_checked_on_mistyped_values() {
        let schema = ConfigSchema::new()
            .property("subject", PropertySpec::string().min_length(3));
        let violations = schema.validate(&json!({ "subject": 42 }));
        assert_eq!(violations, vec!["subject must be a string".to_string()]);
    }

    #[test]
    fn valid_config_passes_clean() {
        let violations = sample_schema().validate(&json!({
            "name": "welcome-blast",
            "channel": "email",
            "budget": 250,
            "subject": "Welcome aboard",
        }));
        assert!(violations.is_empty());
    }
}

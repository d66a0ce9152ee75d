//! # Validation Module
//!
//! Schema-driven validation of JSON records. A [`ValidationSchema`] mirrors the
//! shape of the data; [`validate`] walks both together and collects every
//! problem as a [`ValidationError`] with the breadcrumb path to the offending
//! field. Validation never fails with an `Err`: callers inspect
//! [`ValidationResult::valid`]. Inside a pipeline, [`validate_transformer`]
//! turns a failed validation into a stage error.

use crate::etl::error::{EtlError, Result};
use crate::etl::pipeline::Transformer;
use crate::etl::utils::type_name;
use async_trait::async_trait;
use chrono::DateTime;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    /// RFC 3339 timestamp string
    Date,
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Date => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Rule failure text, fixed or computed from the failing value
#[derive(Clone)]
pub enum RuleMessage {
    Static(String),
    Dynamic(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl RuleMessage {
    pub fn render(&self, value: &Value) -> String {
        match self {
            RuleMessage::Static(text) => text.clone(),
            RuleMessage::Dynamic(f) => f(value),
        }
    }
}

/// A reusable leaf check with its failure message.
#[derive(Clone)]
pub struct ValidationRule {
    pub validator: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    pub message: RuleMessage,
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule").finish_non_exhaustive()
    }
}

/// Schema of one field. Objects nest `properties`, arrays nest `items`.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub field_type: FieldType,
    pub required: bool,
    pub rules: Vec<ValidationRule>,
    pub default_value: Option<Value>,
    pub allow_null: bool,
    pub properties: Option<ValidationSchema>,
    pub items: Option<Box<SchemaField>>,
}

impl SchemaField {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            rules: Vec::new(),
            default_value: None,
            allow_null: false,
            properties: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn any() -> Self {
        Self::new(FieldType::Any)
    }

    pub fn object(properties: ValidationSchema) -> Self {
        Self {
            properties: Some(properties),
            ..Self::new(FieldType::Object)
        }
    }

    pub fn array(items: SchemaField) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new(FieldType::Array)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Named fields of an object, validated in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ValidationSchema {
    fields: Vec<(String, SchemaField)>,
}

impl ValidationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, or replace an existing one in place.
    pub fn field(mut self, name: impl Into<String>, field: SchemaField) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = field,
            None => self.fields.push((name, field)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&SchemaField> {
        self.fields
            .iter()
            .find_map(|(existing, field)| (existing == name).then_some(field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a declarative schema. JSON objects carry no key order, so
    /// fields declared this way are validated in name order.
    ///
    /// ```json
    /// {
    ///   "email": {"type": "string", "required": true, "rules": [{"pattern": "@"}]},
    ///   "age": {"type": "integer", "rules": [{"min": 0}, {"max": 150}]},
    ///   "tags": {"type": "array", "items": {"type": "string"}}
    /// }
    /// ```
    pub fn from_json(input: &Value) -> Result<Self> {
        let definitions: BTreeMap<String, FieldDefinition> =
            serde_json::from_value(input.clone()).map_err(EtlError::from_serde)?;
        definitions
            .into_iter()
            .try_fold(ValidationSchema::new(), |schema, (name, definition)| {
                Ok(schema.field(name, definition.into_field()?))
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDefinition {
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    allow_null: bool,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    rules: Vec<RuleDefinition>,
    #[serde(default)]
    properties: Option<BTreeMap<String, FieldDefinition>>,
    #[serde(default)]
    items: Option<Box<FieldDefinition>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum RuleDefinition {
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    Pattern(String),
    OneOf(Vec<Value>),
}

impl FieldDefinition {
    fn into_field(self) -> Result<SchemaField> {
        let mut field = SchemaField::new(self.field_type);
        field.required = self.required;
        field.allow_null = self.allow_null;
        field.default_value = self.default_value;
        for rule in self.rules {
            field.rules.push(match rule {
                RuleDefinition::Min(n) => rules::min(n),
                RuleDefinition::Max(n) => rules::max(n),
                RuleDefinition::MinLength(n) => rules::min_length(n),
                RuleDefinition::MaxLength(n) => rules::max_length(n),
                RuleDefinition::Pattern(p) => rules::pattern(&p)?,
                RuleDefinition::OneOf(options) => rules::one_of(options),
            });
        }
        if let Some(properties) = self.properties {
            let mut nested = ValidationSchema::new();
            for (name, definition) in properties {
                nested = nested.field(name, definition.into_field()?);
            }
            field.properties = Some(nested);
        }
        if let Some(items) = self.items {
            field.items = Some(Box::new(items.into_field()?));
        }
        Ok(field)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
    /// Stop at the first recorded error
    pub abort_early: bool,
    /// Accept keys the schema does not declare
    pub allow_unknown: bool,
    /// Drop undeclared keys from the returned value
    pub strip_unknown: bool,
}

impl ValidationOptions {
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            abort_early: false,
            allow_unknown: true,
            strip_unknown: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Breadcrumb from the record root; array indices are numeric segments
    pub path: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    /// The input with defaults applied and unknown keys stripped if requested
    pub value: Value,
}

struct Walker<'a> {
    options: &'a ValidationOptions,
    errors: Vec<ValidationError>,
}

impl Walker<'_> {
    fn halted(&self) -> bool {
        self.options.abort_early && !self.errors.is_empty()
    }

    fn report(&mut self, path: &[String], message: String, value: Option<&Value>) {
        debug!("Validation failed at {:?}: {}", path, message);
        self.errors.push(ValidationError {
            path: path.to_vec(),
            message,
            value: value.cloned(),
        });
    }

    fn object(&mut self, data: &Map<String, Value>, schema: &ValidationSchema, path: &mut Vec<String>) -> Map<String, Value> {
        let mut output = Map::new();

        for (name, field) in &schema.fields {
            if self.halted() {
                break;
            }
            path.push(name.clone());
            if let Some(value) = self.field(data.get(name), field, path) {
                output.insert(name.clone(), value);
            }
            path.pop();
        }

        for (key, value) in data {
            if schema.get(key).is_some() {
                continue;
            }
            if !self.options.allow_unknown && !self.halted() {
                path.push(key.clone());
                self.report(path, "Unknown field".to_string(), Some(value));
                path.pop();
            }
            if !self.options.strip_unknown {
                output.insert(key.clone(), value.clone());
            }
        }

        output
    }

    fn field(&mut self, value: Option<&Value>, field: &SchemaField, path: &mut Vec<String>) -> Option<Value> {
        let value = match value {
            None => {
                if field.required {
                    self.report(path, "Field is required".to_string(), None);
                }
                return field.default_value.clone();
            }
            Some(Value::Null) => {
                if field.allow_null {
                    return Some(Value::Null);
                }
                let message = if field.required {
                    "Field is required"
                } else {
                    "Field cannot be null"
                };
                self.report(path, message.to_string(), Some(&Value::Null));
                return Some(Value::Null);
            }
            Some(value) => value,
        };

        if !field.field_type.matches(value) {
            self.report(
                path,
                format!("Expected {}, got {}", field.field_type, type_name(value)),
                Some(value),
            );
            return Some(value.clone());
        }

        let output = match (value, &field.properties, &field.items) {
            (Value::Object(map), Some(properties), _) => Value::Object(self.object(map, properties, path)),
            (Value::Array(items), _, Some(item_schema)) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if self.halted() {
                        out.push(item.clone());
                        continue;
                    }
                    path.push(index.to_string());
                    out.push(self.field(Some(item), item_schema, path).unwrap_or(Value::Null));
                    path.pop();
                }
                Value::Array(out)
            }
            _ => value.clone(),
        };

        for rule in &field.rules {
            if self.halted() {
                break;
            }
            if !(rule.validator)(value) {
                self.report(path, rule.message.render(value), Some(value));
            }
        }

        Some(output)
    }
}

/// Validate `data` against `schema`.
///
/// Per field the checks run in this order: required, null handling, type,
/// nested properties/items, custom rules. A type mismatch skips the rest.
/// Defaults fill missing fields in the returned value but never satisfy
/// `required`.
pub fn validate(data: &Value, schema: &ValidationSchema, options: &ValidationOptions) -> ValidationResult {
    let mut walker = Walker {
        options,
        errors: Vec::new(),
    };
    let value = match data {
        Value::Object(map) => Value::Object(walker.object(map, schema, &mut Vec::new())),
        other => {
            walker.report(&[], format!("Expected object, got {}", type_name(other)), Some(other));
            other.clone()
        }
    };
    ValidationResult {
        valid: walker.errors.is_empty(),
        errors: walker.errors,
        value,
    }
}

/// Pipeline stage that validates its input and passes on the cleaned value.
pub fn validate_transformer(schema: ValidationSchema, options: ValidationOptions) -> SchemaValidator {
    SchemaValidator { schema, options }
}

pub struct SchemaValidator {
    schema: ValidationSchema,
    options: ValidationOptions,
}

#[async_trait]
impl Transformer<Value, Value> for SchemaValidator {
    async fn transform(&self, input: Value) -> Result<Value> {
        let result = validate(&input, &self.schema, &self.options);
        if result.valid {
            Ok(result.value)
        } else {
            let joined = result
                .errors
                .iter()
                .map(ValidationError::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(EtlError::Validation(joined))
        }
    }
}

/// Constructors for common [`ValidationRule`]s.
pub mod rules {
    use super::{FieldType, RuleMessage, ValidationRule};
    use crate::etl::error::{EtlError, Result};
    use crate::etl::utils::loose_eq;
    use regex::Regex;
    use serde_json::Value;
    use std::sync::Arc;

    fn length(value: &Value) -> Option<usize> {
        match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    pub fn custom<F>(validator: F, message: impl Into<String>) -> ValidationRule
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        ValidationRule {
            validator: Arc::new(validator),
            message: RuleMessage::Static(message.into()),
        }
    }

    /// Like [`custom`], with the message computed from the failing value.
    pub fn custom_with<F, M>(validator: F, message: M) -> ValidationRule
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
        M: Fn(&Value) -> String + Send + Sync + 'static,
    {
        ValidationRule {
            validator: Arc::new(validator),
            message: RuleMessage::Dynamic(Arc::new(message)),
        }
    }

    /// Rejects null, empty strings and empty arrays.
    pub fn required() -> ValidationRule {
        custom(
            |v| !v.is_null() && length(v) != Some(0),
            "Value is required",
        )
    }

    pub fn min(minimum: f64) -> ValidationRule {
        custom_with(
            move |v| v.as_f64().is_some_and(|n| n >= minimum),
            move |v| format!("Value must be at least {minimum}, got {v}"),
        )
    }

    pub fn max(maximum: f64) -> ValidationRule {
        custom_with(
            move |v| v.as_f64().is_some_and(|n| n <= maximum),
            move |v| format!("Value must be at most {maximum}, got {v}"),
        )
    }

    pub fn min_length(minimum: usize) -> ValidationRule {
        custom_with(
            move |v| length(v).is_some_and(|n| n >= minimum),
            move |v| {
                format!(
                    "Length must be at least {minimum}, got {}",
                    length(v).unwrap_or(0)
                )
            },
        )
    }

    pub fn max_length(maximum: usize) -> ValidationRule {
        custom_with(
            move |v| length(v).is_some_and(|n| n <= maximum),
            move |v| {
                format!(
                    "Length must be at most {maximum}, got {}",
                    length(v).unwrap_or(0)
                )
            },
        )
    }

    pub fn pattern(source: &str) -> Result<ValidationRule> {
        let regex = Regex::new(source)
            .map_err(|e| EtlError::Configuration(format!("invalid pattern '{source}': {e}")))?;
        let message = format!("Value must match pattern {source}");
        Ok(custom(
            move |v| v.as_str().is_some_and(|s| regex.is_match(s)),
            message,
        ))
    }

    pub fn one_of(options: Vec<Value>) -> ValidationRule {
        let listed = options
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        custom(
            move |v| options.iter().any(|o| loose_eq(o, v)),
            format!("Value must be one of: {listed}"),
        )
    }

    pub fn type_validator(field_type: FieldType) -> ValidationRule {
        custom(
            move |v| field_type.matches(v),
            format!("Value must be of type {field_type}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> ValidationSchema {
        ValidationSchema::new()
            .field(
                "email",
                SchemaField::string()
                    .required()
                    .rule(rules::pattern("^[^@]+@[^@]+$").unwrap()),
            )
            .field("age", SchemaField::integer().rule(rules::min(0.0)).rule(rules::max(150.0)))
            .field("role", SchemaField::string().default_value(json!("member")))
            .field("nickname", SchemaField::string().nullable())
            .field(
                "address",
                SchemaField::object(
                    ValidationSchema::new()
                        .field("city", SchemaField::string().required())
                        .field("zip", SchemaField::string().rule(rules::min_length(5))),
                ),
            )
            .field("tags", SchemaField::array(SchemaField::string().rule(rules::max_length(8))))
    }

    fn paths(result: &ValidationResult) -> Vec<String> {
        result.errors.iter().map(|e| e.path.join(".")).collect()
    }

    #[test]
    fn test_valid_record_gets_defaults() {
        let result = validate(
            &json!({"email": "ada@example.com", "age": 36, "nickname": null}),
            &user_schema(),
            &ValidationOptions::default(),
        );
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(
            result.value,
            json!({"email": "ada@example.com", "age": 36, "nickname": null, "role": "member"})
        );
    }

    #[test]
    fn test_default_does_not_satisfy_required() {
        let schema = ValidationSchema::new().field(
            "status",
            SchemaField::string().required().default_value(json!("draft")),
        );
        let result = validate(&json!({}), &schema, &ValidationOptions::default());

        assert!(!result.valid);
        assert_eq!(result.errors[0].path, vec!["status".to_string()]);
        assert_eq!(result.errors[0].message, "Field is required");
        assert_eq!(result.value, json!({"status": "draft"}));
    }

    #[test]
    fn test_nested_errors_carry_paths() {
        let result = validate(
            &json!({
                "email": "not-an-email",
                "age": -3,
                "address": {"zip": "123"},
                "tags": ["ok", 7, "far-too-long-tag"]
            }),
            &user_schema(),
            &ValidationOptions::default(),
        );

        assert_eq!(
            paths(&result),
            vec!["email", "age", "address.city", "address.zip", "tags.1", "tags.2"]
        );
        assert_eq!(result.errors[1].message, "Value must be at least 0, got -3");
        assert_eq!(result.errors[4].message, "Expected string, got number");
        assert_eq!(result.errors[4].value, Some(json!(7)));
    }

    #[test]
    fn test_type_mismatch_skips_nested_checks() {
        let result = validate(
            &json!({"email": "a@b", "address": "Main St 1"}),
            &user_schema(),
            &ValidationOptions::default(),
        );
        assert_eq!(paths(&result), vec!["address"]);
        assert_eq!(result.errors[0].message, "Expected object, got string");
    }

    #[test]
    fn test_null_handling() {
        let result = validate(
            &json!({"email": null, "role": null}),
            &user_schema(),
            &ValidationOptions::default(),
        );
        let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["Field is required", "Field cannot be null"]);
    }

    #[test]
    fn test_abort_early() {
        let options = ValidationOptions {
            abort_early: true,
            ..Default::default()
        };
        let result = validate(&json!({"age": "old", "tags": [1, 2]}), &user_schema(), &options);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(paths(&result), vec!["email"]);
    }

    #[test]
    fn test_fields_checked_in_declaration_order() {
        let schema = ValidationSchema::new()
            .field("zip", SchemaField::string().required())
            .field("city", SchemaField::string().required())
            .field("zip", SchemaField::string().required().rule(rules::min_length(5)));
        assert_eq!(schema.len(), 2);

        let options = ValidationOptions {
            abort_early: true,
            ..Default::default()
        };
        let result = validate(&json!({}), &schema, &options);
        assert_eq!(paths(&result), vec!["zip"]);

        let result = validate(&json!({"zip": "123"}), &schema, &ValidationOptions::default());
        assert_eq!(paths(&result), vec!["zip", "city"]);
    }

    #[test]
    fn test_unknown_fields() {
        let schema = ValidationSchema::new().field("id", SchemaField::integer());
        let data = json!({"id": 1, "debug": true});

        let lenient = validate(&data, &schema, &ValidationOptions::default());
        assert!(lenient.valid);
        assert_eq!(lenient.value, data);

        let strict = validate(
            &data,
            &schema,
            &ValidationOptions {
                allow_unknown: false,
                ..Default::default()
            },
        );
        assert_eq!(strict.errors[0].message, "Unknown field");
        assert_eq!(strict.errors[0].path, vec!["debug".to_string()]);
        assert_eq!(strict.value, data);

        let stripped = validate(
            &data,
            &schema,
            &ValidationOptions::from_json(&json!({"allowUnknown": false, "stripUnknown": true})).unwrap(),
        );
        assert!(!stripped.valid);
        assert_eq!(stripped.value, json!({"id": 1}));
    }

    #[test]
    fn test_rule_library() {
        let check = |rule: ValidationRule, value: Value| (rule.validator)(&value);

        assert!(check(rules::required(), json!("x")));
        assert!(!check(rules::required(), json!("")));
        assert!(!check(rules::required(), json!([])));
        assert!(check(rules::one_of(vec![json!("a"), json!(2)]), json!(2.0)));
        assert!(!check(rules::one_of(vec![json!("a")]), json!("b")));
        assert!(check(rules::type_validator(FieldType::Date), json!("2024-05-01T10:00:00Z")));
        assert!(!check(rules::type_validator(FieldType::Date), json!("yesterday")));
        assert!(rules::pattern("(").is_err());

        let rule = rules::max_length(3);
        assert_eq!(rule.message.render(&json!("abcd")), "Length must be at most 3, got 4");
    }

    #[test]
    fn test_schema_from_json() {
        let schema = ValidationSchema::from_json(&json!({
            "sku": {"type": "string", "required": true, "rules": [{"pattern": "^[A-Z]-\\d+$"}]},
            "qty": {"type": "integer", "rules": [{"min": 1}]},
            "unit": {"type": "string", "rules": [{"oneOf": ["pcs", "kg"]}], "defaultValue": "pcs"},
            "dims": {"type": "object", "properties": {"w": {"type": "number"}}},
            "notes": {"type": "array", "allowNull": true, "items": {"type": "string", "rules": [{"maxLength": 4}]}}
        }))
        .unwrap();
        assert_eq!(schema.len(), 5);

        let result = validate(
            &json!({"sku": "A-12", "qty": 0, "dims": {"w": "wide"}, "notes": null}),
            &schema,
            &ValidationOptions::default(),
        );
        assert_eq!(paths(&result), vec!["dims.w", "qty"]);
        assert_eq!(result.value["unit"], json!("pcs"));

        assert!(ValidationSchema::from_json(&json!({"x": {"type": "string", "rules": [{"pattern": "["}]}})).is_err());
        assert!(ValidationSchema::from_json(&json!({"x": {"type": "uuid"}})).is_err());
    }

    #[tokio::test]
    async fn test_validate_transformer() {
        let stage = validate_transformer(user_schema(), ValidationOptions::default());
        let cleaned = stage.transform(json!({"email": "a@b"})).await.unwrap();
        assert_eq!(cleaned["role"], json!("member"));

        let err = stage.transform(json!({"age": 200})).await.unwrap_err();
        assert_eq!(
            err,
            EtlError::Validation(
                "age: Value must be at most 150, got 200; email: Field is required".to_string()
            )
        );
    }
}

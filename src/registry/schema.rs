//! JSON-Schema-style validation for component configuration blocks
//!
//! Only the subset the configuration format needs is supported: `type`,
//! `required`, `properties`, `additionalProperties`, `items` and `default`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Raised when a configuration block does not satisfy its schema
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration at '{path}': {constraint}")]
pub struct SchemaValidationError {
    /// Dotted path to the offending field (`$` is the block root)
    pub path: String,

    /// The constraint that was violated
    pub constraint: String,
}

/// Primitive JSON types a schema can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Boolean,
    Integer,
    Number,
    Null,
}

impl SchemaType {
    fn matches(self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => value.is_string(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Number => value.is_number(),
            SchemaType::Null => value.is_null(),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Boolean => "boolean",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Null => "null",
        };
        f.write_str(name)
    }
}

/// Policy for object keys not listed in `properties`
#[derive(Debug, Clone)]
pub enum Additional {
    Allowed,
    Forbidden,
    Matching(Box<Schema>),
}

/// A schema document node
#[derive(Debug, Clone)]
pub struct Schema {
    pub types: Vec<SchemaType>,
    pub description: Option<String>,
    pub required: Vec<String>,
    pub properties: BTreeMap<String, Schema>,
    pub additional: Additional,
    pub items: Option<Box<Schema>>,
    pub default: Option<Value>,
}

impl Schema {
    fn of(types: Vec<SchemaType>) -> Self {
        Self {
            types,
            description: None,
            required: Vec::new(),
            properties: BTreeMap::new(),
            additional: Additional::Allowed,
            items: None,
            default: None,
        }
    }

    /// Matches any value
    pub fn any() -> Self {
        Self::of(Vec::new())
    }

    pub fn object() -> Self {
        Self::of(vec![SchemaType::Object])
    }

    pub fn string() -> Self {
        Self::of(vec![SchemaType::String])
    }

    pub fn boolean() -> Self {
        Self::of(vec![SchemaType::Boolean])
    }

    pub fn array_of(items: Schema) -> Self {
        let mut schema = Self::of(vec![SchemaType::Array]);
        schema.items = Some(Box::new(items));
        schema
    }

    /// Accepts any of the given types
    pub fn one_of_types(types: &[SchemaType]) -> Self {
        Self::of(types.to_vec())
    }

    /// The base schema every pluggable component shares
    pub fn component() -> Self {
        Self::object()
            .property(
                "class",
                Schema::string().describe("Identifier of the component implementation."),
            )
            .require("class")
            .deny_additional()
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn property(mut self, name: &str, schema: Schema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn require(mut self, name: &str) -> Self {
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn deny_additional(mut self) -> Self {
        self.additional = Additional::Forbidden;
        self
    }

    pub fn additional(mut self, schema: Schema) -> Self {
        self.additional = Additional::Matching(Box::new(schema));
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Validate `value` against this schema
    pub fn validate(&self, value: &Value) -> Result<(), SchemaValidationError> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<(), SchemaValidationError> {
        if !self.types.is_empty() && !self.types.iter().any(|t| t.matches(value)) {
            let expected: Vec<String> = self.types.iter().map(ToString::to_string).collect();
            return Err(SchemaValidationError {
                path: path.to_string(),
                constraint: format!("expected type {}", expected.join(" or ")),
            });
        }

        if let Value::Object(map) = value {
            for name in &self.required {
                if !map.contains_key(name) {
                    return Err(SchemaValidationError {
                        path: join(path, name),
                        constraint: "required property is missing".to_string(),
                    });
                }
            }

            for (name, field) in map {
                let field_path = join(path, name);
                match self.properties.get(name) {
                    Some(schema) => schema.validate_at(&field_path, field)?,
                    None => match &self.additional {
                        Additional::Allowed => {}
                        Additional::Forbidden => {
                            return Err(SchemaValidationError {
                                path: field_path,
                                constraint: "additional properties are not allowed".to_string(),
                            });
                        }
                        Additional::Matching(schema) => schema.validate_at(&field_path, field)?,
                    },
                }
            }
        }

        if let (Value::Array(items), Some(schema)) = (value, &self.items) {
            for (i, item) in items.iter().enumerate() {
                schema.validate_at(&format!("{}[{}]", path, i), item)?;
            }
        }

        Ok(())
    }

    /// Fill unset optional properties with their declared defaults
    pub fn apply_defaults(&self, value: &mut Value) {
        let Value::Object(map) = value else {
            return;
        };

        for (name, schema) in &self.properties {
            match map.get_mut(name) {
                Some(existing) => schema.apply_defaults(existing),
                None => {
                    if let Some(default) = &schema.default {
                        map.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    /// Validate, then return a normalized copy with defaults filled in
    pub fn normalize(&self, value: &Value) -> Result<Map<String, Value>, SchemaValidationError> {
        self.validate(value)?;
        let mut normalized = value.clone();
        self.apply_defaults(&mut normalized);

        match normalized {
            Value::Object(map) => Ok(map),
            _ => Err(SchemaValidationError {
                path: "$".to_string(),
                constraint: "expected type object".to_string(),
            }),
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path == "$" {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

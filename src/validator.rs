//! Structural checks of component schemas through a pluggable validator.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;
use crate::pointer;
use crate::types::SpecKind;

/// Outcome of checking one or more schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<SchemaError>,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

impl Validation {
    fn absorb(&mut self, prefix: &str, other: Validation) {
        self.valid &= other.valid;
        self.errors
            .extend(other.errors.into_iter().map(|e| SchemaError {
                path: format!("{}{}", prefix, e.path),
                message: e.message,
            }));
    }
}

/// Checks that a JSON Schema is well formed.
///
/// Receives an owned copy, so implementations may rewrite it freely.
pub trait SchemaValidator {
    fn validate(&self, schema: Value) -> Validation;
}

/// [`SchemaValidator`] backed by the `jsonschema` crate's meta-schema checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, schema: Value) -> Validation {
        match jsonschema::validator_for(&schema) {
            Ok(_) => Validation::default(),
            Err(e) => Validation {
                valid: false,
                errors: vec![SchemaError {
                    path: e.instance_path.to_string(),
                    message: e.to_string(),
                }],
            },
        }
    }
}

/// Check every component schema of an OpenAPI or Swagger document.
///
/// Each schema is handed over as a clone carrying the document's schema
/// container (`components.schemas` or `definitions`), so local `$ref`
/// pointers between schemas still resolve. Error paths are prefixed with the
/// pointer of the offending component.
pub fn validate_component_schemas(document: &Value, validator: &dyn SchemaValidator) -> Validation {
    let kind = SpecKind::detect(document);
    let (container, prefix) = match kind {
        SpecKind::OpenApi => (
            document.get("components").and_then(|c| c.get("schemas")),
            "#/components/schemas",
        ),
        SpecKind::Swagger => (document.get("definitions"), "#/definitions"),
        _ => return Validation::default(),
    };

    let mut validation = Validation::default();
    let Some(schemas) = container.and_then(Value::as_object) else {
        return validation;
    };

    for (name, schema) in schemas {
        let mut candidate = schema.clone();
        if let Some(object) = candidate.as_object_mut() {
            match kind {
                SpecKind::Swagger => {
                    object.insert("definitions".to_string(), Value::Object(schemas.clone()));
                }
                _ => {
                    object.insert(
                        "components".to_string(),
                        serde_json::json!({ "schemas": schemas }),
                    );
                }
            }
        }

        let location = format!("{}/{}", prefix, pointer::encode(name));
        let result = validator.validate(candidate);
        if !result.valid {
            debug!(schema = %location, errors = result.errors.len(), "invalid schema");
        }
        validation.absorb(&location, result);
    }
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    /// Records every schema it is shown and rejects those titled "bad".
    #[derive(Default)]
    struct Recording {
        seen: RefCell<Vec<Value>>,
    }

    impl SchemaValidator for Recording {
        fn validate(&self, schema: Value) -> Validation {
            let bad = schema.get("title") == Some(&json!("bad"));
            self.seen.borrow_mut().push(schema);
            if bad {
                Validation {
                    valid: false,
                    errors: vec![SchemaError {
                        path: "/title".into(),
                        message: "bad title".into(),
                    }],
                }
            } else {
                Validation::default()
            }
        }
    }

    #[test]
    fn hands_each_schema_with_its_container() {
        let doc = json!({
            "openapi": "3.0.3",
            "components": { "schemas": {
                "Pet": { "properties": { "tag": { "$ref": "#/components/schemas/Tag" } } },
                "Tag": { "type": "string", "title": "bad" }
            }}
        });
        let recording = Recording::default();
        let validation = validate_component_schemas(&doc, &recording);

        let seen = recording.seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["components"]["schemas"]["Tag"]["type"], "string");
        assert!(!validation.valid);
        assert_eq!(
            validation.errors,
            vec![SchemaError {
                path: "#/components/schemas/Tag/title".into(),
                message: "bad title".into(),
            }]
        );
    }

    #[test]
    fn swagger_definitions_are_checked() {
        let doc = json!({
            "swagger": "2.0",
            "definitions": { "Pet": { "type": "object" } }
        });
        let recording = Recording::default();
        assert!(validate_component_schemas(&doc, &recording).valid);
        assert_eq!(recording.seen.borrow()[0]["definitions"]["Pet"]["type"], "object");
    }

    #[test]
    fn jsonschema_accepts_linked_schemas() {
        let doc = json!({
            "openapi": "3.1.0",
            "components": { "schemas": {
                "Pet": { "type": "object", "properties": { "tag": { "$ref": "#/components/schemas/Tag" } } },
                "Tag": { "type": "string" }
            }}
        });
        let validation = validate_component_schemas(&doc, &JsonSchemaValidator);
        assert!(validation.valid, "{:?}", validation.errors);
    }

    #[test]
    fn jsonschema_rejects_malformed_schema() {
        let validation = JsonSchemaValidator.validate(json!({ "type": 12 }));
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 1);
    }

    #[test]
    fn documents_without_schemas_are_valid() {
        let doc = json!({ "openapi": "3.0.3", "paths": {} });
        assert_eq!(
            validate_component_schemas(&doc, &JsonSchemaValidator),
            Validation::default()
        );
    }
}

//! Caller-owned handle around a parsed API definition.
//!
//! Carries the dialect, the circular pointers found by the last dereference and
//! a cache of per-operation JSON Schemas. The cache is cleared whenever the
//! tree is replaced or dereferenced again.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::bundle::Bundler;
use crate::dereference::{dereference, CircularRefRegistry};
use crate::error::DocumentError;
use crate::loader::load_document_auto;
use crate::reduce::reduce;
use crate::resolver;
use crate::types::{ref_target, DereferenceOptions, Selection, SpecKind, HTTP_METHODS};
use crate::validator::{validate_component_schemas, SchemaValidator, Validation};

/// Parameter locations, in the order they appear in a computed schema.
const PARAMETER_LOCATIONS: &[&str] = &["path", "query", "header", "cookie", "formData"];

/// Computed operation schemas keyed by (path template, lowercase method).
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    entries: HashMap<(String, String), Value>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str, method: &str) -> Option<&Value> {
        self.entries
            .get(&(path.to_string(), method.to_ascii_lowercase()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An OpenAPI or Swagger definition together with its derived state.
#[derive(Debug, Clone)]
pub struct Document {
    value: Value,
    kind: SpecKind,
    circular: CircularRefRegistry,
    cache: SchemaCache,
}

impl Document {
    /// Load a definition from a file path or URL.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Load` when the source cannot be read or parsed,
    /// and `DocumentError::UnknownSpecification` for anything but OpenAPI or
    /// Swagger.
    pub fn load(source: &str) -> Result<Self, DocumentError> {
        Self::from_value(load_document_auto(source)?)
    }

    /// # Errors
    ///
    /// Returns `DocumentError::UnknownSpecification` for anything but OpenAPI
    /// or Swagger.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let kind = SpecKind::detect(&value);
        if !matches!(kind, SpecKind::OpenApi | SpecKind::Swagger) {
            return Err(DocumentError::UnknownSpecification);
        }
        Ok(Self {
            value,
            kind,
            circular: CircularRefRegistry::default(),
            cache: SchemaCache::default(),
        })
    }

    pub fn kind(&self) -> SpecKind {
        self.kind
    }

    /// The `openapi` or `swagger` version string.
    pub fn version(&self) -> Option<&str> {
        let marker = match self.kind {
            SpecKind::Swagger => "swagger",
            _ => "openapi",
        };
        self.value.get(marker).and_then(Value::as_str)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Dereference the tree in place and remember its circular pointers.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Dereference` under the fatal circular policy.
    pub fn dereference(
        &mut self,
        options: &DereferenceOptions,
    ) -> Result<&CircularRefRegistry, DocumentError> {
        self.cache.clear();
        self.circular = dereference(&mut self.value, options)?;
        Ok(&self.circular)
    }

    /// Replace the tree with its bundled form.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Bundle` when an external reference cannot be inlined.
    pub fn bundle(&mut self, bundler: &Bundler) -> Result<(), DocumentError> {
        self.value = bundler.bundle(&self.value)?;
        self.cache.clear();
        Ok(())
    }

    /// A new document holding only the selected operations and what they use.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Reduce` as [`reduce`] does.
    pub fn reduce(&self, selection: &Selection) -> Result<Document, DocumentError> {
        Document::from_value(reduce(&self.value, selection)?)
    }

    /// Circular pointers found by the last [`Document::dereference`].
    pub fn circular_refs(&self) -> &CircularRefRegistry {
        &self.circular
    }

    /// Every operation as `(path template, method)`, in document order.
    pub fn operations(&self) -> Vec<(&str, &str)> {
        let mut operations = Vec::new();
        let Some(paths) = self.value.get("paths").and_then(Value::as_object) else {
            return operations;
        };
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            for method in item.keys() {
                if HTTP_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                    operations.push((path.as_str(), method.as_str()));
                }
            }
        }
        operations
    }

    /// JSON Schema describing the inputs of one operation, computed once.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::OperationNotFound` when the path has no such method.
    pub fn operation_schema(&mut self, path: &str, method: &str) -> Result<&Value, DocumentError> {
        operation_schema(&self.value, path, method, &mut self.cache)
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Check every component schema with `validator`.
    pub fn validate_schemas(&self, validator: &dyn SchemaValidator) -> Validation {
        validate_component_schemas(&self.value, validator)
    }
}

/// JSON Schema for the inputs of the `method` operation on `path`, cached in `cache`.
///
/// The schema is an object with one member per parameter location (`path`,
/// `query`, `header`, `cookie`, `formData`) and a `body` member for the
/// request body. Path-level parameters apply unless the operation overrides
/// them by name and location. Dereference the document first for schemas
/// without `$ref` pointers.
///
/// # Errors
///
/// Returns `DocumentError::OperationNotFound` when the path has no such method.
pub fn operation_schema<'c>(
    document: &Value,
    path: &str,
    method: &str,
    cache: &'c mut SchemaCache,
) -> Result<&'c Value, DocumentError> {
    let method = method.to_ascii_lowercase();
    match cache.entries.entry((path.to_string(), method.clone())) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let schema = build_operation_schema(document, path, &method)?;
            debug!(path, method = %method, "computed operation schema");
            Ok(entry.insert(schema))
        }
    }
}

fn build_operation_schema(
    document: &Value,
    path: &str,
    method: &str,
) -> Result<Value, DocumentError> {
    let not_found = || DocumentError::OperationNotFound {
        path: path.to_string(),
        method: method.to_string(),
    };
    if !HTTP_METHODS.contains(&method) {
        return Err(not_found());
    }
    let item = document
        .get("paths")
        .and_then(|paths| paths.get(path))
        .ok_or_else(not_found)?;
    let operation = item
        .as_object()
        .and_then(|item| {
            item.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(method))
                .map(|(_, op)| op)
        })
        .ok_or_else(not_found)?;

    let mut groups: Map<String, Value> = Map::new();
    let mut body: Option<Value> = None;
    for parameter in merged_parameters(document, item, operation) {
        let (Some(name), Some(location)) = (
            parameter.get("name").and_then(Value::as_str),
            parameter.get("in").and_then(Value::as_str),
        ) else {
            continue;
        };
        if location == "body" {
            body = parameter.get("schema").cloned();
            continue;
        }

        let group = groups.entry(location.to_string()).or_insert_with(|| {
            json!({ "type": "object", "properties": {}, "required": [] })
        });
        let schema = parameter_schema(parameter);
        group["properties"][name] = schema;
        let required = parameter.get("required").and_then(Value::as_bool).unwrap_or(false);
        if required || location == "path" {
            if let Some(list) = group["required"].as_array_mut() {
                list.push(Value::String(name.to_string()));
            }
        }
    }

    if let Some(request_body) = operation.get("requestBody") {
        body = request_body_schema(document, request_body);
    }

    let mut properties = Map::new();
    let mut required = Vec::new();
    for location in PARAMETER_LOCATIONS {
        if let Some(mut group) = groups.remove(*location) {
            let has_required = group["required"]
                .as_array()
                .map(|r| !r.is_empty())
                .unwrap_or(false);
            if has_required {
                required.push(Value::String(location.to_string()));
            } else if let Some(group) = group.as_object_mut() {
                group.remove("required");
            }
            properties.insert(location.to_string(), group);
        }
    }
    if let Some(body) = body {
        properties.insert("body".to_string(), body);
    }

    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    Ok(schema)
}

/// Path-level parameters overridden by operation parameters with the same name and location.
fn merged_parameters<'a>(document: &'a Value, item: &'a Value, operation: &'a Value) -> Vec<&'a Value> {
    let mut merged: Vec<&Value> = Vec::new();
    let lists = [item.get("parameters"), operation.get("parameters")];
    for parameter in lists
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
    {
        let parameter = follow(document, parameter);
        let identity = (parameter.get("name"), parameter.get("in"));
        merged.retain(|existing| (existing.get("name"), existing.get("in")) != identity);
        merged.push(parameter);
    }
    merged
}

/// Follow a chain of local references; unresolvable ones stay as they are.
fn follow<'a>(document: &'a Value, mut value: &'a Value) -> &'a Value {
    let mut hops = 0;
    while let Some(target) = ref_target(value) {
        match resolver::resolve(target, document) {
            Ok(resolved) if hops < 32 => {
                value = resolved;
                hops += 1;
            }
            _ => break,
        }
    }
    value
}

/// OpenAPI parameters carry a `schema`; Swagger ones are the schema themselves.
fn parameter_schema(parameter: &Value) -> Value {
    let mut schema = match parameter.get("schema") {
        Some(schema) => schema.clone(),
        None => {
            let mut inline = parameter.clone();
            if let Some(inline) = inline.as_object_mut() {
                for key in ["name", "in", "required", "description", "allowEmptyValue", "collectionFormat"] {
                    inline.remove(key);
                }
            }
            inline
        }
    };
    if let (Some(description), Some(object)) = (parameter.get("description"), schema.as_object_mut()) {
        object
            .entry("description")
            .or_insert_with(|| description.clone());
    }
    schema
}

/// Schema of the JSON media type, or of the first media type declared.
fn request_body_schema(document: &Value, request_body: &Value) -> Option<Value> {
    let content = follow(document, request_body)
        .get("content")
        .and_then(Value::as_object)?;
    content
        .iter()
        .find(|(media, _)| media.starts_with("application/json"))
        .or_else(|| content.iter().next())
        .and_then(|(_, media)| media.get("schema"))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MethodFilter;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": { "title": "Petstore", "version": "1.0.0" },
            "paths": {
                "/pets/{petId}": {
                    "parameters": [
                        { "$ref": "#/components/parameters/PetId" },
                        { "name": "verbose", "in": "query", "schema": { "type": "boolean" } }
                    ],
                    "get": {
                        "parameters": [
                            { "name": "verbose", "in": "query", "required": true, "schema": { "type": "integer" } }
                        ],
                        "responses": { "200": { "description": "ok" } }
                    },
                    "put": {
                        "requestBody": { "$ref": "#/components/requestBodies/Pet" },
                        "responses": { "200": { "description": "ok" } }
                    }
                }
            },
            "components": {
                "parameters": {
                    "PetId": { "name": "petId", "in": "path", "description": "Pet id", "schema": { "type": "string" } }
                },
                "requestBodies": {
                    "Pet": {
                        "content": {
                            "application/xml": { "schema": { "type": "string" } },
                            "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } }
                        }
                    }
                },
                "schemas": {
                    "Pet": { "type": "object", "properties": { "child": { "$ref": "#/components/schemas/Pet" } } }
                }
            }
        })
    }

    #[test]
    fn rejects_unknown_documents() {
        let err = Document::from_value(json!({ "info": { "_postman_id": "1" } })).unwrap_err();
        assert!(matches!(err, DocumentError::UnknownSpecification));
    }

    #[test]
    fn reports_kind_and_version() {
        let doc = Document::from_value(petstore()).unwrap();
        assert_eq!(doc.kind(), SpecKind::OpenApi);
        assert_eq!(doc.version(), Some("3.0.3"));

        let swagger = Document::from_value(json!({ "swagger": "2.0" })).unwrap();
        assert_eq!(swagger.version(), Some("2.0"));
    }

    #[test]
    fn lists_operations() {
        let doc = Document::from_value(petstore()).unwrap();
        assert_eq!(
            doc.operations(),
            vec![("/pets/{petId}", "get"), ("/pets/{petId}", "put")]
        );
    }

    #[test]
    fn operation_schema_merges_parameters() {
        let mut doc = Document::from_value(petstore()).unwrap();
        let schema = doc.operation_schema("/pets/{petId}", "GET").unwrap().clone();

        assert_eq!(schema["required"], json!(["path", "query"]));
        assert_eq!(
            schema["properties"]["path"]["properties"]["petId"],
            json!({ "type": "string", "description": "Pet id" })
        );
        assert_eq!(schema["properties"]["path"]["required"], json!(["petId"]));
        assert_eq!(
            schema["properties"]["query"]["properties"]["verbose"]["type"],
            "integer"
        );
        assert!(schema["properties"].get("body").is_none());
    }

    #[test]
    fn operation_schema_prefers_json_body() {
        let mut doc = Document::from_value(petstore()).unwrap();
        let schema = doc.operation_schema("/pets/{petId}", "put").unwrap();
        assert_eq!(
            schema["properties"]["body"],
            json!({ "$ref": "#/components/schemas/Pet" })
        );
    }

    #[test]
    fn operation_schema_is_cached_until_dereference() {
        let mut doc = Document::from_value(petstore()).unwrap();
        doc.operation_schema("/pets/{petId}", "put").unwrap();
        assert_eq!(doc.schema_cache().len(), 1);
        assert!(doc.schema_cache().get("/pets/{petId}", "PUT").is_some());

        let circular = doc.dereference(&DereferenceOptions::new()).unwrap();
        assert!(circular.contains("#/components/schemas/Pet"));
        assert!(doc.schema_cache().is_empty());

        let schema = doc.operation_schema("/pets/{petId}", "put").unwrap();
        assert_eq!(schema["properties"]["body"]["type"], "object");
    }

    #[test]
    fn operation_schema_unknown_operation() {
        let mut doc = Document::from_value(petstore()).unwrap();
        let err = doc.operation_schema("/pets/{petId}", "delete").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::OperationNotFound { ref path, ref method } if path == "/pets/{petId}" && method == "delete"
        ));
        assert!(doc.operation_schema("/nope", "get").is_err());
    }

    #[test]
    fn swagger_body_and_inline_parameters() {
        let value = json!({
            "swagger": "2.0",
            "paths": {
                "/pets": {
                    "post": {
                        "parameters": [
                            { "name": "limit", "in": "query", "type": "integer", "format": "int32" },
                            { "name": "pet", "in": "body", "schema": { "$ref": "#/definitions/Pet" } }
                        ]
                    }
                }
            },
            "definitions": { "Pet": { "type": "object" } }
        });
        let mut cache = SchemaCache::new();
        let schema = operation_schema(&value, "/pets", "post", &mut cache).unwrap();

        assert_eq!(
            schema["properties"]["query"]["properties"]["limit"],
            json!({ "type": "integer", "format": "int32" })
        );
        assert!(schema["properties"]["query"].get("required").is_none());
        assert_eq!(schema["properties"]["body"]["$ref"], "#/definitions/Pet");
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn reduce_returns_a_document() {
        let doc = Document::from_value(petstore()).unwrap();
        let reduced = doc
            .reduce(&Selection::paths([("/pets/{petId}", MethodFilter::only(["get"]))]))
            .unwrap();
        assert_eq!(reduced.operations(), vec![("/pets/{petId}", "get")]);
        let components = reduced.value()["components"].as_object().unwrap();
        assert!(components.contains_key("parameters"));
        assert!(!components.contains_key("requestBodies"));
    }
}

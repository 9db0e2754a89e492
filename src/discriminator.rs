//! Polymorphism synthesis for schemas that use `discriminator` without `oneOf`/`anyOf`.
//!
//! Runs in two phases around dereferencing. Children are discovered while the
//! document still holds `$ref` pointers, and the `oneOf` is built from deep
//! copies of the dereferenced children afterwards. Adding a `oneOf` of `$ref`s
//! before dereferencing would make every child that inherits from its base via
//! `allOf` circular (Pet -> Cat -> Pet).

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::pointer;
use crate::types::ref_target;

const SCHEMAS_PREFIX: &str = "#/components/schemas/";

/// Base schema name to ordered child schema names.
pub type DiscriminatorMap = BTreeMap<String, Vec<String>>;

/// Find the children of every discriminator base schema.
///
/// A base is a component schema with a `discriminator` and neither `oneOf` nor
/// `anyOf`. Its children are the schemas named in `discriminator.mapping` or,
/// without a mapping, every other component schema whose `allOf` references it.
/// Bases without children are left out.
pub fn find_discriminator_children(document: &Value) -> DiscriminatorMap {
    let mut map = DiscriminatorMap::new();
    let Some(schemas) = component_schemas(document) else {
        return map;
    };

    for (name, schema) in schemas {
        let Some(discriminator) = schema.get("discriminator") else {
            continue;
        };
        if schema.get("oneOf").is_some() || schema.get("anyOf").is_some() {
            continue;
        }

        let mut children = mapped_children(discriminator);
        if children.is_empty() {
            children = inheriting_children(name, schemas);
        }
        if !children.is_empty() {
            debug!(base = %name, children = ?children, "discriminator children found");
            map.insert(name.clone(), children);
        }
    }
    map
}

/// Give each base in `map` a `oneOf` of deep copies of its children.
///
/// Children missing from `components.schemas` are skipped. A base left with no
/// children keeps its original shape.
pub fn build_discriminator_one_of(document: &mut Value, map: &DiscriminatorMap) {
    for (base, children) in map {
        let one_of: Vec<Value> = match component_schemas(document) {
            Some(schemas) => children
                .iter()
                .filter_map(|child| schemas.get(child).cloned())
                .collect(),
            None => return,
        };
        if one_of.is_empty() {
            debug!(base = %base, "no discriminator children to embed");
            continue;
        }

        let Some(base_schema) = document
            .pointer_mut(&format!("/components/schemas/{}", pointer::encode(base)))
            .and_then(Value::as_object_mut)
        else {
            continue;
        };
        base_schema.insert("oneOf".to_string(), Value::Array(one_of));
    }
}

fn component_schemas(document: &Value) -> Option<&serde_json::Map<String, Value>> {
    document
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
}

fn mapped_children(discriminator: &Value) -> Vec<String> {
    let Some(mapping) = discriminator.get("mapping").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut children: Vec<String> = Vec::new();
    for target in mapping.values().filter_map(Value::as_str) {
        if let Some(name) = mapping_target(target).as_deref().and_then(schema_name) {
            if !children.contains(&name) {
                children.push(name);
            }
        }
    }
    children
}

fn inheriting_children(base: &str, schemas: &serde_json::Map<String, Value>) -> Vec<String> {
    schemas
        .iter()
        .filter(|(name, _)| name.as_str() != base)
        .filter(|(_, schema)| {
            schema
                .get("allOf")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts.iter().any(|part| {
                        ref_target(part).and_then(schema_name).as_deref() == Some(base)
                    })
                })
                .unwrap_or(false)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Local pointer named by a `discriminator.mapping` value, or by a `$ref`.
///
/// Bare names stand for component schemas. External targets are not part of
/// the document.
pub(crate) fn mapping_target(target: &str) -> Option<String> {
    if pointer::is_local(target) {
        return Some(target.to_string());
    }
    if !target.is_empty() && !target.contains(['/', '.', '#', ':']) {
        return Some(pointer::from_segments(["components", "schemas", target]));
    }
    None
}

/// Schema name of a `#/components/schemas/<name>` pointer.
fn schema_name(target: &str) -> Option<String> {
    if !target.starts_with(SCHEMAS_PREFIX) {
        return None;
    }
    let segments = pointer::segments(target);
    match segments.as_slice() {
        [_, _, name] => Some(name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pets() -> Value {
        json!({
            "openapi": "3.0.3",
            "components": {
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["pet_type"],
                        "properties": { "pet_type": { "type": "string" } },
                        "discriminator": { "propertyName": "pet_type" }
                    },
                    "Cat": {
                        "allOf": [
                            { "$ref": "#/components/schemas/Pet" },
                            { "type": "object", "properties": { "meows": { "type": "boolean" } } }
                        ]
                    },
                    "Dog": {
                        "allOf": [
                            { "$ref": "#/components/schemas/Pet" },
                            { "type": "object", "properties": { "barks": { "type": "boolean" } } }
                        ]
                    },
                    "Rock": { "type": "object" }
                }
            }
        })
    }

    #[test]
    fn finds_implicit_children() {
        let map = find_discriminator_children(&pets());
        assert_eq!(map.get("Pet"), Some(&vec!["Cat".to_string(), "Dog".to_string()]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn prefers_explicit_mapping() {
        let mut doc = pets();
        doc["components"]["schemas"]["Pet"]["discriminator"]["mapping"] = json!({
            "cat": "#/components/schemas/Cat",
            "kitty": "#/components/schemas/Cat",
            "remote": "https://example.com/schemas/Fish"
        });
        let map = find_discriminator_children(&doc);
        assert_eq!(map.get("Pet"), Some(&vec!["Cat".to_string()]));
    }

    #[test]
    fn mapping_accepts_bare_schema_names() {
        let mut doc = pets();
        doc["components"]["schemas"]["Pet"]["discriminator"]["mapping"] = json!({
            "cat": "#/components/schemas/Cat",
            "dog": "Dog"
        });
        let map = find_discriminator_children(&doc);
        assert_eq!(map.get("Pet"), Some(&vec!["Cat".to_string(), "Dog".to_string()]));
    }

    #[test]
    fn mapping_target_normalizes_names() {
        assert_eq!(mapping_target("Cat").as_deref(), Some("#/components/schemas/Cat"));
        assert_eq!(
            mapping_target("#/components/schemas/Cat").as_deref(),
            Some("#/components/schemas/Cat")
        );
        assert_eq!(mapping_target("cat.yaml"), None);
        assert_eq!(mapping_target("https://example.com/cat"), None);
    }

    #[test]
    fn skips_bases_with_explicit_polymorphism() {
        let mut doc = pets();
        doc["components"]["schemas"]["Pet"]["oneOf"] = json!([
            { "$ref": "#/components/schemas/Cat" }
        ]);
        assert!(find_discriminator_children(&doc).is_empty());
    }

    #[test]
    fn builds_one_of_from_copies() {
        let mut doc = pets();
        let map = find_discriminator_children(&doc);
        build_discriminator_one_of(&mut doc, &map);

        let one_of = doc["components"]["schemas"]["Pet"]["oneOf"].as_array().unwrap();
        assert_eq!(one_of.len(), 2);
        assert_eq!(one_of[0], doc["components"]["schemas"]["Cat"]);

        let mut_entry = doc["components"]["schemas"]["Pet"]["oneOf"][0]
            .as_object_mut()
            .unwrap();
        mut_entry.insert("title".into(), json!("changed"));
        assert!(doc["components"]["schemas"]["Cat"].get("title").is_none());
    }

    #[test]
    fn missing_children_leave_base_untouched() {
        let mut doc = pets();
        let mut map = DiscriminatorMap::new();
        map.insert("Pet".into(), vec!["Ghost".into()]);
        build_discriminator_one_of(&mut doc, &map);
        assert!(doc["components"]["schemas"]["Pet"].get("oneOf").is_none());
    }

    #[test]
    fn schema_name_requires_component_pointer() {
        assert_eq!(schema_name("#/components/schemas/Cat").as_deref(), Some("Cat"));
        assert_eq!(schema_name("#/components/schemas/a~1b").as_deref(), Some("a/b"));
        assert_eq!(schema_name("#/components/schemas/Cat/properties/x"), None);
        assert_eq!(schema_name("#/definitions/Cat"), None);
    }
}

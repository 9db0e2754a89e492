//! JSON Pointer lookup inside a document.

use serde_json::Value;

use crate::error::ResolveError;
use crate::pointer;

/// Resolve an in-document pointer (e.g. `#/components/schemas/Pet`) against `document`.
///
/// `#` and `#/` resolve to the document itself. Array segments are decimal
/// indexes. Only fragment pointers are supported; loading other documents is
/// the job of an [`ExternalResolver`](crate::ExternalResolver).
///
/// # Errors
///
/// Returns `ResolveError::EmptyPointer` for `""`, `ResolveError::NotLocal` when the
/// pointer does not start with `#`, and `ResolveError::NotFound` when the path
/// does not exist.
pub fn resolve<'a>(pointer: &str, document: &'a Value) -> Result<&'a Value, ResolveError> {
    if pointer.is_empty() {
        return Err(ResolveError::EmptyPointer);
    }
    if !pointer::is_local(pointer) {
        return Err(ResolveError::NotLocal {
            pointer: pointer.to_string(),
        });
    }

    let mut current = document;
    for segment in pointer::segments(pointer) {
        current = step(current, &segment).ok_or_else(|| ResolveError::NotFound {
            pointer: pointer.to_string(),
        })?;
    }
    Ok(current)
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => {
            // RFC 6901: no leading zeros, no sign
            if segment.len() > 1 && segment.starts_with('0') {
                return None;
            }
            segment.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "openapi": "3.0.3",
            "paths": {
                "/pets/{id}": {
                    "get": {
                        "parameters": [
                            { "name": "id", "in": "path" },
                            { "name": "verbose", "in": "query" }
                        ]
                    }
                }
            },
            "components": {
                "schemas": {
                    "Pet": { "type": "object" },
                    "a/b~c": { "type": "string" },
                    "With Space": { "type": "integer" }
                }
            }
        })
    }

    #[test]
    fn resolves_component() {
        let doc = document();
        let node = resolve("#/components/schemas/Pet", &doc).unwrap();
        assert_eq!(node, &json!({ "type": "object" }));
    }

    #[test]
    fn resolves_escaped_segments() {
        let doc = document();
        let node = resolve("#/components/schemas/a~1b~0c", &doc).unwrap();
        assert_eq!(node["type"], "string");

        let node = resolve("#/components/schemas/With%20Space", &doc).unwrap();
        assert_eq!(node["type"], "integer");
    }

    #[test]
    fn resolves_array_index() {
        let doc = document();
        let node = resolve("#/paths/~1pets~1{id}/get/parameters/1", &doc).unwrap();
        assert_eq!(node["name"], "verbose");

        let err = resolve("#/paths/~1pets~1{id}/get/parameters/01", &doc).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn resolves_root() {
        let doc = document();
        assert_eq!(resolve("#", &doc).unwrap(), &doc);
        assert_eq!(resolve("#/", &doc).unwrap(), &doc);
    }

    #[test]
    fn empty_pointer_errors() {
        let doc = document();
        assert_eq!(resolve("", &doc), Err(ResolveError::EmptyPointer));
    }

    #[test]
    fn non_local_pointer_errors() {
        let doc = document();
        assert!(matches!(
            resolve("pet.json#/Pet", &doc),
            Err(ResolveError::NotLocal { pointer }) if pointer == "pet.json#/Pet"
        ));
    }

    #[test]
    fn missing_path_errors() {
        let doc = document();
        let err = resolve("#/components/schemas/Missing", &doc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find a definition for #/components/schemas/Missing."
        );
    }
}

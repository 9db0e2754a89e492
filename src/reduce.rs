//! Reduction: extract the minimal document reachable from a selection of operations.
//!
//! Works as mark-and-sweep over the reference graph. Selected operations and
//! their path-level parameters are the roots; every component reachable from
//! them through `$ref` pointers, discriminator mappings and security
//! requirements is marked; everything else is dropped. A pointer into another
//! path keeps the operation (or the path-level fields) it lands in.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::{Map, Value};
use tracing::debug;

use crate::discriminator::mapping_target;
use crate::error::ReduceError;
use crate::pointer;
use crate::resolver;
use crate::types::{collect_refs, MethodFilter, Selection, SpecKind, HTTP_METHODS};

/// A component's bucket (e.g. `schemas`) and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKey {
    pub bucket: String,
    pub name: String,
}

/// Every reusable component of a document, keyed by its pointer.
///
/// OpenAPI components live under `#/components/<bucket>/<name>`, Swagger ones
/// under `#/definitions`, `#/parameters`, `#/responses` and
/// `#/securityDefinitions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentIndex {
    kind: Option<SpecKind>,
    entries: BTreeMap<String, ComponentKey>,
}

pub(crate) const SWAGGER_BUCKETS: &[&str] = &["definitions", "parameters", "responses", "securityDefinitions"];

impl ComponentIndex {
    /// Index the components of an OpenAPI or Swagger document.
    pub fn build(document: &Value) -> Self {
        let kind = SpecKind::detect(document);
        let mut entries = BTreeMap::new();

        let buckets: Vec<(&String, &Value)> = match kind {
            SpecKind::OpenApi => document
                .get("components")
                .and_then(Value::as_object)
                .map(|c| c.iter().collect())
                .unwrap_or_default(),
            SpecKind::Swagger => document
                .as_object()
                .map(|root| {
                    root.iter()
                        .filter(|(k, _)| SWAGGER_BUCKETS.contains(&k.as_str()))
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        for (bucket, members) in buckets {
            let Some(members) = members.as_object() else {
                continue;
            };
            for name in members.keys() {
                let key = ComponentKey {
                    bucket: bucket.clone(),
                    name: name.clone(),
                };
                entries.insert(component_pointer(kind, &key), key);
            }
        }

        Self {
            kind: Some(kind),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pointer: &str) -> Option<&ComponentKey> {
        self.entries.get(pointer)
    }

    /// Number of components in one bucket.
    pub fn bucket_len(&self, bucket: &str) -> usize {
        self.entries.values().filter(|k| k.bucket == bucket).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentKey)> {
        self.entries.iter().map(|(p, k)| (p.as_str(), k))
    }

    /// The component containing the node at `target`, which may point inside it.
    pub fn owner(&self, target: &str) -> Option<(&str, &ComponentKey)> {
        let segments = pointer::segments(target);
        let prefix_len = match self.kind {
            Some(SpecKind::Swagger) => 2,
            _ => 3,
        };
        if segments.len() < prefix_len {
            return None;
        }
        let owner = pointer::from_segments(&segments[..prefix_len]);
        self.entries
            .get_key_value(&owner)
            .map(|(p, k)| (p.as_str(), k))
    }
}

pub(crate) fn component_pointer(kind: SpecKind, key: &ComponentKey) -> String {
    match kind {
        SpecKind::Swagger => pointer::from_segments([key.bucket.as_str(), key.name.as_str()]),
        _ => pointer::from_segments(["components", key.bucket.as_str(), key.name.as_str()]),
    }
}

/// Reduce an OpenAPI document to the operations in `selection`.
///
/// Returns a new document holding the selected operations, the path-level
/// fields of their paths, exactly the components they reach, and the top-level
/// tags they use. `webhooks` are dropped. The input is not modified.
///
/// # Errors
///
/// Returns `ReduceError::UnsupportedSpecification` for anything but OpenAPI and
/// `ReduceError::SelectionEmpty` when no operation matches.
pub fn reduce(document: &Value, selection: &Selection) -> Result<Value, ReduceError> {
    if SpecKind::detect(document) != SpecKind::OpenApi {
        return Err(ReduceError::UnsupportedSpecification);
    }
    let Some(root) = document.as_object() else {
        return Err(ReduceError::UnsupportedSpecification);
    };

    let matcher = Matcher::new(selection);
    let index = ComponentIndex::build(document);
    let mut marker = Marker::new(document, &index);
    let mut used_tags: HashSet<String> = HashSet::new();

    if let Some(security) = root.get("security") {
        marker.mark_security(security);
    }

    let mut paths = Map::new();
    for (path, item) in root.get("paths").and_then(Value::as_object).into_iter().flatten() {
        let Some(item) = item.as_object() else {
            continue;
        };

        let mut kept = Map::new();
        let mut operations = 0;
        for (key, value) in item {
            if !is_method(key) {
                kept.insert(key.clone(), value.clone());
                continue;
            }
            if !matcher.matches(path, key, value) {
                continue;
            }

            operations += 1;
            marker.mark(value);
            if let Some(security) = value.get("security") {
                marker.mark_security(security);
            }
            for tag in operation_tags(value) {
                used_tags.insert(tag.to_string());
            }
            kept.insert(key.clone(), value.clone());
        }

        if operations == 0 {
            continue;
        }
        // Path-level fields (shared parameters, servers, ...) stay verbatim
        for (key, value) in item {
            if !is_method(key) {
                marker.mark(value);
            }
        }
        paths.insert(path.clone(), Value::Object(kept));
    }

    if paths.is_empty() {
        return Err(ReduceError::SelectionEmpty);
    }

    let marked = marker.close();
    let all_paths = root.get("paths").and_then(Value::as_object);
    for (path, method) in &marked.operations {
        let Some(item) = all_paths.and_then(|p| p.get(path)).and_then(Value::as_object) else {
            continue;
        };
        let entry = paths
            .entry(path.clone())
            .or_insert_with(|| Value::Object(path_level_fields(item)));
        let (Some(method), Value::Object(kept)) = (method, entry) else {
            continue;
        };
        if let Some(operation) = item.get(method) {
            for tag in operation_tags(operation) {
                used_tags.insert(tag.to_string());
            }
            kept.insert(method.clone(), operation.clone());
        }
    }
    let retained = marked.components;
    debug!(
        paths = paths.len(),
        components = retained.len(),
        total = index.len(),
        "reduced document"
    );

    let mut reduced = Map::new();
    for (key, value) in root {
        match key.as_str() {
            "paths" => {
                reduced.insert(key.clone(), Value::Object(std::mem::take(&mut paths)));
            }
            "components" => {
                if let Some(components) = sweep_components(value, &retained) {
                    reduced.insert(key.clone(), components);
                }
            }
            "tags" => {
                if let Some(tags) = sweep_tags(value, &used_tags) {
                    reduced.insert(key.clone(), tags);
                }
            }
            "webhooks" => {}
            _ => {
                reduced.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Value::Object(reduced))
}

fn is_method(key: &str) -> bool {
    HTTP_METHODS.contains(&key.to_ascii_lowercase().as_str())
}

fn path_level_fields(item: &Map<String, Value>) -> Map<String, Value> {
    item.iter()
        .filter(|(key, _)| !is_method(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn operation_tags(operation: &Value) -> impl Iterator<Item = &str> {
    operation
        .get("tags")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// Selection normalized for case-insensitive matching.
enum Matcher {
    Tags(HashSet<String>),
    Paths(BTreeMap<String, MethodFilter>),
}

impl Matcher {
    fn new(selection: &Selection) -> Self {
        match selection {
            Selection::Tags(tags) => Matcher::Tags(tags.iter().map(|t| t.to_lowercase()).collect()),
            Selection::Paths(paths) => Matcher::Paths(
                paths
                    .iter()
                    .map(|(p, m)| (p.to_lowercase(), m.clone()))
                    .collect(),
            ),
        }
    }

    fn matches(&self, path: &str, method: &str, operation: &Value) -> bool {
        match self {
            Matcher::Tags(tags) => {
                operation_tags(operation).any(|tag| tags.contains(&tag.to_lowercase()))
            }
            Matcher::Paths(paths) => paths
                .get(&path.to_lowercase())
                .map(|filter| filter.matches(method))
                .unwrap_or(false),
        }
    }
}

/// Marks components reachable from the roots handed to it.
struct Marker<'a> {
    document: &'a Value,
    index: &'a ComponentIndex,
    pending: Vec<String>,
    visited: HashSet<String>,
    retained: HashSet<ComponentKey>,
    operations: BTreeSet<(String, Option<String>)>,
}

/// What marking retained: components, plus the operations (or bare path
/// items, with no method) that pointers into `paths` land in.
struct Marked {
    components: HashSet<ComponentKey>,
    operations: BTreeSet<(String, Option<String>)>,
}

impl<'a> Marker<'a> {
    fn new(document: &'a Value, index: &'a ComponentIndex) -> Self {
        Self {
            document,
            index,
            pending: Vec::new(),
            visited: HashSet::new(),
            retained: HashSet::new(),
            operations: BTreeSet::new(),
        }
    }

    fn mark(&mut self, root: &Value) {
        self.pending.extend(collect_refs(root));
    }

    /// Security requirements name schemes instead of pointing at them.
    fn mark_security(&mut self, requirements: &Value) {
        let names = requirements
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .flat_map(|requirement| requirement.keys());
        for name in names {
            self.pending
                .push(pointer::from_segments(["components", "securitySchemes", name.as_str()]));
        }
    }

    /// Follow pending pointers to a fixed point and return the retained components.
    fn close(mut self) -> Marked {
        while let Some(target) = self.pending.pop() {
            let Some(target) = mapping_target(&target) else {
                continue;
            };
            if !self.visited.insert(target.clone()) {
                continue;
            }

            let (node_pointer, owner) = match self.index.owner(&target) {
                Some((pointer, key)) => (pointer.to_string(), Some(key.clone())),
                None => (target, None),
            };
            if let Some(key) = owner {
                if !self.retained.insert(key) {
                    continue;
                }
            } else if let Some((path, method)) = path_owner(&node_pointer) {
                if self.operations.insert((path.clone(), method.clone())) {
                    self.keep_path_item(&path, method.as_deref());
                }
                continue;
            }

            // A retained component is kept whole, so everything in it counts
            match resolver::resolve(&node_pointer, self.document) {
                Ok(node) => self.pending.extend(collect_refs(node)),
                Err(err) => debug!(pointer = %node_pointer, error = %err, "dangling $ref"),
            }
        }
        Marked {
            components: self.retained,
            operations: self.operations,
        }
    }

    /// Mark a path's shared fields and, with a method, that whole operation.
    fn keep_path_item(&mut self, path: &str, method: Option<&str>) {
        let document = self.document;
        let Some(item) = document
            .get("paths")
            .and_then(|paths| paths.get(path))
            .and_then(Value::as_object)
        else {
            debug!(path, "dangling $ref into paths");
            return;
        };
        for (key, value) in item {
            if !is_method(key) {
                self.mark(value);
            } else if method == Some(key.as_str()) {
                self.mark(value);
                if let Some(security) = value.get("security") {
                    self.mark_security(security);
                }
            }
        }
    }
}

/// The path, and the method when there is one, that a `#/paths/...` pointer
/// lands in.
fn path_owner(target: &str) -> Option<(String, Option<String>)> {
    match pointer::segments(target).as_slice() {
        [paths, path, rest @ ..] if paths == "paths" => {
            let method = rest.first().filter(|m| is_method(m)).cloned();
            Some((path.clone(), method))
        }
        _ => None,
    }
}

fn sweep_components(components: &Value, retained: &HashSet<ComponentKey>) -> Option<Value> {
    let components = components.as_object()?;
    let mut swept = Map::new();
    let mut extensions = Map::new();

    for (bucket, members) in components {
        let Some(members) = members.as_object() else {
            continue;
        };
        if bucket.starts_with("x-") {
            extensions.insert(bucket.clone(), Value::Object(members.clone()));
            continue;
        }
        let kept: Map<String, Value> = members
            .iter()
            .filter(|(name, _)| {
                retained.contains(&ComponentKey {
                    bucket: bucket.clone(),
                    name: (*name).clone(),
                })
            })
            .map(|(name, member)| (name.clone(), member.clone()))
            .collect();
        if !kept.is_empty() {
            swept.insert(bucket.clone(), Value::Object(kept));
        }
    }

    if swept.is_empty() {
        return None;
    }
    swept.extend(extensions);
    Some(Value::Object(swept))
}

fn sweep_tags(tags: &Value, used: &HashSet<String>) -> Option<Value> {
    let kept: Vec<Value> = tags
        .as_array()?
        .iter()
        .filter(|tag| {
            tag.get("name")
                .and_then(Value::as_str)
                .map(|name| used.contains(name))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    (!kept.is_empty()).then_some(Value::Array(kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_lists_openapi_components() {
        let doc = json!({
            "openapi": "3.0.0",
            "components": {
                "schemas": { "Pet": {}, "a/b": {} },
                "parameters": { "limit": {} }
            }
        });
        let index = ComponentIndex::build(&doc);
        assert_eq!(index.len(), 3);
        assert_eq!(index.bucket_len("schemas"), 2);
        assert_eq!(
            index.get("#/components/schemas/a~1b"),
            Some(&ComponentKey {
                bucket: "schemas".into(),
                name: "a/b".into()
            })
        );
        let (owner, key) = index.owner("#/components/schemas/Pet/properties/id").unwrap();
        assert_eq!(owner, "#/components/schemas/Pet");
        assert_eq!(key.name, "Pet");
        assert!(index.owner("#/components/schemas/Missing").is_none());
    }

    #[test]
    fn index_lists_swagger_definitions() {
        let doc = json!({
            "swagger": "2.0",
            "definitions": { "Pet": {} },
            "parameters": { "limit": {} },
            "info": { "title": "x" }
        });
        let index = ComponentIndex::build(&doc);
        assert_eq!(index.len(), 2);
        assert!(index.get("#/definitions/Pet").is_some());
        assert!(index.owner("#/definitions/Pet/properties/id").is_some());
    }

    #[test]
    fn path_owner_finds_operation() {
        assert_eq!(
            path_owner("#/paths/~1pets/get/responses/200"),
            Some(("/pets".to_string(), Some("get".to_string())))
        );
        assert_eq!(
            path_owner("#/paths/~1pets/parameters/0"),
            Some(("/pets".to_string(), None))
        );
        assert_eq!(path_owner("#/components/schemas/Pet"), None);
    }

    #[test]
    fn reduce_keeps_tags_in_use() {
        let doc = json!({
            "openapi": "3.0.0",
            "tags": [{ "name": "pet" }, { "name": "store" }],
            "paths": {
                "/pets": { "get": { "tags": ["pet"], "responses": {} } },
                "/orders": { "get": { "tags": ["store"], "responses": {} } }
            }
        });
        let reduced = reduce(&doc, &Selection::tags(["PET"])).unwrap();
        assert_eq!(reduced["tags"], json!([{ "name": "pet" }]));
        assert!(reduced["paths"].get("/orders").is_none());
        assert!(reduced.get("components").is_none());
    }

    #[test]
    fn reduce_retains_security_schemes() {
        let doc = json!({
            "openapi": "3.0.0",
            "security": [{ "apiKey": [] }],
            "paths": {
                "/pets": { "get": { "security": [{ "oauth": ["read"] }], "responses": {} } }
            },
            "components": {
                "securitySchemes": {
                    "apiKey": { "type": "apiKey", "in": "header", "name": "X-Key" },
                    "oauth": { "type": "oauth2", "flows": {} },
                    "basic": { "type": "http", "scheme": "basic" }
                }
            }
        });
        let reduced = reduce(&doc, &Selection::paths([("/pets", MethodFilter::Any)])).unwrap();
        let schemes = reduced["components"]["securitySchemes"].as_object().unwrap();
        assert_eq!(schemes.len(), 2);
        assert!(schemes.contains_key("apiKey"));
        assert!(schemes.contains_key("oauth"));
    }
}

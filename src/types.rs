//! Core types shared by the resolver, dereferencer, bundler and reducer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provenance extension injected on every dereferenced node.
pub const REF_NAME_KEY: &str = "x-readme-ref-name";

/// HTTP methods that may appear as operations in a path item.
pub const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Keywords whose values are literal data, never references.
const LITERAL_KEYWORDS: &[&str] = &["example", "default", "enum", "const", "value"];

/// Keywords whose object values are keyed by user-chosen names, not keywords.
const NAME_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "definitions",
    "$defs",
    "dependentSchemas",
    "paths",
    "webhooks",
    "schemas",
    "parameters",
    "responses",
    "requestBodies",
    "securitySchemes",
    "securityDefinitions",
    "examples",
    "headers",
    "links",
    "callbacks",
    "pathItems",
    "content",
    "encoding",
    "variables",
];

/// Dialect of an API description document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    /// OpenAPI 3.x (`openapi` marker).
    OpenApi,
    /// Swagger 2.0 (`swagger` marker).
    Swagger,
    /// Postman collection.
    Postman,
    Unknown,
}

impl SpecKind {
    /// Classify a parsed document by its marker keys.
    pub fn detect(document: &Value) -> Self {
        if document.get("openapi").is_some() {
            SpecKind::OpenApi
        } else if document.get("swagger").is_some() {
            SpecKind::Swagger
        } else if is_postman_collection(document) {
            SpecKind::Postman
        } else {
            SpecKind::Unknown
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecKind::OpenApi => "OpenAPI",
            SpecKind::Swagger => "Swagger",
            SpecKind::Postman => "Postman",
            SpecKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

fn is_postman_collection(document: &Value) -> bool {
    let Some(info) = document.get("info") else {
        return false;
    };
    info.get("_postman_id").is_some()
        || info
            .get("schema")
            .and_then(Value::as_str)
            .map(|s| s.contains("getpostman.com") || s.contains("postman.com/json/collection"))
            .unwrap_or(false)
}

/// The `$ref` target of an object, if it has a string `$ref` member.
///
/// Position is not considered here; walkers combine this with
/// [`child_position`] so that property names and literal data are skipped.
pub fn ref_target(value: &Value) -> Option<&str> {
    value.as_object().and_then(map_ref_target)
}

pub(crate) fn map_ref_target(map: &Map<String, Value>) -> Option<&str> {
    map.get("$ref").and_then(Value::as_str)
}

/// Where a node sits in the document, as far as `$ref` classification goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    /// Keys are keywords; a string `$ref` member makes the object a reference.
    Keyword,
    /// Keys are names (property names, component names, status codes).
    NameMap,
    /// Literal data; nothing inside is a reference.
    Literal,
}

/// Position of `child`, stored under `key` in an object at position `parent`.
///
/// Array elements inherit the position of the array.
pub(crate) fn child_position(parent: Position, key: &str, child: &Value) -> Position {
    match parent {
        Position::Literal => Position::Literal,
        Position::NameMap => Position::Keyword,
        Position::Keyword => {
            if LITERAL_KEYWORDS.contains(&key) {
                Position::Literal
            } else if key == "examples" && child.is_array() {
                // JSON Schema `examples` is a list of sample values
                Position::Literal
            } else if NAME_MAP_KEYWORDS.contains(&key) && child.is_object() {
                Position::NameMap
            } else {
                Position::Keyword
            }
        }
    }
}

/// Collect every reference target reachable inside `value`, in document order.
pub(crate) fn collect_refs(value: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs_at(value, Position::Keyword, &mut refs);
    refs
}

fn collect_refs_at(value: &Value, position: Position, refs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if position == Position::Keyword {
                if let Some(target) = map_ref_target(map) {
                    refs.push(target.to_string());
                }
                // Mapping values name schemas too, either as pointers or bare names
                if let Some(mapping) = map
                    .get("discriminator")
                    .and_then(|d| d.get("mapping"))
                    .and_then(Value::as_object)
                {
                    refs.extend(mapping.values().filter_map(Value::as_str).map(String::from));
                }
            }
            for (key, child) in map {
                collect_refs_at(child, child_position(position, key, child), refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs_at(item, position, refs);
            }
        }
        _ => {}
    }
}

/// How circular `$ref` chains are handled while dereferencing.
///
/// Serialized the way configuration files spell it: `true`, `false` or `"ignore"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawCircular", into = "RawCircular")]
pub enum CircularPolicy {
    /// Unroll each cycle one level deep, then keep the `$ref` (`true`).
    #[default]
    Expand,
    /// Abort on the first circular reference (`false`).
    Fatal,
    /// Keep every circular `$ref` unexpanded (`"ignore"`).
    Ignore,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCircular {
    Flag(bool),
    Name(String),
}

impl TryFrom<RawCircular> for CircularPolicy {
    type Error = String;

    fn try_from(raw: RawCircular) -> Result<Self, Self::Error> {
        match raw {
            RawCircular::Flag(true) => Ok(CircularPolicy::Expand),
            RawCircular::Flag(false) => Ok(CircularPolicy::Fatal),
            RawCircular::Name(name) => name.parse(),
        }
    }
}

impl From<CircularPolicy> for RawCircular {
    fn from(policy: CircularPolicy) -> Self {
        match policy {
            CircularPolicy::Expand => RawCircular::Flag(true),
            CircularPolicy::Fatal => RawCircular::Flag(false),
            CircularPolicy::Ignore => RawCircular::Name("ignore".to_string()),
        }
    }
}

impl FromStr for CircularPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "true" | "expand" => Ok(CircularPolicy::Expand),
            "false" | "fatal" => Ok(CircularPolicy::Fatal),
            "ignore" => Ok(CircularPolicy::Ignore),
            other => Err(format!(
                "unknown circular policy \"{}\": expected expand, fatal or ignore",
                other
            )),
        }
    }
}

/// Callback told about each newly detected circular pointer.
pub type CircularObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// `resolve` section of [`DereferenceOptions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveSettings {
    /// Whether non-local references should be followed. Non-local references
    /// are the bundler's job; the dereferencer leaves them in place.
    pub external: bool,
}

/// `dereference` section of [`DereferenceOptions`].
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CircularSettings {
    pub circular: CircularPolicy,
    #[serde(skip)]
    pub on_circular: Option<CircularObserver>,
}

impl fmt::Debug for CircularSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularSettings")
            .field("circular", &self.circular)
            .field("on_circular", &self.on_circular.is_some())
            .finish()
    }
}

/// Options for dereferencing a whole document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DereferenceOptions {
    pub resolve: ResolveSettings,
    pub dereference: CircularSettings,
    /// Synthesize `oneOf` for discriminator bases around the walk.
    pub discriminator_one_of: bool,
}

impl Default for DereferenceOptions {
    fn default() -> Self {
        Self {
            resolve: ResolveSettings::default(),
            dereference: CircularSettings::default(),
            discriminator_one_of: true,
        }
    }
}

impl DereferenceOptions {
    /// Default options: expand cycles once, local references only, discriminator linking on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the circular reference policy.
    pub fn circular(mut self, policy: CircularPolicy) -> Self {
        self.dereference.circular = policy;
        self
    }

    /// Register an observer for circular pointers.
    pub fn on_circular<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.dereference.on_circular = Some(Arc::new(observer));
        self
    }

    /// Set the `resolve.external` flag.
    pub fn external(mut self, external: bool) -> Self {
        self.resolve.external = external;
        self
    }

    /// Enable or disable the discriminator `oneOf` synthesis.
    pub fn discriminator_one_of(mut self, enabled: bool) -> Self {
        self.discriminator_one_of = enabled;
        self
    }
}

/// Methods selected for one path template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMethods", into = "RawMethods")]
pub enum MethodFilter {
    /// `"*"`: every method of the path.
    Any,
    /// Explicit methods, normalized to lowercase.
    Only(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawMethods {
    One(String),
    Many(Vec<String>),
}

impl From<RawMethods> for MethodFilter {
    fn from(raw: RawMethods) -> Self {
        match raw {
            RawMethods::One(s) if s == "*" => MethodFilter::Any,
            RawMethods::One(s) => MethodFilter::only([s]),
            RawMethods::Many(list) if list.iter().any(|m| m == "*") => MethodFilter::Any,
            RawMethods::Many(list) => MethodFilter::only(list),
        }
    }
}

impl From<MethodFilter> for RawMethods {
    fn from(filter: MethodFilter) -> Self {
        match filter {
            MethodFilter::Any => RawMethods::One("*".to_string()),
            MethodFilter::Only(list) => RawMethods::Many(list),
        }
    }
}

impl MethodFilter {
    /// Explicit method list; methods are matched case-insensitively.
    pub fn only<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MethodFilter::Only(
            methods
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .collect(),
        )
    }

    /// Whether `method` is selected.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(list) => list.iter().any(|m| m.eq_ignore_ascii_case(method)),
        }
    }
}

/// Operations to keep when reducing a document.
///
/// Deserializes from `{"tags": [...]}` or `{"paths": {"/pets": ["get"], "/users": "*"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    Tags(Vec<String>),
    Paths(BTreeMap<String, MethodFilter>),
}

impl Selection {
    /// Select operations carrying any of the given tags.
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Tags(tags.into_iter().map(Into::into).collect())
    }

    /// Select operations by path template and methods.
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = (S, MethodFilter)>,
        S: Into<String>,
    {
        Selection::Paths(paths.into_iter().map(|(p, m)| (p.into(), m)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detect_dialects() {
        assert_eq!(SpecKind::detect(&json!({"openapi": "3.1.0"})), SpecKind::OpenApi);
        assert_eq!(SpecKind::detect(&json!({"swagger": "2.0"})), SpecKind::Swagger);
        assert_eq!(
            SpecKind::detect(&json!({"info": {"_postman_id": "abc", "name": "x"}})),
            SpecKind::Postman
        );
        assert_eq!(
            SpecKind::detect(&json!({
                "info": {"schema": "https://schema.getpostman.com/json/collection/v2.1.0/collection.json"}
            })),
            SpecKind::Postman
        );
        assert_eq!(SpecKind::detect(&json!({"type": "object"})), SpecKind::Unknown);
    }

    #[test]
    fn ref_target_requires_string() {
        assert_eq!(
            ref_target(&json!({"$ref": "#/components/schemas/Pet"})),
            Some("#/components/schemas/Pet")
        );
        assert_eq!(ref_target(&json!({"$ref": {"type": "string"}})), None);
        assert_eq!(ref_target(&json!("#/components/schemas/Pet")), None);
    }

    #[test]
    fn collect_refs_skips_property_names_and_literals() {
        let schema = json!({
            "type": "object",
            "properties": {
                "$ref": { "type": "string" },
                "example": { "$ref": "#/components/schemas/Example" },
                "owner": { "$ref": "#/components/schemas/User" }
            },
            "example": { "$ref": "#/not/a/reference" },
            "default": { "$ref": "#/neither" },
            "allOf": [{ "$ref": "#/components/schemas/Base" }]
        });
        assert_eq!(
            collect_refs(&schema),
            vec![
                "#/components/schemas/Example",
                "#/components/schemas/User",
                "#/components/schemas/Base"
            ]
        );
    }

    #[test]
    fn collect_refs_treats_schema_examples_array_as_data() {
        let schema = json!({
            "type": "object",
            "examples": [{ "$ref": "#/data" }]
        });
        assert!(collect_refs(&schema).is_empty());

        let media = json!({
            "examples": { "basic": { "$ref": "#/components/examples/Basic" } }
        });
        assert_eq!(collect_refs(&media), vec!["#/components/examples/Basic"]);
    }

    #[test]
    fn collect_refs_includes_discriminator_mapping() {
        let schema = json!({
            "discriminator": {
                "propertyName": "kind",
                "mapping": { "cat": "#/components/schemas/Cat", "dog": "Dog" }
            }
        });
        assert_eq!(collect_refs(&schema), vec!["#/components/schemas/Cat", "Dog"]);
    }

    #[test]
    fn circular_policy_from_config() {
        let policy: CircularPolicy = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(policy, CircularPolicy::Expand);
        let policy: CircularPolicy = serde_json::from_value(json!(false)).unwrap();
        assert_eq!(policy, CircularPolicy::Fatal);
        let policy: CircularPolicy = serde_json::from_value(json!("ignore")).unwrap();
        assert_eq!(policy, CircularPolicy::Ignore);
        assert!(serde_json::from_value::<CircularPolicy>(json!("sometimes")).is_err());

        assert_eq!(serde_json::to_value(CircularPolicy::Ignore).unwrap(), json!("ignore"));
        assert_eq!(serde_json::to_value(CircularPolicy::Fatal).unwrap(), json!(false));
    }

    #[test]
    fn dereference_options_from_config() {
        let options: DereferenceOptions = serde_json::from_value(json!({
            "resolve": { "external": false },
            "dereference": { "circular": "ignore" }
        }))
        .unwrap();
        assert_eq!(options.dereference.circular, CircularPolicy::Ignore);
        assert!(!options.resolve.external);
        assert!(options.discriminator_one_of);
    }

    #[test]
    fn selection_from_json() {
        let selection: Selection = serde_json::from_value(json!({"tags": ["pet"]})).unwrap();
        assert_eq!(selection, Selection::tags(["pet"]));

        let selection: Selection = serde_json::from_value(json!({
            "paths": { "/pets": ["GET", "post"], "/users": "*" }
        }))
        .unwrap();
        assert_eq!(
            selection,
            Selection::paths([
                ("/pets", MethodFilter::only(["get", "post"])),
                ("/users", MethodFilter::Any),
            ])
        );
    }

    #[test]
    fn method_filter_matches_case_insensitively() {
        let filter = MethodFilter::only(["GET"]);
        assert!(filter.matches("get"));
        assert!(filter.matches("Get"));
        assert!(!filter.matches("post"));
        assert!(MethodFilter::Any.matches("delete"));
    }
}

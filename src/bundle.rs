//! Bundling: inline external references so a document stands on its own.
//!
//! Only references that leave the document are touched. Each external target
//! is loaded once through the [`ExternalResolver`] registered for its URI
//! scheme, stored as a new local component, and every reference to it is
//! rewritten to point at that component. The component bucket follows from
//! where the reference sits (a parameter list entry becomes a parameter, a
//! response a response). External path items are inlined in place, except on
//! OpenAPI 3.1 where they go to `components/pathItems`. Local pointers of the
//! root document stay exactly as they were.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::{BundleError, LoadError};
use crate::loader::{is_url, ExternalResolver, FileResolver};
use crate::pointer;
use crate::reduce::{component_pointer, ComponentIndex, ComponentKey, SWAGGER_BUCKETS};
use crate::resolver;
use crate::types::{child_position, map_ref_target, Position, SpecKind, HTTP_METHODS};

#[cfg(feature = "remote")]
use crate::loader::HttpResolver;

/// Options for bundling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    /// URI of the root document. Relative references are joined against it,
    /// and references back to it become local pointers.
    pub base_uri: Option<String>,
}

/// Inlines external references through pluggable per-scheme resolvers.
///
/// A bundler without resolvers follows nothing: any external reference makes
/// [`Bundler::bundle`] fail instead of touching the filesystem or network.
#[derive(Clone, Default)]
pub struct Bundler {
    options: BundleOptions,
    resolvers: BTreeMap<String, Arc<dyn ExternalResolver>>,
}

impl Bundler {
    pub fn new(options: BundleOptions) -> Self {
        Self {
            options,
            resolvers: BTreeMap::new(),
        }
    }

    /// Register a resolver for a URI scheme (`file`, `http`, `https`, ...).
    pub fn with_resolver<R>(mut self, scheme: &str, resolver: R) -> Self
    where
        R: ExternalResolver + 'static,
    {
        self.resolvers
            .insert(scheme.to_ascii_lowercase(), Arc::new(resolver));
        self
    }

    /// Register the file resolver rooted at `base_dir`, plus the HTTP resolver
    /// when the `remote` feature is enabled.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::NetworkError` if the HTTP client cannot be built.
    #[cfg(feature = "remote")]
    pub fn with_default_resolvers(self, base_dir: &Path) -> Result<Self, LoadError> {
        let http = HttpResolver::new()?;
        Ok(self
            .with_resolver("file", FileResolver::new(base_dir))
            .with_resolver("http", http.clone())
            .with_resolver("https", http))
    }

    /// Register the file resolver rooted at `base_dir`.
    #[cfg(not(feature = "remote"))]
    pub fn with_default_resolvers(self, base_dir: &Path) -> Result<Self, LoadError> {
        Ok(self.with_resolver("file", FileResolver::new(base_dir)))
    }

    /// Return a copy of `document` with every external reference inlined.
    ///
    /// # Errors
    ///
    /// Returns `BundleError::ExternalDisabled` when no resolver handles a
    /// reference's scheme, `BundleError::Load` when loading fails and
    /// `BundleError::Resolve` when a fragment is missing from its document.
    pub fn bundle(&self, document: &Value) -> Result<Value, BundleError> {
        let kind = SpecKind::detect(document);
        let path_items_bucket = kind == SpecKind::OpenApi
            && document
                .get("openapi")
                .and_then(Value::as_str)
                .map_or(false, |v| v.starts_with("3.1"));
        let taken = ComponentIndex::build(document)
            .iter()
            .map(|(_, key)| key.clone())
            .collect();

        let mut session = Session {
            bundler: self,
            kind,
            path_items_bucket,
            base_uri: self.options.base_uri.as_deref().map(normalize_uri),
            documents: HashMap::new(),
            assigned: HashMap::new(),
            taken,
            inlined: Vec::new(),
            inlining: HashSet::new(),
        };

        let mut bundled = document.clone();
        session.rewrite(&mut bundled, Position::Keyword, Slot::Root, None)?;
        debug!(components = session.inlined.len(), "bundled external references");

        for (key, content) in session.inlined {
            insert_component(&mut bundled, kind, key, content);
        }
        Ok(bundled)
    }
}

/// Bundle with the default configuration, which follows no external reference.
///
/// Documents holding only local pointers come back unchanged.
///
/// # Errors
///
/// Returns `BundleError::ExternalDisabled` for the first external reference.
pub fn bundle(document: &Value) -> Result<Value, BundleError> {
    Bundler::default().bundle(document)
}

struct Session<'b> {
    bundler: &'b Bundler,
    kind: SpecKind,
    path_items_bucket: bool,
    base_uri: Option<String>,
    /// Loaded external documents by URI.
    documents: HashMap<String, Value>,
    /// Absolute reference (URI + fragment) to its local pointer.
    assigned: HashMap<String, String>,
    taken: HashSet<ComponentKey>,
    inlined: Vec<(ComponentKey, Value)>,
    /// Path items currently being inlined in place.
    inlining: HashSet<String>,
}

enum Localized {
    Pointer(String),
    Inline(Value),
}

impl Session<'_> {
    /// `context` is the URI of the document `value` was loaded from, `None` for the root.
    fn rewrite(
        &mut self,
        value: &mut Value,
        position: Position,
        slot: Slot,
        context: Option<&str>,
    ) -> Result<(), BundleError> {
        match value {
            Value::Object(map) => {
                if position == Position::Keyword {
                    if let Some(reference) = map_ref_target(map).map(str::to_owned) {
                        match self.localize(&reference, slot, context)? {
                            Some(Localized::Pointer(local)) => {
                                map.insert("$ref".to_string(), Value::String(local));
                            }
                            Some(Localized::Inline(content)) => *value = content,
                            None => {}
                        }
                        return Ok(());
                    }
                }
                for (key, child) in map.iter_mut() {
                    let child_pos = child_position(position, key, child);
                    self.rewrite(child, child_pos, slot.child(key), context)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.rewrite(item, position, slot.item(), context)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// What a reference should become, or `None` to leave it as is.
    fn localize(
        &mut self,
        reference: &str,
        slot: Slot,
        context: Option<&str>,
    ) -> Result<Option<Localized>, BundleError> {
        if context.is_none() && pointer::is_local(reference) {
            return Ok(None);
        }

        let (location, fragment) = split_reference(reference);
        let uri = match (context, location.is_empty()) {
            (Some(ctx), true) => ctx.to_string(),
            (ctx, _) => join_uri(ctx.or(self.base_uri.as_deref()), location)?,
        };
        if self.base_uri.as_deref() == Some(uri.as_str()) {
            // Reference back into the root document
            return Ok(Some(Localized::Pointer(fragment.to_string())));
        }

        let absolute = format!("{}{}", uri, fragment);
        if slot == Slot::PathItem && !self.path_items_bucket {
            return self.inline(reference, &uri, fragment, absolute).map(Some);
        }
        if let Some(local) = self.assigned.get(&absolute) {
            return Ok(Some(Localized::Pointer(local.clone())));
        }

        let mut target = resolver::resolve(fragment, self.load(&uri, reference)?)?.clone();
        let key = self.place(&uri, fragment, slot);
        let local = component_pointer(self.kind, &key);
        // Assigned before walking the target so external cycles terminate
        self.assigned.insert(absolute, local.clone());

        self.rewrite(&mut target, Position::Keyword, slot, Some(&uri))?;
        self.inlined.push((key, target));
        Ok(Some(Localized::Pointer(local)))
    }

    /// Copy an external path item into the referencing slot.
    fn inline(
        &mut self,
        reference: &str,
        uri: &str,
        fragment: &str,
        absolute: String,
    ) -> Result<Localized, BundleError> {
        if !self.inlining.insert(absolute.clone()) {
            return Err(BundleError::CircularPathItem {
                reference: reference.to_string(),
            });
        }
        let mut content = resolver::resolve(fragment, self.load(uri, reference)?)?.clone();
        self.rewrite(&mut content, Position::Keyword, Slot::PathItem, Some(uri))?;
        self.inlining.remove(&absolute);
        Ok(Localized::Inline(content))
    }

    fn load(&mut self, uri: &str, reference: &str) -> Result<&Value, BundleError> {
        if !self.documents.contains_key(uri) {
            let resolver = self.bundler.resolvers.get(scheme(uri)).ok_or_else(|| {
                BundleError::ExternalDisabled {
                    reference: reference.to_string(),
                }
            })?;
            let document = resolver.resolve(uri).map_err(|source| BundleError::Load {
                uri: uri.to_string(),
                source,
            })?;
            self.documents.insert(uri.to_string(), document);
        }
        self.documents
            .get(uri)
            .ok_or_else(|| BundleError::ExternalDisabled {
                reference: reference.to_string(),
            })
    }

    /// Choose the bucket and a free name for an inlined target.
    ///
    /// The referencing slot decides the bucket; where it says nothing, a
    /// fragment shaped like a component pointer does, then the schema bucket.
    fn place(&mut self, uri: &str, fragment: &str, slot: Slot) -> ComponentKey {
        let segments = pointer::segments(fragment);
        let from_fragment = match (self.kind, segments.as_slice()) {
            (SpecKind::Swagger, [bucket, _]) if SWAGGER_BUCKETS.contains(&bucket.as_str()) => {
                Some(bucket.clone())
            }
            (_, [components, bucket, _]) if components == "components" => {
                Some(bucket.clone())
            }
            _ => None,
        };
        let bucket = slot
            .bucket(self.kind, self.path_items_bucket)
            .map(str::to_string)
            .or(from_fragment)
            .unwrap_or_else(|| match self.kind {
                SpecKind::Swagger => "definitions".to_string(),
                _ => "schemas".to_string(),
            });
        let name = fallback_name(uri, &segments);

        let mut key = ComponentKey {
            bucket,
            name: name.clone(),
        };
        let mut suffix = 2;
        while self.taken.contains(&key) {
            key.name = format!("{}{}", name, suffix);
            suffix += 1;
        }
        self.taken.insert(key.clone());
        key
    }
}

/// What a node stands for, as far as choosing a component bucket goes.
///
/// Tracked from the document root by key, and from the referencing slot for
/// content loaded from other documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Root,
    Components,
    Paths,
    PathItem,
    Operation,
    Parameters,
    Parameter,
    ParameterMap,
    RequestBody,
    RequestBodies,
    Responses,
    Response,
    Content,
    MediaType,
    Headers,
    Header,
    Examples,
    Example,
    Links,
    Link,
    Callbacks,
    Callback,
    Schemas,
    Schema,
    Other,
}

impl Slot {
    fn child(self, key: &str) -> Slot {
        use Slot::*;
        match (self, key) {
            (Root, "paths" | "webhooks") => Paths,
            (Root, "components") => Components,
            (Root, "definitions") => Schemas,
            (Root, "parameters") => ParameterMap,
            (Root, "responses") => Responses,
            (Components, "schemas") => Schemas,
            (Components, "parameters") => ParameterMap,
            (Components, "responses") => Responses,
            (Components, "requestBodies") => RequestBodies,
            (Components, "headers") => Headers,
            (Components, "examples") => Examples,
            (Components, "links") => Links,
            (Components, "callbacks") => Callbacks,
            (Components, "pathItems") => Paths,
            (Paths | Callback, _) => PathItem,
            (PathItem | Operation, "parameters") => Parameters,
            (PathItem, method) if HTTP_METHODS.contains(&method) => Operation,
            (Operation, "requestBody") => RequestBody,
            (Operation, "responses") => Responses,
            (Operation, "callbacks") => Callbacks,
            (Schemas, _) => Schema,
            (ParameterMap, _) => Parameter,
            (RequestBodies, _) => RequestBody,
            (Responses, _) => Response,
            (Content, _) => MediaType,
            (Headers, _) => Header,
            (Examples, _) => Example,
            (Links, _) => Link,
            (Callbacks, _) => Callback,
            (Parameter | Header | MediaType | Response, "schema") => Schema,
            (Parameter | Header | RequestBody | Response, "content") => Content,
            (Parameter | Header | MediaType, "examples") => Examples,
            (Response, "headers") => Headers,
            (Response, "links") => Links,
            (Schema, _) => Schema,
            _ => Other,
        }
    }

    fn item(self) -> Slot {
        match self {
            Slot::Parameters => Slot::Parameter,
            Slot::Schema => Slot::Schema,
            _ => Slot::Other,
        }
    }

    fn bucket(self, kind: SpecKind, path_items: bool) -> Option<&'static str> {
        match (kind, self) {
            (SpecKind::Swagger, Slot::Schema) => Some("definitions"),
            (SpecKind::Swagger, Slot::Parameter) => Some("parameters"),
            (SpecKind::Swagger, Slot::Response) => Some("responses"),
            (SpecKind::Swagger, _) => None,
            (_, Slot::Schema) => Some("schemas"),
            (_, Slot::Parameter) => Some("parameters"),
            (_, Slot::Response) => Some("responses"),
            (_, Slot::RequestBody) => Some("requestBodies"),
            (_, Slot::Header) => Some("headers"),
            (_, Slot::Example) => Some("examples"),
            (_, Slot::Link) => Some("links"),
            (_, Slot::Callback) => Some("callbacks"),
            (_, Slot::PathItem) if path_items => Some("pathItems"),
            _ => None,
        }
    }
}

fn fallback_name(uri: &str, segments: &[String]) -> String {
    if let Some(last) = segments.last() {
        return last.clone();
    }
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("external")
        .to_string()
}

fn insert_component(document: &mut Value, kind: SpecKind, key: ComponentKey, content: Value) {
    let Value::Object(root) = document else {
        return;
    };
    let container = match kind {
        SpecKind::Swagger => root,
        _ => match root
            .entry("components")
            .or_insert_with(|| Value::Object(Map::new()))
        {
            Value::Object(components) => components,
            _ => return,
        },
    };
    if let Value::Object(bucket) = container
        .entry(key.bucket)
        .or_insert_with(|| Value::Object(Map::new()))
    {
        bucket.insert(key.name, content);
    }
}

/// Split `file.json#/a/b` into `("file.json", "#/a/b")`; the fragment defaults to `#`.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], &reference[idx..]),
        None => (reference, "#"),
    }
}

fn scheme(uri: &str) -> &str {
    if uri.starts_with("https://") {
        "https"
    } else if uri.starts_with("http://") {
        "http"
    } else {
        "file"
    }
}

/// Join a relative reference against the URI of the document containing it.
fn join_uri(base: Option<&str>, reference: &str) -> Result<String, BundleError> {
    if is_url(reference) {
        return Ok(reference.to_string());
    }
    if let Some(path) = reference.strip_prefix("file://") {
        return Ok(normalize_path(Path::new(path)));
    }

    match base {
        Some(base) if is_url(base) => Url::parse(base)
            .and_then(|base| base.join(reference))
            .map(|joined| joined.to_string())
            .map_err(|e| BundleError::InvalidUri {
                uri: reference.to_string(),
                message: e.to_string(),
            }),
        Some(base) => {
            let base = Path::new(base.strip_prefix("file://").unwrap_or(base));
            let dir = base.parent().unwrap_or_else(|| Path::new(""));
            Ok(normalize_path(&dir.join(reference)))
        }
        None => Ok(normalize_path(Path::new(reference))),
    }
}

fn normalize_uri(uri: &str) -> String {
    if is_url(uri) {
        uri.to_string()
    } else {
        normalize_path(Path::new(uri.strip_prefix("file://").unwrap_or(uri)))
    }
}

/// Lexically resolve `.` and `..` so one file always maps to one URI.
fn normalize_path(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

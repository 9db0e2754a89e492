//! OpenAPI `$ref` toolkit
//!
//! Resolution, dereferencing, bundling and reduction of `$ref` pointers in
//! OpenAPI 3.x and Swagger 2.0 definitions held as `serde_json::Value` trees.
//!
//! # Example
//!
//! ```
//! use oas_refs::{dereference, DereferenceOptions};
//! use serde_json::json;
//!
//! let mut doc = json!({
//!     "openapi": "3.0.3",
//!     "paths": {},
//!     "components": {
//!         "schemas": {
//!             "Outer": { "$ref": "#/components/schemas/Middle" },
//!             "Middle": { "$ref": "#/components/schemas/Inner" },
//!             "Inner": { "type": "string" }
//!         }
//!     }
//! });
//!
//! let circular = dereference(&mut doc, &DereferenceOptions::default()).unwrap();
//!
//! // Chains resolve fully and carry the name of the component they ended on
//! assert_eq!(
//!     doc["components"]["schemas"]["Outer"],
//!     json!({ "type": "string", "x-readme-ref-name": "Inner" })
//! );
//! assert!(circular.is_empty());
//! ```
//!
//! # Circular references
//!
//! | Policy | Serialized | Effect |
//! |--------|------------|--------|
//! | `Expand` | `true` | Unroll each cycle one level deep; the ref closing it stays a `$ref` |
//! | `Ignore` | `"ignore"` | Every pointer on a cycle stays a `$ref` everywhere |
//! | `Fatal` | `false` | Abort with `DereferenceError::Circular` |
//!
//! All three record the circular pointers in a [`CircularRefRegistry`].
//!
//! # Reduction
//!
//! ```
//! use oas_refs::{reduce, Selection};
//! use serde_json::json;
//!
//! let doc = json!({
//!     "openapi": "3.0.3",
//!     "paths": {
//!         "/pets": { "get": { "tags": ["pet"], "responses": {
//!             "200": { "$ref": "#/components/responses/Pets" }
//!         }}},
//!         "/orders": { "get": { "tags": ["store"], "responses": {} } }
//!     },
//!     "components": {
//!         "responses": { "Pets": { "description": "ok" } },
//!         "schemas": { "Order": { "type": "object" } }
//!     }
//! });
//!
//! let reduced = reduce(&doc, &Selection::tags(["pet"])).unwrap();
//! assert!(reduced["paths"].get("/orders").is_none());
//! assert!(reduced["components"].get("schemas").is_none());
//! ```

mod bundle;
mod dereference;
mod discriminator;
mod document;
mod error;
mod loader;
pub mod pointer;
mod reduce;
mod resolver;
mod types;
mod validator;

pub use bundle::{bundle, BundleOptions, Bundler};
pub use dereference::{
    dereference, find_circular_refs, CircularRefRegistry, Dereferencer, SeenSet,
};
pub use discriminator::{build_discriminator_one_of, find_discriminator_children, DiscriminatorMap};
pub use document::{operation_schema, Document, SchemaCache};
pub use error::{
    BundleError, DereferenceError, DocumentError, LoadError, ReduceError, ResolveError,
    SchemaError,
};
pub use loader::{
    is_url, load_document, load_document_auto, load_document_str, ExternalResolver, FileResolver,
};
pub use reduce::{reduce, ComponentIndex, ComponentKey};
pub use resolver::resolve;
pub use types::{
    ref_target, CircularObserver, CircularPolicy, CircularSettings, DereferenceOptions,
    MethodFilter, ResolveSettings, Selection, SpecKind, REF_NAME_KEY,
};
pub use validator::{validate_component_schemas, JsonSchemaValidator, SchemaValidator, Validation};

#[cfg(feature = "remote")]
pub use loader::{load_document_url, HttpResolver};

//! Error types for reference resolution, dereferencing, bundling and reduction.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading a document from a file, string or URL.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no resolver can load {uri}")]
    UnsupportedScheme { uri: String },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::UnsupportedScheme { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while looking up a JSON Pointer inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("cannot resolve an empty $ref pointer")]
    EmptyPointer,

    #[error("only local $ref pointers are supported, got {pointer}")]
    NotLocal { pointer: String },

    #[error("Could not find a definition for {pointer}.")]
    NotFound { pointer: String },
}

/// Errors while dereferencing a whole document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DereferenceError {
    #[error("circular $ref pointer found at {pointer}")]
    Circular { pointer: String },
}

/// Errors while bundling external references into a document.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("external $ref {reference} found but no resolver is registered for it")]
    ExternalDisabled { reference: String },

    #[error("failed to load {uri}: {source}")]
    Load {
        uri: String,
        #[source]
        source: LoadError,
    },

    #[error("invalid reference URI {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    #[error("external path item {reference} refers back to itself and cannot be inlined")]
    CircularPathItem { reference: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl BundleError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BundleError::Load { source, .. } => source.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while reducing a document to a selection of operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("Sorry, only OpenAPI definitions are supported.")]
    UnsupportedSpecification,

    #[error(
        "All paths in the API definition were removed. Did you supply the right path name to reduce by?"
    )]
    SelectionEmpty,
}

/// Errors raised by the [`Document`](crate::Document) handle.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is neither an OpenAPI nor a Swagger definition")]
    UnknownSpecification,

    #[error("no {method} operation found for path {path}")]
    OperationNotFound { path: String, method: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Dereference(#[from] DereferenceError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),
}

impl DocumentError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            DocumentError::Load(e) => e.exit_code(),
            DocumentError::Bundle(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Single schema problem reported by a validator, with pointer context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the offending schema.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("petstore.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::UnsupportedScheme {
            uri: "ftp://example.com/a.json".into(),
        };
        assert_eq!(err.exit_code(), 3);

        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(LoadError::InvalidJson { source }.exit_code(), 2);
    }

    #[test]
    fn bundle_error_exit_code_follows_load_error() {
        let err = BundleError::Load {
            uri: "pet.json".into(),
            source: LoadError::FileNotFound {
                path: PathBuf::from("pet.json"),
            },
        };
        assert_eq!(err.exit_code(), 3);

        let err = BundleError::ExternalDisabled {
            reference: "pet.json".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn user_facing_messages() {
        let err = ResolveError::NotFound {
            pointer: "#/components/schemas/Missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "Could not find a definition for #/components/schemas/Missing."
        );
        assert_eq!(
            ReduceError::UnsupportedSpecification.to_string(),
            "Sorry, only OpenAPI definitions are supported."
        );
        assert!(ReduceError::SelectionEmpty
            .to_string()
            .starts_with("All paths in the API definition were removed."));
    }

    #[test]
    fn schema_error_display() {
        let err = SchemaError {
            path: "#/components/schemas/Pet".into(),
            message: "12 is not valid".into(),
        };
        assert_eq!(err.to_string(), "#/components/schemas/Pet: 12 is not valid");
    }
}

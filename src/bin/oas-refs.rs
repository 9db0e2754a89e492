//! oas-refs CLI
//!
//! Command-line interface for dereferencing, bundling and reducing OpenAPI
//! and Swagger definitions.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use oas_refs::{
    find_circular_refs, BundleOptions, Bundler, CircularPolicy, DereferenceOptions, Document,
    DocumentError, JsonSchemaValidator, MethodFilter, Selection,
};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oas-refs")]
#[command(about = "Resolve, bundle and reduce $ref pointers in OpenAPI definitions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace every local $ref with the definition it points at
    Dereference {
        /// Definition source: file path or URL (http:// or https://)
        schema: String,

        /// Circular refs: true (expand once), false (fail) or ignore (leave as $ref)
        #[arg(long, default_value = "true")]
        circular: CircularPolicy,

        /// Do not synthesize oneOf for discriminator base schemas
        #[arg(long)]
        no_discriminator: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Inline external $ref targets as local components
    Bundle {
        /// Definition source: file path or URL (http:// or https://)
        schema: String,

        /// Fetch external targets from the filesystem and network
        #[arg(long)]
        external: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Keep only the selected operations and the components they use
    Reduce {
        /// Definition source: file path or URL (http:// or https://)
        schema: String,

        /// Select operations by tag (repeatable)
        #[arg(long = "tag", conflicts_with = "paths", required_unless_present = "paths")]
        tags: Vec<String>,

        /// Select operations by path, optionally limited to methods: /pets=get,post
        #[arg(long = "path")]
        paths: Vec<String>,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// List circular $ref pointers
    Circular {
        /// Definition source: file path or URL (http:// or https://)
        schema: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Check that every component schema is a well-formed JSON Schema
    Validate {
        /// Definition source: file path or URL (http:// or https://)
        schema: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Output file (stdout if not specified)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dereference {
            schema,
            circular,
            no_discriminator,
            out,
        } => run_dereference(&schema, circular, !no_discriminator, &out),
        Commands::Bundle {
            schema,
            external,
            out,
        } => run_bundle(&schema, external, &out),
        Commands::Reduce {
            schema,
            tags,
            paths,
            out,
        } => run_reduce(&schema, tags, &paths, &out),
        Commands::Circular { schema, json } => run_circular(&schema, json),
        Commands::Validate { schema, json } => run_validate(&schema, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load(source: &str) -> Result<Document, u8> {
    Document::load(source).map_err(fail)
}

fn fail(e: DocumentError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn run_dereference(
    source: &str,
    circular: CircularPolicy,
    discriminator: bool,
    out: &OutputArgs,
) -> Result<(), u8> {
    let mut document = load(source)?;
    let options = DereferenceOptions::new()
        .circular(circular)
        .discriminator_one_of(discriminator);

    let found = document.dereference(&options).map_err(fail)?;
    for pointer in found.iter() {
        warn!(pointer, "circular $ref left in place");
    }
    write_output(document.value(), out)
}

fn run_bundle(source: &str, external: bool, out: &OutputArgs) -> Result<(), u8> {
    let mut document = load(source)?;

    let mut bundler = Bundler::new(BundleOptions {
        base_uri: Some(source.to_string()),
    });
    if external {
        // Relative targets are joined against the source path, so files resolve from the cwd
        bundler = bundler.with_default_resolvers(Path::new(".")).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
    }

    document.bundle(&bundler).map_err(fail)?;
    write_output(document.value(), out)
}

fn run_reduce(
    source: &str,
    tags: Vec<String>,
    paths: &[String],
    out: &OutputArgs,
) -> Result<(), u8> {
    let document = load(source)?;
    let selection = if tags.is_empty() {
        Selection::paths(paths.iter().map(|arg| parse_path_arg(arg)))
    } else {
        Selection::Tags(tags)
    };

    let reduced = document.reduce(&selection).map_err(fail)?;
    write_output(reduced.value(), out)
}

/// `/pets` or `/pets=*` selects every method, `/pets=get,post` only those.
fn parse_path_arg(arg: &str) -> (String, MethodFilter) {
    match arg.split_once('=') {
        Some((path, methods)) if methods.trim() != "*" => (
            path.to_string(),
            MethodFilter::only(methods.split(',').map(str::trim).filter(|m| !m.is_empty())),
        ),
        Some((path, _)) => (path.to_string(), MethodFilter::Any),
        None => (arg.to_string(), MethodFilter::Any),
    }
}

fn run_circular(source: &str, json_output: bool) -> Result<(), u8> {
    let document = load(source)?;
    let circular = find_circular_refs(document.value());

    if json_output {
        let pointers: Vec<&str> = circular.iter().collect();
        println!("{}", serde_json::json!({ "circular": pointers }));
    } else {
        for pointer in circular.iter() {
            println!("{}", pointer);
        }
    }
    Ok(())
}

fn run_validate(source: &str, json_output: bool) -> Result<(), u8> {
    let document = load(source)?;
    let validation = document.validate_schemas(&JsonSchemaValidator);

    if json_output {
        let output = serde_json::to_string(&validation).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else if validation.valid {
        println!("Valid");
    } else {
        eprintln!("Validation failed:");
        for error in &validation.errors {
            eprintln!("  {}", error);
        }
    }

    if validation.valid {
        Ok(())
    } else {
        Err(1)
    }
}

fn write_output(value: &Value, out: &OutputArgs) -> Result<(), u8> {
    let json_output = if out.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match &out.output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

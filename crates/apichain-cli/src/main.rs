//! apichain command line tool.
//!
//! Provides the `apichain` binary for inspecting what dependency inference
//! finds in an OpenAPI or Swagger document: the resource graph, the layered
//! call order, the links it would inject, and the transitions a stateful
//! run would follow.
//!
//! Logging goes to stderr and is controlled through `RUST_LOG`. Inference
//! settings are read from the `APICHAIN_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use apichain_core::{ApiSchema, SchemaAnalysis};
use apichain_engine::{ApiTransitions, StatefulConfig};

/// Schema-driven dependency inference for stateful API testing.
#[derive(Parser)]
#[command(name = "apichain", about = "Schema-driven dependency inference for stateful API testing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the inferred resource dependency graph as JSON.
    Graph {
        /// Path to the schema file (JSON).
        schema: PathBuf,
    },

    /// Print operations grouped into dependency layers.
    Layers {
        /// Path to the schema file (JSON).
        schema: PathBuf,
    },

    /// Inject inferred links and print the updated schema.
    Links {
        /// Path to the schema file (JSON).
        schema: PathBuf,

        /// Write the updated schema here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the transitions available to a stateful run.
    Transitions {
        /// Path to the schema file (JSON).
        schema: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Graph { schema } => run_graph(&schema),
        Commands::Layers { schema } => run_layers(&schema),
        Commands::Links { schema, output } => run_links(&schema, output.as_deref()),
        Commands::Transitions { schema } => run_transitions(&schema),
    };
    process::exit(exit_code);
}

/// Reads and parses a schema file.
///
/// Errors carry the exit code: 1 = invalid schema, 3 = I/O error.
fn load_schema(path: &Path) -> Result<ApiSchema, i32> {
    let content = fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    let raw: Value = serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error: '{}' is not valid JSON: {}", path.display(), e);
        1
    })?;
    let schema = ApiSchema::from_value(raw).map_err(|e| {
        eprintln!("Error: {}", e);
        1
    })?;
    debug!(path = %path.display(), operations = schema.operation_keys().len(), "loaded schema");
    Ok(schema)
}

/// Inference settings from the environment; exit code 2 if they are invalid.
fn load_config() -> Result<StatefulConfig, i32> {
    StatefulConfig::from_env().map_err(|e| {
        eprintln!("Error: {}", e);
        2
    })
}

fn print_json(value: &Value) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize output: {}", e);
            1
        }
    }
}

/// Execute the graph subcommand.
fn run_graph(path: &Path) -> i32 {
    let schema = match load_schema(path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let analysis = SchemaAnalysis::new(schema);
    print_json(&analysis.dependency_graph().serialize())
}

/// Execute the layers subcommand.
fn run_layers(path: &Path) -> i32 {
    let schema = match load_schema(path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let analysis = SchemaAnalysis::new(schema);
    match analysis.dependency_layers() {
        Some(layers) => {
            for (depth, layer) in layers.iter().enumerate() {
                println!("{}: {}", depth, layer.join(", "));
            }
        }
        None => println!("No dependencies between operations"),
    }
    0
}

/// Execute the links subcommand.
///
/// Returns exit code: 0 = success, 1 = invalid schema, 2 = invalid
/// configuration, 3 = I/O error.
fn run_links(path: &Path, output: Option<&Path>) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let schema = match load_schema(path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let mut analysis = SchemaAnalysis::new(schema);
    let injected = if analysis.should_inject_links(&config.inference) {
        analysis.inject_links()
    } else {
        info!("dependency analysis is disabled");
        0
    };
    eprintln!("Injected {} link(s)", injected);

    let raw = analysis.into_schema().into_raw();
    let Some(output) = output else {
        return print_json(&raw);
    };
    let json = match serde_json::to_string_pretty(&raw) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: failed to serialize schema: {}", e);
            return 1;
        }
    };
    if let Err(e) = fs::write(output, json) {
        eprintln!("Error: failed to write '{}': {}", output.display(), e);
        return 3;
    }
    0
}

/// Execute the transitions subcommand.
fn run_transitions(path: &Path) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let schema = match load_schema(path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let mut analysis = SchemaAnalysis::new(schema);
    if analysis.should_inject_links(&config.inference) {
        analysis.inject_links();
    }
    let transitions = ApiTransitions::from_schema(analysis.schema());
    for link in transitions.links() {
        let marker = if link.is_inferred { " (inferred)" } else { "" };
        println!("{}{}", link.id(), marker);
    }
    0
}

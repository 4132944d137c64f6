//! REST Schema CLI
//!
//! Command-line interface for compiling REST configurations into GraphQL schemas.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rest_schema_compiler::{
    compile_file, infer_schema, parse_json, Collaborators, ContentFetcher, DefaultFetcher,
    OperationKind, ResolveParams, ResolverError, ResolverOutput,
};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "rest-schema")]
#[command(about = "Compile JSON Schema described REST endpoints into a GraphQL schema")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a configuration and print the schema as GraphQL SDL
    Compile {
        /// Configuration file (YAML or JSON)
        config: PathBuf,

        /// Print SDL and context variables as JSON
        #[arg(long)]
        json: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Infer a JSON Schema from a sample payload
    Infer {
        /// Sample source: file path or URL (http:// or https://)
        sample: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Compile a configuration and invoke one root field
    Call {
        /// Configuration file (YAML or JSON)
        config: PathBuf,

        /// Root field to invoke
        field: String,

        /// Root type of the field: Query or Mutation
        #[arg(long, default_value = "Query")]
        kind: String,

        /// Field arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Execution context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Compile {
            config,
            json,
            output,
        } => run_compile(&config, json, output).await,
        Commands::Infer { sample, output } => run_infer(&sample, output).await,
        Commands::Call {
            config,
            field,
            kind,
            args,
            context,
        } => run_call(&config, &field, &kind, &args, &context).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run_compile(config: &Path, json: bool, output: Option<PathBuf>) -> Result<(), u8> {
    let compiled = compile_file(config, &Collaborators::default())
        .await
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    let sdl = compiled.schema.to_sdl();
    let rendered = if json {
        let value = serde_json::json!({
            "sdl": sdl,
            "contextVariables": compiled.context_variables,
        });
        serde_json::to_string_pretty(&value).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?
    } else {
        sdl
    };

    write_output(output.as_deref(), &rendered)
}

async fn run_infer(sample: &str, output: Option<PathBuf>) -> Result<(), u8> {
    let fetcher = DefaultFetcher::new();
    let content = fetcher.fetch(sample, &HashMap::new()).await.map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let payload = parse_json(sample, &content).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let schema = infer_schema(&payload);
    let rendered = serde_json::to_string_pretty(&schema).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    write_output(output.as_deref(), &rendered)
}

async fn run_call(
    config: &Path,
    field: &str,
    kind: &str,
    args: &str,
    context: &str,
) -> Result<(), u8> {
    let Some(kind) = OperationKind::parse(kind) else {
        eprintln!("Error: unknown operation type {}", kind);
        return Err(2);
    };
    let args: Map<String, Value> = serde_json::from_str(args).map_err(|e| {
        eprintln!("Error: --args must be a JSON object: {}", e);
        2u8
    })?;
    let context: Value = serde_json::from_str(context).map_err(|e| {
        eprintln!("Error: --context must be JSON: {}", e);
        2u8
    })?;

    let compiled = compile_file(config, &Collaborators::default())
        .await
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    let params = ResolveParams::new(args).with_context(context);
    let output = compiled
        .schema
        .resolve_field(kind, field, params)
        .await
        .map_err(report_resolver_error)?;

    let value = match output {
        ResolverOutput::Value(value) => value,
        ResolverOutput::Stream(_) => {
            return Err(report_resolver_error(ResolverError::NotAQuery {
                field: field.to_string(),
            }))
        }
    };

    let rendered = serde_json::to_string_pretty(&value).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", rendered);
    Ok(())
}

/// Print a resolver failure, keeping upstream payloads intact.
fn report_resolver_error(error: ResolverError) -> u8 {
    match &error {
        ResolverError::Aggregate { errors } => {
            let payload = serde_json::json!({ "errors": errors });
            eprintln!("Error: {}", payload);
        }
        ResolverError::Upstream { payload } => {
            let payload = serde_json::json!({ "error": payload });
            eprintln!("Error: {}", payload);
        }
        other => eprintln!("Error: {}", other),
    }
    error.exit_code() as u8
}

fn write_output(output: Option<&Path>, content: &str) -> Result<(), u8> {
    match output {
        Some(path) => {
            std::fs::write(path, content).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

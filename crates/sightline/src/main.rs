//! sightline: run a JSON image pipeline from the command line.
//!
//! Loads a pipeline definition and an optional input image, runs every
//! stage, and prints the run report as JSON on stdout. Logs go to stderr
//! and are filtered with `RUST_LOG` (default `sightline=info`).
//!
//! # Usage
//!
//! ```text
//! sightline pipeline.json --image in.png --output out.png --var sigma=2
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod io;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use sightline_pipeline::{DynamicImage, Pipeline, PipelineDefinition, Variables};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run a JSON-defined image processing pipeline.
///
/// The definition is a JSON array of stages, each naming an operation
/// with `op`. Parameters written as `{{name}}` are filled from `--var`
/// and `--vars-json`.
#[derive(Parser)]
#[command(name = "sightline", version)]
struct Cli {
    /// Path to the pipeline definition (JSON array of stages).
    #[arg(required_unless_present = "list_ops")]
    pipeline: Option<PathBuf>,

    /// Input image (PNG, JPEG, BMP, WebP). Without one the pipeline starts
    /// from an empty image and must create its own, e.g. with `imread` or
    /// `Mat`.
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Write the final image to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Bind a substitution variable (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// JSON object file of substitution variables, applied before `--var`.
    #[arg(long)]
    vars_json: Option<PathBuf>,

    /// Print the report on one line.
    #[arg(long)]
    compact: bool,

    /// Print per-stage timings to stderr.
    #[arg(long)]
    timings: bool,

    /// List available operations and exit.
    #[arg(long)]
    list_ops: bool,
}

fn parse_var(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got '{text}'")),
    }
}

/// Read a JSON object of variables. Non-string scalars are bound by their
/// JSON text.
fn read_vars_json(path: &Path) -> Result<Variables, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let object: serde_json::Map<String, Value> = serde_json::from_str(&text)
        .map_err(|e| format!("Error parsing {}: {e}", path.display()))?;
    object
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(text) => Ok((name, text)),
            Value::Number(_) | Value::Bool(_) => Ok((name, value.to_string())),
            _ => Err(format!(
                "Error in {}: variable '{name}' must be a string, number or boolean",
                path.display()
            )),
        })
        .collect()
}

fn variables_from_cli(cli: &Cli) -> Result<Variables, String> {
    let mut vars = match cli.vars_json {
        Some(ref path) => read_vars_json(path)?,
        None => Variables::new(),
    };
    vars.extend(cli.vars.iter().cloned());
    Ok(vars)
}

fn load_definition(path: &Path) -> Result<PipelineDefinition, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    PipelineDefinition::from_json(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn load_image(path: Option<&Path>) -> Result<DynamicImage, String> {
    let Some(path) = path else {
        return Ok(DynamicImage::new_rgb8(0, 0));
    };
    let bytes =
        std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    sightline_pipeline::decode(&bytes).map_err(|e| format!("{}: {e}", path.display()))
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sightline=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let registry = io::registry();
    if cli.list_ops {
        for op in registry.ops() {
            println!("{op}");
        }
        return ExitCode::SUCCESS;
    }

    let Some(ref pipeline_path) = cli.pipeline else {
        eprintln!("a pipeline definition is required");
        return ExitCode::FAILURE;
    };
    let prepared = load_definition(pipeline_path).and_then(|definition| {
        Ok((
            definition,
            variables_from_cli(&cli)?,
            load_image(cli.image.as_deref())?,
        ))
    });
    let (definition, vars, input) = match prepared {
        Ok(prepared) => prepared,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        pipeline = %pipeline_path.display(),
        stages = definition.len(),
        variables = vars.len(),
        "running pipeline"
    );
    let outcome = Pipeline::with_registry(definition, registry).run(input, &vars);

    let rendered = if cli.compact {
        serde_json::to_string(&outcome.report)
    } else {
        serde_json::to_string_pretty(&outcome.report)
    };
    match rendered {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing report: {e}");
            return ExitCode::FAILURE;
        }
    }
    if cli.timings {
        eprintln!("{}", outcome.diagnostics.report());
    }

    if let Some(failure) = outcome.report.failure() {
        eprintln!("Pipeline error: {failure}");
        return ExitCode::FAILURE;
    }

    if let Some(ref output) = cli.output {
        if let Err(e) = outcome.image.save(output) {
            eprintln!("Error writing {}: {e}", output.display());
            return ExitCode::FAILURE;
        }
        eprintln!(
            "Image written to {} ({}x{})",
            output.display(),
            outcome.image.width(),
            outcome.image.height(),
        );
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn var_flags_split_on_first_equals() {
        assert_eq!(parse_var("a=b=c").unwrap(), ("a".to_owned(), "b=c".to_owned()));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".to_owned(), String::new()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn vars_json_accepts_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, r#"{"name": "run", "sigma": 2.5, "flag": true}"#).unwrap();
        let vars = read_vars_json(&path).unwrap();
        assert_eq!(vars.get("name"), Some("run"));
        assert_eq!(vars.get("sigma"), Some("2.5"));
        assert_eq!(vars.get("flag"), Some("true"));

        std::fs::write(&path, r#"{"bad": [1]}"#).unwrap();
        assert!(read_vars_json(&path).is_err());
    }

    #[test]
    fn command_line_vars_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, r#"{"sigma": "1", "keep": "yes"}"#).unwrap();
        let cli = Cli::parse_from([
            "sightline",
            "p.json",
            "--vars-json",
            path.to_str().unwrap(),
            "--var",
            "sigma=3",
        ]);
        let vars = variables_from_cli(&cli).unwrap();
        assert_eq!(vars.get("sigma"), Some("3"));
        assert_eq!(vars.get("keep"), Some("yes"));
    }

    #[test]
    fn pipeline_is_optional_only_for_list_ops() {
        assert!(Cli::try_parse_from(["sightline"]).is_err());
        assert!(Cli::try_parse_from(["sightline", "--list-ops"]).is_ok());
    }
}

use std::path::{Component, Path, PathBuf};
use std::sync::Once;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "stackify_core=debug,stackify_cli=info";

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use stackify_core::{
    OptimizationResult, OptimizerConfig,
    ast::Ast,
    opt::{AllocationSummary, Statistics},
};
use tracing_subscriber::EnvFilter;


#[derive(Debug, Parser)]
#[command(
    name = "stackify",
    author,
    version,
    about = "Escape analysis and allocation placement for serialized syntax trees",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze a syntax tree (`.json`, `.yaml`, `.yml`) and print placement decisions.
    Analyze {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Optimizer configuration (`.toml`, `.yaml`, `.yml`, `.json`)
        #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the default optimizer configuration as TOML.
    Config,
}

/// JSON document printed by `analyze --format json`.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    source: String,
    statistics: Statistics,
    allocations: &'a [AllocationSummary],
}

/// Rejects paths with a `..` component.
fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(raw);
    if path.components().any(|comp| matches!(comp, Component::ParentDir)) {
        anyhow::bail!("Parent directory components ('..') are not allowed: '{raw}'");
    }
    Ok(path.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

/// Value of `STACKIFY_TRACE`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TraceSetting {
    /// Unset, empty, `0`, `false` or `off`.
    Off,
    /// `1`, `true` or `on`: use `RUST_LOG`, else [`DEFAULT_TRACE_FILTER`].
    Default,
    /// Anything else is an `EnvFilter` directive.
    Filter(String),
}

impl TraceSetting {
    fn parse(raw: &str) -> Self {
        let value = raw.trim();
        let is = |word: &str| value.eq_ignore_ascii_case(word);
        if value.is_empty() || is("0") || is("false") || is("off") {
            Self::Off
        } else if is("1") || is("true") || is("on") {
            Self::Default
        } else {
            Self::Filter(value.to_string())
        }
    }

    fn from_env() -> Self {
        std::env::var("STACKIFY_TRACE")
            .map(|raw| Self::parse(&raw))
            .unwrap_or(Self::Off)
    }

    fn filter(&self) -> Option<EnvFilter> {
        let directive = match self {
            Self::Off => return None,
            Self::Default => std::env::var("RUST_LOG").ok(),
            Self::Filter(directive) => Some(directive.clone()),
        };
        Some(
            directive
                .and_then(|d| EnvFilter::try_new(d).ok())
                .unwrap_or_else(|| EnvFilter::new(DEFAULT_TRACE_FILTER)),
        )
    }
}

/// Logs go to stderr; stdout carries the report.
fn init_tracing(setting: &TraceSetting) {
    let Some(filter) = setting.filter() else {
        return;
    };
    TRACE_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<OptimizerConfig> {
    match path {
        Some(path) => OptimizerConfig::from_path(path)
            .with_context(|| format!("failed to load config '{}'", path.display())),
        None => Ok(OptimizerConfig::default()),
    }
}

fn render(source: &Path, result: &OptimizationResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(result.report()),
        OutputFormat::Json => {
            let doc = JsonReport {
                source: source.display().to_string(),
                statistics: result.statistics(),
                allocations: result.allocations(),
            };
            serde_json::to_string_pretty(&doc).context("serialize report")
        }
    }
}

fn run_analyze(file: &Path, config: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let ast = Ast::from_path(file).with_context(|| format!("failed to load syntax tree '{}'", file.display()))?;
    tracing::debug!(nodes = ast.len(), file = %file.display(), "syntax tree loaded");

    let result = OptimizationResult::run(&ast, &config);
    let out = render(file, &result, format)?;
    print!("{out}");
    if !out.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing(&TraceSetting::from_env());

    let CliArgs { command } = CliArgs::parse();
    match command {
        Commands::Analyze { file, config, format } => run_analyze(&file, config.as_deref(), format),
        Commands::Config => {
            let toml = OptimizerConfig::default()
                .to_toml_string()
                .context("serialize default config")?;
            print!("{toml}");
            Ok(())
        }
    }
}

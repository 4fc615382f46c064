use clap::{Parser, ValueEnum};
use octofhir_fhir_validator::{
    FhirValidator, InMemorySchemaRegistry, IssueSeverity, OperationOutcome, ValidationLevel,
    ValidatorConfig,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    Structural,
    Constraints,
    Terminology,
    Full,
}

impl From<Level> for ValidationLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Structural => ValidationLevel::Structural,
            Level::Constraints => ValidationLevel::Constraints,
            Level::Terminology => ValidationLevel::Terminology,
            Level::Full => ValidationLevel::Full,
        }
    }
}

#[derive(Parser)]
#[command(name = "fhir-validate")]
#[command(about = "Validate FHIR resources against StructureDefinitions and profiles")]
#[command(version)]
struct Cli {
    /// Resource files to validate
    #[arg(required = true)]
    resources: Vec<PathBuf>,

    /// Files or directories with StructureDefinitions, ValueSets and CodeSystems
    #[arg(short, long = "definitions")]
    definitions: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additionally validate against this profile URL
    #[arg(short, long)]
    profile: Option<String>,

    #[arg(short, long, value_enum)]
    level: Option<Level>,

    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Report errors only
    #[arg(long)]
    no_warnings: bool,

    #[arg(long)]
    fail_fast: bool,

    /// Warn about absent mustSupport elements
    #[arg(long)]
    must_support: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("❌ {error}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ValidatorConfig::from_file(path)?,
        None => ValidatorConfig::default(),
    };
    config.definition_paths.extend(cli.definitions.iter().cloned());

    let mut options = config.options.clone();
    if let Some(level) = cli.level {
        options.level = level.into();
    }
    if let Some(profile) = &cli.profile {
        options.profile = Some(profile.clone());
    }
    options.include_warnings &= !cli.no_warnings;
    options.fail_fast |= cli.fail_fast;
    options.must_support |= cli.must_support;

    let registry = InMemorySchemaRegistry::new().with_definition_paths(config.definition_paths.clone());
    let validator = FhirValidator::builder(Arc::new(registry))
        .with_config(config)
        .build()?;

    let mut all_valid = true;
    for path in &cli.resources {
        let content = tokio::fs::read_to_string(path).await?;
        let resource: Value = serde_json::from_str(&content)?;
        let outcome = validator
            .validate_with_location(&resource, &options, path.display().to_string())
            .await;
        all_valid &= outcome.is_valid();

        match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            OutputFormat::Text => print_summary(path, &outcome),
        }
    }

    Ok(all_valid)
}

fn print_summary(path: &std::path::Path, outcome: &OperationOutcome) {
    let errors = outcome.errors().count();
    let warnings = outcome.warnings().count();
    if errors == 0 {
        println!("✅ {}: valid ({} warning(s))", path.display(), warnings);
    } else {
        println!(
            "❌ {}: {} error(s), {} warning(s)",
            path.display(),
            errors,
            warnings
        );
    }

    for issue in &outcome.issue {
        let label = match issue.severity {
            IssueSeverity::Fatal => "FATAL",
            IssueSeverity::Error => "ERROR",
            IssueSeverity::Warning => "WARN",
            IssueSeverity::Information => "INFO",
        };
        println!("  {} [{}]: {}", label, issue.code, issue.diagnostics);
        if let Some(expression) = issue.expression.first() {
            println!("    at: {expression}");
        }
    }
}

//! multiflexi-reconcile CLI entrypoint.
//!
//! This is the main entrypoint for the multiflexi-reconcile command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use multiflexi_reconcile::cli::{Cli, Commands, ConnectionArgs, OutputFormat, OutputFormatter, ResourceArgs};
use multiflexi_reconcile::config::{find_config_file, ConfigParser, ConfigValidator, MultiflexiConfig};
use multiflexi_reconcile::error::{MultiflexiError, Result};
use multiflexi_reconcile::executor::TaskExecutor;
use multiflexi_reconcile::operations::{Operation, OperationRunner};
use multiflexi_reconcile::reconciler::Reconciler;
use multiflexi_reconcile::transport::{self, Verbosity};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbosity());

    let output = cli.output;

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            report_error(output, &e);
            failure_code(e.return_code())
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout only carries
/// results.
fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let verbosity = cli.verbosity();

    match &cli.command {
        Commands::Init { path, force } => cmd_init(path, *force, &formatter),
        Commands::Validate { warnings } => cmd_validate(&cli, *warnings, &formatter),
        Commands::Apply { continue_on_error } => {
            cmd_apply(&cli, *continue_on_error, verbosity, &formatter).await
        }
        Commands::Resource(args) => cmd_resource(&cli, args, verbosity, &formatter).await,
        command => match command.operation() {
            Some(operation) => cmd_operation(&cli, &operation, verbosity, &formatter).await,
            None => Err(MultiflexiError::internal("command has no operation mapping")),
        },
    }
}

/// Create a starter task file.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    info!("Initializing task file in: {}", path.display());

    let config_path = path.join("multiflexi.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Task file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/multiflexi.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    // Keep credentials out of version control
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.lines().any(|line| line.trim() == ".env") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# MultiFlexi credentials\n.env")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and set MULTIFLEXI_PASSWORD");
    eprintln!("  2. Edit multiflexi.yaml with your resources");
    eprintln!("  3. Run 'multiflexi-reconcile validate' to check the file");
    eprintln!("  4. Run 'multiflexi-reconcile --check apply' to preview changes");
    eprintln!("  5. Run 'multiflexi-reconcile apply' to apply them");

    emit(&formatter.format_message(&format!(
        "Initialized {}",
        config_path.display()
    )))?;
    Ok(ExitCode::SUCCESS)
}

/// Validate the task file.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref(), &cli.connection, true)?;

    let result = ConfigValidator::new().collect(&config);
    emit(&formatter.format_validation(&result, show_warnings))?;

    if cli.output == OutputFormat::Text && result.is_valid() {
        eprintln!("\nTask file summary:");
        eprintln!("  Transport: {}", config.connection.transport);
        eprintln!("  Resources: {}", config.resources.len());
        eprintln!("  Operations: {}", config.operations.len());
    }

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Apply every task of the task file.
async fn cmd_apply(
    cli: &Cli,
    continue_on_error: bool,
    verbosity: Verbosity,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref(), &cli.connection, true)?;

    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        debug!("Validation warning: {warning}");
    }

    let backend = transport::connect(&config.connection, verbosity)?;
    let result = TaskExecutor::new(backend.as_ref())
        .with_check_mode(cli.check)
        .with_continue_on_error(continue_on_error)
        .execute(&config)
        .await;

    info!(
        "Apply finished in {} ms: {} changed, {} failed",
        result.duration_ms(),
        result.changed,
        result.failed
    );
    emit(&formatter.format_execution(&result))?;

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        failure_code(result.first_return_code())
    })
}

/// Reconcile a single resource given on the command line.
async fn cmd_resource(
    cli: &Cli,
    args: &ResourceArgs,
    verbosity: Verbosity,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref(), &cli.connection, false)?;
    ConfigValidator::new().validate(&connection_only(&config))?;

    let descriptor = args.descriptor()?;
    let backend = transport::connect(&config.connection, verbosity)?;
    let outcome = Reconciler::new(backend.as_ref())
        .with_check_mode(cli.check)
        .reconcile(&descriptor, args.state)
        .await?;

    info!("{outcome}");
    emit(&formatter.format_outcome(&outcome))?;
    Ok(ExitCode::SUCCESS)
}

/// Run one imperative operation.
async fn cmd_operation(
    cli: &Cli,
    operation: &Operation,
    verbosity: Verbosity,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref(), &cli.connection, false)?;
    ConfigValidator::new().validate(&connection_only(&config))?;

    let backend = transport::connect(&config.connection, verbosity)?;
    let outcome = OperationRunner::new(backend.as_ref())
        .with_check_mode(cli.check)
        .run(operation)
        .await?;

    info!("{outcome}");
    emit(&formatter.format_operation(&outcome))?;
    Ok(ExitCode::SUCCESS)
}

/// Loads the task file, `.env` and environment overrides, then the
/// command-line connection overrides.
///
/// When `required` is false and no task file is found, the defaults are used.
fn load_config(
    config_path: Option<&PathBuf>,
    overrides: &ConnectionArgs,
    required: bool,
) -> Result<MultiflexiConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.clone()),
        None if required => Some(find_config_file(std::env::current_dir()?)?),
        None => find_config_file(std::env::current_dir()?).ok(),
    };

    let mut config = if let Some(config_file) = config_file {
        info!("Using task file: {}", config_file.display());
        let parser = ConfigParser::new()
            .with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
        parser.load_dotenv()?;
        parser.load_with_env(&config_file)?
    } else {
        debug!("No task file found, using defaults");
        ConfigParser::new().load_dotenv()?;
        let mut config = MultiflexiConfig::default();
        ConfigParser::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        config
    };

    overrides.apply(&mut config.connection);
    Ok(config)
}

/// Returns a copy of the configuration with only its connection settings.
fn connection_only(config: &MultiflexiConfig) -> MultiflexiConfig {
    MultiflexiConfig {
        connection: config.connection.clone(),
        ..MultiflexiConfig::default()
    }
}

/// Writes a formatted result to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Reports a fatal error: the JSON failure envelope on stdout, or a line on
/// stderr for text output.
fn report_error(output: OutputFormat, error: &MultiflexiError) {
    let text = OutputFormatter::new(output).format_error(error);
    match output {
        OutputFormat::Json => {
            let _ = emit(&text);
        }
        OutputFormat::Text => eprint!("{text}"),
    }
}

/// Maps a backend return code onto a process exit code.
fn failure_code(return_code: Option<i32>) -> ExitCode {
    return_code
        .and_then(|rc| u8::try_from(rc.clamp(1, 255)).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

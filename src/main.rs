//! Stackplan CLI entrypoint.
//!
//! This is the main entrypoint for the stackplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackplan::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use stackplan::config::{
    find_config_file, ConfigParser, ConfigValidator, ProviderType, StateBackend, TopologyConfig,
};
use stackplan::error::{Result, StackplanError};
use stackplan::graph::GraphBuilder;
use stackplan::orchestrator::{Orchestrator, RunOutcome};
use stackplan::planner::ProvisioningPlan;
use stackplan::provider::{HttpProvider, LocalProvider, Provider, DEFAULT_TIMEOUT_SECS};
use stackplan::state::{LocalSnapshotStore, S3SnapshotStore, SnapshotStore, STATE_DIR};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            if e.is_topology_error() {
                eprintln!("Fix the topology file, then check it with `stackplan validate -w`.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns false when the command ran but failed.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<bool> {
    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, formatter),
        Commands::Graph => cmd_graph(cli.config.as_ref(), formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, formatter).await,
        Commands::Apply { yes } => cmd_apply(cli.config.as_ref(), yes, formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, formatter).await,
    }
}

/// Writes a starter topology.
fn cmd_init(path: &Path, force: bool) -> Result<bool> {
    info!("Initializing new stackplan project in: {}", path.display());

    let config_path = path.join("stackplan.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Topology file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(false);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stackplan.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".stackplan/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# stackplan")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.stackplan/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit stackplan.yaml to describe your topology");
    eprintln!("  2. Run 'stackplan validate' to check it");
    eprintln!("  3. Run 'stackplan plan' to see what will be provisioned");
    eprintln!("  4. Run 'stackplan apply' to provision it");

    Ok(true)
}

/// Validates the topology file.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating topology: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let mut result = ConfigValidator::new().check(&config);

    // Graph errors (cycles in particular) are only visible once the graph is built.
    if result.is_valid() {
        if let Err(e) = GraphBuilder::new().build(&config.resources) {
            result.errors.push(stackplan::config::ValidationError {
                field: String::from("resources"),
                message: e.to_string(),
            });
        }
    }

    println!("{}", formatter.format_validation(&result, show_warnings));

    if formatter_is_text(formatter) && result.is_valid() {
        println!("Project: {}/{}", config.project.name, config.project.environment);
        println!("Resources: {}", config.resources.len());
    }

    Ok(result.is_valid())
}

/// Shows the resource graph in dependency order.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<bool> {
    let (config, _) = load_config(config_path)?;
    let graph = GraphBuilder::new().build(&config.resources)?;

    println!("{}", formatter.format_graph(&graph));
    Ok(true)
}

/// Shows the provisioning plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, base) = load_config(config_path)?;
    let store = create_store(&config, &base).await?;
    let provider = create_provider(&config, &base)?;

    let plan = Orchestrator::new(&config, store.as_ref(), provider.as_ref())
        .plan()
        .await?;

    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(plan.passes_guardrails)
}

/// Plans and applies the topology.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, base) = load_config(config_path)?;
    let store = create_store(&config, &base).await?;
    let provider = create_provider(&config, &base)?;

    let outcome = Orchestrator::new(&config, store.as_ref(), provider.as_ref())
        .apply(|plan| confirm(plan, formatter, auto_approve, "Do you want to apply this plan? [y/N]: ", "y"))
        .await?;

    report_outcome(outcome, formatter, "Apply cancelled.")
}

/// Deletes everything recorded in the snapshot.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, base) = load_config(config_path)?;
    let store = create_store(&config, &base).await?;
    let provider = create_provider(&config, &base)?;

    let outcome = Orchestrator::new(&config, store.as_ref(), provider.as_ref())
        .destroy(|plan| {
            confirm(
                plan,
                formatter,
                auto_approve,
                "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
                "destroy",
            )
        })
        .await?;

    report_outcome(outcome, formatter, "Destruction cancelled.")
}

/// Snapshot management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, base) = load_config(config_path)?;
    let store = create_store(&config, &base).await?;

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = store.load().await? {
                println!("{}", formatter.format_snapshot(&snapshot));
            } else {
                println!("{}", formatter.warning("No snapshot found."));
            }
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            let target = if force {
                store.get_lock_info().await?.map(|lock| lock.lock_id)
            } else {
                lock_id
            };

            match target {
                Some(id) => {
                    store.release_lock(&id).await?;
                    println!("{}", formatter.success("Snapshot unlocked."));
                }
                None if force => println!("{}", formatter.warning("Snapshot is not locked.")),
                None => {
                    eprintln!("{}", formatter.error("Please provide --lock-id or use --force"));
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Shows the plan and asks for confirmation unless auto-approved.
fn confirm(
    plan: &ProvisioningPlan,
    formatter: &OutputFormatter,
    auto_approve: bool,
    prompt: &str,
    expected: &str,
) -> bool {
    println!("{}", formatter.format_plan(plan, false));

    if auto_approve {
        return true;
    }
    if !plan.passes_guardrails {
        // The applier refuses it anyway; no point asking.
        return true;
    }

    eprint!("{prompt}");
    if std::io::stderr().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case(expected)
}

/// Prints the outcome of an orchestrated run; a failed step becomes the error.
fn report_outcome(outcome: RunOutcome, formatter: &OutputFormatter, cancelled: &str) -> Result<bool> {
    match &outcome {
        RunOutcome::UpToDate(plan) => {
            println!("{}", formatter.format_plan(plan, false));
        }
        RunOutcome::Cancelled(_) => {
            eprintln!("{}", formatter.warning(cancelled));
        }
        RunOutcome::Applied { report, .. } => {
            println!("{}", formatter.format_report(report));
        }
    }
    outcome.into_result()?;
    Ok(true)
}

fn formatter_is_text(formatter: &OutputFormatter) -> bool {
    formatter.format() == OutputFormat::Text
}

/// Resolves the topology file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory containing the topology file.
fn base_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads and validates the topology, returning it with its base directory.
fn load_config(config_path: Option<&PathBuf>) -> Result<(TopologyConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading topology from: {}", config_file.display());

    let base = base_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(&base);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    Ok((config, base))
}

/// Creates the configured snapshot store.
async fn create_store(config: &TopologyConfig, base: &Path) -> Result<Box<dyn SnapshotStore>> {
    let store: Box<dyn SnapshotStore> = match config.state.backend {
        StateBackend::Local => {
            let dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
            Box::new(LocalSnapshotStore::with_base_dir(dir))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StackplanError::internal("S3 bucket not configured"))?;
            Box::new(
                S3SnapshotStore::new(
                    bucket,
                    config.state.prefix.as_deref(),
                    config.state.region.as_deref(),
                )
                .await,
            )
        }
    };

    debug!("Using {} snapshot store", store.backend_type());
    Ok(store)
}

/// Creates the configured provider adapter.
fn create_provider(config: &TopologyConfig, base: &Path) -> Result<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match config.provider.provider_type {
        ProviderType::Local => {
            let dir = config
                .provider
                .path
                .as_ref()
                .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
            Box::new(LocalProvider::with_dir(dir))
        }
        ProviderType::Http => {
            let endpoint = config
                .provider
                .endpoint
                .as_deref()
                .ok_or_else(|| StackplanError::internal("Provider endpoint not configured"))?;
            let timeout = config.provider.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
            let http = HttpProvider::new(endpoint, ConfigParser::get_provider_token(), timeout)?;
            debug!("Provider endpoint: {}", http.base_url());
            Box::new(http)
        }
    };

    debug!("Using {} provider", provider.provider_type());
    Ok(provider)
}

//! converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use converge::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use converge::config::{find_config_file, ConfigParser, ConfigValidator, EngineConfig};
use converge::context::DeploymentContext;
use converge::deployment::{Deployment, DeploymentResult};
use converge::error::Result;
use converge::program::{ProgramManifest, StaticSource};
use converge::provider::ProviderRegistry;
use converge::resource::StackRef;
use converge::state::{LocalBackend, SnapshotStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.output);

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
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr; `RUST_LOG` wins.
fn init_logging(verbose: bool, output: OutputFormat) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match output {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let workspace = Workspace::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&workspace, warnings, &formatter),
        Commands::Preview => cmd_preview(&workspace, &formatter).await,
        Commands::Up { yes, parallel } => cmd_up(&workspace, yes, parallel, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(&workspace, yes, &formatter).await,
        Commands::State { command } => cmd_state(&workspace, command, &formatter).await,
    }
}

/// Validate configuration and program.
fn cmd_validate(workspace: &Workspace, show_warnings: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let result = ConfigValidator::new().validate(&workspace.config)?;
    let registrations = workspace.manifest()?.registrations(&workspace.stack())?;
    info!("Program declares {} resources", registrations.len());

    println!("{}", formatter.format_validation(&result, show_warnings));
    Ok(ExitCode::SUCCESS)
}

/// Show the deployment plan.
async fn cmd_preview(workspace: &Workspace, formatter: &OutputFormatter) -> Result<ExitCode> {
    let deployment = workspace.deployment(None);
    let plan = deployment.preview(&mut workspace.source()?).await?;

    println!("{}", formatter.format_plan(&plan));
    Ok(ExitCode::SUCCESS)
}

/// Deploy the program.
async fn cmd_up(
    workspace: &Workspace,
    auto_approve: bool,
    parallel: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let deployment = workspace.deployment(parallel);

    let plan = deployment.preview(&mut workspace.source()?).await?;
    if !plan.has_changes() {
        println!("{}", formatter.format_plan(&plan));
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("{}", OutputFormatter::new(OutputFormat::Text).format_plan(&plan));
        if !confirm("Do you want to perform this deployment? [y/N]: ", "y")? {
            eprintln!("Deployment cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let result = with_interrupt(&deployment, deployment.run(&mut workspace.source()?)).await?;
    println!("{}", formatter.format_result(&result));
    Ok(exit_code(&result))
}

/// Destroy every resource of the stack.
async fn cmd_destroy(workspace: &Workspace, auto_approve: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let store = workspace.store();
    let snapshot = store.load_or_empty(&workspace.stack()).await?;

    if snapshot.is_empty() {
        eprintln!("Nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("The following resources will be destroyed:");
        for resource in snapshot.resources.iter().rev() {
            eprintln!("  - {} ({})", resource.urn.name(), resource.type_token);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let deployment = workspace.deployment_with_store(None, store);
    let result = with_interrupt(&deployment, deployment.destroy()).await?;
    println!("{}", formatter.format_result(&result));
    Ok(exit_code(&result))
}

/// State management commands.
async fn cmd_state(workspace: &Workspace, command: StateCommands, formatter: &OutputFormatter) -> Result<ExitCode> {
    let store = workspace.store();
    let stack = workspace.stack();

    match command {
        StateCommands::Show => {
            let snapshot = store.load(&stack).await?;
            println!("{}", formatter.format_snapshot(&stack, &snapshot));
        }
        StateCommands::Unlock => {
            let previous = store.lock_info(&stack).await?;
            let removed = store.force_unlock(&stack).await?;
            if removed {
                warn!("Forcefully removed the lock on {stack}");
            }
            println!("{}", formatter.format_unlock(&stack, previous.as_ref(), removed));
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Configuration plus the directory relative paths resolve against.
struct Workspace {
    config: EngineConfig,
    base_dir: PathBuf,
}

impl Workspace {
    /// Finds, loads and validates the configuration.
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))?;
        debug!("Loading configuration from: {}", config_file.display());

        let base_dir = config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let parser = ConfigParser::new().with_base_path(&base_dir);
        parser.load_dotenv()?;
        let config = parser.load_with_env(&config_file)?;
        ConfigValidator::new().validate(&config)?;

        Ok(Self { config, base_dir })
    }

    fn stack(&self) -> StackRef {
        self.config.stack_ref()
    }

    fn store(&self) -> Arc<SnapshotStore> {
        let backend = LocalBackend::with_base_dir(self.config.state_dir(&self.base_dir));
        Arc::new(SnapshotStore::new(Arc::new(backend)))
    }

    fn providers(&self) -> ProviderRegistry {
        ProviderRegistry::new().with_provider("echo", Arc::new(self.config.echo_provider()))
    }

    fn deployment(&self, parallel: Option<usize>) -> Deployment {
        self.deployment_with_store(parallel, self.store())
    }

    fn deployment_with_store(&self, parallel: Option<usize>, store: Arc<SnapshotStore>) -> Deployment {
        let mut options = self.config.deployment_options();
        if let Some(parallel) = parallel {
            options.parallelism = parallel.max(1);
        }
        let ctx = DeploymentContext::new(self.stack(), Arc::new(self.providers())).with_options(options);
        Deployment::new(ctx, store)
    }

    fn manifest(&self) -> Result<ProgramManifest> {
        ProgramManifest::load(self.config.program_path(&self.base_dir))
    }

    fn source(&self) -> Result<StaticSource> {
        self.manifest()?.into_source(&self.stack())
    }
}

/// Runs `run` while Ctrl-C cancels the deployment.
async fn with_interrupt<F>(deployment: &Deployment, run: F) -> Result<DeploymentResult>
where
    F: std::future::Future<Output = Result<DeploymentResult>>,
{
    let handle = deployment.context().cancellation_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for in-flight steps to finish");
            handle.cancel();
        }
    });

    let result = run.await;
    watcher.abort();
    result
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn exit_code(result: &DeploymentResult) -> ExitCode {
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use iatigen_core::pipeline::{ProgressReporter, RunRequest, RunResult, RunState};
use iatigen_core::{
    ArtifactPublisher, CommandConverter, ConversionInvoker, DirectoryHost, LocatorAccessor,
    Pipeline, PipelineOptions, TaggingService,
};
use iatigen_shared::{
    AppConfig, Domain, FileType, Namespace, config_file_path, expand_home, init_config,
    load_config, load_config_from, registry, validate_converter,
};
use iatigen_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// iatigen: build IATI documents from tagged CSV files.
#[derive(Parser)]
#[command(
    name = "iatigen",
    version,
    about = "Merge tagged CSV components into one published IATI document per namespace.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.iatigen/iatigen.toml.
    #[arg(long, global = true, env = "IATIGEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Tag a source resource with a file type (code or name).
    Tag {
        /// Source reference: URL or file path.
        source: String,

        /// File type code (e.g. 100) or name (e.g. ORGANIZATION_MAIN_FILE).
        file_type: String,

        /// Namespace to group the source under.
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Remove the tag from a source resource.
    Untag {
        /// Source reference the tag was created with.
        source: String,
    },

    /// Create a destination resource on the host and tag it.
    Provision {
        /// organization or activity.
        domain: Domain,

        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Regenerate and publish the document for a namespace.
    Run {
        /// organization or activity.
        domain: Domain,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Owner the run is performed for (recorded in logs).
        #[arg(long)]
        owner: Option<String>,

        /// Print the error report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the public locator of the published document.
    Resolve {
        /// organization or activity.
        domain: Domain,

        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List the known file types.
    FileTypes {
        /// Only show file types of one domain.
        #[arg(long)]
        domain: Option<Domain>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "iatigen=info",
        1 => "iatigen=debug",
        _ => "iatigen=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Tag {
            source,
            file_type,
            namespace,
        } => cmd_tag(&load(config_path)?, &source, &file_type, namespace.as_deref()).await,
        Command::Untag { source } => cmd_untag(&load(config_path)?, &source).await,
        Command::Provision { domain, namespace } => {
            cmd_provision(&load(config_path)?, domain, namespace.as_deref()).await
        }
        Command::Run {
            domain,
            namespace,
            owner,
            json,
        } => cmd_run(&load(config_path)?, domain, namespace.as_deref(), owner, json).await,
        Command::Resolve { domain, namespace } => {
            cmd_resolve(&load(config_path)?, domain, namespace.as_deref()).await
        }
        Command::FileTypes { domain } => cmd_file_types(domain),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// CLI namespace, else the configured default.
fn namespace_or_default(config: &AppConfig, namespace: Option<&str>) -> Namespace {
    Namespace::new(namespace.unwrap_or(&config.pipeline.default_namespace))
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.storage.database_path)?;
    Ok(Arc::new(Storage::open(&path).await?))
}

fn build_host(config: &AppConfig) -> Result<Arc<DirectoryHost>> {
    let root = expand_home(&config.host.root_dir)?;
    let base_url = config
        .host
        .public_base_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| eyre!("invalid [host] public_base_url: {e}"))?;
    Ok(Arc::new(DirectoryHost::new(root, base_url)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_tag(
    config: &AppConfig,
    source: &str,
    file_type: &str,
    namespace: Option<&str>,
) -> Result<()> {
    // Validate before touching the database.
    registry::resolve(file_type)?;
    let namespace = namespace_or_default(config, namespace);

    let tagging = TaggingService::new(open_storage(config).await?);
    let record = tagging
        .on_resource_tagged(source, file_type, Some(namespace.as_str()))
        .await?;

    println!(
        "Tagged {} as {} ({}) in namespace {}",
        record.source_ref,
        record.file_type,
        record.file_type.code(),
        record.namespace
    );
    Ok(())
}

async fn cmd_untag(config: &AppConfig, source: &str) -> Result<()> {
    let tagging = TaggingService::new(open_storage(config).await?);
    if tagging.on_resource_removed(source).await? {
        println!("Removed tag from {source}");
    } else {
        println!("{source} was not tagged");
    }
    Ok(())
}

async fn cmd_provision(config: &AppConfig, domain: Domain, namespace: Option<&str>) -> Result<()> {
    let namespace = namespace_or_default(config, namespace);
    let storage = open_storage(config).await?;
    let publisher = ArtifactPublisher::new(build_host(config)?);

    let record = publisher
        .provision(storage.as_ref(), &namespace, domain)
        .await?;

    println!();
    println!("  Destination provisioned");
    println!("  ID:        {}", record.source_ref);
    println!("  Namespace: {}", record.namespace);
    println!("  Type:      {}", record.file_type);
    if let Some(url) = publisher.locate(&record).await? {
        println!("  URL:       {url}");
    }
    println!();
    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    domain: Domain,
    namespace: Option<&str>,
    owner: Option<String>,
    json: bool,
) -> Result<()> {
    validate_converter(config)?;
    let namespace = namespace_or_default(config, namespace);

    let storage = open_storage(config).await?;
    let accessor = LocatorAccessor::new(
        &config.http.user_agent,
        config.pipeline.fetch_timeout(),
        std::env::current_dir().ok(),
    )?;
    let invoker = ConversionInvoker::new(
        Arc::new(CommandConverter::from_config(&config.converter)),
        config.pipeline.conversion_timeout(),
    );
    let pipeline = Pipeline::new(
        storage,
        Arc::new(accessor),
        invoker,
        ArtifactPublisher::new(build_host(config)?),
        PipelineOptions::from_config(config)?,
    );

    let mut request = RunRequest::new(Some(namespace.as_str()), domain);
    if let Some(owner) = owner {
        request = request.with_owner_scope(owner);
    }
    info!(%namespace, %domain, "starting run");

    let reporter = CliProgress::new();
    let result = pipeline.run(&request, &reporter).await;
    let report = result.report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&result);
        if !report.is_empty() {
            eprintln!();
            eprint!("{report}");
        }
    }

    match result.error {
        Some(e) => Err(eyre!(
            "run failed during {}: {}",
            result.failed_stage.unwrap_or(RunState::Failed),
            e.kind()
        )),
        None => Ok(()),
    }
}

fn print_summary(result: &RunResult) {
    println!();
    if result.is_success() {
        println!("  Document published!");
    } else {
        println!("  Run failed.");
    }
    println!("  Namespace:   {}", result.namespace);
    println!("  Domain:      {}", result.domain);
    println!("  State:       {}", result.state);
    if let Some(stage) = result.failed_stage {
        println!("  Failed in:   {stage}");
    }
    println!("  Components:  {}", result.components.len());
    println!("  Skipped:     {}", result.skipped.len());
    if let Some(id) = &result.destination_id {
        println!("  Destination: {id}");
    }
    if let Some(hash) = &result.content_hash {
        println!("  SHA-256:     {hash}");
    }
    println!("  Time:        {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

async fn cmd_resolve(config: &AppConfig, domain: Domain, namespace: Option<&str>) -> Result<()> {
    let namespace = namespace_or_default(config, namespace);
    let path = expand_home(&config.storage.database_path)?;
    if !path.exists() {
        return Err(eyre!("no tracking database at {}", path.display()));
    }

    let storage = Storage::open_readonly(&path).await?;
    let publisher = ArtifactPublisher::new(build_host(config)?);
    let url =
        iatigen_core::pipeline::resolve_destination(&storage, &publisher, &namespace, domain)
            .await?;
    println!("{url}");
    Ok(())
}

fn cmd_file_types(domain: Option<Domain>) -> Result<()> {
    let domains: Vec<Domain> = match domain {
        Some(d) => vec![d],
        None => Domain::ALL.to_vec(),
    };

    for domain in domains {
        println!("{domain}:");
        for file_type in FileType::ALL.iter().filter(|ft| ft.domain() == domain) {
            let rule = if file_type.is_final_artifact() {
                "destination"
            } else if file_type.required() {
                "required"
            } else {
                "optional"
            };
            println!(
                "  {:>3}  {:<36} {:<26} {rule}",
                file_type.code(),
                file_type.name(),
                file_type.filename(),
            );
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let source = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: RunState) {
        let message = match state {
            RunState::Resolving => "Resolving destination",
            RunState::Staging => "Staging components",
            RunState::Converting => "Converting",
            RunState::Publishing => "Publishing",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        self.spinner.set_message(message);
    }

    fn component_staged(&self, filename: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Staging [{current}/{total}] {filename}"));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

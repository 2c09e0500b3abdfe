//! Binary entry point for the neo2cosmos migration CLI.
#![forbid(unsafe_code)]

#[path = "neo2cosmos/ui.rs"]
mod ui;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use neo2cosmos::config::default_config_path;
use neo2cosmos::dest::CosmosStore;
use neo2cosmos::migrate::PhaseReport;
use neo2cosmos::source::BoltSource;
use neo2cosmos::{
    plan, FileConfig, GraphSource, GraphStore, MemoryStore, MigrationObserver, MigrationReport,
    Migrator, Overrides, Phase, Settings, SnapshotSource, Statement,
};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, EnvFilter};
use ui::{format_duration_ms, Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "neo2cosmos",
    version,
    about = "Copy a Neo4j graph into an Azure Cosmos DB Gremlin collection",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "NEO2COSMOS_CONFIG",
        help = "Config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[command(flatten)]
    connect: ConnectArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ThemeArg::Auto,
        help = "Color theme for text output"
    )]
    theme: ThemeArg,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Raise log verbosity (repeat for trace)"
    )]
    verbose: u8,

    #[arg(short, long, global = true, help = "Only print errors and results")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct ConnectArgs {
    #[arg(long, global = true, env = "NEO4J_URI", help = "Source Bolt URI")]
    source_uri: Option<String>,

    #[arg(long, global = true, env = "NEO4J_USER", help = "Source username")]
    source_user: Option<String>,

    #[arg(
        long,
        global = true,
        env = "NEO4J_PASSWORD",
        hide_env_values = true,
        help = "Source password"
    )]
    source_password: Option<String>,

    #[arg(
        long,
        global = true,
        env = "COSMOS_ENDPOINT",
        help = "Destination account endpoint"
    )]
    endpoint: Option<String>,

    #[arg(
        long,
        global = true,
        env = "COSMOS_AUTH_KEY",
        hide_env_values = true,
        help = "Destination master key"
    )]
    auth_key: Option<String>,

    #[arg(
        long,
        global = true,
        env = "COSMOS_GREMLIN_ENDPOINT",
        help = "Gremlin endpoint (derived from --endpoint when omitted)"
    )]
    gremlin_endpoint: Option<String>,

    #[arg(long, global = true, help = "Destination database id")]
    database: Option<String>,

    #[arg(long, global = true, help = "Destination graph collection id")]
    collection: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "RU",
        help = "Throughput for the recreated collection"
    )]
    throughput: Option<u32>,

    #[arg(long, global = true, help = "Concurrent workers per phase")]
    workers: Option<usize>,
}

impl ConnectArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            source_uri: self.source_uri,
            source_user: self.source_user,
            source_password: self.source_password,
            endpoint: self.endpoint,
            auth_key: self.auth_key,
            gremlin_endpoint: self.gremlin_endpoint,
            database: self.database,
            collection: self.collection,
            throughput: self.throughput,
            workers: self.workers,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recreate the destination collection and copy every vertex and edge.
    Migrate(MigrateCmd),
    /// Print the statements a migration would submit.
    Plan(PlanCmd),
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
struct MigrateCmd {
    #[arg(
        long,
        value_name = "FILE",
        help = "Read the source graph from a JSON snapshot instead of Neo4j"
    )]
    snapshot: Option<PathBuf>,

    #[arg(long, help = "Load into an in-memory store instead of Cosmos DB")]
    dry_run: bool,

    #[arg(long, help = "Show a progress bar per phase instead of per-item logs")]
    progress: bool,
}

#[derive(Args, Debug)]
struct PlanCmd {
    #[arg(
        long,
        value_name = "FILE",
        help = "Read the source graph from a JSON snapshot instead of Neo4j"
    )]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the resolved configuration with secrets masked.
    Show,
    /// Print the default config file location.
    Path,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ThemeArg {
    Auto,
    Light,
    Dark,
    Plain,
}

impl From<ThemeArg> for Theme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Auto => Theme::Auto,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Plain => Theme::Plain,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let Cli {
        config,
        connect,
        format,
        theme,
        verbose,
        quiet,
        command,
    } = Cli::parse();

    let progress = matches!(&command, Command::Migrate(cmd) if cmd.progress);
    install_tracing_subscriber(verbose, quiet || progress);
    let ui = Arc::new(Ui::new(theme.into(), quiet));

    let file = FileConfig::load(config)?;
    let settings = Settings::merge(file, connect.into_overrides());

    match command {
        Command::Migrate(cmd) => run_migrate(&settings, cmd, format, ui).await?,
        Command::Plan(cmd) => run_plan(&settings, cmd, format, &ui).await?,
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                let rows = settings.describe();
                let map: BTreeMap<&str, &str> =
                    rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
                emit(format, &map, || {
                    ui.section("Configuration", rows.iter().map(|(k, v)| (*k, v)))
                })?;
            }
            ConfigCommand::Path => {
                let path = settings
                    .file()
                    .map(PathBuf::from)
                    .or_else(default_config_path)
                    .ok_or("no config directory available on this platform")?;
                emit(format, &path, || println!("{}", path.display()))?;
            }
        },
    }
    Ok(())
}

fn install_tracing_subscriber(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, 0) => "neo2cosmos=warn",
        (_, 0) => "neo2cosmos=info",
        (_, 1) => "neo2cosmos=debug",
        _ => "neo2cosmos=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_source(
    settings: &Settings,
    snapshot: Option<&PathBuf>,
) -> Result<Arc<dyn GraphSource>, Box<dyn Error>> {
    let source: Arc<dyn GraphSource> = match snapshot {
        Some(path) => Arc::new(SnapshotSource::open(path)?),
        None => Arc::new(BoltSource::new(&settings.source()?)),
    };
    Ok(source)
}

async fn run_migrate(
    settings: &Settings,
    cmd: MigrateCmd,
    format: OutputFormat,
    ui: Arc<Ui>,
) -> Result<(), Box<dyn Error>> {
    let config = settings.migration()?;
    let source = open_source(settings, cmd.snapshot.as_ref())?;
    let memory = cmd.dry_run.then(MemoryStore::new);
    let store: Arc<dyn GraphStore> = match &memory {
        Some(memory) => Arc::new(memory.clone()),
        None => Arc::new(CosmosStore::connect(
            &settings.destination()?,
            config.workers,
        )?),
    };

    let mut migrator = Migrator::new(&config, source, store);
    if cmd.progress && format == OutputFormat::Text {
        migrator = migrator.with_observer(Arc::new(PhaseProgress::new(Arc::clone(&ui))));
    }
    let report = migrator.run().await?;

    emit(format, &report, || {
        print_report(&ui, &report);
        if let Some(memory) = &memory {
            ui.info(&format!(
                "dry run: {} vertices and {} edges held in memory",
                memory.vertex_count(),
                memory.edge_count()
            ));
        }
    })
}

async fn run_plan(
    settings: &Settings,
    cmd: PlanCmd,
    format: OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    let source = open_source(settings, cmd.snapshot.as_ref())?;
    let plan = plan(source.as_ref()).await?;
    emit(format, &plan, || {
        if ui.quiet() {
            for statement in plan.statements() {
                println!("{statement}");
            }
            return;
        }
        ui.list(
            &format!("Vertices ({})", plan.vertices.len()),
            plan.vertices.iter().map(Statement::to_string),
        );
        ui.list(
            &format!("Edges ({})", plan.edges.len()),
            plan.edges.iter().map(Statement::to_string),
        );
        ui.success(&format!("{} statements", plan.len()));
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_report(ui: &Ui, report: &MigrationReport) {
    let phase_row = |phase: &PhaseReport| {
        format!(
            "{}/{} in {} ({} pages, {:.2} RU)",
            phase.executed,
            phase.total,
            format_duration_ms(phase.duration_ms),
            phase.pages,
            phase.request_charge
        )
    };
    ui.section(
        "Migration",
        [
            ("vertices", phase_row(&report.vertices)),
            ("edges", phase_row(&report.edges)),
            ("request units", format!("{:.2}", report.request_charge)),
            ("elapsed", format_duration_ms(report.duration_ms)),
        ],
    );
    ui.success("migration completed");
}

struct PhaseProgress {
    ui: Arc<Ui>,
    bar: Mutex<Option<ProgressBar>>,
}

impl PhaseProgress {
    fn new(ui: Arc<Ui>) -> Self {
        Self {
            ui,
            bar: Mutex::new(None),
        }
    }
}

impl MigrationObserver for PhaseProgress {
    fn phase_started(&self, phase: Phase, total: usize) {
        let bar = self.ui.progress(&format!("{phase}s"), total);
        *self.bar.lock() = Some(bar);
    }

    fn item_finished(&self, _phase: Phase, _statement: &Statement, _ok: bool) {
        if let Some(bar) = self.bar.lock().as_ref() {
            bar.inc(1);
        }
    }

    fn phase_finished(&self, phase: Phase, report: &PhaseReport) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
        self.ui.info(&format!(
            "{phase} phase: {}/{} in {}",
            report.executed,
            report.total,
            format_duration_ms(report.duration_ms)
        ));
    }
}

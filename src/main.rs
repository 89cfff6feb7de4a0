/*!
 * Rampart CLI - inspect resilience configuration and crash-recovery snapshots
 */

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets, Cell, ContentArrangement, Table};
use std::path::PathBuf;

use rampart::{
    error::{RampartError, Result, EXIT_SUCCESS},
    logging,
    resilience::ErrorCategory,
    LogLevel, RampartConfig, SnapshotStore,
};

#[derive(Parser)]
#[command(name = "rampart")]
#[command(version, about = "Resilience layer tooling for a long-running trading process", long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides log_level from the configuration file)
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration and breaker thresholds
    Config,

    /// Inspect crash-recovery snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Print the newest snapshot as JSON
    Latest {
        /// Snapshot directory (defaults to snapshot_dir from the configuration)
        #[arg(short = 'd', long = "dir", value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// List snapshot files, oldest first
    List {
        /// Snapshot directory (defaults to snapshot_dir from the configuration)
        #[arg(short = 'd', long = "dir", value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Config => print_config(&config),
        Commands::Snapshot(SnapshotCommand::Latest { dir }) => {
            let store = SnapshotStore::new(dir.unwrap_or_else(|| config.snapshot_dir.clone()));
            print_latest_snapshot(&store).await
        }
        Commands::Snapshot(SnapshotCommand::List { dir }) => {
            let store = SnapshotStore::new(dir.unwrap_or_else(|| config.snapshot_dir.clone()));
            print_snapshot_list(&store).await
        }
    }
}

/// Configuration file (or defaults, quieter on the console) with `--log-level` applied
fn load_config(cli: &Cli) -> Result<RampartConfig> {
    let mut config = match cli.config {
        Some(ref path) => RampartConfig::from_file(path)?,
        None => RampartConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        },
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    Ok(config)
}

fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_config(config: &RampartConfig) -> Result<()> {
    let resilience = config.resilience_config();

    let mut thresholds = create_table();
    thresholds.set_header(vec!["Category", "Breaker threshold"]);
    for category in ErrorCategory::ALL {
        thresholds.add_row(vec![
            Cell::new(category.as_str()),
            Cell::new(resilience.breaker.threshold(category)),
        ]);
    }
    println!("{thresholds}");

    let mut settings = create_table();
    settings.set_header(vec!["Setting", "Value"]);
    for (key, value) in config.snapshot_configuration()? {
        if key == "circuit_breaker" {
            continue;
        }
        let shown = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => "-".to_string(),
            other => other.to_string(),
        };
        settings.add_row(vec![Cell::new(key), Cell::new(shown)]);
    }
    println!("{settings}");
    Ok(())
}

async fn print_latest_snapshot(store: &SnapshotStore) -> Result<()> {
    match store.load_latest().await? {
        Some(snapshot) => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{json}");
        }
        None => println!("No snapshot found in {}", store.dir().display()),
    }
    Ok(())
}

async fn print_snapshot_list(store: &SnapshotStore) -> Result<()> {
    let files = store.list().await?;
    if files.is_empty() {
        println!("No snapshot found in {}", store.dir().display());
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Taken at (UTC)", "File"]);
    for file in files {
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RampartError::Other("snapshot path has no file name".to_string()))?;
        table.add_row(vec![Cell::new(file.stamp), Cell::new(name)]);
    }
    println!("{table}");
    Ok(())
}

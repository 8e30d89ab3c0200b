//! surface-sentinel: entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use surface_sentinel::engine::{EMERGENCY_REPORTS_KEY, EMERGENCY_SAVE_PREFIX};
use surface_sentinel::{
    EngineConfig, EngineFactory, FailureType, Host, KeyValueStore, MemoryStore, RecoveryReport,
    Scenario, SimulatedHost,
};
use surface_sentinel_cli::{
    default_store_path, load_config, open_engine, resolve_config_path, run_session, FileStore,
    SessionPlan,
};

#[derive(Parser)]
#[command(
    name = "surface-sentinel",
    about = "Acquire render surfaces, capture their coordinates, and recover when they fail",
    version
)]
struct Cli {
    /// Path to an engine config JSON file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Path to the emergency store file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Force constrained-context budgets.
    #[arg(long, global = true)]
    constrained: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted host scenario through acquisition, triggers and capture.
    Simulate {
        /// Scenario JSON file.
        scenario: PathBuf,

        /// Failure to inject after acquisition (repeatable).
        #[arg(short, long = "trigger")]
        triggers: Vec<String>,

        /// Skip the final capture.
        #[arg(long)]
        no_capture: bool,

        /// Store the final capture as an emergency save.
        #[arg(long)]
        save: bool,

        /// Keep emergency data in memory instead of the store file.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Capture a live page in headless Chromium.
    #[cfg(feature = "chromium")]
    Capture {
        /// Page URL.
        url: String,

        /// Global the render-surface library installs on `window`.
        #[arg(long, default_value = "fabric")]
        library_global: String,

        /// Element property holding a bound instance.
        #[arg(long, default_value = "__fabric")]
        instance_property: String,

        /// Selector of the design container.
        #[arg(long, default_value = ".designer-editor")]
        container: String,

        /// Script URL that reloads the library during recovery.
        #[arg(long)]
        loader_url: Option<String>,

        /// Failure to inject after acquisition (repeatable).
        #[arg(short, long = "trigger")]
        triggers: Vec<String>,

        /// Store the capture as an emergency save.
        #[arg(long)]
        save: bool,
    },

    /// List emergency saves, or print one.
    Saves {
        /// Print the save stored under this key.
        #[arg(long)]
        show: Option<String>,

        /// Print stored emergency reports instead.
        #[arg(long)]
        reports: bool,
    },

    /// Print the resolved config path and effective config.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   surface-sentinel completions bash > ~/.local/share/bash-completion/completions/surface-sentinel
    ///   surface-sentinel completions zsh > ~/.zfunc/_surface-sentinel
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn effective_config(cli: &Cli) -> anyhow::Result<(PathBuf, EngineConfig)> {
    let path = resolve_config_path(cli.config.as_deref());
    let mut config = load_config(&path)?;
    if cli.constrained {
        config = config.with_constrained(true);
    }
    Ok((path, config))
}

fn open_store(cli: &Cli) -> anyhow::Result<Arc<FileStore>> {
    let path = cli.store.clone().unwrap_or_else(default_store_path);
    tracing::debug!("Emergency store: {}", path.display());
    Ok(Arc::new(FileStore::open(&path)?))
}

fn parse_triggers(raw: &[String]) -> Vec<FailureType> {
    raw.iter().map(|t| FailureType::from(t.as_str())).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Simulate {
            scenario,
            triggers,
            no_capture,
            save,
            ephemeral,
        } => {
            let (_, config) = effective_config(&cli)?;
            let raw = std::fs::read_to_string(scenario)?;
            let scenario: Scenario = serde_json::from_str(&raw)?;
            let store: Arc<dyn KeyValueStore> = if *ephemeral {
                Arc::new(MemoryStore::new())
            } else {
                open_store(&cli)?
            };

            let host: Arc<dyn Host> = Arc::new(SimulatedHost::new(scenario));
            let engine = open_engine(EngineFactory::global(), host, config, store, None)?;
            let plan = SessionPlan {
                triggers: parse_triggers(triggers),
                capture: !no_capture,
                save_capture: *save,
            };
            let summary = run_session(&engine, &plan).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        #[cfg(feature = "chromium")]
        Commands::Capture {
            url,
            library_global,
            instance_property,
            container,
            loader_url,
            triggers,
            save,
        } => {
            use surface_sentinel_cli::host::{ChromiumHost, PageBindings};

            let (_, config) = effective_config(&cli)?;
            let bindings = PageBindings {
                library_global: library_global.clone(),
                instance_property: instance_property.clone(),
                container_selector: container.clone(),
                loader_url: loader_url.clone(),
            };
            let page = Arc::new(ChromiumHost::launch(url, bindings).await?);
            let host: Arc<dyn Host> = page.clone();
            let engine = open_engine(EngineFactory::global(), host, config, open_store(&cli)?, None)?;
            let plan = SessionPlan {
                triggers: parse_triggers(triggers),
                capture: true,
                save_capture: *save,
            };
            let summary = run_session(&engine, &plan).await;
            match page.take_errors().await {
                Ok(errors) => {
                    for error in errors {
                        engine.record_error(error).await;
                    }
                }
                Err(e) => tracing::warn!("Could not read page errors: {e}"),
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Saves { show, reports } => {
            let store = open_store(&cli)?;
            if *reports {
                let stored: Vec<RecoveryReport> = match store.get(EMERGENCY_REPORTS_KEY)? {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => Vec::new(),
                };
                println!("{}", serde_json::to_string_pretty(&stored)?);
            } else if let Some(key) = show {
                match store.get(key)? {
                    Some(raw) => {
                        let value: serde_json::Value = serde_json::from_str(&raw)?;
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    None => {
                        eprintln!("No emergency save under {key}");
                        std::process::exit(1);
                    }
                }
            } else {
                let keys = store.keys_with_prefix(EMERGENCY_SAVE_PREFIX)?;
                println!("Store: {}", store.path().display());
                println!("  Emergency saves: {}", keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
        }

        Commands::Config => {
            let (path, config) = effective_config(&cli)?;
            let info = serde_json::json!({
                "path": path.display().to_string(),
                "exists": path.exists(),
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "surface-sentinel", &mut std::io::stdout());
        }
    }

    Ok(())
}

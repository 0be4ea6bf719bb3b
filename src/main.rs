//! propstore CLI: inspect and edit a configured property store.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use propstore::backend::Properties;
use propstore::config::StoreConfig;
use propstore::logging::{self, LogFormat};
use propstore::scheduler::{Scheduler, TokioScheduler};
use propstore::{PropertyStore, UpdatePolicy};

#[derive(Parser, Debug)]
#[command(name = "propstore")]
#[command(about = "Read and write a reloadable property store", version)]
struct Cli {
    /// Store configuration file (TOML)
    #[arg(short, long, default_value = "propstore.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value of one property
    Get {
        key: String,
    },
    /// Print every property, sorted by key
    List {
        /// Print a JSON object instead of key=value lines
        #[arg(long)]
        json: bool,
    },
    /// Write one or more key=value pairs
    Set {
        #[arg(required = true, value_parser = parse_pair)]
        pairs: Vec<(String, String)>,

        /// Replace the whole property set instead of merging
        #[arg(long)]
        replace: bool,
    },
    /// Print the property set whenever it changes
    Watch {
        /// Stop after this many polls
        #[arg(long)]
        ticks: Option<u64>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
        poll_ms: u64,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("warning: logging disabled: {e}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let config = StoreConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(runtime.handle().clone()));
    let store = Arc::new(
        config
            .open(Some(scheduler))
            .context("Failed to open property store")?,
    );
    debug!(store = ?store, "Opened store");

    let code = match cli.command {
        Command::Get { key } => get(&store, &key)?,
        Command::List { json } => {
            list(&store, json)?;
            ExitCode::SUCCESS
        },
        Command::Set { pairs, replace } => {
            set(&store, pairs, replace)?;
            ExitCode::SUCCESS
        },
        Command::Watch { ticks, poll_ms } => {
            runtime.block_on(watch(store.clone(), ticks, Duration::from_millis(poll_ms)))?;
            ExitCode::SUCCESS
        },
    };

    store.close();
    Ok(code)
}

fn get(store: &PropertyStore, key: &str) -> Result<ExitCode> {
    match store.get_property(key).context("Failed to read property")? {
        Some(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        },
        None => {
            eprintln!("{key}: not set");
            Ok(ExitCode::FAILURE)
        },
    }
}

fn list(store: &PropertyStore, json: bool) -> Result<()> {
    let entries = store.get_properties().context("Failed to read properties")?;
    print_snapshot(&entries, json)
}

fn print_snapshot(entries: &Properties, json: bool) -> Result<()> {
    let sorted: BTreeMap<&String, &String> = entries.iter().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&sorted)?);
    } else {
        for (key, value) in sorted {
            println!("{key}={value}");
        }
    }
    Ok(())
}

fn set(store: &PropertyStore, pairs: Vec<(String, String)>, replace: bool) -> Result<()> {
    if store.options().update_policy == UpdatePolicy::SourceManaged {
        warn!(
            source = %store.location(),
            "Store is source-managed, edit the source directly; write ignored"
        );
    }

    let count = pairs.len();
    let entries: Properties = pairs.into_iter().collect();
    store
        .set_properties(entries, replace)
        .with_context(|| format!("Failed to write to {}", store.location()))?;

    debug!(count, replace, "Wrote properties");
    Ok(())
}

async fn watch(store: Arc<PropertyStore>, ticks: Option<u64>, poll: Duration) -> Result<()> {
    let mut interval = tokio::time::interval(poll);
    let mut last: Option<Properties> = None;
    let mut seen = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = tokio::signal::ctrl_c() => break,
        }

        let reader = store.clone();
        let snapshot = tokio::task::spawn_blocking(move || reader.get_properties())
            .await
            .context("Watch task panicked")?;

        match snapshot {
            Ok(entries) if last.as_ref() != Some(&entries) => {
                println!("--- {}", chrono::Utc::now().to_rfc3339());
                print_snapshot(&entries, false)?;
                last = Some(entries);
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "Failed to read properties"),
        }

        seen += 1;
        if ticks.is_some_and(|limit| seen >= limit) {
            break;
        }
    }
    Ok(())
}

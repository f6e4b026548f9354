//! FieldStore CLI
//!
//! Load a JSON document into a store, apply path writes as one commit and
//! print what observers would have been told.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldstore_core::{FieldChange, Path as FieldPath, Store, StoreRegistry, Value};
use fieldstore_persist::{FileStorage, PersistAdapter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "fieldstore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Path-addressed reactive store CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./fieldstore.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value at a path of a JSON document
    Get {
        /// Seed JSON document
        seed: PathBuf,

        /// Dot path, e.g. `todos.0.title` or `todos.length`
        path: String,
    },

    /// Apply writes to a JSON document as one commit
    Apply {
        /// Seed JSON document
        seed: PathBuf,

        /// Write as `path=json`; values that are not valid JSON are taken as strings
        #[arg(short, long = "set", value_name = "PATH=JSON")]
        sets: Vec<String>,

        /// Report notifications for this pattern (defaults to every written path)
        #[arg(short, long, value_name = "PATTERN")]
        watch: Vec<String>,

        /// Persist the resulting tree into this directory
        #[arg(long, value_name = "DIR")]
        persist: Option<PathBuf>,

        /// Snapshot key used with --persist
        #[arg(short, long, default_value = "fieldstore")]
        key: String,
    },

    /// Show version and effective configuration
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = CliConfig::resolve(cli.config.as_deref(), Path::new("."))?;

    match cli.command {
        Commands::Get { seed, path } => cmd_get(&seed, &path),

        Commands::Apply {
            seed,
            sets,
            watch,
            persist,
            key,
        } => cmd_apply(&config, &seed, &sets, &watch, persist.as_deref(), &key),

        Commands::Info => cmd_info(&config),
    }
}

fn load_seed(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as JSON", path.display()))?;
    Ok(Value::from(json))
}

/// Split `path=json`; a value that does not parse as JSON is a string
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid write '{}': expected PATH=JSON", raw))?;

    FieldPath::parse_write(path).with_context(|| format!("Invalid write '{}'", raw))?;

    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json) => Value::from(json),
        Err(_) => Value::from(value),
    };
    Ok((path.to_string(), value))
}

fn render(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        other => other.to_json().to_string(),
    }
}

fn cmd_get(seed: &Path, path: &str) -> Result<()> {
    let store = Store::new(load_seed(seed)?);
    let value = store.get_value(path)?;
    println!("{}", render(&value));
    Ok(())
}

fn cmd_apply(
    config: &CliConfig,
    seed: &Path,
    sets: &[String],
    watch: &[String],
    persist: Option<&Path>,
    key: &str,
) -> Result<()> {
    let writes = sets
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>>>()?;
    if writes.is_empty() {
        warn!("no --set given; the commit will be empty");
    }

    // Resolve through a registry so the store is torn down the same way an
    // embedding application would tear it down.
    let initial = load_seed(seed)?;
    let registry = StoreRegistry::with_config(config.registry.clone());
    let store = registry.get_or_create_with("cli", || {
        Store::builder(initial).config(config.store.clone())
    })?;
    registry.attach("cli", true)?;

    let adapter = match persist {
        Some(dir) => {
            let adapter = Arc::new(PersistAdapter::new(
                FileStorage::new(dir)?,
                config.persist.clone(),
            ));
            if adapter.restore(&store, key) {
                info!("restored snapshot '{}' from {}", key, dir.display());
            }
            Some(adapter)
        }
        None => None,
    };
    let saving = adapter.as_ref().map(|adapter| adapter.bind(&store, key));

    let patterns: Vec<String> = if watch.is_empty() {
        writes.iter().map(|(path, _)| path.clone()).collect()
    } else {
        watch.to_vec()
    };
    let mut handles = Vec::with_capacity(patterns.len());
    for pattern in &patterns {
        let label = pattern.clone();
        handles.push(store.subscribe(pattern, move |change: &FieldChange| {
            println!(
                "{} -> {}: {} (was {})",
                label,
                if change.path.is_root() { "*".to_string() } else { change.path.to_string() },
                render(&change.value),
                render(&change.previous)
            );
        })?);
    }

    debug!(writes = writes.len(), watchers = handles.len(), "applying commit");
    store.set_batch(writes)?;

    for handle in &handles {
        handle.unsubscribe();
    }
    if let Some(saving) = saving {
        saving.unsubscribe();
    }
    if let Some(adapter) = &adapter {
        if !adapter.flush() {
            warn!("some snapshots could not be written");
        }
    }

    let values = store.get_values();
    println!("{}", serde_json::to_string_pretty(&values.to_json())?);

    registry.detach("cli", true)?;
    registry.reap_expired_at(std::time::Instant::now() + registry.grace());
    Ok(())
}

fn cmd_info(config: &CliConfig) -> Result<()> {
    println!("FieldStore");
    println!("==========");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Configuration:");
    for line in config.to_toml()?.lines() {
        println!("  {}", line);
    }

    Ok(())
}

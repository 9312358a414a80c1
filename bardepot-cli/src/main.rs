//! Bardepot CLI: inspect and maintain a market-data store.
//!
//! Commands:
//! - `keys`: list stored dataset keys
//! - `info`: manifest, partitions, and saved profile of one key
//! - `show`: print rows of a key, optionally limited to a date range
//! - `import`: load a CSV file (with a `timestamp` column) into a key
//! - `profile`: compute and save column statistics for a key
//! - `chunks`: list raw incremental chunk files for a provider/symbol
//! - `delete`: remove a key (dry run unless `--confirm`)

use anyhow::{bail, Context, Result};
use bardepot_core::profile::{generate_profile, load_profile, profile_path, save_profile};
use bardepot_core::storage::{
    Granularity, Storage, StorageBackend, StorageConfig, StorageStrategy, TIMESTAMP_COL,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bardepot",
    about = "Bardepot CLI: partitioned parquet store for OHLCV bars"
)]
struct Cli {
    /// Storage config file (TOML). Overrides --base-path and --granularity.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root directory.
    #[arg(long, global = true, default_value = "data")]
    base_path: PathBuf,

    /// Partition granularity for hive layout.
    #[arg(long, global = true, value_enum, default_value_t = GranularityArg::Month)]
    granularity: GranularityArg,

    /// Store each key as a single file instead of partition directories.
    #[arg(long, global = true, default_value_t = false)]
    flat: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    Year,
    Month,
    Day,
    Hour,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Year => Granularity::Year,
            GranularityArg::Month => Granularity::Month,
            GranularityArg::Day => Granularity::Day,
            GranularityArg::Hour => Granularity::Hour,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List stored dataset keys.
    Keys,
    /// Show a key's manifest, partitions, and profile summary.
    Info {
        key: String,
    },
    /// Print rows of a key.
    Show {
        key: String,

        /// Inclusive start (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        start: Option<String>,

        /// Exclusive end (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        end: Option<String>,

        /// Comma-separated columns to keep.
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Maximum rows to print.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Import a CSV file into a key.
    Import {
        /// CSV file with a header row and a parseable `timestamp` column.
        path: PathBuf,

        #[arg(long)]
        key: String,
    },
    /// Compute, save, and print a column profile for a key.
    Profile {
        key: String,
    },
    /// List incremental chunk files.
    Chunks {
        provider: String,
        symbol: String,
    },
    /// Delete a key and its manifest.
    Delete {
        key: String,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let storage = open_storage(&cli)?;

    match cli.command {
        Commands::Keys => run_keys(&storage),
        Commands::Info { key } => run_info(&storage, &key),
        Commands::Show {
            key,
            start,
            end,
            columns,
            limit,
        } => run_show(&storage, &key, start, end, columns, limit),
        Commands::Import { path, key } => run_import(&storage, &path, &key),
        Commands::Profile { key } => run_profile(&storage, &key),
        Commands::Chunks { provider, symbol } => run_chunks(&storage, &provider, &symbol),
        Commands::Delete { key, confirm } => run_delete(&storage, &key, confirm),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_storage(cli: &Cli) -> Result<Storage> {
    let config = match &cli.config {
        Some(path) => StorageConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let strategy = if cli.flat {
                StorageStrategy::Flat
            } else {
                StorageStrategy::Hive
            };
            StorageConfig::new(&cli.base_path)
                .with_strategy(strategy)
                .with_granularity(cli.granularity.into())
        }
    };
    Ok(Storage::open(config)?)
}

fn parse_bound(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("'{s}' is neither YYYY-MM-DD nor RFC 3339"))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(naive) => Ok(naive.and_utc()),
        None => bail!("invalid date '{s}'"),
    }
}

fn run_keys(storage: &Storage) -> Result<()> {
    let keys = storage.list_keys()?;
    if keys.is_empty() {
        println!("No datasets in {}", storage.base_path().display());
        return Ok(());
    }
    println!("{:<32} {:>10} {:>12}", "Key", "Rows", "Size");
    println!("{}", "-".repeat(56));
    for key in &keys {
        let rows = storage
            .get_metadata(key)?
            .and_then(|m| m.row_count)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into());
        let size = dir_size(&storage.key_path(key)?);
        println!("{:<32} {:>10} {:>12}", key, rows, format_size(size));
    }
    Ok(())
}

fn run_info(storage: &Storage, key: &str) -> Result<()> {
    if !storage.exists(key) {
        bail!("key '{key}' not found in {}", storage.base_path().display());
    }
    let key_dir = storage.key_path(key)?;
    println!("Key:        {key}");
    println!("Directory:  {}", key_dir.display());

    match storage.metadata_store().get_raw(key)? {
        Some(doc) => {
            println!();
            println!("--- Metadata ---");
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        None => println!("(no metadata)"),
    }

    let files = storage.partition_files(key)?;
    println!();
    println!("--- Partitions ({}) ---", files.len());
    for file in &files {
        let size = std::fs::metadata(&file.path).map(|m| m.len()).unwrap_or(0);
        let name = if file.values.is_root() {
            ".".to_string()
        } else {
            file.values.relative_name()
        };
        println!("{:<40} {:>10}", name, format_size(size));
    }

    if let Some(profile) = load_profile(&profile_path(&key_dir))? {
        println!();
        print!("{}", profile.summary());
    }
    Ok(())
}

fn run_show(
    storage: &Storage,
    key: &str,
    start: Option<String>,
    end: Option<String>,
    columns: Option<Vec<String>>,
    limit: u32,
) -> Result<()> {
    let start = start.as_deref().map(parse_bound).transpose()?;
    let end = end.as_deref().map(parse_bound).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            bail!("--start must be before --end");
        }
    }

    let df = storage
        .read(key, start, end, columns.as_deref())?
        .limit(limit as IdxSize)
        .collect()?;
    println!("{df}");
    Ok(())
}

fn run_import(storage: &Storage, path: &Path, key: &str) -> Result<()> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|opts| opts.with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("reading {}", path.display()))?;

    if df.column(TIMESTAMP_COL).is_err() {
        bail!("{} has no '{TIMESTAMP_COL}' column", path.display());
    }

    let receipt = storage.write(df.into(), Some(key), None)?;
    println!(
        "Imported {} rows into '{}' ({} partition(s))",
        receipt.row_count,
        receipt.key,
        receipt.partitions.len()
    );
    Ok(())
}

fn run_profile(storage: &Storage, key: &str) -> Result<()> {
    let df = storage.read(key, None, None, None)?.collect()?;
    let profile = generate_profile(&df, key, TIMESTAMP_COL, Some("symbol"))?;
    let path = profile_path(&storage.key_path(key)?);
    save_profile(&profile, &path)?;
    print!("{}", profile.summary());
    println!();
    println!("Saved to {}", path.display());
    Ok(())
}

fn run_chunks(storage: &Storage, provider: &str, symbol: &str) -> Result<()> {
    let files = storage.chunk_files(symbol, provider)?;
    if files.is_empty() {
        println!("No chunks for {provider}/{symbol}");
        return Ok(());
    }
    for file in &files {
        let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
        println!("{:<60} {:>10}", file.display(), format_size(size));
    }
    println!("{} chunk(s)", files.len());
    Ok(())
}

fn run_delete(storage: &Storage, key: &str, confirm: bool) -> Result<()> {
    if !storage.exists(key) {
        println!("Nothing stored under '{key}'.");
        return Ok(());
    }
    let key_dir = storage.key_path(key)?;
    println!("{key} ({})", format_size(dir_size(&key_dir)));

    if !confirm {
        println!();
        println!("Dry run. Pass --confirm to actually delete.");
        return Ok(());
    }

    storage.delete(key)?;
    println!("Removed: {key}");
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => size += dir_size(&entry.path()),
                Ok(meta) => size += meta.len(),
                Err(_) => {}
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

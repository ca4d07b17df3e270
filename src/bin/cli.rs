//! fragstore CLI
//!
//! Command-line access to a fragstore data directory.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use fragstore::{Config, Engine, FragError};
use tracing_subscriber::{fmt, EnvFilter};

/// fragstore CLI
#[derive(Parser, Debug)]
#[command(name = "fragstore")]
#[command(about = "Embedded content store for small binary blobs")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./fragstore_data")]
    data_dir: PathBuf,

    /// Segment size limit in MB before rotation
    #[arg(short = 's', long, default_value = "64")]
    segment_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,

        /// Write the value to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        #[arg(required_unless_present = "file")]
        value: Option<String>,

        /// Read the value from this file
        #[arg(short, long, conflicts_with = "value")]
        file: Option<PathBuf>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Compact the index log and reclaim full segments regardless of age
    Compact,

    /// Print engine statistics
    Stats,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fragstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    }
}

/// Returns false when a looked-up key does not exist
fn run(args: Args) -> fragstore::Result<bool> {
    // One-shot commands: no background tasks, compaction ignores segment age
    let config = Config::builder()
        .data_dir(args.data_dir.clone())
        .max_segment_size(args.segment_mb * 1024 * 1024)
        .defrag(None)
        .index_compaction_interval(None)
        .build();

    let engine = Engine::open(config)?;
    let mut found = true;

    match args.command {
        Commands::Get { key, out } => match engine.get(&key) {
            Ok(value) => match out {
                Some(path) => std::fs::write(path, &value)?,
                None => std::io::stdout().write_all(&value)?,
            },
            Err(FragError::KeyNotFound) => {
                eprintln!("(nil)");
                found = false;
            }
            Err(e) => return Err(e),
        },
        Commands::Set { key, value, file } => {
            let bytes = match (value, file) {
                (_, Some(path)) => std::fs::read(path)?,
                (Some(value), None) => value.into_bytes(),
                (None, None) => return Err(FragError::Config("missing value".into())),
            };
            engine.set(&key, &bytes)?;
            println!("OK");
        }
        Commands::Del { key } => {
            let removed = engine.delete(&key)?;
            println!("{}", if removed { 1 } else { 0 });
        }
        Commands::Compact => {
            let index = engine.compact_index()?;
            let stats = engine.defragment()?;
            println!(
                "index: {} -> {} bytes, {} live keys",
                index.bytes_before, index.bytes_after, index.live_keys
            );
            println!(
                "segments: {} scanned, {} deleted, {} relocated, {} dropped, {} skipped, {} bytes reclaimed",
                stats.segments_scanned,
                stats.segments_deleted,
                stats.records_relocated,
                stats.records_dropped,
                stats.records_skipped,
                stats.bytes_reclaimed
            );
        }
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("keys:            {}", stats.keys);
            println!("segments:        {}", stats.segments);
            println!("segment bytes:   {}", stats.segment_bytes);
            println!("index log bytes: {}", stats.index_log_bytes);
        }
    }

    engine.close()?;
    Ok(found)
}

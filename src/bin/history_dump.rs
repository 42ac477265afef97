//! history_dump - inspect a user history file.
//! Usage: cargo run --bin history_dump -- <history.db> [--json] [--limit N]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ime_user_history::fingerprint::fingerprint;
use ime_user_history::message;
use ime_user_history::migrate::migrate_next_entries;
use ime_user_history::storage::{BlobStorage, FileStorage};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// History file to read
    path: PathBuf,

    /// Print entries as JSON lines
    #[arg(long)]
    json: bool,

    /// Only print the N most recent entries
    #[arg(short, long)]
    limit: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let storage = FileStorage::new(&args.path);
    let raw = storage
        .load()
        .with_context(|| format!("reading {}", args.path.display()))?;
    let mut msg = message::decode(&raw)?;
    migrate_next_entries(&mut msg.entries);

    let total = msg.entries.len();
    let skip = args.limit.map(|n| total.saturating_sub(n)).unwrap_or(0);
    let mut invalid = 0usize;
    // Stored oldest first; the last line is the most recent entry.
    for record in msg.entries.into_iter().skip(skip) {
        match record.into_entry() {
            Some(entry) => {
                if args.json {
                    println!("{}", serde_json::to_string(&entry)?);
                } else {
                    println!(
                        "{:016x}\t{}\t{}\tfreq={}\tnext={}",
                        fingerprint(&entry.key, &entry.value),
                        entry.key,
                        entry.value,
                        entry.suggestion_freq,
                        entry.next_entry_fps.len()
                    );
                }
            }
            None => invalid += 1,
        }
    }

    if invalid > 0 {
        warn!("{} invalid entries skipped", invalid);
    }
    info!("{} entries in {}", total, args.path.display());
    Ok(())
}

//! Command-line front end for the temporal memory engine.
//!
//! Exposes the engine's four external contracts as subcommands against a
//! SQLite-backed store on disk.
//!
//! ```bash
//! tmemd --db memory.db ingest --conversation-id c1 --role user --text "I like pizza"
//! tmemd --db memory.db retrieve "what does the user like"
//! tmemd --db memory.db point-in-time 2026-01-01T00:00:00Z
//! tmemd --db memory.db tier-transition
//! ```

use clap::{Parser, Subcommand};
use temporal_memory_core::atoms::config::EngineConfig;
use temporal_memory_core::atoms::types::Turn;
use temporal_memory_core::Engine;

/// Command-line front end for the temporal memory engine.
#[derive(Parser, Debug)]
#[command(name = "tmemd", version, about)]
struct Args {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "tmemd.db", env = "TMEMD_DB")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a single turn into a conversation, extracting and storing memories.
    Ingest {
        /// Conversation this turn belongs to.
        #[arg(long)]
        conversation_id: String,
        /// Speaker role ("user" or "assistant").
        #[arg(long, default_value = "user")]
        role: String,
        /// Turn text.
        text: String,
    },
    /// Retrieve formatted context for a query.
    Retrieve {
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long, default_value_t = 2000)]
        budget_tokens: usize,
        /// Retrieve as of this RFC3339 timestamp instead of now.
        #[arg(long)]
        at_time: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// List memories valid as of a given RFC3339 timestamp.
    PointInTime { at_time: chrono::DateTime<chrono::Utc> },
    /// Run one tier-promotion/archival pass.
    TierTransition,
    /// Run one embedding backfill pass.
    Backfill,
    /// Check the superseding chain against the SUPERSEDES edge table.
    CheckConsistency,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> temporal_memory_core::atoms::error::EngineResult<()> {
    let engine = Engine::open(&args.db, EngineConfig::default())?;

    match args.command {
        Command::Ingest { conversation_id, role, text } => {
            let turn = Turn { role, text, timestamp: chrono::Utc::now() };
            let summary = engine.ingest_conversation(vec![turn], &conversation_id, None).await?;
            println!("{}", serde_json::to_string_pretty(&summary).unwrap());
        }
        Command::Retrieve { query, top_k, budget_tokens, at_time } => {
            let result = engine.retrieve(&query, top_k, budget_tokens, at_time, None).await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap());
        }
        Command::PointInTime { at_time } => {
            let memories = engine.point_in_time(at_time)?;
            println!("{}", serde_json::to_string_pretty(&memories).unwrap());
        }
        Command::TierTransition => {
            let moved = engine.admin_tier_transition()?;
            println!("moved {moved} memories");
        }
        Command::Backfill => {
            let filled = engine.backfill_once().await?;
            println!("embedded {filled} memories");
        }
        Command::CheckConsistency => {
            let flagged = engine.check_consistency()?;
            if flagged.is_empty() {
                println!("consistent");
            } else {
                println!("{}", serde_json::to_string_pretty(&flagged).unwrap());
            }
        }
    }

    Ok(())
}

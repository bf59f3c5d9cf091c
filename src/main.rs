//! # ragsync CLI
//!
//! ```bash
//! ragsync --config ./config/ragsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync build` | Reconcile the collection with the corpus |
//! | `ragsync build --dry-run` | Print the plan without touching anything |
//! | `ragsync status` | Compare saved state, stamp and live store count |
//! | `ragsync stamp` | Re-count the store and rewrite the build stamp |
//!
//! Exit codes: `0` success, `1` runtime failure, `2` configuration error,
//! `3` consistency violation, `4` state policy refused to proceed (missing
//! state with a non-empty store, or a changed schema fingerprint).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ragsync::config::{self, Config, OnMissingState, OnSchemaChange, SyncOverrides};
use ragsync::progress::ProgressMode;
use ragsync::{build_cmd, logging, stamp_cmd, status};
use ragsync_core::strategy::SyncMode;
use ragsync_core::SyncError;

/// Incremental vector-index sync.
///
/// All commands read a TOML configuration file (`--config`).
#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "Incrementally synchronize a document corpus into a vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragsync.toml")]
    config: PathBuf,

    /// Debug-level logs on stderr (`RUST_LOG` takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the collection with the corpus.
    ///
    /// Deletes chunks of changed and removed documents, embeds new and
    /// changed ones, verifies the store count and only then saves the new
    /// manifest and build stamp.
    Build {
        /// Sync mode: `incremental`, `delete-stale` or `none`.
        #[arg(long)]
        mode: Option<SyncMode>,

        /// Directory holding manifests, LATEST pointers and stamps.
        #[arg(long)]
        state_root: Option<PathBuf>,

        /// When no manifest exists but the collection has items:
        /// `fail`, `reset` or `full-upsert`.
        #[arg(long)]
        on_missing_state: Option<OnMissingState>,

        /// When the schema fingerprint differs from LATEST: `fail` or `reset`.
        #[arg(long)]
        on_schema_change: Option<OnSchemaChange>,

        #[arg(long)]
        delete_batch_size: Option<usize>,

        #[arg(long)]
        upsert_batch_size: Option<usize>,

        #[arg(long)]
        embed_batch_size: Option<usize>,

        /// Fail (exit 3) when the store count disagrees with the plan.
        #[arg(long, overrides_with = "no_strict")]
        strict: bool,

        /// Warn instead of failing on a count mismatch. State is still not saved.
        #[arg(long, overrides_with = "strict")]
        no_strict: bool,

        /// Plan only: print the work without touching store or state.
        #[arg(long)]
        dry_run: bool,

        /// Write the plan as JSON to this path.
        #[arg(long)]
        plan_out: Option<PathBuf>,

        /// Progress on stderr: `off`, `human` or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Show saved state, build stamp and live store count.
    Status {
        /// Read state from this directory instead of `sync.state_root`.
        #[arg(long)]
        state_root: Option<PathBuf>,
    },

    /// Re-count the store and rewrite the build stamp.
    Stamp {
        /// Plan file to reference from the stamp.
        #[arg(long)]
        plan: Option<PathBuf>,

        #[arg(long)]
        state_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<SyncError>()
                .map(SyncError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            mode,
            state_root,
            on_missing_state,
            on_schema_change,
            delete_batch_size,
            upsert_batch_size,
            embed_batch_size,
            strict,
            no_strict,
            dry_run,
            plan_out,
            progress,
        } => {
            let overrides = SyncOverrides {
                mode,
                state_root,
                on_missing_state,
                on_schema_change,
                delete_batch_size,
                upsert_batch_size,
                embed_batch_size,
                strict: match (strict, no_strict) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let cfg = load(&cli.config, &overrides)?;
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            build_cmd::run_build(&cfg, dry_run, plan_out, progress).await?;
        }
        Commands::Status { state_root } => {
            let cfg = load(
                &cli.config,
                &SyncOverrides {
                    state_root,
                    ..SyncOverrides::default()
                },
            )?;
            status::run_status(&cfg).await?;
        }
        Commands::Stamp { plan, state_root } => {
            let cfg = load(
                &cli.config,
                &SyncOverrides {
                    state_root,
                    ..SyncOverrides::default()
                },
            )?;
            stamp_cmd::run_stamp(&cfg, plan.as_deref()).await?;
        }
    }
    Ok(())
}

fn load(path: &std::path::Path, overrides: &SyncOverrides) -> Result<Config, SyncError> {
    config::load_config(path)
        .and_then(|cfg| cfg.with_overrides(overrides))
        .map_err(|e| SyncError::Configuration(format!("{:#}", e)))
}

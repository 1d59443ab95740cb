use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fts_config::UnusedKeyPolicy;
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "fts")]
#[command(about = "File transfer event reconciler CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a file of notifications through the reconciler.
    ///
    /// Every notification is classified before any store call; one
    /// undecodable entry aborts the whole replay.
    Reconcile {
        /// JSON file holding one notification or an array of them
        #[arg(long)]
        file: String,

        /// Layered config paths in merge order (defaults if omitted)
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Reconcile against an in-memory store; nothing is persisted
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Stored transfer aggregates
    Transfer {
        #[command(subcommand)]
        cmd: TransferCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum TransferCmd {
    /// Print a stored aggregate as JSON
    Show {
        #[arg(long)]
        transfer_id: String,

        /// Originating principal (partition key). Omit to search every partition.
        #[arg(long)]
        principal: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = fts_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = fts_db::status(&pool).await?;
                    let n = fts_db::count_aggregates(&pool).await?;
                    println!(
                        "db_ok={} has_aggregates_table={} aggregates={}",
                        s.ok, s.has_aggregates_table, n
                    );
                }
                DbCmd::Migrate => {
                    fts_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = fts_config::load_layered_yaml(&path_refs)?;
            let report =
                fts_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
            for p in &report.unused_leaf_pointers {
                eprintln!("unused_key={p}");
            }
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Reconcile {
            file,
            config_paths,
            dry_run,
        } => {
            commands::reconcile::run(&file, &config_paths, dry_run).await?;
        }

        Commands::Transfer { cmd } => match cmd {
            TransferCmd::Show {
                transfer_id,
                principal,
            } => {
                let tid = Uuid::parse_str(&transfer_id).context("invalid transfer_id uuid")?;
                let pool = fts_db::connect_from_env().await?;
                commands::transfer::show(&pool, tid, principal.as_deref()).await?;
            }
        },
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

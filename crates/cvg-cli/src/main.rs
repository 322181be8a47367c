use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "cvg")]
#[command(about = "Converge offline maintenance CLI", long_about = None)]
struct Cli {
    /// Data directory holding the journals. Overrides `storage.dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Submission ledger inspection and cleanup
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },

    /// Reconciliation map inspection
    Entities {
        #[command(subcommand)]
        cmd: EntitiesCmd,
    },

    /// Drive every unresolved operation to CONFIRMED or FAILED, then exit
    Resume {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Journal maintenance
    Store {
        #[command(subcommand)]
        cmd: StoreCmd,
    },
}

#[derive(Subcommand)]
enum LedgerCmd {
    /// One line per operation, oldest first
    List {
        /// PENDING | RETRYING | CONFIRMED | FAILED (any case)
        #[arg(long)]
        status: Option<String>,
    },

    /// Print one operation as JSON
    Show {
        #[arg(long)]
        token: String,
    },

    /// Remove records. Run with the daemon stopped.
    #[command(group(ArgGroup::new("target").required(true).args(["token", "settled"])))]
    Purge {
        /// Purge a single token, whatever its status
        #[arg(long)]
        token: Option<String>,

        /// Purge every CONFIRMED and FAILED record
        #[arg(long)]
        settled: bool,
    },
}

#[derive(Subcommand)]
enum EntitiesCmd {
    /// Current snapshots, tombstones hidden unless --all
    List {
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum StoreCmd {
    /// Rewrite both journals down to their live records
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = cvg_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Ledger { cmd } => match cmd {
            LedgerCmd::List { status } => {
                commands::ledger::list(data_dir.as_deref(), status.as_deref())?
            }
            LedgerCmd::Show { token } => commands::ledger::show(data_dir.as_deref(), &token)?,
            LedgerCmd::Purge { token, settled } => {
                commands::ledger::purge(data_dir.as_deref(), token.as_deref(), settled)?
            }
        },

        Commands::Entities { cmd } => match cmd {
            EntitiesCmd::List { all } => commands::entities::list(data_dir.as_deref(), all)?,
        },

        Commands::Resume { config_paths } => {
            commands::resume::resume(data_dir.as_deref(), &config_paths).await?
        }

        Commands::Store { cmd } => match cmd {
            StoreCmd::Compact => commands::store::compact(data_dir.as_deref())?,
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

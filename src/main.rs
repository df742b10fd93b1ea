//! # Lead Funnel CLI (`funnel`)
//!
//! ## Usage
//!
//! ```bash
//! funnel --config ./config/funnel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `funnel init` | Create the SQLite database and run schema migrations |
//! | `funnel serve` | Start the HTTP API server |
//! | `funnel stats` | Print lead, assessment and document counts |
//! | `funnel hash-password` | Read a password from stdin and print its argon2 hash |

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;

use lead_funnel::{auth, config, migrate, server, stats};

/// Lead Funnel: marketing-site backend with lead capture, assessments,
/// a document-grounded chat assistant and an admin CMS.
#[derive(Parser)]
#[command(name = "funnel", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/funnel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed default prompts and branding.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API server on `[server] bind`.
    Serve,

    /// Show database statistics.
    Stats,

    /// Hash an admin password for `[auth] password_hash`.
    ///
    /// The password is read from the first line of stdin.
    HashPassword,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    lead_funnel::init_tracing();
    let cli = Cli::parse();

    if let Commands::HashPassword = cli.command {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            anyhow::bail!("password must not be empty");
        }
        println!("{}", auth::hash_password(password)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init_database(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::HashPassword => {}
    }

    Ok(())
}

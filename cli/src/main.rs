mod commands;
mod config;
mod server;
mod tls;
mod views;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, fmt};

use crate::commands::{NewPurchase, cmd_add, cmd_delete, cmd_key_new, cmd_search};
use crate::config::Config;
use crate::server::ServeOptions;
use crate::tls::TlsPaths;
use crate::views::IndexTemplate;
use grocer_core::Database;

const DEFAULT_LOG_FILTER: &str = "grocer=info,tower_http=info";

#[derive(Parser)]
#[command(
    name = "grocer",
    version,
    about = "Track what groceries cost, and where"
)]
struct Cli {
    /// Data directory (default: platform data dir, or $GROCER_DATA_DIR)
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8443")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Keys file, one access key per line (default: <data dir>/keys)
        #[arg(long, value_name = "PATH")]
        keys: Option<PathBuf>,
        /// Enable TLS (HTTPS). Generates a self-signed certificate on first use.
        #[arg(long)]
        tls: bool,
        /// Path to TLS certificate file (PEM). Implies --tls.
        #[arg(long, value_name = "PATH")]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key file (PEM). Implies --tls.
        #[arg(long, value_name = "PATH")]
        tls_key: Option<PathBuf>,
        /// Serve plain HTTP requests instead of redirecting them to HTTPS
        #[arg(long)]
        allow_http: bool,
        /// Index page template; `{{ key }}` is replaced with the access key
        #[arg(long, value_name = "PATH")]
        template: Option<PathBuf>,
        /// Re-read the template on every request
        #[arg(long, requires = "template")]
        reload_templates: bool,
        /// Number of database connections
        #[arg(long, default_value = "4", value_parser = clap::value_parser!(u16).range(1..=64))]
        pool_size: u16,
    },
    /// Manage access keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Search purchases by food name
    Search {
        /// Terms that must all appear in the food name
        terms: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a purchase
    Add {
        /// What was bought
        #[arg(long)]
        food: String,
        /// Where it was bought
        #[arg(long)]
        location: String,
        /// Total price paid
        #[arg(long)]
        price: String,
        /// Purchase date (YYYY-MM-DD, MM/DD/YYYY, today or yesterday; default: today)
        #[arg(long)]
        date: Option<String>,
        /// Number of units bought
        #[arg(long)]
        count: Option<String>,
        /// Unit name (e.g. gal, lb, egg)
        #[arg(long)]
        unit: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a purchase by ID
    Delete {
        /// Record ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new access key and add it to the keys file
    New {
        /// Keys file (default: <data dir>/keys)
        #[arg(long, value_name = "PATH")]
        keys: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            keys,
            tls,
            tls_cert,
            tls_key,
            allow_http,
            template,
            reload_templates,
            pool_size,
        } => {
            let db = Database::open(&config.db_path, usize::from(pool_size))?;
            let (key_store, new_key) = config.load_keys(keys.as_deref())?;
            let index = match template {
                Some(path) => IndexTemplate::from_file(&path, reload_templates)?,
                None => IndexTemplate::default(),
            };
            let tls = if tls || tls_cert.is_some() || tls_key.is_some() {
                Some(TlsPaths::resolve(&config.tls_dir()?, tls_cert, tls_key))
            } else {
                None
            };
            let opts = ServeOptions {
                port,
                bind,
                tls,
                require_https: !allow_http,
                index,
                new_key,
            };
            server::start_server(db, key_store, opts).await
        }
        Commands::Key { command } => match command {
            KeyCommands::New { keys, json } => {
                cmd_key_new(keys.as_deref().unwrap_or(&config.keys_path), json)
            }
        },
        Commands::Search { terms, json } => {
            let db = Database::open(&config.db_path, 1)?;
            cmd_search(&db, &terms, json)
        }
        Commands::Add {
            food,
            location,
            price,
            date,
            count,
            unit,
            json,
        } => {
            let db = Database::open(&config.db_path, 1)?;
            let purchase = NewPurchase {
                food,
                location,
                price,
                date,
                count,
                unit,
            };
            cmd_add(&db, purchase, json)
        }
        Commands::Delete { id, json } => {
            let db = Database::open(&config.db_path, 1)?;
            cmd_delete(&db, id, json)
        }
    }
}

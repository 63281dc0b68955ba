//! Linkage command-line tool
//!
//! Resolves contacts against a local persistent database and prints JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use linkage::storage::open_database;
use linkage::{seed_demo_contacts, ContactStore, IdentifyRequest, IdentifyResponse, IdentityResolver};

/// Contact identity reconciliation
#[derive(Parser, Debug)]
#[command(
    name = "linkage",
    about = "Link partial email/phone contact records into one identity",
    version
)]
struct Args {
    /// Database directory
    #[arg(
        short,
        long,
        default_value = "./contacts.linkage",
        env = "LINKAGE_DATA_DIR"
    )]
    data_dir: PathBuf,

    /// Logging level
    #[arg(
        short,
        long,
        default_value = "warn",
        env = "RUST_LOG",
        help = "Logging level (trace, debug, info, warn, error)"
    )]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value = "false", env = "LINKAGE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an email and/or phone number to its consolidated identity
    Identify {
        /// Email address
        #[arg(short, long)]
        email: Option<String>,

        /// Phone number
        #[arg(short, long)]
        phone_number: Option<String>,

        /// Raw request body, e.g. '{"email":"a@b.c","phoneNumber":"123"}'
        #[arg(long, conflicts_with_all = ["email", "phone_number"])]
        request: Option<String>,
    },
    /// Print every stored record, soft-deleted ones included
    List,
    /// Load demo contacts into an empty database
    Seed,
    /// Rewrite the write-ahead log as a single snapshot
    Compact,
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(args: &Args) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    // Held for the process lifetime; the directory lock is released on exit.
    let store = Arc::new(open_database(&args.data_dir, None)?);
    info!(path = %args.data_dir.display(), "database ready");

    match args.command {
        Command::Identify {
            email,
            phone_number,
            request,
        } => {
            let request = match request {
                Some(body) => serde_json::from_str::<IdentifyRequest>(&body)?,
                None => IdentifyRequest {
                    email,
                    phone_number,
                },
            };
            let resolver = IdentityResolver::new(store);
            let contact = resolver.identify(&request)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&IdentifyResponse { contact })?
            );
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&store.list_all()?)?);
        }
        Command::Seed => {
            let created = seed_demo_contacts(store.as_ref())?;
            println!("{}", serde_json::json!({ "created": created }));
        }
        Command::Compact => {
            let result = store.compact()?;
            println!(
                "{}",
                serde_json::json!({
                    "contacts": result.contacts,
                    "walSizeBefore": result.wal_size_before,
                    "walSizeAfter": result.wal_size_after,
                })
            );
        }
    }
    Ok(())
}

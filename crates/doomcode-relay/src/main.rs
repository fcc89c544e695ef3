//! Doomcode Relay Server
//!
//! Routes encrypted envelopes between paired controller and operator
//! connections and buffers controller traffic for absent operators.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use doomcode_relay::storage::RelayDatabase;

#[derive(Parser, Debug)]
#[command(name = "doomcode-relay")]
#[command(version, about = "Doomcode relay - encrypted envelope router")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8787", env = "DOOMCODE_RELAY_ADDR")]
    addr: SocketAddr,

    /// Path to the SQLite database file.
    #[arg(long, env = "DOOMCODE_RELAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Output logs as JSON.
    #[arg(long, env = "DOOMCODE_RELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    doomcode_core::init_tracing("doomcode_relay=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting doomcode-relay"
    );

    let db = match &args.db_path {
        Some(path) => RelayDatabase::open(path).await?,
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening relay database (default path)");
            RelayDatabase::open(&default_path).await?
        }
    };

    doomcode_relay::server::run(args.addr, db).await
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".doomcode").join("relay.db"))
}

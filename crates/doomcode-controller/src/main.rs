//! Doomcode Controller
//!
//! Supervises an interactive coding assistant on a PTY and bridges it to a
//! remote operator through the relay, end-to-end encrypted.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use doomcode_controller::config::ControllerConfig;
use doomcode_controller::runtime::{self, SessionBootstrap};

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8787/ws";
const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:8787";

#[derive(Parser, Debug)]
#[command(name = "doomcode")]
#[command(version, about = "Doomcode controller - drive a coding assistant from another device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a session, show the pairing code and wait for an operator.
    Start {
        /// Relay duplex URL.
        #[arg(long, default_value = DEFAULT_WS_URL, env = "DOOMCODE_WS_URL")]
        ws_url: String,

        /// Relay session bootstrap URL.
        #[arg(long, default_value = DEFAULT_HTTP_URL, env = "DOOMCODE_HTTP_URL")]
        http_url: String,

        /// Working directory for the assistant.
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Assistant binary to supervise.
        #[arg(long, default_value = "claude")]
        agent: String,

        /// Reconnect to the cached session instead of pairing anew.
        #[arg(long)]
        reuse: bool,
    },

    /// Join an existing session as its controller.
    Connect {
        /// The session to join.
        session_id: String,

        /// Relay duplex URL.
        #[arg(long, default_value = DEFAULT_WS_URL, env = "DOOMCODE_WS_URL")]
        ws_url: String,

        /// Relay session bootstrap URL.
        #[arg(long, default_value = DEFAULT_HTTP_URL, env = "DOOMCODE_HTTP_URL")]
        http_url: String,

        /// Assistant binary to supervise.
        #[arg(long, default_value = "claude")]
        agent: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = doomcode_core::tracing_init::default_filter_with_debug(
        "doomcode_controller=info",
        &[
            ("DOOMCODE_DEBUG_SESSION", "doomcode_controller::runtime"),
            ("DOOMCODE_DEBUG_SESSION", "doomcode_controller::relay_ws"),
            ("DOOMCODE_DEBUG_PTY", "doomcode_controller::agent"),
        ],
    );
    doomcode_core::init_tracing(&filter, false);

    let cli = Cli::parse();
    let (config, bootstrap) = match cli.command {
        Commands::Start {
            ws_url,
            http_url,
            dir,
            agent,
            reuse,
        } => {
            let dir = dir.canonicalize().unwrap_or(dir);
            (
                ControllerConfig::new(ws_url, http_url, dir, agent),
                SessionBootstrap::Start { reuse },
            )
        }
        Commands::Connect {
            session_id,
            ws_url,
            http_url,
            agent,
        } => {
            let dir = std::env::current_dir()?;
            (
                ControllerConfig::new(ws_url, http_url, dir, agent),
                SessionBootstrap::Connect { session_id },
            )
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ws_url = %config.ws_url,
        agent = %config.agent_name,
        "Starting doomcode controller"
    );

    runtime::run(config, bootstrap).await?;
    Ok(())
}

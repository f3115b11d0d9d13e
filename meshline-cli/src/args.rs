//! Command-line surface for the `meshline` binary. Kept deliberately thin
//! — per the specification this crate is peripheral plumbing around the
//! transport stack, not the thing under test — but structured the way the
//! rest of this codebase structures a `clap` command tree: one `Args`
//! struct per subcommand, global options hoisted onto the top-level
//! `Cli`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "meshline", version, about = "A layered-transport peer-to-peer messaging node")]
pub struct Cli {
    /// Path to a TOML configuration file. Missing files are silently
    /// skipped — defaults plus `MESHLINE_`-prefixed environment variables
    /// still apply.
    #[arg(long, global = true, default_value = "meshline.toml")]
    pub config: PathBuf,

    /// Override the configured log level (`trace`/`debug`/`info`/`warn`/`error`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit structured JSON logs instead of the default compact format.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bundled signaling relay and polling reference HTTP server.
    Serve(ServeArgs),
    /// Connect to a peer and hold the connection open, logging every
    /// inbound message and primary/backup transitions until interrupted.
    Connect(ConnectArgs),
    /// Connect to a peer, send a single message once a route is
    /// established, wait briefly for a reply, then close and exit.
    Send(SendArgs),
    /// Print the local environment probe's view of this machine: local
    /// IP, private/public classification, broadcast candidates, and an
    /// advisory NAT classification.
    Probe,
    /// Print the effective configuration (defaults < file < environment)
    /// as JSON, for inspection without starting any network service.
    ShowConfig,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Peer identifier this node's signaling room and log entries are
    /// recorded under. Defaults to the configured `peer_id`.
    #[arg(long)]
    pub peer_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Identifier of the peer to connect to.
    pub peer_id: String,

    /// The peer's IP address, if known — enables direct-stream and
    /// polling (by convention port) attempts.
    #[arg(long)]
    pub peer_ip: Option<String>,

    /// The peer's polling HTTP base URL, if known.
    #[arg(long)]
    pub peer_http_url: Option<String>,

    /// Advisory network classification for success estimation.
    #[arg(long, value_enum, default_value = "unknown")]
    pub network_type: NetworkTypeArg,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Short ASCII message-type tag. Avoid the reserved `ping`/`pong`
    /// values; they never reach the application callback.
    #[arg(long, default_value = "chat")]
    pub msg_type: String,

    /// Message payload, sent as UTF-8 bytes.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkTypeArg {
    Lan,
    Wifi,
    Internet,
    Unknown,
}

impl From<NetworkTypeArg> for meshline_core::NetworkType {
    fn from(value: NetworkTypeArg) -> Self {
        match value {
            NetworkTypeArg::Lan => meshline_core::NetworkType::Lan,
            NetworkTypeArg::Wifi => meshline_core::NetworkType::Wifi,
            NetworkTypeArg::Internet => meshline_core::NetworkType::Internet,
            NetworkTypeArg::Unknown => meshline_core::NetworkType::Unknown,
        }
    }
}

//! Binary entry point for a meshline node: wires the transport façade, the
//! bundled signaling relay, and the polling reference HTTP server into
//! runnable commands. Everything interesting happens in the library
//! crates; this binary's whole job is argument parsing, logging setup,
//! and holding the process open for the async runtime.

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meshline_core::config::MeshlineConfig;
use meshline_manager::Callbacks;
use meshline_signaling::SignalingRendezvousClient;
use meshline_storage::PersistentMessageLog;
use meshline_transport::MeshlineTransport;
use tracing::{info, warn};

use args::{Cli, Command, ConnectArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = MeshlineConfig::load(cli.config.to_str()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    init_logging(&config.logging);

    match cli.command {
        Command::Serve(args) => run_serve(config, args).await,
        Command::Connect(args) => run_connect(config, args).await,
        Command::Send(args) => run_send(config, args).await,
        Command::Probe => run_probe().await,
        Command::ShowConfig => run_show_config(config),
    }
}

fn init_logging(logging: &meshline_core::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn logging_callbacks() -> Callbacks {
    Callbacks::new(
        Arc::new(|peer_id, msg| {
            info!(peer_id, msg_type = %msg.msg_type, bytes = msg.payload.len(), "message received");
        }),
        Arc::new(|peer_id, conn_type| {
            info!(peer_id, %conn_type, "connection established (primary)");
        }),
        Arc::new(|peer_id, failed_type| {
            warn!(peer_id, failed_type = ?failed_type, "peer disconnected");
        }),
    )
}

async fn run_serve(config: MeshlineConfig, serve_args: args::ServeArgs) -> Result<()> {
    let peer_id = serve_args.peer_id.or(config.peer_id.clone()).unwrap_or_else(|| "meshline-node".to_string());
    info!(peer_id, "starting meshline node services");

    let log = Arc::new(PersistentMessageLog::open(&config.storage.data_dir).context("opening persistent message log")?);

    let signaling_log = log.clone();
    let signaling_config = config.signaling.clone();
    let signaling = tokio::spawn(async move {
        if let Err(err) = meshline_signaling::serve(&signaling_config, signaling_log).await {
            warn!(error = %err, "signaling relay exited");
        }
    });

    let history_log = log.clone();
    let history_addr = format!("{}:{}", config.signaling.bind_address, config.polling.default_http_port);
    let history = tokio::spawn(async move {
        let app = meshline_storage::router(history_log);
        let listener = match tokio::net::TcpListener::bind(&history_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(%history_addr, error = %err, "polling reference server failed to bind");
                return;
            }
        };
        info!(%history_addr, "polling reference server listening");
        if let Err(err) = axum::serve(listener, app).await {
            warn!(error = %err, "polling reference server exited");
        }
    });

    tokio::select! {
        _ = signaling => {}
        _ = history => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down on ctrl-c");
        }
    }

    Ok(())
}

async fn build_transport(config: MeshlineConfig, own_id: &str) -> MeshlineTransport {
    let rendezvous = Arc::new(SignalingRendezvousClient::new(config.signaling.connect_url.clone(), own_id.to_string()));
    MeshlineTransport::new(own_id.to_string(), config, rendezvous, logging_callbacks())
}

async fn connect_with(config: MeshlineConfig, own_id: &str, args: &ConnectArgs) -> Result<MeshlineTransport> {
    let transport = build_transport(config, own_id).await;
    let info = transport
        .create_network_info(args.peer_ip.clone(), args.peer_http_url.clone(), args.network_type.into())
        .await;
    info!(peer_id = %args.peer_id, ?info, "connecting to peer");
    transport.connect_to_peer(args.peer_id.clone(), info)?;
    Ok(transport)
}

async fn run_connect(config: MeshlineConfig, connect_args: args::ConnectArgs) -> Result<()> {
    let own_id = config.peer_id.clone().unwrap_or_else(|| "meshline-node".to_string());
    let transport = connect_with(config, &own_id, &connect_args).await?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down on ctrl-c");
    transport.close().await;
    Ok(())
}

async fn run_send(config: MeshlineConfig, send_args: args::SendArgs) -> Result<()> {
    let own_id = config.peer_id.clone().unwrap_or_else(|| "meshline-node".to_string());
    let timeout = config.manager.connection_timeout;
    let transport = connect_with(config, &own_id, &send_args.connect).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    while !transport.is_connected(&send_args.connect.peer_id) {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for a connection to {}", send_args.connect.peer_id);
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    transport
        .send_message(&send_args.connect.peer_id, send_args.msg_type.clone(), send_args.text.clone().into_bytes())
        .await
        .context("sending message")?;
    info!(peer_id = %send_args.connect.peer_id, "message sent");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    transport.close().await;
    Ok(())
}

async fn run_probe() -> Result<()> {
    let local_ip = meshline_transport::probe::local_ip();
    let private = local_ip.as_deref().map(meshline_transport::probe::is_private);
    let broadcast = meshline_transport::probe::broadcast_candidates();
    let nat_type = meshline_transport::probe::classify_nat().await;

    println!("local_ip: {:?}", local_ip);
    println!("private: {:?}", private);
    println!("broadcast_candidates: {:?}", broadcast);
    println!("nat_type: {:?}", nat_type);
    Ok(())
}

fn run_show_config(config: MeshlineConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

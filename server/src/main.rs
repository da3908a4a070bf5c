use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::context::Collaborators;
use server::network::Server;
use std::path::PathBuf;

/// Main-method of the application.
/// Loads the configuration, applies command line overrides and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// TOML configuration file
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Server IP address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// TCP port to listen on
        #[clap(short, long)]
        tcp_port: Option<u16>,
        /// UDP port to listen on
        #[clap(short, long)]
        udp_port: Option<u16>,
        /// Maximum number of concurrent connections
        #[clap(short, long)]
        max_clients: Option<usize>,
        /// Log level used when RUST_LOG is not set
        #[clap(short, long, default_value = "info")]
        log_level: String,
    }

    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.tcp_port {
        config.tcp_port = port;
    }
    if let Some(port) = args.udp_port {
        config.udp_port = port;
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }

    let server = Server::bind(config, Collaborators::in_memory()).await?;
    let shutdown = server.shutdown_handle();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server stopped with an error: {}", e);
        }
    });

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    }

    Ok(())
}

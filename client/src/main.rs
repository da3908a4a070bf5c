use clap::Parser;
use client::Client;
use log::info;
use shared::messages::PositionUpdate;
use shared::ClientBuild;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server stream address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:10300")]
    server: SocketAddr,

    /// Server datagram address; skips the datagram path when absent
    #[arg(short = 'u', long)]
    udp: Option<SocketAddr>,

    /// Client build to announce
    #[arg(short = 'b', long, default_value = "1125")]
    build: u16,

    /// Expansion id to announce
    #[arg(short = 'e', long, default_value = "0")]
    expansion: u8,

    #[arg(short = 'a', long, default_value = "bot")]
    account: String,

    #[arg(short = 'p', long, default_value = "bot")]
    password: String,

    /// Movement updates to send once in the world
    #[arg(short = 'm', long, default_value = "10")]
    moves: u16,

    /// Milliseconds between movement updates
    #[arg(short = 'i', long, default_value = "500")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = Client::connect(args.server, ClientBuild(args.build)).await?;
    let session = client.handshake(args.expansion).await?;
    let account = client.login(&args.account, &args.password).await?;
    info!("Logged in as {} on session {}", account, session);

    let mut position = client.enter_world().await?;
    position.skip(2)?;
    let z = position.read_u16()?;
    let x = position.read_u32()?;
    let y = position.read_u32()?;
    info!("Entered the world at ({}, {}, {})", x, y, z);
    // Zone 1 starts at the world origin, so absolute and zone offsets agree.

    if let Some(udp) = args.udp {
        client.init_udp(udp).await?;
        client.udp_ping().await?;
        info!("Datagram path to {} open", udp);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval));
    for step in 0..args.moves {
        ticker.tick().await;
        let update = PositionUpdate {
            session,
            z,
            x_offset: (x as u16).wrapping_add(step * 10),
            y_offset: y as u16,
            zone: 1,
            health_byte: 0x80 | 100,
            ..PositionUpdate::default()
        };
        client.send_position(&update).await?;
    }

    let sequence = client.ping(1, 0).await?;
    info!("Ping answered with sequence {}", sequence);
    client.quit().await?;
    info!("Session finished");

    Ok(())
}

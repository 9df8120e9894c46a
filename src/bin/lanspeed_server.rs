use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use lanspeed::discovery;
use lanspeed::server::{Server, ServerConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Address to bind the transfer sockets to
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,
    /// TCP transfer port (0 picks a free port)
    #[arg(long, default_value_t = 0)]
    tcp_port: u16,
    /// UDP transfer port (0 picks a free port)
    #[arg(long, default_value_t = 0)]
    udp_port: u16,
    /// Where offers are broadcast to
    #[arg(long, default_value_t = discovery::default_broadcast_addr())]
    broadcast_addr: SocketAddr,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn log_filter(level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    Ok(EnvFilter::from_default_env().add_directive(format!("lanspeed={level}").parse()?))
}

fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let server = Server::bind(ServerConfig {
        bind_ip: cli.bind,
        tcp_port: cli.tcp_port,
        udp_port: cli.udp_port,
        broadcast_addr: cli.broadcast_addr,
        ..Default::default()
    })
    .await?;

    let offer = server.offer();
    println!(
        "Server started on UDP port {}, TCP port {}",
        offer.udp_port, offer.tcp_port
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    server.run(shutdown_rx).await?;
    Ok(())
}

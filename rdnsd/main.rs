// Runs the caching, forwarding server until interrupted.
// rdnsd [--config rdnsd.toml] [--address 127.0.0.1]
use clap::Parser;
use log::{error, info};
use rdns::config::ServerConfig;
use rdns::server::Server;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "rdnsd")]
#[command(about = "A caching, forwarding DNS server", long_about = None)]
struct Args {
    /// TOML config file. Without one, the defaults are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the address to listen on.
    #[arg(long)]
    address: Option<IpAddr>,

    /// Adds an upstream, e.g. udp://1.1.1.1 or https://dns.google/dns-query
    #[arg(short, long = "upstream")]
    upstreams: Vec<String>,
}

fn config(args: &Args) -> rdns::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if let Some(address) = args.address {
        config.address = address;
    }
    config.upstreams.extend(args.upstreams.iter().cloned());

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> rdns::Result<()> {
    let config = config(&args)?;

    let mut server = Server::new(config)?;
    server.start().await?;

    for (transport, addr) in server.listeners() {
        info!("{} listening on {}", transport, addr);
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupted");

    server.stop().await
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("starting rdnsd {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        process::exit(1);
    }
}

use std::{net::IpAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use tokio::runtime::Builder;
use tracing::{error, info, Level};

use lantern::{
    config::{ConfigFile, GatewayConfig, Overrides},
    error::GatewayError,
    msg::Msg2Gateway,
    Gateway,
};

#[derive(Parser, Debug)]
#[clap(version, about = "A gateway that lets telnet and WebSocket clients pick a MUD to play.")]
pub struct Args {
    #[arg(short, long, value_name = "port", help = "Port to accept clients on [default: 8017]")]
    pub listen_port: Option<u16>,

    #[arg(short, long, value_name = "ip", help = "Address to bind [default: :: (all, dual-stack)]")]
    pub bind: Option<IpAddr>,

    #[arg(short, long, value_name = "host", help = "Game to use when no destinations are configured [default: 127.0.0.1]")]
    pub mud_host: Option<String>,

    #[arg(short = 'p', long, value_name = "port", help = "Port of that game [default: 4000]")]
    pub mud_port: Option<u16>,

    #[arg(short, long, value_name = "path", help = "TOML file with settings and the game directory")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Log every connection step")]
    pub verbose: bool,
}

async fn run(args: Args) -> Result<(), GatewayError> {
    let file = match &args.config {
        Some(path) => Some(ConfigFile::load(path)?),
        None => None,
    };
    let overrides = Overrides {
        listen_port: args.listen_port,
        bind: args.bind,
        mud_host: args.mud_host,
        mud_port: args.mud_port,
    };
    let config = GatewayConfig::resolve(file, overrides)?;

    let gateway = Gateway::bind(config).await?;
    let tx_gateway = gateway.tx_gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted.");
            let _ = tx_gateway.send(Msg2Gateway::Kill).await;
        }
    });

    gateway.run().await;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Lantern starting up...");

    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{}", GatewayError::Runtime(e));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {
            info!("Lantern shut down.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

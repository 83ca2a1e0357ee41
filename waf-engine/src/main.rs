use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::filter::EnvFilter;
use waf_engine::{ConfigLoader, Firewall, IngressServer, IngressServerConfig};

#[derive(Parser, Debug)]
#[command(name = "waf-engine")]
#[command(about = "Request classification engine for the WAF console")]
struct Args {
    /// Unix domain socket path to listen on
    #[arg(long, short = 's')]
    socket: PathBuf,

    /// Config file path
    #[arg(long, short = 'c', env = "WAF_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::load_or_builtin(args.config)?;

    // Initialize logging
    let env_filter = if config.debug_logging(args.verbose) {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let firewall = Arc::new(Firewall::from_config(&config)?);

    let server = IngressServer::new(IngressServerConfig {
        socket_path: args.socket,
        firewall,
    });
    server.start().await?;
    Ok(())
}

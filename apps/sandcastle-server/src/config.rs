use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use sandcastle_core::SyncConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub app_name: String,
    pub shutdown_grace: Duration,
    pub tick_interval: Duration,
    pub sync: SyncConfig,
}

#[derive(Debug, Parser)]
#[command(
    name = "sandcastle-server",
    author,
    version,
    about = "Serves the sandcastle bootstrap page and pushes UI transactions over websockets"
)]
pub struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(
        long,
        env = "SANDCASTLE_LISTEN_ADDR",
        default_value = "127.0.0.1:8081"
    )]
    pub listen_addr: String,

    /// Directory holding index.html and the client runtime assets.
    #[arg(long, env = "SANDCASTLE_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Title shown by the generated bootstrap page and the demo application.
    #[arg(long, env = "SANDCASTLE_APP_NAME", default_value = "Sandcastle")]
    pub app_name: String,

    /// Time given to open sessions to flush after the listener stops.
    #[arg(long, env = "SANDCASTLE_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Period of the demo clock push, in milliseconds.
    #[arg(long, env = "SANDCASTLE_TICK_MS", default_value_t = 1000)]
    pub tick_ms: u64,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.tick_ms == 0 {
            anyhow::bail!("tick interval must be positive");
        }
        Ok(ServerConfig {
            listen_addr,
            static_dir: cli.static_dir,
            app_name: cli.app_name,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            tick_interval: Duration::from_millis(cli.tick_ms),
            sync: SyncConfig::from_env(),
        })
    }
}

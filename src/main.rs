mod auth;
mod cache;
mod cli;
mod config;
mod credentials;
mod dispatch;
mod logging;
mod principal;
mod render;
mod session;
#[cfg(test)]
mod stub;
mod token;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::HarnessConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose());

    let config = HarnessConfig::load(cli.config_path())?;
    cli::run(cli, config).await
}

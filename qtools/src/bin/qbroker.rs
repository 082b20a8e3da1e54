use anyhow::Result;
use clap::Parser;
use log::info;
use qtools::broker;
use qtools::config::BrokerCli;
use qtools::logging::setup_logger;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BrokerCli::parse();

    setup_logger(cli.log.level());

    let config = cli.into_config()?;

    tokio::select! {
        result = broker::run(config) => result?,
        _ = signal::ctrl_c() => info!("Interrupted, stopping"),
    }

    Ok(())
}

use anyhow::Result;
use clap::Parser;
use qtools::config::RequestCli;
use qtools::logging::setup_logger;
use qtools::request;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RequestCli::parse();

    setup_logger(cli.log.level());

    request::run(cli.into_config()?).await?;

    Ok(())
}

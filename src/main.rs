use anyhow::Context;
use camrelay_lib::config::{Cli, Config};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    camrelay_lib::logger::init(cli.verbose);

    let config = Config::load(&cli).context("loading configuration")?;
    camrelay_lib::run(config).await.context("coordinator stopped")?;
    Ok(())
}

use clap::Parser;

use rampa::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    cli::init_tracing(&config.log_level);

    cli.run(&config).await
}

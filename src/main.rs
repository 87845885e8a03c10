mod cli;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use crowdcount::config::Config;
use crowdcount::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();

    info!("Loading configuration");
    let config = Config::load()?;

    match cli.command {
        Commands::Serve(args) => {
            let components = server::Components::build(config)?;
            let result = server::serve(&components, args).await;
            components.close();
            result
        }
        Commands::Worker(args) => {
            let components = server::Components::build(config)?;
            let result = server::worker(&components, args).await;
            components.close();
            result
        }
        Commands::Submit(args) => server::submit(&config, args).await,
        Commands::DeadLetters(args) => server::dead_letters(&config, args).await,
    }
}

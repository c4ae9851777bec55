use anyhow::Result;
use clap::Parser;
use tracing::info;

use judgebox::config::{Cli, Commands, ExecConfig, JudgeConfig};
use judgebox::server::{serve_exec, serve_judge};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judgebox=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Exec(args) => {
            info!("Starting execution service...");
            serve_exec(ExecConfig::from(args)).await
        }
        Commands::Judge(args) => {
            info!("Starting judge server...");
            serve_judge(JudgeConfig::from(args)).await
        }
    }
}

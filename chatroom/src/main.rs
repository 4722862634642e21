use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use chatroom::{
    cli::{Cli, Command},
    client::Client,
    server::Server,
    simulation,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let server = Server::bind(args.to_config())
                .await
                .context("failed to start server")?;
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err.into());
            }
        }
        Command::Client(args) => {
            let report = Client::new(args.to_config()).run_until_ctrl_c().await?;
            info!(sent = report.sent, received = report.received, "client stopped");
        }
        Command::Simulate(args) => {
            let report = simulation::run(args.to_config()).await?;
            for (ordinal, stored) in report.stored.iter().enumerate() {
                info!(server = ordinal, stored, "server summary");
            }
        }
    }

    Ok(())
}

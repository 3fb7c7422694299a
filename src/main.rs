use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use magickey::cli::{self, Cli};
use magickey::config;
use magickey::supervisor::Supervisor;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .try_init()
    .ok();

    if cli.list_devices {
        return cli::list_devices();
    }

    if let Some(device) = &cli.read_events {
        return cli::read_events(device);
    }

    let config_path = cli::resolve_config_path(cli.config.clone())?;
    let groups = config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let supervisor = Supervisor::from_groups(groups);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    if let Err(e) = runtime.block_on(supervisor.run(cli.uid)) {
        error!("supervisor exited with error: {e:?}");
        return Err(e);
    }

    Ok(())
}

use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use libexo_orchestrator::{config::ExploitConfig, sequencer::ExploitSequencer};
use libexo_utils::{
    config::Config,
    log::{config::LogConfig, init_logging_with_config},
};

#[derive(Parser)]
#[command(name = "exo")]
#[command(version = "0.1")]
#[command(about = "Escalate gateway authorization, run the vault flash-loan grant and recover the helper's funds", long_about = None)]
struct Cli {
    /// Configuration file, `EXO_CONFIG` or `config.toml` if not given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Console log filter, overrides `[log] console_level`
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let log_cfg = match &cli.config {
        Some(file) => LogConfig::load_from_or_default(file),
        None => LogConfig::load_or_default(),
    }
    .wrap_err("failed to load [log] config")?
    .with_console_level(cli.log_level);
    init_logging_with_config(log_cfg).wrap_err("failed to set up logging")?;

    let settings = ExploitConfig::load_section(cli.config.as_deref())
        .and_then(|cfg| cfg.resolve())
        .wrap_err("invalid [exploit] config")?;
    let client = settings
        .rpc_config()
        .chain_client()
        .wrap_err("failed to create chain client")?;
    let sequencer = ExploitSequencer::new(client, settings)
        .wrap_err("failed to prepare the run")?;

    let report = sequencer.run();
    println!("{}", report.to_json()?);
    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use hall_vmc::{Config, Error, GracefulKiller};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    /// YAML file with configuration overrides
    #[arg(long)]
    yml: Option<PathBuf>,

    /// Run on a single sequential device
    #[arg(long)]
    debug: bool,

    /// Dotted overrides such as `optim.iterations=500`
    overrides: Vec<String>,
}

fn abort_banner() -> String {
    format!("{} ABORT {}", "=".repeat(30), "=".repeat(30))
}

fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<Error>() {
        Some(Error::Divergence { .. }) => 3,
        Some(Error::InterruptedShutdown { .. }) => 130,
        Some(Error::CorruptCheckpoint { .. }) => 2,
        _ => 1,
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(args.yml.as_deref(), &args.overrides).context("loading configuration")?;
    let devices = config.devices(args.debug);
    let killer = GracefulKiller::install().context("installing signal handlers")?;
    let summary = hall_vmc::run(config, devices, &killer)?;
    info!(
        "finished {} steps starting at {}",
        summary.steps_run, summary.initial_step
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<Error>().is_some_and(Error::is_abort) {
                error!("{}", abort_banner());
            }
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

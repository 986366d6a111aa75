use anyhow::{Context, Result};
use clap::Parser;
use eatly_entrypoint::commands::{Outcome, StartupCommands, StartupContext, handle_startup_command};
use eatly_entrypoint::{exit_code_for, logging, startup};
use std::path::PathBuf;
use std::process::exit;

#[derive(Debug, Parser)]
#[clap(
    name = "eatly-entrypoint",
    version,
    about = "Container entrypoint: wait for postgres, migrate, collect static, exec the server"
)]
struct Cli {
    /// TOML config file (default: ./entrypoint.toml when present)
    #[clap(long, env = "ENTRYPOINT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// key=value override file applied before resolution
    #[clap(long, env = "ENTRYPOINT_ENV_FILE", default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Debug logging (overrides RUST_LOG)
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Option<StartupCommands>,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => exit(code),
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("❌ startup aborted (exit {code}): {err:#}");
            exit(code);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let ctx = StartupContext::load(cli.config.as_deref(), &cli.env_file)?;

    // current-thread runtime, torn down before exec
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let outcome = runtime.block_on(handle_startup_command(
        cli.command.unwrap_or_default(),
        ctx,
    ))?;
    drop(runtime);

    match outcome {
        Outcome::Exit(code) => Ok(code),
        Outcome::Launch(plan, env) => Ok(startup::launch(&plan, &env)?),
    }
}

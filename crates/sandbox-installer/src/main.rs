//! 6G-SANDBOX installer binary.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sandbox_core::backend::CommandExecutor;
use sandbox_core::config::InstallerConfig;
use sandbox_core::error::EXIT_FATAL;
use sandbox_core::Error;
use sandbox_installer::{
    report, run_install, trial_network, Cli, Commands, InquirePrompter, InstallContext,
};
use sandbox_one::ProcessExecutor;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: &[&str] = &[
    "sandbox_installer",
    "sandbox_appliance",
    "sandbox_flow",
    "sandbox_one",
    "sandbox_site",
    "sandbox_tnlcm",
    "sandbox_core",
];

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start the async runtime");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => ExitCode::from(report(&err)),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = InstallerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Commands::Install(args) = &cli.command {
        args.apply_to(&mut config);
    }

    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new());
    let prompter = InquirePrompter;
    let mut ctx = InstallContext::new(&config, executor, &prompter);

    // Ctrl-C wins over a command that failed in the same wakeup.
    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => Err(Error::Interrupted.into()),
        result = dispatch(&mut ctx, &cli.command) => result,
    }
}

async fn dispatch(ctx: &mut InstallContext<'_>, command: &Commands) -> anyhow::Result<()> {
    match command {
        Commands::Install(args) => {
            let summary = run_install(ctx, args.from_phase).await?;
            info!(
                phases = summary.phases.len(),
                tenant = summary.tenant.as_deref().unwrap_or("-"),
                trial_network = summary.trial_network.as_deref().unwrap_or("-"),
                "6G-SANDBOX installed"
            );
        }
        Commands::Destroy(args) => {
            let message = trial_network::destroy(ctx, &args.tn_id)
                .await
                .with_context(|| format!("Failed to destroy trial network {}", args.tn_id))?;
            info!(tn_id = %args.tn_id, %message, "trial network destroyed");
        }
        Commands::Purge(args) => {
            let message = trial_network::purge(ctx, &args.tn_id)
                .await
                .with_context(|| format!("Failed to purge trial network {}", args.tn_id))?;
            info!(tn_id = %args.tn_id, %message, "trial network purged");
        }
    }
    Ok(())
}

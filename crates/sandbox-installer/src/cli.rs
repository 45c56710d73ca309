//! Command line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sandbox_core::config::{InstallerConfig, MonitorPolicy};

use crate::phases::Phase;

/// Installer for the 6G-SANDBOX testbed on OpenNebula.
#[derive(Parser, Debug)]
#[command(name = "sandbox-installer", version, about, long_about = None)]
pub struct Cli {
    /// Installer configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SANDBOX_INSTALLER_CONFIG",
        default_value = "installer.yaml"
    )]
    pub config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Installer subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the testbed
    Install(InstallArgs),

    /// Destroy the resources of a trial network
    Destroy(TrialNetworkArgs),

    /// Remove every trace of a destroyed trial network
    Purge(TrialNetworkArgs),
}

/// Options of `install`.
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Phase to start at; earlier phases are skipped
    #[arg(long, default_value_t = Phase::Environment)]
    pub from_phase: Phase,

    /// How to wait for a new marketplace to be indexed (wait or fast-forward)
    #[arg(long)]
    pub market_monitor: Option<MonitorPolicy>,

    /// Give up polling after this many attempts instead of waiting forever
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_poll_attempts: Option<u32>,
}

impl InstallArgs {
    /// Apply the command line overrides to `config`.
    pub fn apply_to(&self, config: &mut InstallerConfig) {
        if let Some(policy) = self.market_monitor {
            config.marketplace.monitor = Some(policy);
        }
        if let Some(max) = self.max_poll_attempts {
            config.polling.max_attempts = Some(max);
        }
    }
}

/// Trial network to act on.
#[derive(Args, Debug, Clone)]
pub struct TrialNetworkArgs {
    /// Trial network id
    pub tn_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_defaults() {
        let cli = Cli::try_parse_from(["sandbox-installer", "install"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("installer.yaml"));
        assert!(!cli.verbose);
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.from_phase, Phase::Environment);
        assert_eq!(args.market_monitor, None);
        assert_eq!(args.max_poll_attempts, None);
    }

    #[test]
    fn test_install_overrides() {
        let cli = Cli::try_parse_from([
            "sandbox-installer",
            "install",
            "--from-phase",
            "site",
            "--market-monitor",
            "fast-forward",
            "--max-poll-attempts",
            "40",
            "-v",
            "--config",
            "/etc/sandbox/installer.yaml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/sandbox/installer.yaml"));
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.from_phase, Phase::Site);

        let mut config = InstallerConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.marketplace.monitor, Some(MonitorPolicy::FastForward));
        assert_eq!(config.polling.max_attempts, Some(40));
        assert!(config.wait_policy().is_bounded());
    }

    #[test]
    fn test_rejects_bad_values() {
        for args in [
            vec!["sandbox-installer", "install", "--from-phase", "deploy"],
            vec!["sandbox-installer", "install", "--market-monitor", "soon"],
            vec!["sandbox-installer", "install", "--max-poll-attempts", "0"],
            vec!["sandbox-installer", "destroy"],
        ] {
            assert!(Cli::try_parse_from(&args).is_err(), "{args:?} should fail");
        }
    }

    #[test]
    fn test_trial_network_commands() {
        let cli = Cli::try_parse_from(["sandbox-installer", "purge", "tn-42"]).unwrap();
        match cli.command {
            Commands::Purge(args) => assert_eq!(args.tn_id, "tn-42"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

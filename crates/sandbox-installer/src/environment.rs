//! Host environment validation.
//!
//! Runs before anything is created: every tool the installer shells out to
//! must be on `PATH`, the front-end and its flow service must answer, and
//! the configured datastore must exist.

use sandbox_appliance::Frontend;
use sandbox_core::args::CommandArgs;
use sandbox_core::config::InstallerConfig;
use sandbox_core::Error;
use sandbox_one::{Datastore, EntityResolver, Lookup, OneClient};
use tracing::{debug, info};

use crate::Result;

/// Commands the installer runs.
pub const REQUIRED_COMMANDS: &[&str] = &[
    "oneuser",
    "onegroup",
    "oneacl",
    "onedatastore",
    "onemarket",
    "onemarketapp",
    "oneimage",
    "onetemplate",
    "oneflow",
    "oneflow-template",
    "onevnet",
    "onevm",
    "ansible-vault",
];

/// What the validation found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReport {
    /// Commands checked
    pub commands: Vec<String>,
    /// The configured datastore
    pub datastore: Datastore,
}

/// Validate the host environment.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for missing commands or a missing datastore
/// and [`Error::ServiceUnavailable`] when the front-end or the flow service
/// does not answer.
pub async fn validate(client: &OneClient, config: &InstallerConfig) -> Result<EnvironmentReport> {
    check_commands(client, REQUIRED_COMMANDS).await?;

    Frontend::from_config(client.clone(), &config.opennebula)
        .health_check()
        .await?;
    check_flow(client).await?;

    let datastore = EntityResolver::new(client.clone())
        .resolve::<Datastore>(&Lookup::name(&config.datastore))
        .await?
        .ok_or_else(|| Error::NotFound(format!("datastore `{}`", config.datastore)))?;
    info!(datastore = %datastore.name, id = %datastore.id, "environment validated");

    Ok(EnvironmentReport {
        commands: REQUIRED_COMMANDS.iter().map(ToString::to_string).collect(),
        datastore,
    })
}

/// Check that every command is on `PATH`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] naming every missing command.
pub async fn check_commands(client: &OneClient, commands: &[&str]) -> Result<()> {
    let mut missing = Vec::new();
    for command in commands {
        let output = client.run_raw("which", CommandArgs::new().arg(command)).await?;
        if output.is_success() {
            debug!(command, path = %output.stdout.trim(), "command found");
        } else {
            missing.push(*command);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "required commands on PATH: {}",
            missing.join(", ")
        )))
    }
}

async fn check_flow(client: &OneClient) -> Result<()> {
    let output = client
        .run_raw("oneflow", CommandArgs::subcommand("list").json())
        .await?;
    if output.is_success() {
        debug!("flow service is answering");
        Ok(())
    } else {
        Err(Error::ServiceUnavailable(format!(
            "flow service is not answering: {}",
            output.stderr.trim()
        )))
    }
}

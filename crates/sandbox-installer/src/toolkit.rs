//! Toolkit service wiring.
//!
//! The toolkit's Jenkins role needs to reach the front-end as the tenant and
//! to read the sites repository; those attributes are derived from installer
//! state instead of being asked. Once the service runs, Jenkins publishes its
//! SSH public key and the lifecycle manager is reachable on its role's
//! address.

use sandbox_core::backend::Credentials;
use sandbox_core::config::{InstallerConfig, ToolkitConfig};
use sandbox_core::Error;
use sandbox_flow::{role_outputs, AttributeResolver};
use sandbox_one::Service;
use secrecy::SecretString;
use tracing::warn;

use crate::Result;

/// Front-end XML-RPC endpoint.
pub const OPENNEBULA_ENDPOINT: &str = "ONEAPP_JENKINS_OPENNEBULA_ENDPOINT";
/// Flow endpoint.
pub const FLOW_ENDPOINT: &str = "ONEAPP_JENKINS_OPENNEBULA_FLOW_ENDPOINT";
/// Tenant login.
pub const USERNAME: &str = "ONEAPP_JENKINS_OPENNEBULA_USERNAME";
/// Tenant password.
pub const PASSWORD: &str = "ONEAPP_JENKINS_OPENNEBULA_PASSWORD";
/// Whether TLS certificates of the front-end are checked.
pub const INSECURE: &str = "ONEAPP_JENKINS_OPENNEBULA_INSECURE";
/// Sites repository token.
pub const SITES_TOKEN: &str = "ONEAPP_JENKINS_SITES_TOKEN";

/// Attribute providers for the toolkit service.
///
/// Fixed values from `toolkit.attribute_values` come first; the six derived
/// attributes override them.
#[must_use]
pub fn toolkit_attributes(
    config: &InstallerConfig,
    tenant: &Credentials,
    sites_token: &SecretString,
) -> AttributeResolver {
    let fixed = config
        .toolkit
        .attribute_values
        .iter()
        .fold(AttributeResolver::new(), |resolver, (key, value)| {
            resolver.derived(key, value)
        });

    let insecure = if config.opennebula.insecure { "YES" } else { "NO" };
    fixed
        .derived(OPENNEBULA_ENDPOINT, config.opennebula.rpc_endpoint())
        .derived(FLOW_ENDPOINT, config.opennebula.flow_endpoint())
        .derived(USERNAME, tenant.username())
        .secret(PASSWORD, tenant.password.clone())
        .derived(INSECURE, insecure)
        .secret(SITES_TOKEN, sites_token.clone())
}

/// Values the running toolkit publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitOutputs {
    /// Jenkins SSH public key
    pub ssh_public_key: String,
    /// Lifecycle manager API base URL, when its role has an address
    pub tnlcm_url: Option<String>,
}

/// Read the toolkit outputs from a running service.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when the Jenkins role is missing or has not
/// published its SSH key.
pub fn toolkit_outputs(service: &Service, config: &ToolkitConfig) -> Result<ToolkitOutputs> {
    let jenkins = role_outputs(service, &config.jenkins_role)?;
    let ssh_public_key = jenkins
        .value(&config.ssh_key_attribute)
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{} published by role `{}`",
                config.ssh_key_attribute, config.jenkins_role
            ))
        })?
        .to_string();

    let tnlcm_url = match role_outputs(service, &config.tnlcm_role) {
        Ok(outputs) => outputs.first_ip().map(|ip| tnlcm_url(ip, config.tnlcm_port)),
        Err(err) => {
            warn!(role = %config.tnlcm_role, error = %err, "no lifecycle manager role");
            None
        }
    };

    Ok(ToolkitOutputs {
        ssh_public_key,
        tnlcm_url,
    })
}

/// API base URL of a lifecycle manager at `host`.
#[must_use]
pub fn tnlcm_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/api/v1")
}

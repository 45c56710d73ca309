//! Installer configuration.
//!
//! The configuration is read once from a YAML file, validated, and then passed
//! by reference to every component. Every field has a default so a minimal
//! file only needs to name what differs from a stock OpenNebula front-end.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};
use crate::wait::{
    WaitPolicy, DEFAULT_EXPORT_GRACE_SECS, DEFAULT_MARKET_MONITOR_INTERVAL_SECS,
    DEFAULT_MONITOR_EPSILON_SECS, DEFAULT_POLL_INTERVAL_SECS, FAST_MARKET_MONITOR_INTERVAL_SECS,
};

/// Top-level installer configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InstallerConfig {
    /// Front-end connection details
    #[validate(nested)]
    #[serde(default)]
    pub opennebula: OpenNebulaConfig,

    /// Tenant user and group
    #[validate(nested)]
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Marketplace registered by the installer
    #[validate(nested)]
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Datastore appliances are exported into
    #[validate(length(min = 1))]
    #[serde(default = "default_datastore")]
    pub datastore: String,

    /// Infrastructure appliances imported before the toolkit
    #[validate(nested)]
    #[serde(default)]
    pub appliances: Vec<ApplianceConfig>,

    /// Toolkit service
    #[validate(nested)]
    #[serde(default)]
    pub toolkit: ToolkitConfig,

    /// Site configuration repository
    #[validate(nested)]
    #[serde(default)]
    pub site: SiteConfig,

    /// Lifecycle manager registration
    #[validate(nested)]
    #[serde(default)]
    pub tnlcm: TnlcmConfig,

    /// Polling behavior
    #[validate(nested)]
    #[serde(default)]
    pub polling: PollingConfig,

    /// Directory for generated files (password file, repository checkout)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_datastore() -> String {
    "default".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".6g-sandbox")
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            opennebula: OpenNebulaConfig::default(),
            tenant: TenantConfig::default(),
            marketplace: MarketplaceConfig::default(),
            datastore: default_datastore(),
            appliances: Vec::new(),
            toolkit: ToolkitConfig::default(),
            site: SiteConfig::default(),
            tnlcm: TnlcmConfig::default(),
            polling: PollingConfig::default(),
            work_dir: default_work_dir(),
        }
    }
}

impl InstallerConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read or parsed and
    /// [`Error::ValidationError`] if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] on malformed YAML and
    /// [`Error::ValidationError`] if a value is out of range.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty file means "all defaults".
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)
                .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Polling policy derived from the `polling` section.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        let policy = WaitPolicy::new().with_interval(self.polling.interval());
        match self.polling.max_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }

    /// Absolute or work-dir relative path of the tenant password file.
    #[must_use]
    pub fn password_file(&self) -> PathBuf {
        self.work_dir.join(&self.tenant.password_file)
    }

    /// Where the site repository is checked out.
    #[must_use]
    pub fn site_checkout_dir(&self) -> PathBuf {
        self.work_dir.join("sites")
    }
}

/// OpenNebula front-end settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OpenNebulaConfig {
    /// Host name or address other services use to reach the front-end
    #[validate(length(min = 1))]
    #[serde(default = "default_frontend_host")]
    pub frontend_host: String,

    /// Path of the daemon configuration file
    #[serde(default = "default_oned_conf")]
    pub oned_conf: PathBuf,

    /// XML-RPC port
    #[validate(range(min = 1))]
    #[serde(default = "default_xmlrpc_port")]
    pub xmlrpc_port: u16,

    /// Flow service port
    #[validate(range(min = 1))]
    #[serde(default = "default_flow_port")]
    pub flow_port: u16,

    /// Whether downstream clients may skip TLS verification
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Command restarting the front-end services
    #[validate(length(min = 1))]
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,

    /// Command whose success means the front-end is answering
    #[validate(length(min = 1))]
    #[serde(default = "default_health_check_command")]
    pub health_check_command: Vec<String>,
}

fn default_frontend_host() -> String {
    "localhost".to_string()
}

fn default_oned_conf() -> PathBuf {
    PathBuf::from("/etc/one/oned.conf")
}

const fn default_xmlrpc_port() -> u16 {
    2633
}

const fn default_flow_port() -> u16 {
    2474
}

const fn default_insecure() -> bool {
    true
}

fn default_restart_command() -> Vec<String> {
    vec![
        "systemctl".to_string(),
        "restart".to_string(),
        "opennebula".to_string(),
    ]
}

fn default_health_check_command() -> Vec<String> {
    vec!["oneuser".to_string(), "show".to_string()]
}

impl OpenNebulaConfig {
    /// XML-RPC endpoint as seen from appliances.
    #[must_use]
    pub fn rpc_endpoint(&self) -> String {
        format!("http://{}:{}/RPC2", self.frontend_host, self.xmlrpc_port)
    }

    /// Flow endpoint as seen from appliances.
    #[must_use]
    pub fn flow_endpoint(&self) -> String {
        format!("http://{}:{}", self.frontend_host, self.flow_port)
    }
}

impl Default for OpenNebulaConfig {
    fn default() -> Self {
        Self {
            frontend_host: default_frontend_host(),
            oned_conf: default_oned_conf(),
            xmlrpc_port: default_xmlrpc_port(),
            flow_port: default_flow_port(),
            insecure: default_insecure(),
            restart_command: default_restart_command(),
            health_check_command: default_health_check_command(),
        }
    }
}

/// Tenant user and group owning everything the installer produces.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TenantConfig {
    /// User name
    #[validate(length(min = 1))]
    #[serde(default = "default_tenant_user")]
    pub username: String,

    /// Group name
    #[validate(length(min = 1))]
    #[serde(default = "default_tenant_group")]
    pub group: String,

    /// Password file, relative to the work directory unless absolute
    #[serde(default = "default_password_file")]
    pub password_file: PathBuf,

    /// ACL rules; `{group}` is replaced with the group id
    #[serde(default = "default_acl_rules")]
    pub acl_rules: Vec<String>,
}

fn default_tenant_user() -> String {
    "jenkins-user".to_string()
}

fn default_tenant_group() -> String {
    "jenkins-group".to_string()
}

fn default_password_file() -> PathBuf {
    PathBuf::from("jenkins-user.password")
}

fn default_acl_rules() -> Vec<String> {
    vec![
        "@{group} VM+NET+IMAGE+TEMPLATE+DOCUMENT+SECGROUP/* CREATE *".to_string(),
        "@{group} DATASTORE+CLUSTER+HOST/* USE *".to_string(),
    ]
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            username: default_tenant_user(),
            group: default_tenant_group(),
            password_file: default_password_file(),
            acl_rules: default_acl_rules(),
        }
    }
}

/// How the installer waits for a freshly registered marketplace to be
/// indexed by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorPolicy {
    /// Sleep the full monitoring interval
    Wait,
    /// Temporarily shorten the monitoring interval and restart the daemon
    FastForward,
}

impl MonitorPolicy {
    /// Returns the policy as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::FastForward => "fast-forward",
        }
    }
}

impl FromStr for MonitorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wait" => Ok(Self::Wait),
            "fast-forward" | "fast_forward" | "fast" => Ok(Self::FastForward),
            _ => Err(Error::InvalidRequest(format!(
                "Unknown marketplace monitor policy `{s}` (expected wait or fast-forward)"
            ))),
        }
    }
}

impl fmt::Display for MonitorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketplace registered by the installer.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MarketplaceConfig {
    /// Marketplace name
    #[validate(length(min = 1))]
    #[serde(default = "default_marketplace_name")]
    pub name: String,

    /// Free-text description
    #[serde(default = "default_marketplace_description")]
    pub description: String,

    /// Appliance catalog endpoint
    #[validate(url)]
    #[serde(default = "default_marketplace_endpoint")]
    pub endpoint: String,

    /// Monitoring policy; asked interactively when absent
    #[serde(default)]
    pub monitor: Option<MonitorPolicy>,

    /// Front-end default monitoring interval in seconds
    #[validate(range(min = 1))]
    #[serde(default = "default_monitor_interval_secs")]
    pub default_interval_secs: u64,

    /// Shortened monitoring interval in seconds
    #[validate(range(min = 1))]
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,

    /// Extra wait added to the shortened interval
    #[serde(default = "default_epsilon_secs")]
    pub epsilon_secs: u64,
}

fn default_marketplace_name() -> String {
    "6G-SANDBOX".to_string()
}

fn default_marketplace_description() -> String {
    "6G-SANDBOX appliance marketplace".to_string()
}

fn default_marketplace_endpoint() -> String {
    "https://marketplace.mobilesandbox.cloud:9443/appliance".to_string()
}

const fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MARKET_MONITOR_INTERVAL_SECS
}

const fn default_fast_interval_secs() -> u64 {
    FAST_MARKET_MONITOR_INTERVAL_SECS
}

const fn default_epsilon_secs() -> u64 {
    DEFAULT_MONITOR_EPSILON_SECS
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            name: default_marketplace_name(),
            description: default_marketplace_description(),
            endpoint: default_marketplace_endpoint(),
            monitor: None,
            default_interval_secs: default_monitor_interval_secs(),
            fast_interval_secs: default_fast_interval_secs(),
            epsilon_secs: default_epsilon_secs(),
        }
    }
}

/// One appliance to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ApplianceConfig {
    /// Appliance name in the marketplace, also the local artifact name
    #[validate(length(min = 1))]
    pub name: String,

    /// Marketplace the appliance is published in
    #[validate(length(min = 1))]
    #[serde(default = "default_appliance_marketplace")]
    pub marketplace: String,
}

fn default_appliance_marketplace() -> String {
    "OpenNebula Public".to_string()
}

/// Toolkit service settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ToolkitConfig {
    /// Appliance providing the toolkit service template
    #[validate(length(min = 1))]
    #[serde(default = "default_toolkit_appliance")]
    pub appliance: String,

    /// Marketplace publishing the toolkit appliance
    #[validate(length(min = 1))]
    #[serde(default = "default_marketplace_name")]
    pub marketplace: String,

    /// Name given to the instantiated service
    #[validate(length(min = 1))]
    #[serde(default = "default_toolkit_service_name")]
    pub service_name: String,

    /// Role running Jenkins
    #[serde(default = "default_jenkins_role")]
    pub jenkins_role: String,

    /// Role running the lifecycle manager
    #[serde(default = "default_tnlcm_role")]
    pub tnlcm_role: String,

    /// User-template attribute holding the Jenkins SSH public key
    #[serde(default = "default_ssh_key_attribute")]
    pub ssh_key_attribute: String,

    /// Port the lifecycle manager listens on inside its VM
    #[validate(range(min = 1))]
    #[serde(default = "default_tnlcm_port")]
    pub tnlcm_port: u16,

    /// Network slot name to virtual network name
    #[serde(default)]
    pub network_bindings: BTreeMap<String, String>,

    /// Fixed custom attribute values
    #[serde(default)]
    pub attribute_values: BTreeMap<String, String>,
}

fn default_toolkit_appliance() -> String {
    "Service 6G-Sandbox Toolkit".to_string()
}

fn default_toolkit_service_name() -> String {
    "6G-Sandbox Toolkit".to_string()
}

fn default_jenkins_role() -> String {
    "jenkins".to_string()
}

fn default_tnlcm_role() -> String {
    "tnlcm".to_string()
}

fn default_ssh_key_attribute() -> String {
    "JENKINS_SSH_PUBLIC_KEY".to_string()
}

const fn default_tnlcm_port() -> u16 {
    5000
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            appliance: default_toolkit_appliance(),
            marketplace: default_marketplace_name(),
            service_name: default_toolkit_service_name(),
            jenkins_role: default_jenkins_role(),
            tnlcm_role: default_tnlcm_role(),
            ssh_key_attribute: default_ssh_key_attribute(),
            tnlcm_port: default_tnlcm_port(),
            network_bindings: BTreeMap::new(),
            attribute_values: BTreeMap::new(),
        }
    }
}

/// Site configuration repository.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SiteConfig {
    /// HTTPS URL of the sites repository
    #[validate(url)]
    #[serde(default = "default_site_repository")]
    pub repository: String,

    /// Site name; also the branch and directory name. Asked when absent
    #[serde(default)]
    pub name: Option<String>,

    /// Repository access token. Asked when absent
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Template copied for a new site
    #[serde(default = "default_site_template")]
    pub template_path: PathBuf,

    /// Commit author name
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Commit author email
    #[validate(email)]
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Site values set without asking, keyed by dotted path
    #[serde(default)]
    pub values: BTreeMap<String, serde_yaml::Value>,
}

fn default_site_repository() -> String {
    "https://github.com/6G-SANDBOX/6G-Sandbox-Sites.git".to_string()
}

fn default_site_template() -> PathBuf {
    PathBuf::from(".dummy_site/core.yaml")
}

fn default_author_name() -> String {
    "6G-SANDBOX installer".to_string()
}

fn default_author_email() -> String {
    "installer@6g-sandbox.eu".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            repository: default_site_repository(),
            name: None,
            token: None,
            template_path: default_site_template(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            values: BTreeMap::new(),
        }
    }
}

/// Lifecycle manager registration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TnlcmConfig {
    /// Base URL; derived from the toolkit service when absent
    #[validate(url)]
    #[serde(default)]
    pub url: Option<String>,

    /// Login name
    #[validate(length(min = 1))]
    #[serde(default = "default_tnlcm_username")]
    pub username: String,

    /// Password. Asked when absent
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Trial network descriptor to register; the phase is skipped when absent
    #[serde(default)]
    pub descriptor: Option<PathBuf>,

    /// Library reference kind (`branch`, `tag` or `commit`)
    #[serde(default = "default_library_reference_type")]
    pub library_reference_type: String,

    /// Library reference value
    #[serde(default = "default_library_reference_value")]
    pub library_reference_value: String,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_tnlcm_timeout_secs")]
    pub timeout_secs: u64,

    /// Accept self-signed certificates
    #[serde(default)]
    pub insecure: bool,
}

fn default_tnlcm_username() -> String {
    "tnlcm".to_string()
}

fn default_library_reference_type() -> String {
    "branch".to_string()
}

fn default_library_reference_value() -> String {
    "main".to_string()
}

const fn default_tnlcm_timeout_secs() -> u64 {
    60
}

impl TnlcmConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TnlcmConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: default_tnlcm_username(),
            password: None,
            descriptor: None,
            library_reference_type: default_library_reference_type(),
            library_reference_value: default_library_reference_value(),
            timeout_secs: default_tnlcm_timeout_secs(),
            insecure: false,
        }
    }
}

/// Polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PollingConfig {
    /// Seconds between two polls
    #[validate(range(max = 3600))]
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,

    /// Attempt ceiling; unbounded when absent
    #[validate(range(min = 1))]
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Seconds to wait after an export before touching its artifacts
    #[serde(default = "default_export_grace_secs")]
    pub export_grace_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_export_grace_secs() -> u64 {
    DEFAULT_EXPORT_GRACE_SECS
}

impl PollingConfig {
    /// Poll interval as a Duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Export grace period as a Duration.
    #[must_use]
    pub const fn export_grace(&self) -> Duration {
        Duration::from_secs(self.export_grace_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_attempts: None,
            export_grace_secs: default_export_grace_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = InstallerConfig::from_yaml("").unwrap();
        assert_eq!(config.marketplace.name, "6G-SANDBOX");
        assert_eq!(config.marketplace.default_interval_secs, 600);
        assert_eq!(config.marketplace.fast_interval_secs, 10);
        assert_eq!(config.marketplace.monitor, None);
        assert_eq!(config.datastore, "default");
        assert_eq!(config.work_dir, InstallerConfig::default().work_dir);
        assert_eq!(config.toolkit.ssh_key_attribute, "JENKINS_SSH_PUBLIC_KEY");
        assert!(!config.wait_policy().is_bounded());
    }

    #[test]
    fn test_partial_document() {
        let raw = r"
opennebula:
  frontend_host: 10.0.0.5
marketplace:
  monitor: fast-forward
appliances:
  - name: Ubuntu 22.04
polling:
  interval_secs: 2
  max_attempts: 30
toolkit:
  network_bindings:
    Public: vnet-public
";
        let config = InstallerConfig::from_yaml(raw).unwrap();
        assert_eq!(config.opennebula.rpc_endpoint(), "http://10.0.0.5:2633/RPC2");
        assert_eq!(config.opennebula.flow_endpoint(), "http://10.0.0.5:2474");
        assert_eq!(config.marketplace.monitor, Some(MonitorPolicy::FastForward));
        assert_eq!(config.appliances.len(), 1);
        assert_eq!(config.appliances[0].marketplace, "OpenNebula Public");
        assert_eq!(
            config.toolkit.network_bindings.get("Public").map(String::as_str),
            Some("vnet-public")
        );

        let policy = config.wait_policy();
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, Some(30));
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let raw = "marketplace:\n  endpoint: not a url\n";
        let err = InstallerConfig::from_yaml(raw).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[test]
    fn test_validation_rejects_zero_ceiling() {
        let raw = "polling:\n  max_attempts: 0\n";
        assert!(matches!(
            InstallerConfig::from_yaml(raw),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_tnlcm_client_settings() {
        let defaults = InstallerConfig::default();
        assert_eq!(defaults.tnlcm.timeout(), Duration::from_secs(60));
        assert!(!defaults.tnlcm.insecure);

        let raw = "tnlcm:\n  timeout_secs: 5\n  insecure: true\n";
        let config = InstallerConfig::from_yaml(raw).unwrap();
        assert_eq!(config.tnlcm.timeout(), Duration::from_secs(5));
        assert!(config.tnlcm.insecure);

        assert!(matches!(
            InstallerConfig::from_yaml("tnlcm:\n  timeout_secs: 0\n"),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = InstallerConfig::from_yaml("appliances: {name: [").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "work_dir: /tmp/sandbox\ntenant:\n  username: alice").unwrap();

        let config = InstallerConfig::load(file.path()).unwrap();
        assert_eq!(config.tenant.username, "alice");
        assert_eq!(
            config.password_file(),
            PathBuf::from("/tmp/sandbox/jenkins-user.password")
        );
        assert_eq!(config.site_checkout_dir(), PathBuf::from("/tmp/sandbox/sites"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = InstallerConfig::load("/nonexistent/installer.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_monitor_policy_from_str() {
        assert_eq!("wait".parse::<MonitorPolicy>().unwrap(), MonitorPolicy::Wait);
        assert_eq!(
            "fast-forward".parse::<MonitorPolicy>().unwrap(),
            MonitorPolicy::FastForward
        );
        assert!("later".parse::<MonitorPolicy>().is_err());
        assert_eq!(MonitorPolicy::FastForward.to_string(), "fast-forward");
    }
}

//! Whole installs against the in-memory front-end.
//!
//! Monitoring waits and polls run on a paused clock. The sites repository is
//! a mock that "clones" by writing the site template.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mockall::predicate::{always, eq};
use sandbox_core::config::{ApplianceConfig, InstallerConfig};
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use sandbox_installer::{run_install, InstallContext, Phase};
use sandbox_site::{MockVersionControl, Vault};
use sandbox_test_utils::{CatalogApp, FakeOne, ScriptedPrompter};
use secrecy::SecretString;
use serde_json::Value;

const ONED_CONF: &str = "PORT = 2633\nMONITORING_INTERVAL_MARKET = 600\n";
const SITE_TEMPLATE: &str = "site_hypervisor: one\nsite_dns: 1.1.1.1\n";
const SSH_KEY: &str = "ssh-ed25519 AAAA jenkins@toolkit";

fn config(work_dir: &Path) -> InstallerConfig {
    let oned_conf = work_dir.join("oned.conf");
    fs::write(&oned_conf, ONED_CONF).unwrap();

    let raw = format!(
        r"
work_dir: {work}
opennebula:
  frontend_host: 10.0.0.5
  oned_conf: {conf}
marketplace:
  monitor: fast-forward
appliances:
  - name: Ubuntu 22.04
    marketplace: OpenNebula Public
toolkit:
  network_bindings:
    Public: vnet-public
site:
  name: uma
  token: ghp_token
  values:
    site_dns: 8.8.8.8
polling:
  interval_secs: 1
  export_grace_secs: 0
",
        work = work_dir.display(),
        conf = oned_conf.display(),
    );
    InstallerConfig::from_yaml(&raw).unwrap()
}

fn front_end() -> Arc<FakeOne> {
    let fake = Arc::new(FakeOne::new().with_polls_until_ready(2));
    fake.add_vnet("vnet-public");
    fake.add_catalog_app("OpenNebula Public", CatalogApp::vm("Ubuntu 22.04", &["ubuntu.qcow2"]));
    fake.add_catalog_app(
        "6G-SANDBOX",
        CatalogApp::service(
            "Service 6G-Sandbox Toolkit",
            &[("jenkins", &["jenkins.qcow2"][..]), ("tnlcm", &["tnlcm.qcow2"][..])],
        )
        .with_custom_attr("ONEAPP_JENKINS_OPENNEBULA_ENDPOINT", "M|text|Front-end endpoint")
        .with_custom_attr("ONEAPP_JENKINS_OPENNEBULA_FLOW_ENDPOINT", "M|text|Flow endpoint")
        .with_custom_attr("ONEAPP_JENKINS_OPENNEBULA_USERNAME", "M|text|User")
        .with_custom_attr("ONEAPP_JENKINS_OPENNEBULA_PASSWORD", "M|password|Password")
        .with_custom_attr("ONEAPP_JENKINS_OPENNEBULA_INSECURE", "M|boolean|Skip TLS checks||YES")
        .with_custom_attr("ONEAPP_JENKINS_SITES_TOKEN", "M|password|Sites token")
        .with_custom_attr("ONEAPP_TNLCM_ADMIN_PASSWORD", "M|password|TNLCM admin password")
        .with_network("Public", "M|network|Public network| |"),
    );
    fake.set_role_output("jenkins", "JENKINS_SSH_PUBLIC_KEY", SSH_KEY);
    fake
}

/// Sites repository mock expecting one run on a new branch.
fn sites_repository() -> MockVersionControl {
    let mut vcs = MockVersionControl::new();
    vcs.expect_clone_or_open()
        .with(eq("https://github.com/6G-SANDBOX/6G-Sandbox-Sites.git"), always())
        .times(1)
        .returning(|_, target| {
            fs::create_dir_all(target.join(".dummy_site")).unwrap();
            fs::write(target.join(".dummy_site/core.yaml"), SITE_TEMPLATE).unwrap();
            Ok(())
        });
    vcs.expect_checkout_branch()
        .with(always(), eq("uma"))
        .times(1)
        .returning(|_, _| Ok(true));
    vcs.expect_commit_all()
        .with(always(), eq("Configure site uma"))
        .times(1)
        .returning(|_, _| Ok(Some("abc123".to_string())));
    vcs.expect_push()
        .with(always(), eq("uma"))
        .times(1)
        .returning(|_, _| Ok(()));
    vcs
}

#[tokio::test(start_paused = true)]
async fn test_full_install() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fake = front_end();
    // TNLCM admin password, then the site walk asks `site_hypervisor`.
    let prompter = ScriptedPrompter::new(["tnlcm-admin", ""]);
    let mut ctx = InstallContext::new(&config, fake.clone(), &prompter)
        .with_version_control(Arc::new(sites_repository()));

    let summary = run_install(&mut ctx, Phase::Environment).await.unwrap();

    assert_eq!(summary.phases, Phase::ALL.to_vec());
    assert_eq!(summary.tenant.as_deref(), Some("jenkins-user"));
    assert_eq!(summary.trial_network, None);
    assert_eq!(ctx.imported().len(), 2);

    // Tenant and marketplace.
    let uid = fake.id_of(EntityKind::User, "jenkins-user").unwrap();
    let gid = fake.id_of(EntityKind::Group, "jenkins-group").unwrap();
    assert!(fake.id_of(EntityKind::Marketplace, "6G-SANDBOX").is_some());
    assert_eq!(fake.restarts(), 2);
    assert_eq!(fake.acl_rules().len(), 2);

    // Everything imported and instantiated belongs to the tenant.
    for (_, artifacts) in ctx.imported() {
        for image in &artifacts.image_ids {
            assert_eq!(fake.owner_of(EntityKind::Image, image.get()), Some((uid, gid)));
        }
    }
    let service = summary.toolkit_service.unwrap();
    assert_eq!(fake.owner_of(EntityKind::Service, service.get()), Some((uid, gid)));
    assert_eq!(fake.count(EntityKind::Vm), 2);

    // Derived attributes reached the service; only the admin password was asked.
    let payload = &fake.instantiate_payloads()[0];
    let attrs = &payload["custom_attrs_values"];
    assert_eq!(attrs["ONEAPP_JENKINS_OPENNEBULA_ENDPOINT"], "http://10.0.0.5:2633/RPC2");
    assert_eq!(attrs["ONEAPP_JENKINS_OPENNEBULA_FLOW_ENDPOINT"], "http://10.0.0.5:2474");
    assert_eq!(attrs["ONEAPP_JENKINS_OPENNEBULA_USERNAME"], "jenkins-user");
    assert_eq!(attrs["ONEAPP_JENKINS_OPENNEBULA_INSECURE"], "YES");
    assert_eq!(attrs["ONEAPP_JENKINS_SITES_TOKEN"], "ghp_token");
    assert_eq!(attrs["ONEAPP_TNLCM_ADMIN_PASSWORD"], "tnlcm-admin");
    let password = fs::read_to_string(config.password_file()).unwrap();
    assert_eq!(attrs["ONEAPP_JENKINS_OPENNEBULA_PASSWORD"], password.trim());

    // The Jenkins key is authorized for the tenant.
    let user: Value = fake.document(EntityKind::User, uid).unwrap();
    assert!(user["TEMPLATE"]["SSH_PUBLIC_KEY"]
        .as_str()
        .unwrap()
        .contains(SSH_KEY));

    // The site file was seeded, filled in and encrypted.
    let site = summary.site.unwrap();
    assert!(site.seeded && site.pushed);
    assert_eq!(site.asked, 1);
    assert!(Vault::is_encrypted(&site.site_file).unwrap());
    Vault::new(fake.clone())
        .decrypt(
            &site.site_file,
            &sandbox_site::vault_secret(&SecretString::from("ghp_token".to_string())),
        )
        .await
        .unwrap();
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(&site.site_file).unwrap()).unwrap();
    assert_eq!(doc["site_dns"], "8.8.8.8");
    assert_eq!(doc["site_hypervisor"], "one");
}

#[tokio::test(start_paused = true)]
async fn test_resumed_install_reuses_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fake = front_end();

    let prompter = ScriptedPrompter::new(["tnlcm-admin", ""]);
    let mut first = InstallContext::new(&config, fake.clone(), &prompter)
        .with_version_control(Arc::new(sites_repository()));
    run_install(&mut first, Phase::Environment).await.unwrap();
    let images = fake.count(EntityKind::Image);

    // The branch exists now and the edited file matches the committed one.
    let mut vcs = MockVersionControl::new();
    vcs.expect_clone_or_open().times(1).returning(|_, _| Ok(()));
    vcs.expect_checkout_branch().times(1).returning(|_, _| Ok(false));
    vcs.expect_commit_all().times(1).returning(|_, _| Ok(None));
    vcs.expect_push().times(0);

    let prompter = ScriptedPrompter::new([""]);
    let mut second =
        InstallContext::new(&config, fake.clone(), &prompter).with_version_control(Arc::new(vcs));
    let summary = run_install(&mut second, Phase::Toolkit).await.unwrap();

    assert_eq!(
        summary.phases,
        vec![Phase::Toolkit, Phase::Ownership, Phase::Site, Phase::Tnlcm]
    );
    assert_eq!(fake.count(EntityKind::Image), images);
    assert_eq!(fake.count(EntityKind::Service), 1);
    assert_eq!(fake.instantiate_payloads().len(), 1);
    assert_eq!(prompter.asked(), vec!["site_hypervisor"]);

    let site = summary.site.unwrap();
    assert!(!site.seeded);
    assert!(!site.pushed);
    assert!(Vault::is_encrypted(&site.site_file).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_missing_appliance_stops_the_install() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.appliances.push(ApplianceConfig {
        name: "Debian 12".to_string(),
        marketplace: "OpenNebula Public".to_string(),
    });
    let fake = front_end();
    let prompter = ScriptedPrompter::new(Vec::<String>::new());
    let mut ctx = InstallContext::new(&config, fake.clone(), &prompter);

    let err = run_install(&mut ctx, Phase::Environment).await.unwrap_err();

    assert!(matches!(err, Error::NotFound(msg) if msg.contains("Debian 12")));
    assert_eq!(fake.count(EntityKind::Service), 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_policy_is_asked_when_not_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.marketplace.monitor = None;
    let fake = front_end();
    let prompter = ScriptedPrompter::new(["wait"]);
    let mut ctx = InstallContext::new(&config, fake.clone(), &prompter);

    // Stop after the marketplace by failing the next phase's first import.
    fake.fail_export("Ubuntu 22.04");
    let err = run_install(&mut ctx, Phase::Marketplace).await.unwrap_err();

    assert!(matches!(err, Error::CommandFailed { .. }));
    assert_eq!(prompter.asked().len(), 1);
    assert_eq!(fake.restarts(), 0);
    assert!(fake.id_of(EntityKind::Marketplace, "6G-SANDBOX").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_prompt_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.site.token = None;
    let fake = front_end();
    let mut prompter = sandbox_core::prompt::MockPrompter::new();
    prompter
        .expect_password()
        .returning(|_| Err(Error::Interrupted));
    let mut ctx = InstallContext::new(&config, fake.clone(), &prompter);

    let err = run_install(&mut ctx, Phase::Toolkit).await.unwrap_err();

    assert_eq!(err, Error::Interrupted);
    assert_eq!(err.exit_code(), 1);
    assert_eq!(fake.count(EntityKind::Service), 0);
}

//! Marketplace registration scenarios against the in-memory front-end.
//!
//! Monitoring waits run on a paused clock so the ten-minute default interval
//! elapses instantly.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use sandbox_appliance::{Frontend, MarketplaceRegistrar, MarketplaceSpec, MonitorTimings, OnedConf};
use sandbox_core::config::{MarketplaceConfig, MonitorPolicy, OpenNebulaConfig};
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use sandbox_one::OneClient;
use sandbox_test_utils::{CatalogApp, FakeOne};

const ONED_CONF: &str = "PORT = 2633\nMONITORING_INTERVAL_MARKET = 600\nMONITORING_INTERVAL_HOST = 180\n";

fn registrar(fake: &Arc<FakeOne>, oned_conf: &Path, health_check: &[&str]) -> MarketplaceRegistrar {
    let client = OneClient::new(fake.clone());
    let config = OpenNebulaConfig {
        oned_conf: oned_conf.to_path_buf(),
        health_check_command: health_check.iter().map(ToString::to_string).collect(),
        ..OpenNebulaConfig::default()
    };
    MarketplaceRegistrar::new(
        client.clone(),
        Frontend::from_config(client, &config),
        MonitorTimings::from_config(&MarketplaceConfig::default()),
    )
}

fn spec() -> MarketplaceSpec {
    MarketplaceSpec::from_config(&MarketplaceConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_fast_forward_registers_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("oned.conf");
    fs::write(&conf, ONED_CONF).unwrap();

    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app("6G-SANDBOX", CatalogApp::service("Service 6G-Sandbox Toolkit", &[]));
    fake.add_catalog_app("6G-SANDBOX", CatalogApp::vm("6G-Sandbox TNLCM", &["tnlcm.qcow2"]));

    let registrar = registrar(&fake, &conf, &["oneuser", "show"]);
    let registration = registrar
        .ensure_marketplace(&spec(), MonitorPolicy::FastForward)
        .await
        .unwrap();

    assert!(registration.is_created());
    assert_eq!(
        fake.id_of(EntityKind::Marketplace, "6G-SANDBOX"),
        Some(registration.id().get())
    );
    assert_eq!(fake.restarts(), 2);
    assert_eq!(fake.calls_matching("oneuser show").len(), 2);
    assert_eq!(
        OnedConf::new(&conf).market_interval().await.unwrap().as_deref(),
        Some("600")
    );
    assert!(fs::read_to_string(&conf)
        .unwrap()
        .contains("MONITORING_INTERVAL_HOST = 180"));

    let apps = registrar.list_appliances("6G-SANDBOX").await.unwrap();
    assert_eq!(apps.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_existing_marketplace_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("oned.conf");
    fs::write(&conf, ONED_CONF).unwrap();

    let fake = Arc::new(FakeOne::new());
    let id = fake.add_marketplace("6G-SANDBOX");

    let registration = registrar(&fake, &conf, &["oneuser", "show"])
        .ensure_marketplace(&spec(), MonitorPolicy::FastForward)
        .await
        .unwrap();

    assert!(!registration.is_created());
    assert_eq!(registration.id().get(), id);
    assert_eq!(fake.restarts(), 0);
    assert_eq!(fs::read_to_string(&conf).unwrap(), ONED_CONF);
}

#[tokio::test(start_paused = true)]
async fn test_wait_policy_does_not_restart() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("oned.conf");
    fs::write(&conf, ONED_CONF).unwrap();

    let fake = Arc::new(FakeOne::new());
    let registration = registrar(&fake, &conf, &["oneuser", "show"])
        .ensure_marketplace(&spec(), MonitorPolicy::Wait)
        .await
        .unwrap();

    assert!(registration.is_created());
    assert_eq!(fake.restarts(), 0);
    assert_eq!(fs::read_to_string(&conf).unwrap(), ONED_CONF);
}

#[tokio::test(start_paused = true)]
async fn test_failed_health_check_is_fatal_and_restores_interval() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("oned.conf");
    fs::write(&conf, ONED_CONF).unwrap();

    let fake = Arc::new(FakeOne::new());
    let err = registrar(&fake, &conf, &["onevm", "show", "999"])
        .ensure_marketplace(&spec(), MonitorPolicy::FastForward)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ServiceUnavailable(_)));
    assert_eq!(fake.restarts(), 1);
    assert_eq!(
        OnedConf::new(&conf).market_interval().await.unwrap().as_deref(),
        Some("600")
    );
}

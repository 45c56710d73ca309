//! Appliance import scenarios against the in-memory front-end.

use std::sync::Arc;
use std::time::Duration;

use sandbox_appliance::{ApplianceImporter, Result};
use sandbox_core::ids::{DatastoreId, GroupId, UserId};
use sandbox_core::types::{ApplianceKind, EntityKind};
use sandbox_core::wait::WaitPolicy;
use sandbox_core::Error;
use sandbox_one::{OneClient, Owner};
use sandbox_test_utils::{CatalogApp, FakeOne};

const PUBLIC: &str = "OpenNebula Public";
const DATASTORE: DatastoreId = DatastoreId::new(1);

fn tenant() -> Owner {
    Owner::new(UserId::new(5), GroupId::new(100))
}

fn importer(fake: &Arc<FakeOne>, policy: WaitPolicy) -> ApplianceImporter {
    ApplianceImporter::new(OneClient::new(fake.clone()), tenant(), policy)
        .with_export_grace(Duration::ZERO)
}

async fn import(fake: &Arc<FakeOne>, name: &str) -> Result<sandbox_appliance::ApplianceArtifacts> {
    importer(fake, WaitPolicy::immediate())
        .import_appliance(name, PUBLIC, DATASTORE)
        .await
}

#[tokio::test]
async fn test_vm_appliance_with_two_disks() {
    let fake = Arc::new(FakeOne::new().with_polls_until_ready(3));
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("apname", &["os.qcow2", "data.qcow2"]));

    let artifacts = import(&fake, "apname").await.unwrap();

    assert_eq!(artifacts.kind, ApplianceKind::Vm);
    assert!(artifacts.exported);
    assert_eq!(artifacts.image_ids.len(), 2);
    assert_eq!(artifacts.template_ids.len(), 1);
    assert_eq!(artifacts.service_template_id, None);

    let mut images = fake.names(EntityKind::Image);
    images.sort();
    assert_eq!(images, vec!["apname-0", "apname-1"]);
    for image in &artifacts.image_ids {
        assert_eq!(fake.image_state(image.get()), Some(1));
        assert_eq!(fake.owner_of(EntityKind::Image, image.get()), Some((5, 100)));
    }
    assert_eq!(
        fake.owner_of(EntityKind::Template, artifacts.template_ids[0].get()),
        Some((5, 100))
    );
}

#[tokio::test]
async fn test_second_import_skips_export_but_still_chowns() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("apname", &["os.qcow2"]));

    let first = import(&fake, "apname").await.unwrap();
    let second = import(&fake, "apname").await.unwrap();

    assert!(first.exported);
    assert!(!second.exported);
    assert_eq!(first.image_ids, second.image_ids);
    assert_eq!(first.template_ids, second.template_ids);
    assert_eq!(fake.calls_matching("onemarketapp export").len(), 1);
    assert_eq!(fake.calls_matching("oneimage chown").len(), 2);
    assert_eq!(fake.calls_matching("onetemplate chown").len(), 2);
    assert_eq!(fake.count(EntityKind::Image), 1);
}

#[tokio::test]
async fn test_image_appliance_keeps_matching_name() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::image("Ubuntu 22.04"));

    let artifacts = import(&fake, "Ubuntu 22.04").await.unwrap();

    assert_eq!(artifacts.kind, ApplianceKind::Image);
    assert_eq!(artifacts.image_ids.len(), 1);
    assert_eq!(artifacts.template_ids.len(), 1);
    assert!(fake.calls_matching("oneimage rename").is_empty());
}

#[tokio::test]
async fn test_image_appliance_is_renamed() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(
        PUBLIC,
        CatalogApp::image("Ubuntu 22.04").with_disks(&["ubuntu2204.qcow2"]),
    );

    let artifacts = import(&fake, "Ubuntu 22.04").await.unwrap();

    assert_eq!(
        fake.calls_matching("oneimage rename"),
        vec![format!("oneimage rename {} Ubuntu 22.04", artifacts.image_ids[0])]
    );
    assert_eq!(fake.id_of(EntityKind::Image, "Ubuntu 22.04"), Some(artifacts.image_ids[0].get()));
}

#[tokio::test]
async fn test_service_appliance_renames_per_template() {
    let fake = Arc::new(FakeOne::new().with_polls_until_ready(1));
    fake.add_catalog_app(
        PUBLIC,
        CatalogApp::service(
            "Toolkit",
            &[("jenkins", &["jenkins.qcow2"][..]), ("tnlcm", &["tnlcm.qcow2", "mongo.qcow2"][..])],
        ),
    );

    let artifacts = import(&fake, "Toolkit").await.unwrap();

    assert_eq!(artifacts.kind, ApplianceKind::Service);
    assert_eq!(artifacts.template_ids.len(), 2);
    assert_eq!(artifacts.image_ids.len(), 3);
    let service_template = artifacts.service_template_id.unwrap();
    assert_eq!(
        fake.owner_of(EntityKind::ServiceTemplate, service_template.get()),
        Some((5, 100))
    );

    let mut images = fake.names(EntityKind::Image);
    images.sort();
    assert_eq!(
        images,
        vec!["Toolkit-jenkins-0", "Toolkit-tnlcm-0", "Toolkit-tnlcm-1"]
    );

    let again = import(&fake, "Toolkit").await.unwrap();
    assert!(!again.exported);
    assert_eq!(again.image_ids.len(), 3);
    assert_eq!(again.service_template_id, Some(service_template));
}

#[tokio::test]
async fn test_image_error_is_fatal_and_nothing_is_chowned() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("broken", &["os.qcow2"]));
    fake.fail_images_of("broken");

    let err = import(&fake, "broken").await.unwrap_err();

    assert!(matches!(
        err,
        Error::EntityFailed { kind: EntityKind::Image, ref state, .. } if state == "ERROR"
    ));
    assert!(fake.calls_matching("oneimage chown").is_empty());
    assert!(fake.calls_matching("onetemplate chown").is_empty());
}

#[tokio::test]
async fn test_export_failure_is_fatal() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("apname", &["os.qcow2"]));
    fake.fail_export("apname");

    let err = import(&fake, "apname").await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }));
    assert_eq!(fake.count(EntityKind::Image), 0);
}

#[tokio::test]
async fn test_appliance_must_be_in_named_marketplace() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("apname", &["os.qcow2"]));

    let err = importer(&fake, WaitPolicy::immediate())
        .import_appliance("apname", "6G-SANDBOX", DATASTORE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(msg) if msg.contains("6G-SANDBOX")));
}

#[tokio::test]
async fn test_half_ready_appliance_is_confirmed_on_rerun() {
    let fake = Arc::new(FakeOne::new().with_polls_until_ready(6));
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("slow", &["os.qcow2"]));

    let err = importer(&fake, WaitPolicy::immediate().with_max_attempts(2))
        .import_appliance("slow", PUBLIC, DATASTORE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(fake.image_state(0), Some(4));
    assert!(fake.calls_matching("oneimage chown").is_empty());

    let artifacts = import(&fake, "slow").await.unwrap();
    assert!(!artifacts.exported);
    assert_eq!(fake.image_state(artifacts.image_ids[0].get()), Some(1));
    assert_eq!(fake.calls_matching("onemarketapp export").len(), 1);
    assert_eq!(fake.calls_matching("oneimage chown").len(), 1);
}

#[tokio::test]
async fn test_chown_failure_is_reported_after_other_artifacts() {
    let fake = Arc::new(FakeOne::new());
    fake.add_catalog_app(PUBLIC, CatalogApp::vm("apname", &["os.qcow2", "data.qcow2"]));
    fake.fail_chown(EntityKind::Image, 0);

    let err = import(&fake, "apname").await.unwrap_err();

    assert!(matches!(err, Error::ChownFailed { kind: EntityKind::Image, id: 0, .. }));
    assert_eq!(fake.owner_of(EntityKind::Image, 1), Some((5, 100)));
    assert_eq!(fake.owner_of(EntityKind::Template, 0), Some((5, 100)));
    assert_eq!(fake.owner_of(EntityKind::Image, 0), Some((0, 0)));
}

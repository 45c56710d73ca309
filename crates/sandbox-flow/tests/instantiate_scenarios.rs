//! Service instantiation scenarios against the in-memory front-end.

use std::collections::BTreeMap;
use std::sync::Arc;

use sandbox_core::ids::{ApplianceId, DatastoreId};
use sandbox_core::types::EntityKind;
use sandbox_core::wait::WaitPolicy;
use sandbox_core::Error;
use sandbox_flow::{role_outputs, AttributeResolver, ServiceInstantiator};
use sandbox_one::OneClient;
use sandbox_test_utils::{CatalogApp, FakeOne, ScriptedPrompter};
use secrecy::SecretString;
use serde_json::json;

const TEMPLATE: &str = "Service Toolkit";
const SERVICE: &str = "6G-Sandbox Toolkit";

/// Front-end with the toolkit service template exported and two networks.
async fn toolkit(polls: u32) -> Arc<FakeOne> {
    let fake = Arc::new(FakeOne::new().with_polls_until_ready(polls));
    fake.add_vnet("vnet-public");
    fake.add_vnet("vnet-private");
    fake.add_catalog_app(
        "OpenNebula Public",
        CatalogApp::service(
            TEMPLATE,
            &[("jenkins", &["jenkins.qcow2"][..]), ("tnlcm", &["tnlcm.qcow2"][..])],
        )
        .with_custom_attr("ONEAPP_JENKINS_PASSWORD", "M|password|Jenkins admin password")
        .with_custom_attr("ONEAPP_TNLCM_HOST", "O|text|TNLCM host name||tnlcm.local")
        .with_network("Public", "M|network|Public network| |"),
    );
    fake.set_role_output("jenkins", "JENKINS_SSH_PUBLIC_KEY", "ssh-ed25519 AAAA jenkins@toolkit");

    OneClient::new(fake.clone())
        .export_app(ApplianceId::new(0), TEMPLATE, DatastoreId::new(1))
        .await
        .unwrap();
    fake
}

fn attributes() -> AttributeResolver {
    AttributeResolver::new().secret(
        "ONEAPP_JENKINS_PASSWORD",
        SecretString::from("jenkins-pass".to_string()),
    )
}

fn bindings() -> BTreeMap<String, String> {
    [("Public".to_string(), "vnet-public".to_string())].into()
}

#[tokio::test]
async fn test_instantiate_waits_for_all_roles() {
    let fake = toolkit(3).await;
    let instantiator = ServiceInstantiator::new(OneClient::new(fake.clone()), WaitPolicy::immediate());
    let prompter = ScriptedPrompter::new([""]);

    let request = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &bindings(), &prompter)
        .await
        .unwrap();
    let service = instantiator.instantiate(&request).await.unwrap();

    assert!(service.all_roles_running());
    assert_eq!(fake.calls_matching("oneflow show").len(), 3);
    assert_eq!(
        fake.instantiate_payloads(),
        vec![json!({
            "service_name": SERVICE,
            "custom_attrs_values": {
                "ONEAPP_JENKINS_PASSWORD": "jenkins-pass",
                "ONEAPP_TNLCM_HOST": "tnlcm.local"
            },
            "networks_values": [{"Public": {"id": "0"}}]
        })]
    );

    let jenkins = role_outputs(&service, "jenkins").unwrap();
    assert_eq!(
        jenkins.value("JENKINS_SSH_PUBLIC_KEY"),
        Some("ssh-ed25519 AAAA jenkins@toolkit")
    );
    let tnlcm = role_outputs(&service, "tnlcm").unwrap();
    assert!(tnlcm.first_ip().unwrap().starts_with("10.0.0."));
    assert!(matches!(role_outputs(&service, "minio"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_unbound_network_is_selected_by_operator() {
    let fake = toolkit(0).await;
    let instantiator = ServiceInstantiator::new(OneClient::new(fake.clone()), WaitPolicy::immediate());
    let prompter = ScriptedPrompter::new(["tnlcm.example", "vnet-private"]);

    let request = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &BTreeMap::new(), &prompter)
        .await
        .unwrap();

    assert_eq!(request.attributes["ONEAPP_TNLCM_HOST"], "tnlcm.example");
    assert_eq!(request.networks.len(), 1);
    assert_eq!(request.networks[0].0, "Public");
    assert_eq!(request.networks[0].1.get(), 1);
    assert_eq!(prompter.remaining(), 0);
}

#[tokio::test]
async fn test_unknown_binding_is_not_found() {
    let fake = toolkit(0).await;
    let instantiator = ServiceInstantiator::new(OneClient::new(fake), WaitPolicy::immediate());
    let bindings = [("Public".to_string(), "vnet-missing".to_string())].into();

    let err = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &bindings, &ScriptedPrompter::new([""]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(msg) if msg.contains("vnet-missing")));
}

#[tokio::test]
async fn test_failed_role_is_fatal() {
    let fake = toolkit(2).await;
    fake.fail_role("tnlcm");
    let instantiator = ServiceInstantiator::new(OneClient::new(fake.clone()), WaitPolicy::immediate());

    let request = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &bindings(), &ScriptedPrompter::new([""]))
        .await
        .unwrap();
    let err = instantiator.instantiate(&request).await.unwrap_err();

    assert!(matches!(
        err,
        Error::EntityFailed { kind: EntityKind::Service, ref state, .. } if state.contains("tnlcm")
    ));
}

#[tokio::test]
async fn test_bounded_policy_times_out() {
    let fake = toolkit(10).await;
    let instantiator = ServiceInstantiator::new(
        OneClient::new(fake.clone()),
        WaitPolicy::immediate().with_max_attempts(3),
    );

    let request = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &bindings(), &ScriptedPrompter::new([""]))
        .await
        .unwrap();
    let err = instantiator.instantiate(&request).await.unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(fake.calls_matching("oneflow show").len(), 3);
}

#[tokio::test]
async fn test_find_running_reuses_existing_service() {
    let fake = toolkit(1).await;
    let instantiator = ServiceInstantiator::new(OneClient::new(fake.clone()), WaitPolicy::immediate());
    assert!(instantiator.find_running(SERVICE).await.unwrap().is_none());

    let request = instantiator
        .prepare(TEMPLATE, SERVICE, &attributes(), &bindings(), &ScriptedPrompter::new([""]))
        .await
        .unwrap();
    let created = instantiator.instantiate(&request).await.unwrap();

    let found = instantiator.find_running(SERVICE).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(fake.instantiate_payloads().len(), 1);
}

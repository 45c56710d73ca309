//! Trial network registration against a mock TNLCM server.

use std::fs;

use sandbox_core::backend::Credentials;
use sandbox_core::Error;
use sandbox_tnlcm::{LibraryReference, TnlcmClient, TrialNetworkRequest};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DESCRIPTOR: &str = "trial_network:\n  tn_init:\n    type: tn_init\n    dependencies: []\n";

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/user/login"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "access",
            "refresh_token": "refresh"
        })))
        .mount(server)
        .await;
}

async fn client(server: &MockServer) -> TnlcmClient {
    TnlcmClient::new(format!("{}/api/v1", server.uri()))
        .unwrap()
        .authenticate(&Credentials::new("tnlcm", "tnlcm-pass"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_uploads_descriptor_and_fields() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir.path().join("01_descriptor.yaml");
    fs::write(&descriptor, DESCRIPTOR).unwrap();

    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/trial-network"))
        .and(header("authorization", "Bearer access"))
        .and(body_string_contains("name=\"descriptor\"; filename=\"01_descriptor.yaml\""))
        .and(body_string_contains("tn_init"))
        .and(body_string_contains("name=\"deployment_site\"\r\n\r\numa"))
        .and(body_string_contains("name=\"library_reference_type\"\r\n\r\ntag"))
        .and(body_string_contains("name=\"library_reference_value\"\r\n\r\nv0.5.0"))
        .and(body_string_contains("name=\"sites_branch\"\r\n\r\numa"))
        .and(body_string_contains("name=\"tn_id\"\r\n\r\nsandbox"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"tn_id": "sandbox"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = TrialNetworkRequest::new(&descriptor, "uma")
        .with_tn_id("sandbox")
        .with_library(LibraryReference {
            kind: "tag".to_string(),
            value: "v0.5.0".to_string(),
        });
    let created = client(&server)
        .await
        .create_trial_network(&request)
        .await
        .unwrap();

    assert_eq!(created.tn_id, "sandbox");
}

#[tokio::test]
async fn test_rejected_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir.path().join("descriptor.yaml");
    fs::write(&descriptor, "not: [a, descriptor").unwrap();

    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/trial-network"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid descriptor"})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .create_trial_network(&TrialNetworkRequest::new(&descriptor, "uma"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRequest(msg) if msg == "Invalid descriptor"));
}

#[tokio::test]
async fn test_unreachable_server() {
    let client = TnlcmClient::new("http://127.0.0.1:9/api/v1").unwrap();
    let err = client
        .login(&Credentials::new("tnlcm", "tnlcm-pass"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_) | Error::HttpError(_)));
}

use s3sis_store::{StoreClient, StoreError};
use tempfile::tempdir;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_object_returns_body_and_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proj/labels/main/manifest.json"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"label\":\"main\"}"))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), Some("test-token".into())).unwrap();
    let body = client
        .get_object("proj/labels/main/manifest.json")
        .await
        .unwrap();

    assert_eq!(body, b"{\"label\":\"main\"}");
}

#[tokio::test]
async fn get_object_maps_missing_key_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proj/labels/gone/manifest.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    let err = client
        .get_object("proj/labels/gone/manifest.json")
        .await
        .expect_err("expected 404");

    assert!(err.is_not_found());
    assert!(matches!(err, StoreError::Api { .. }));
}

#[tokio::test]
async fn put_object_sends_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/proj/labels/main/manifest.json"))
        .and(body_bytes(b"payload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    client
        .put_object("proj/labels/main/manifest.json", b"payload".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn object_exists_reflects_head_status() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/proj/objects/aa/object"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/proj/objects/bb/object"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    assert!(client.object_exists("proj/objects/aa/object").await);
    assert!(!client.object_exists("proj/objects/bb/object").await);
}

#[tokio::test]
async fn probe_failure_reads_as_absent() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/proj/objects/cc/object"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    assert!(!client.object_exists("proj/objects/cc/object").await);
}

#[tokio::test]
async fn download_to_path_creates_parents_and_renames_into_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proj/objects/dd/object"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let target = dir.path().join("nested/out.bin");
    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    client
        .download_to_path("proj/objects/dd/object", &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    assert!(!target.with_extension("bin.partial").exists());
}

#[tokio::test]
async fn download_failure_leaves_no_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proj/objects/ee/object"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    let err = client
        .download_to_path("proj/objects/ee/object", &target)
        .await
        .expect_err("expected 503");

    assert!(matches!(err, StoreError::Api { .. }));
    assert!(!target.exists());
}

#[tokio::test]
async fn upload_from_path_streams_file_contents() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/proj/objects/ff/object"))
        .and(body_bytes(b"object bytes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = dir.path().join("in.bin");
    std::fs::write(&source, b"object bytes").unwrap();

    let client = StoreClient::with_base_url(&server.uri(), None).unwrap();
    client
        .upload_from_path("proj/objects/ff/object", &source)
        .await
        .unwrap();
}

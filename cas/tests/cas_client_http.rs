//! Exercises `cas::Client` against a real (mocked) HTTP CAS daemon, rather
//! than only unit-testing the request-building logic in isolation.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cas::Client;

#[tokio::test]
async fn add_returns_the_daemon_reported_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"address": "bagQABC"})))
        .mount(&server)
        .await;

    let client = Client::new(server.uri());
    let address = client.add(b"hello world").unwrap();
    assert_eq!(address.0, "bagQABC");
}

#[tokio::test]
async fn cat_streams_back_the_stored_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cat"))
        .and(query_param("address", "bagQABC"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
        .mount(&server)
        .await;

    let client = Client::new(server.uri());
    let address = cas::cas::Address("bagQABC".to_string());
    let bytes = client.cat(&address).unwrap();
    assert_eq!(bytes, b"payload");
}

#[tokio::test]
async fn resolve_reports_no_link_for_a_missing_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resolve"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "no link named 'content'"})),
        )
        .mount(&server)
        .await;

    let client = Client::new(server.uri());
    let root = cas::cas::Address("bagQroot".to_string());
    match client.resolve(&root, "content").unwrap() {
        cas::cas::Resolved::NoLink => {}
        cas::cas::Resolved::Address(a) => panic!("expected NoLink, got {}", a.0),
    }
}

#[tokio::test]
async fn put_raw_rejects_a_daemon_that_echoes_the_wrong_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/put_raw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"address": "not-the-derived-one"})))
        .mount(&server)
        .await;

    let client = Client::new(server.uri());
    let hash = cas::git::hash_of(cas::git::Kind::Blob, b"x");
    let canonical = cas::git::canonical_bytes(cas::git::Kind::Blob, b"x");
    let err = client.put_raw(hash, &canonical).unwrap_err();
    assert!(matches!(err, cas::Error::AddressMismatch { .. }));
}

//! Resource operations and recursive deletion against a mock storage server.

use std::sync::Arc;

use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pod_harness::{Client, ClientConfig, ResourceClient};

fn resource_client() -> ResourceClient {
    let client = Client::with_config("alice", &ClientConfig::default()).unwrap();
    client.set_access_token("T");
    ResourceClient::new(Arc::new(client))
}

fn url(mock_server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", mock_server.uri())).unwrap()
}

fn containment_body(base: &str, members: &[&str]) -> String {
    let triples: Vec<String> = members
        .iter()
        .map(|m| format!("<{base}> <http://www.w3.org/ns/ldp#contains> <{m}> ."))
        .collect();
    triples.join("\n")
}

async fn mount_listing(mock_server: &MockServer, container: &str, members: &[&str]) {
    Mock::given(method("GET"))
        .and(path(container))
        .and(header("accept", "text/turtle"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/turtle")
                .set_body_string(containment_body(container, members)),
        )
        .mount(mock_server)
        .await;
}

async fn mount_delete(mock_server: &MockServer, p: &str, status: u16, expected: u64) {
    Mock::given(method("DELETE"))
        .and(path(p))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .mount(mock_server)
        .await;
}

// =============================================================================
// Recursive deletion
// =============================================================================

#[tokio::test]
async fn delete_resource_recursively_deletes_tree() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, "/storage/", &["/storage/a.ttl", "/storage/sub/"]).await;
    mount_listing(&mock_server, "/storage/sub/", &["/storage/sub/b.ttl"]).await;
    mount_delete(&mock_server, "/storage/a.ttl", 204, 1).await;
    mount_delete(&mock_server, "/storage/sub/b.ttl", 204, 1).await;
    mount_delete(&mock_server, "/storage/sub/", 204, 1).await;
    mount_delete(&mock_server, "/storage/", 204, 1).await;

    let resources = resource_client();
    let outcome = resources.delete_resource_recursively(&url(&mock_server, "/storage/")).await;

    assert_eq!(outcome.attempted.len(), 4);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn partial_failure_never_aborts_siblings_or_container() {
    let mock_server = MockServer::start().await;
    mount_listing(
        &mock_server,
        "/storage/",
        &["/storage/a.ttl", "/storage/b.ttl", "/storage/c.ttl"],
    )
    .await;
    mount_delete(&mock_server, "/storage/a.ttl", 204, 1).await;
    // one member refuses to die; the others and the container still go
    mount_delete(&mock_server, "/storage/b.ttl", 403, 1).await;
    mount_delete(&mock_server, "/storage/c.ttl", 204, 1).await;
    mount_delete(&mock_server, "/storage/", 204, 1).await;

    let resources = resource_client();
    let outcome = resources.delete_resource_recursively(&url(&mock_server, "/storage/")).await;

    assert_eq!(outcome.attempted.len(), 4);
    assert_eq!(outcome.failed, vec![url(&mock_server, "/storage/b.ttl")]);
}

#[tokio::test]
async fn delete_contents_preserves_the_root() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, "/storage/", &["/storage/a.ttl", "/storage/b.ttl"]).await;
    mount_delete(&mock_server, "/storage/a.ttl", 204, 1).await;
    mount_delete(&mock_server, "/storage/b.ttl", 204, 1).await;
    // no DELETE may ever be issued for the root container
    mount_delete(&mock_server, "/storage/", 204, 0).await;

    let resources = resource_client();
    let outcome = resources.delete_contents_recursively(&url(&mock_server, "/storage/")).await;

    assert_eq!(outcome.attempted.len(), 2);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn delete_contents_still_deletes_nested_containers() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, "/storage/", &["/storage/sub/"]).await;
    mount_listing(&mock_server, "/storage/sub/", &["/storage/sub/a.ttl"]).await;
    mount_delete(&mock_server, "/storage/sub/a.ttl", 204, 1).await;
    // the nested container is below the preserved root, so it is deleted
    mount_delete(&mock_server, "/storage/sub/", 204, 1).await;
    mount_delete(&mock_server, "/storage/", 204, 0).await;

    let resources = resource_client();
    let outcome = resources.delete_contents_recursively(&url(&mock_server, "/storage/")).await;

    assert_eq!(outcome.attempted.len(), 2);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn unreadable_listing_is_a_no_op() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_delete(&mock_server, "/storage/", 204, 0).await;

    let resources = resource_client();
    let outcome = resources.delete_resource_recursively(&url(&mock_server, "/storage/")).await;

    assert!(outcome.attempted.is_empty());
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn plain_resource_delete_skips_listing() {
    let mock_server = MockServer::start().await;
    mount_delete(&mock_server, "/storage/file.ttl", 204, 1).await;

    let resources = resource_client();
    let outcome =
        resources.delete_resource_recursively(&url(&mock_server, "/storage/file.ttl")).await;

    assert_eq!(outcome.attempted.len(), 1);
    assert!(outcome.is_complete());
}

// =============================================================================
// Resource operations
// =============================================================================

#[tokio::test]
async fn create_sends_authorized_put() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/storage/new.ttl"))
        .and(header("content-type", "text/turtle"))
        .and(header("authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(201).insert_header("location", "/storage/new.ttl"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let resources = resource_client();
    let headers = resources
        .create(&url(&mock_server, "/storage/new.ttl"), "<> a <http://example.org/Thing> .", "text/turtle")
        .await
        .unwrap();

    assert!(headers.contains_key("location"));
}

#[tokio::test]
async fn create_surfaces_unexpected_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/storage/new.ttl"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&mock_server)
        .await;

    let resources = resource_client();
    let err = resources
        .create(&url(&mock_server, "/storage/new.ttl"), "data", "text/plain")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        pod_harness::ClientError::UnexpectedStatus { status: 409, .. }
    ));
}

#[tokio::test]
async fn acl_link_resolves_relative_target() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/storage/file.ttl"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", "<file.ttl.acl>; rel=\"acl\""),
        )
        .mount(&mock_server)
        .await;

    let resources = resource_client();
    let acl = resources.acl_link(&url(&mock_server, "/storage/file.ttl")).await.unwrap();

    assert_eq!(acl, Some(url(&mock_server, "/storage/file.ttl.acl")));
}

#[tokio::test]
async fn access_controls_reads_wac_allow() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/storage/file.ttl"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("wac-allow", "user=\"read write\", public=\"read\""),
        )
        .mount(&mock_server)
        .await;

    let resources = resource_client();
    let permissions =
        resources.access_controls(&url(&mock_server, "/storage/file.ttl")).await.unwrap();

    assert!(permissions["user"].contains("write"));
    assert!(!permissions["public"].contains("write"));
}

#[tokio::test]
async fn containment_lists_members() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, "/storage/", &["/storage/a.ttl", "/storage/sub/"]).await;

    let resources = resource_client();
    let members = resources.containment(&url(&mock_server, "/storage/")).await.unwrap();

    assert_eq!(
        members,
        vec![url(&mock_server, "/storage/a.ttl"), url(&mock_server, "/storage/sub/")]
    );
}

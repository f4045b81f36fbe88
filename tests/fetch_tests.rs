mod common;

use common::{mount_listing, TestEnvironment};
use mirror_mygithub::{GitHubClient, RepositoryRecord};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Paginated listing walks against a mocked GitHub API

#[tokio::test]
async fn test_walks_all_pages_in_order() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "/user/repos",
        &[&["alice/a", "alice/b"], &["alice/c"], &["alice/d", "alice/e", "alice/f"]],
    )
    .await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();
    let listing = client.fetch_all("/user/repos").await.unwrap();

    let names: Vec<&str> = listing.records.iter().map(|r| r.full_name.as_str()).collect();
    assert_eq!(names, vec!["alice/a", "alice/b", "alice/c", "alice/d", "alice/e", "alice/f"]);
    assert_eq!(listing.pages, 3);
    assert_eq!(
        listing.records[0],
        RepositoryRecord::new("alice/a", "git@host:alice/a.git")
    );
}

#[tokio::test]
async fn test_single_page_makes_one_request() {
    let server = MockServer::start().await;
    mount_listing(&server, "/user/repos", &[&["alice/only"]]).await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();
    let listing = client.fetch_all("/user/repos").await.unwrap();

    assert_eq!(listing.pages, 1);
    assert_eq!(listing.records.len(), 1);
    server.verify().await;
}

#[tokio::test]
async fn test_empty_first_page() {
    let server = MockServer::start().await;
    mount_listing(&server, "/user/starred", &[&[]]).await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();
    let listing = client.fetch_all("/user/starred").await.unwrap();

    assert!(listing.records.is_empty());
    assert_eq!(listing.pages, 1);
}

#[tokio::test]
async fn test_courtesy_delay_between_pages() {
    let server = MockServer::start().await;
    mount_listing(&server, "/user/repos", &[&["a/1"], &["a/2"], &["a/3"]]).await;

    let env = TestEnvironment::new();
    let mut config = env.config(&server);
    config.api.page_delay_ms = 50;
    let client = GitHubClient::new(&config).unwrap();

    let started = Instant::now();
    let listing = client.fetch_all("/user/repos").await.unwrap();

    assert_eq!(listing.pages, 3);
    // Two pauses for three pages
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_sends_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(header("authorization", "Basic YWxpY2U6dA=="))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();

    assert!(client.fetch_all("/user/repos").await.is_ok());
}

#[tokio::test]
async fn test_non_success_status_aborts_walk() {
    let server = MockServer::start().await;

    // Page 1 succeeds and links to page 2, which fails
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::repo_page(&["alice/a"]))
                .insert_header(
                    "link",
                    format!(r#"<{}/user/repos?page=2>; rel="next""#, server.uri()).as_str(),
                ),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();
    let err = client.fetch_all("/user/repos").await.unwrap_err();

    assert!(format!("{:#}", err).contains("502"));
}

#[tokio::test]
async fn test_unauthorized_first_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"message": "Bad credentials"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();

    assert!(client.fetch_all("/user/repos").await.is_err());
}

#[tokio::test]
async fn test_malformed_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let env = TestEnvironment::new();
    let client = GitHubClient::new(&env.config(&server)).unwrap();
    let err = client.fetch_all("/user/repos").await.unwrap_err();

    assert!(format!("{:#}", err).contains("Malformed listing response"));
}

#[tokio::test]
async fn test_transport_error_is_fatal() {
    let env = TestEnvironment::new();
    let server = MockServer::start().await;
    let mut config = env.config(&server);
    // Nothing listens on port 9 (discard) in the test environment
    config.api.base_url = "http://127.0.0.1:9".to_string();

    let client = GitHubClient::new(&config).unwrap();
    assert!(client.fetch_all("/user/repos").await.is_err());
}

mod common;

use std::time::Duration;

use common::{mount_realm_token, REALM, REALM_TOKEN_PATH, TOKEN_BODY};
use keycloak_bench::accounts::Account;
use keycloak_bench::login::{build_client, LoginFailure, TokenEndpoint};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer) -> TokenEndpoint {
    TokenEndpoint::new(build_client(4).unwrap(), &server.uri(), REALM)
}

fn alice() -> Account {
    Account::new("alice", "wonderland")
}

#[tokio::test]
async fn ok_response_is_success() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 200, Duration::ZERO).await;

    let attempt = endpoint(&server).login(&alice(), Duration::from_secs(5)).await;
    assert!(attempt.success);
    assert_eq!(attempt.error, None);
    assert!(attempt.latency > Duration::ZERO);
}

#[tokio::test]
async fn rejected_credentials_are_http_401() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 401, Duration::ZERO).await;

    let attempt = endpoint(&server).login(&alice(), Duration::from_secs(5)).await;
    assert!(!attempt.success);
    assert_eq!(attempt.error, Some(LoginFailure::Http(401)));
    assert_eq!(attempt.error.unwrap().to_string(), "HTTP 401");
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 200, Duration::from_secs(2)).await;

    let attempt = endpoint(&server)
        .login(&alice(), Duration::from_millis(200))
        .await;
    assert!(!attempt.success);
    assert_eq!(attempt.error, Some(LoginFailure::Timeout));
    assert!(attempt.latency < Duration::from_secs(2));
}

#[tokio::test]
async fn unreachable_endpoint_is_connect_error() {
    // Grab a free port, then release it so nothing listens there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let endpoint = TokenEndpoint::new(build_client(1).unwrap(), &uri, REALM);
    let attempt = endpoint.login(&alice(), Duration::from_secs(2)).await;
    assert_eq!(attempt.error, Some(LoginFailure::Transport("ConnectError")));
}

#[tokio::test]
async fn form_carries_client_and_scope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REALM_TOKEN_PATH))
        .and(body_string_contains("client_id=web-app"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("scope=openid"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server)
        .with_client_id("web-app")
        .with_scope(Some("openid".to_string()));
    let attempt = endpoint.login(&alice(), Duration::from_secs(5)).await;
    assert!(attempt.success);
}

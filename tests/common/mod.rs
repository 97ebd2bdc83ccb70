#![allow(dead_code)]

use std::time::Duration;

use keycloak_bench::accounts::Account;
use keycloak_bench::admin::AdminClient;
use keycloak_bench::login::build_client;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REALM: &str = "test";
pub const ADMIN_TOKEN_PATH: &str = "/realms/master/protocol/openid-connect/token";
pub const REALM_TOKEN_PATH: &str = "/realms/test/protocol/openid-connect/token";
pub const TOKEN_BODY: &str = r#"{"access_token":"t0k3n","token_type":"Bearer","expires_in":60}"#;

pub fn admin_account() -> Account {
    Account::new("admin", "admin")
}

/// Admin password grant that always succeeds.
pub async fn mount_admin_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(ADMIN_TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN_BODY))
        .mount(server)
        .await;
}

/// Token endpoint of the test realm answering `status` after `delay`.
pub async fn mount_realm_token(server: &MockServer, status: u16, delay: Duration) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_string(TOKEN_BODY)
    } else {
        ResponseTemplate::new(status).set_body_string(r#"{"error":"invalid_grant"}"#)
    };
    Mock::given(method("POST"))
        .and(path(REALM_TOKEN_PATH))
        .respond_with(template.set_delay(delay))
        .mount(server)
        .await;
}

pub async fn admin_client(server: &MockServer) -> AdminClient {
    mount_admin_token(server).await;
    AdminClient::connect(
        build_client(4).expect("http client"),
        &server.uri(),
        &admin_account(),
        Duration::from_secs(5),
    )
    .await
    .expect("admin token")
}

pub fn json(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json")
}

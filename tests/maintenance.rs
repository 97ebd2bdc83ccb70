mod common;

use common::{admin_account, admin_client, json, REALM};
use keycloak_bench::mail::{MailTest, SendStrategy};
use keycloak_bench::maintenance::{self, CleanupOutcome, RealmUserCount};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USERS: &str = r#"[
    {"id":"1","username":"admin"},
    {"id":"2","username":"loadtest_0_run"},
    {"id":"3","username":"testuser_5_run"},
    {"id":"4","username":"alice"},
    {"id":"5","username":"  "}
]"#;

#[tokio::test]
async fn dry_run_deletes_nothing() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("GET"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .respond_with(json(USERS))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = maintenance::delete_test_users(&admin, REALM, true)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CleanupOutcome {
            deleted: 2,
            skipped: 3
        }
    );
}

#[tokio::test]
async fn deletion_only_touches_test_users() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("GET"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .respond_with(json(USERS))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/admin/realms/{REALM}/users/2")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/admin/realms/{REALM}/users/3")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = maintenance::delete_test_users(&admin, REALM, false)
        .await
        .unwrap();
    // The failed deletion counts as skipped.
    assert_eq!(
        outcome,
        CleanupOutcome {
            deleted: 1,
            skipped: 4
        }
    );
}

#[tokio::test]
async fn user_counts_per_realm_report_errors() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("GET"))
        .and(path("/admin/realms"))
        .respond_with(json(r#"[{"id":"zeta","realm":"zeta"},{"id":"alpha","realm":"alpha"}]"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/alpha/users"))
        .respond_with(json(USERS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/zeta/users"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let counts = maintenance::user_count_per_realm(&admin).await.unwrap();
    assert_eq!(
        counts,
        vec![
            RealmUserCount {
                realm: "alpha".into(),
                users: Some(5)
            },
            RealmUserCount {
                realm: "zeta".into(),
                users: None
            },
        ]
    );
}

#[tokio::test]
async fn existing_superadmin_is_a_failure() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = maintenance::create_superadmin(&admin, REALM, "boss", "pw")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn superadmin_gets_realm_management_roles() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .respond_with(
            ResponseTemplate::new(201).insert_header("Location", "http://kc/admin/realms/test/users/boss-id"),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/admin/realms/{REALM}/users/boss-id/reset-password")))
        .and(body_string_contains(r#""temporary":false"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/admin/realms/{REALM}/clients")))
        .and(query_param("clientId", "realm-management"))
        .respond_with(json(r#"[{"id":"rm-uuid","clientId":"realm-management"}]"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/admin/realms/{REALM}/clients/rm-uuid/roles")))
        .respond_with(json(
            r#"[{"id":"r1","name":"manage-users","containerId":"rm-uuid"},
                {"id":"r2","name":"view-events","containerId":"rm-uuid"},
                {"id":"r3","name":"impersonation","containerId":"rm-uuid"}]"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/admin/realms/{REALM}/users/boss-id/role-mappings/clients/rm-uuid"
        )))
        .and(body_string_contains("manage-users"))
        .and(body_string_contains("view-events"))
        .and(body_string_contains(r#""clientRole":true"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let id = maintenance::create_superadmin(&admin, REALM, "boss", "pw")
        .await
        .unwrap();
    assert_eq!(id, "boss-id");
}

#[tokio::test]
async fn mail_test_creates_sends_and_cleans_up() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .and(body_string_contains("testuser_"))
        .respond_with(
            ResponseTemplate::new(201).insert_header("Location", "http://kc/admin/realms/test/users/mail-id"),
        )
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/admin/realms/test/users/[^/]+/send-verify-email$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/admin/realms/{REALM}/users/mail-id")))
        .respond_with(ResponseTemplate::new(204))
        .expect(4)
        .mount(&server)
        .await;

    let mut test = MailTest::new(admin, admin_account(), REALM, 2);
    let ids = test.create_users(4, "run").await.unwrap();
    assert_eq!(ids.len(), 4);

    let report = test
        .send(
            &ids,
            SendStrategy::Rate {
                per_second: 40.0,
                batch: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.sent, 4);
    assert_eq!(report.errors, 0);
    // 4 mails at 40/s take at least 100 ms.
    assert!(report.elapsed >= Duration::from_millis(100));

    assert_eq!(test.cleanup(&ids).await.unwrap(), 4);
}

#[tokio::test]
async fn failed_mails_are_counted() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("PUT"))
        .and(path_regex(r"/send-verify-email$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let ids: Vec<String> = (0..3).map(|i| format!("id-{i}")).collect();
    let mut test = MailTest::new(admin, admin_account(), REALM, 8);
    let report = test
        .send(
            &ids,
            SendStrategy::BatchPause {
                batch_size: 2,
                pause: Duration::from_millis(10),
            },
        )
        .await
        .unwrap();
    assert_eq!((report.sent, report.errors), (0, 3));
}

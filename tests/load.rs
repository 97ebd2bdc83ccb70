mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{admin_client, mount_realm_token, REALM, REALM_TOKEN_PATH, TOKEN_BODY};
use keycloak_bench::accounts::{self, Account, AccountPool};
use keycloak_bench::login::{build_client, TokenEndpoint};
use keycloak_bench::results::Verdict;
use keycloak_bench::runner::{LoadTest, ThinkTime};
use keycloak_bench::schedule::{LoadProfile, RampSchedule};
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn load_test(server: &MockServer, pool: AccountPool) -> LoadTest {
    let endpoint = TokenEndpoint::new(build_client(16).unwrap(), &server.uri(), REALM);
    LoadTest::new(endpoint, pool)
        .request_timeout(Duration::from_secs(2))
        .progress_interval(Duration::from_secs(60))
}

fn single() -> AccountPool {
    AccountPool::single(Account::new("alice", "wonderland"))
}

#[tokio::test]
async fn constant_run_with_fast_logins_passes() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 200, Duration::from_millis(50)).await;

    let report = load_test(&server, single())
        .warmup(2)
        .run(LoadProfile::Constant {
            concurrency: 5,
            duration: Duration::from_secs(2),
        })
        .await
        .unwrap();
    let summary = report.summary;

    // 5 workers, 2 s, 50 ms per login: at most one extra cycle per worker.
    assert!(summary.total >= 50, "only {} requests", summary.total);
    assert!(summary.total <= 5 * 40 + 5, "{} requests", summary.total);
    assert_eq!(summary.successes, summary.total);
    assert_eq!(summary.success_rate(), 100.0);
    assert!(summary.errors.is_empty());
    assert_eq!(summary.verdict(), Verdict::Pass);
    assert_eq!(summary.verdict().exit_code(), 0);
    assert_eq!(report.abandoned, 0);

    // Exactly the configured number of workers, all running together.
    assert_eq!(report.peak_active, 5);
    assert_eq!(report.workers.len(), 5);
    for span in &report.workers {
        assert!(span.started < Duration::from_millis(500), "{span:?}");
        assert!(span.stopped >= Duration::from_secs(2), "{span:?}");
        assert!(span.attempts > 0, "{span:?}");
    }

    let latency = summary.latency.expect("latency stats");
    assert!(latency.p50 >= 0.05);
    assert!(latency.min <= latency.p50 && latency.p50 <= latency.p95);
    assert!(latency.p95 <= latency.p99 && latency.p99 <= latency.max);
}

#[tokio::test]
async fn uniform_401_fails_the_run() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 401, Duration::from_millis(5)).await;

    let report = load_test(&server, single())
        .run(LoadProfile::Constant {
            concurrency: 3,
            duration: Duration::from_millis(500),
        })
        .await
        .unwrap();
    let summary = report.summary;

    assert!(summary.total > 0);
    assert_eq!(summary.successes, 0);
    assert_eq!(
        summary.errors,
        BTreeMap::from([("HTTP 401".to_string(), summary.total)])
    );
    assert_eq!(summary.verdict(), Verdict::AllUnauthorized);
    assert_eq!(summary.verdict().exit_code(), 1);
}

#[tokio::test]
async fn ramp_run_starts_and_stops_every_user() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 200, Duration::from_millis(20)).await;

    let schedule = RampSchedule {
        users: 4,
        ramp_up: Duration::from_millis(400),
        hold: Duration::from_millis(300),
        ramp_down: Duration::from_millis(400),
    };
    let report = load_test(&server, single())
        .run(LoadProfile::Ramp(schedule))
        .await
        .unwrap();

    assert!(report.summary.total >= 4);
    assert_eq!(report.summary.verdict(), Verdict::Pass);
    assert_eq!(report.abandoned, 0);
    assert!(report.summary.elapsed >= Duration::from_millis(700));
    // Everyone is up during the hold.
    assert_eq!(report.peak_active, 4);

    let spans = &report.workers;
    assert_eq!(spans.len(), 4);
    for (i, span) in spans.iter().enumerate() {
        assert_eq!(span.id, i);
        assert!(span.started >= schedule.start_offset(i), "{span:?}");
        assert!(span.attempts > 0, "{span:?}");
    }

    // Staggered starts, one every 100 ms.
    for pair in spans.windows(2) {
        let gap = pair[1].started - pair[0].started;
        assert!(gap >= Duration::from_millis(80), "start gap {gap:?}");
    }
    assert!(spans[3].started - spans[0].started >= Duration::from_millis(290));

    // Independent stops: each worker stops on its own signal while the
    // later ones keep logging in.
    for pair in spans.windows(2) {
        assert!(pair[1].stopped > pair[0].stopped, "{pair:?}");
    }
    assert!(spans[3].stopped - spans[0].stopped >= Duration::from_millis(200));
    let hold_end = schedule.ramp_up.mul_f64(0.75) + schedule.hold;
    assert!(spans[0].stopped >= hold_end, "{:?}", spans[0]);
}

#[tokio::test]
async fn think_time_does_not_delay_the_stop() {
    let server = MockServer::start().await;
    mount_realm_token(&server, 200, Duration::from_millis(10)).await;

    let report = load_test(&server, single())
        .think_time(ThinkTime::from_millis(5_000, 5_000).unwrap())
        .run(LoadProfile::Constant {
            concurrency: 2,
            duration: Duration::from_millis(300),
        })
        .await
        .unwrap();

    assert_eq!(report.abandoned, 0);
    assert_eq!(report.summary.total, 2);
    assert!(
        report.summary.elapsed < Duration::from_secs(1),
        "took {:?}",
        report.summary.elapsed
    );
    for span in &report.workers {
        assert_eq!(span.attempts, 1);
        assert!(span.stopped < Duration::from_secs(1), "{span:?}");
    }
}

#[tokio::test]
async fn accounts_rotate_between_workers() {
    let server = MockServer::start().await;
    for name in ["u1", "u2"] {
        Mock::given(method("POST"))
            .and(path(REALM_TOKEN_PATH))
            .and(body_string_contains(format!("username={name}&")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(TOKEN_BODY)
                    .set_delay(Duration::from_millis(10)),
            )
            .expect(1..)
            .mount(&server)
            .await;
    }

    let pool = AccountPool::new(vec![Account::new("u1", "p"), Account::new("u2", "p")]).unwrap();
    let report = load_test(&server, pool)
        .run(LoadProfile::Constant {
            concurrency: 2,
            duration: Duration::from_millis(300),
        })
        .await
        .unwrap();
    assert_eq!(report.summary.failures, 0);
}

#[tokio::test]
async fn provisioned_users_are_created_and_removed() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .and(body_string_contains("loadtest_"))
        .and(body_string_contains("@test.local"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", "http://kc/admin/realms/test/users/new-id"),
        )
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/admin/realms/{REALM}/users/new-id/reset-password")))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/admin/realms/test/users/[^/]+$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;

    let provisioned = accounts::provision(&admin, REALM, 3, "secret", "run42")
        .await
        .unwrap();
    assert_eq!(provisioned.pool.len(), 3);
    assert_eq!(provisioned.pool.get(2).username, "loadtest_2_run42");
    assert_eq!(provisioned.user_ids.len(), 3);

    let deleted = accounts::cleanup(&admin, REALM, &provisioned.user_ids).await;
    assert_eq!(deleted, 3);
}

#[tokio::test]
async fn provisioning_with_no_user_created_is_an_error() {
    let server = MockServer::start().await;
    let admin = admin_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/admin/realms/{REALM}/users")))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = accounts::provision(&admin, REALM, 2, "secret", "run").await;
    assert!(result.is_err());
}

mod utils;
#[allow(unused)]
use utils::*;

use mock_service::{Behaviour, MockConfig};
use pr_review_load::{scenario, setup};
use std::time::Duration;
use surge::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn short_run() -> Vec<Stage> {
    vec![Stage::new(Duration::from_millis(2_500), 1)]
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn healthy_service_passes() {
    let base_url = mock(MockConfig::default()).await;

    let stats = scenario(&base_url, &short_run()).vus(1).await.unwrap();

    assert!(stats.iterations >= 2, "iterations: {}", stats.iterations);
    assert_eq!(stats.http_req_failed.hits, 0);

    let status = stats.check("is status 201").unwrap();
    assert!(status.passes >= 2);
    assert_eq!(status.fails, 0);

    let reviewers = stats.check("has reviewers").unwrap();
    assert_eq!(reviewers.passes, status.passes);
    assert_eq!(reviewers.fails, 0);

    assert_eq!(stats.thresholds.len(), 2);
    assert!(stats.passed());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn server_errors_fail_checks_but_keep_looping() {
    let base_url = mock(MockConfig {
        behaviour: Behaviour::ServerError,
        latency: None,
    })
    .await;

    let stats = scenario(&base_url, &short_run()).vus(1).await.unwrap();

    assert!(stats.iterations >= 2, "iterations: {}", stats.iterations);
    assert_eq!(stats.iterations_interrupted, 0);

    let status = stats.check("is status 201").unwrap();
    assert_eq!(status.passes, 0);
    assert!(status.fails >= 2);
    assert_eq!(stats.check("has reviewers").unwrap().passes, 0);

    assert_eq!(stats.http_req_failed.hits, stats.http_reqs);
    let failed_rate = stats
        .thresholds
        .iter()
        .find(|t| t.metric == "http_req_failed")
        .unwrap();
    assert!(!failed_rate.passed);
    assert!(!stats.passed());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn empty_reviewers_fail_only_the_reviewer_check() {
    let base_url = mock(MockConfig {
        behaviour: Behaviour::NoReviewers,
        latency: None,
    })
    .await;

    let stats = scenario(&base_url, &short_run()).vus(1).await.unwrap();

    let status = stats.check("is status 201").unwrap();
    assert!(status.all_passed());
    let reviewers = stats.check("has reviewers").unwrap();
    assert_eq!(reviewers.passes, 0);
    assert_eq!(reviewers.fails, status.passes);

    // Thresholds only look at request metrics.
    assert!(stats.passed());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn slow_service_breaks_latency_threshold() {
    let base_url = mock(MockConfig {
        behaviour: Behaviour::Normal,
        latency: Some(Duration::from_millis(400)),
    })
    .await;

    let stats = scenario(&base_url, &short_run()).vus(2).await.unwrap();

    let latency = stats
        .thresholds
        .iter()
        .find(|t| t.metric == "http_req_duration")
        .unwrap();
    assert!(!latency.passed);
    assert!(latency.observed.unwrap() >= 300.);
    assert!(!stats.passed());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn setup_is_not_idempotent() {
    let base_url = mock(MockConfig::default()).await;

    let first = setup(base_url.clone()).await.unwrap();
    assert_eq!(first.team_status, 201);

    let second = setup(base_url.clone()).await.unwrap();
    assert_eq!(second.team_status, 400);

    let res = http::post(
        &format!("{base_url}/team/add"),
        serde_json::to_string(&pr_review_load::team_payload()).unwrap(),
        &Params::default(),
    )
    .await;
    assert_eq!(
        res.json_path("error.code"),
        Some(serde_json::json!("TEAM_EXISTS"))
    );
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn concurrent_setups_create_one_team() {
    let base_url = mock(MockConfig::default()).await;

    let statuses: Vec<u16> = futures::future::join_all((0..8).map(|_| setup(base_url.clone())))
        .await
        .into_iter()
        .map(|res| res.unwrap().team_status)
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == 400).count(), 7);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn rerun_against_seeded_service_still_runs() {
    let base_url = mock(MockConfig::default()).await;
    setup(base_url.clone()).await.unwrap();

    let stats = scenario(&base_url, &short_run()).vus(1).await.unwrap();
    assert!(stats.check("is status 201").unwrap().all_passed());
    assert!(stats.passed());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unknown_author_without_setup_fails_requests() {
    // No setup ran, so u1 is unknown to the service.
    let base_url = mock(MockConfig::default()).await;

    let res = http::post(
        &format!("{base_url}/pullRequest/create"),
        serde_json::to_string(&pr_review_load::pull_request_payload()).unwrap(),
        &Params::json(),
    )
    .await;
    assert_eq!(res.status(), 404);
    assert_eq!(
        res.json_path("error.code"),
        Some(serde_json::json!("NOT_FOUND"))
    );
}

/// Accepts one connection, answers it with `status_line` and `body`, and hands back the
/// raw request head, lowercased.
async fn capture_one_request(
    status_line: &'static str,
    body: &'static str,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the request head");
            request.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;

        let request = String::from_utf8_lossy(&request).to_lowercase();
        request
            .split("\r\n\r\n")
            .next()
            .unwrap_or_default()
            .to_string()
    });

    (format!("http://{addr}"), handle)
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn pull_request_is_sent_as_json() {
    let (base_url, request) = capture_one_request(
        "201 Created",
        r#"{"pr":{"pull_request_id":"pr-1","assigned_reviewers":["u2"]}}"#,
    )
    .await;

    let body = serde_json::to_string(&pr_review_load::pull_request_payload()).unwrap();
    let res = pr_review_load::create_pull_request(&base_url, body).await;
    assert_eq!(res.status(), 201);
    assert!(pr_review_load::has_reviewers(&res));

    let head = request.await.unwrap();
    assert!(head.starts_with("post /pullrequest/create "), "{head}");
    assert!(
        head.lines().any(|line| line == "content-type: application/json"),
        "{head}"
    );
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn team_setup_sends_no_content_type() {
    let (base_url, request) = capture_one_request(
        "201 Created",
        r#"{"team":{"team_name":"load-test-team","members":[]}}"#,
    )
    .await;

    let data = setup(base_url).await.unwrap();
    assert_eq!(data.team_status, 201);

    let head = request.await.unwrap();
    assert!(head.starts_with("post /team/add "), "{head}");
    assert!(
        !head.lines().any(|line| line.starts_with("content-type:")),
        "{head}"
    );
}

#[cfg(feature = "integration")]
mod integration {
    use super::*;

    /// Full ramp against a real service on localhost:8080.
    #[tokio::test]
    #[ntest::timeout(120_000)]
    async fn full_profile_against_live_service() {
        init();

        let stats = scenario(pr_review_load::BASE_URL, &pr_review_load::stages())
            .await
            .unwrap();

        println!("{stats}");
        assert_eq!(stats.vus_max, 5);
        assert!(stats.passed());
    }
}

//! Load test for the pull-request review-assignment service.
//!
//! Setup seeds one team of four active users. Every iteration then opens a pull request
//! authored by `u1` and checks that it was created with reviewers assigned.
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;
use surge::core::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use surge::prelude::*;
#[allow(unused)]
use tracing::{debug, error, info, warn};

pub const BASE_URL: &str = "http://localhost:8080";
pub const SCENARIO_NAME: &str = "pr_review_load";
pub const TEAM_NAME: &str = "load-test-team";
pub const AUTHOR_ID: &str = "u1";
pub const PR_NAME: &str = "Load Test PR";
pub const PR_ID_PREFIX: &str = "pr-";
pub const THINK_TIME: Duration = Duration::from_secs(1);

const PR_TOKEN_LEN: usize = 8;
const PR_TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPayload {
    pub team_name: String,
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestPayload {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

/// Output of the setup, shared by every iteration.
#[derive(Clone, Debug)]
pub struct SetupData {
    pub base_url: String,
    /// Status of the team creation call, 0 when it never got a response.
    pub team_status: u16,
}

pub fn team_payload() -> TeamPayload {
    let member = |user_id: &str, username: &str| Member {
        user_id: user_id.to_string(),
        username: username.to_string(),
        is_active: true,
    };

    TeamPayload {
        team_name: TEAM_NAME.to_string(),
        members: vec![
            member(AUTHOR_ID, "Author"),
            member("u2", "Rev1"),
            member("u3", "Rev2"),
            member("u4", "Rev3"),
        ],
    }
}

pub fn pull_request_payload() -> PullRequestPayload {
    PullRequestPayload {
        pull_request_id: generate_pr_id(),
        pull_request_name: PR_NAME.to_string(),
        author_id: AUTHOR_ID.to_string(),
    }
}

/// `pr-` followed by a random lowercase base-36 token. Not collision free.
pub fn generate_pr_id() -> String {
    thread_local! {
        static RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
    }

    RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        let token: String = (0..PR_TOKEN_LEN)
            .map(|_| PR_TOKEN_ALPHABET[rng.gen_range(0..PR_TOKEN_ALPHABET.len())] as char)
            .collect();
        format!("{PR_ID_PREFIX}{token}")
    })
}

pub fn stages() -> Vec<Stage> {
    vec![
        Stage::new(Duration::from_secs(10), 5),
        Stage::new(Duration::from_secs(30), 5),
        Stage::new(Duration::from_secs(10), 0),
    ]
}

/// The scenario against `base_url`, ramping along `stages`, with the latency and error
/// rate thresholds applied.
pub fn scenario(
    base_url: &str,
    stages: &[Stage],
) -> impl ConfigurableScenario<Result<RunStatistics, ScenarioError>> {
    let base_url = base_url.trim_end_matches('/').to_string();
    Scenario::new(SCENARIO_NAME, move || setup(base_url), iteration)
        .stages(stages)
        .threshold(HTTP_REQ_DURATION, &["p(95)<300"])
        .threshold(HTTP_REQ_FAILED, &["rate<0.001"])
}

/// Seed the team. The response is logged but never fails the run; a second run against
/// the same service gets a 400 here and carries on.
pub async fn setup(base_url: String) -> anyhow::Result<SetupData> {
    let body = serde_json::to_string(&team_payload())?;
    let res = http::post(&format!("{base_url}/team/add"), body, &Params::default()).await;

    match res.status() {
        0 => warn!(
            "Team setup request failed: {}",
            res.error().unwrap_or("no response")
        ),
        status if (200..300).contains(&status) => info!("Team `{TEAM_NAME}` created"),
        status => warn!(status, body = res.body(), "Team setup was not accepted; continuing"),
    }

    Ok(SetupData {
        base_url,
        team_status: res.status(),
    })
}

pub async fn iteration(data: Arc<SetupData>) {
    let payload = pull_request_payload();
    let body = match serde_json::to_string(&payload) {
        Ok(body) => body,
        Err(err) => {
            error!("Failed to encode pull request payload: {err}");
            return;
        }
    };

    let res = create_pull_request(&data.base_url, body).await;
    check!(res, {
        "is status 201" => |r: &Response| r.status() == 201,
        "has reviewers" => has_reviewers,
    });

    tokio::time::sleep(THINK_TIME).await;
}

#[transaction]
pub async fn create_pull_request(base_url: &str, body: String) -> Response {
    http::post(&format!("{base_url}/pullRequest/create"), body, &Params::json()).await
}

/// `pr.assigned_reviewers` is a non-empty array.
pub fn has_reviewers(res: &Response) -> bool {
    res.json_path("pr.assigned_reviewers")
        .and_then(|reviewers| reviewers.as_array().map(|r| !r.is_empty()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pr_ids() {
        let ids: Vec<String> = (0..1_000).map(|_| generate_pr_id()).collect();
        for id in &ids {
            let token = id.strip_prefix(PR_ID_PREFIX).unwrap();
            assert!(!token.is_empty());
            assert!(token
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }

        let unique: HashSet<&String> = ids.iter().collect();
        assert!(unique.len() > 990);
    }

    #[test]
    fn team_composition() {
        let team = team_payload();
        assert_eq!(team.team_name, "load-test-team");
        let ids: Vec<&str> = team.members.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, ["u1", "u2", "u3", "u4"]);
        let names: Vec<&str> = team.members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, ["Author", "Rev1", "Rev2", "Rev3"]);
        assert!(team.members.iter().all(|m| m.is_active));
    }

    #[test]
    fn pull_request_body() {
        let payload = pull_request_payload();
        assert_eq!(payload.author_id, "u1");
        assert_eq!(payload.pull_request_name, "Load Test PR");

        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["author_id"], "u1");
        assert!(json["pull_request_id"].as_str().unwrap().starts_with("pr-"));
    }

    #[test]
    fn reviewer_check() {
        assert!(has_reviewers(&Response::new(
            201,
            r#"{"pr":{"assigned_reviewers":["u2","u3"]}}"#
        )));
        assert!(!has_reviewers(&Response::new(
            201,
            r#"{"pr":{"assigned_reviewers":[]}}"#
        )));
        // The service answers `null` rather than `[]` when nobody could be assigned.
        assert!(!has_reviewers(&Response::new(
            201,
            r#"{"pr":{"pull_request_id":"pr-1","assigned_reviewers":null}}"#
        )));
        assert!(!has_reviewers(&Response::new(
            500,
            r#"{"error":{"code":"INTERNAL_ERROR","message":"boom"}}"#
        )));
        assert!(!has_reviewers(&Response::new(0, "")));
    }

    #[test]
    fn load_profile() {
        let stages = stages();
        assert_eq!(surge::core::total_duration(&stages), Duration::from_secs(50));
        assert_eq!(surge::core::target_at(0, &stages, Duration::from_secs(20)), 5);
        assert_eq!(surge::core::target_at(0, &stages, Duration::from_secs(50)), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn setup_survives_unreachable_service() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let data = setup(format!("http://{addr}")).await.unwrap();
        assert_eq!(data.team_status, 0);
        assert!(logs_contain("Team setup request failed"));
    }
}

//! In-memory stand-in for the pull-request review-assignment service.
use axum::{
    body::Bytes,
    debug_handler,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// How `/pullRequest/create` misbehaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Behaviour {
    #[default]
    Normal,
    /// Every create fails with 500.
    ServerError,
    /// Creates succeed but nobody gets assigned.
    NoReviewers,
}

impl FromStr for Behaviour {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "server-error" => Ok(Self::ServerError),
            "no-reviewers" => Ok(Self::NoReviewers),
            other => anyhow::bail!("unknown behaviour `{other}`"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    pub behaviour: Behaviour,
    /// Mean added latency for `/pullRequest/create`, jittered by 10%.
    pub latency: Option<Duration>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default, rename = "pull_request_id")]
    pub id: String,
    #[serde(default, rename = "pull_request_name")]
    pub name: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub assigned_reviewers: Vec<String>,
}

struct User {
    team_name: String,
    is_active: bool,
}

#[derive(Default)]
struct Store {
    teams: HashMap<String, Team>,
    users: HashMap<String, User>,
    pull_requests: HashMap<String, PullRequest>,
}

struct Shared {
    config: MockConfig,
    store: RwLock<Store>,
}

type AppState = Arc<Shared>;

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(config: MockConfig) -> Router {
    let state = Arc::new(Shared {
        config,
        store: RwLock::new(Store::default()),
    });

    Router::new()
        .route("/health", get(health))
        .route("/team/add", post(create_team))
        .route("/team/get", get(get_team))
        .route("/pullRequest/create", post(create_pull_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Serve on an ephemeral localhost port in the background.
pub async fn spawn(config: MockConfig) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(config);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("Mock service stopped: {err}");
        }
    });

    debug!("Mock service spawned on {addr}");
    Ok(addr)
}

async fn health() -> &'static str {
    "OK"
}

// NOTE: Bodies are parsed by hand so requests without a JSON content-type are accepted.
fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request("invalid request body"))
}

#[debug_handler]
async fn create_team(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    counter!("mock_service.requests", "route" => "team_add").increment(1);

    let team: Team = parse(&body)?;
    if team.team_name.is_empty() || team.members.is_empty() {
        return Err(ApiError::bad_request("team_name and members are required"));
    }

    let mut store = state.store.write().unwrap_or_else(PoisonError::into_inner);
    if store.teams.contains_key(&team.team_name) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "TEAM_EXISTS",
            "team_name already exists",
        ));
    }

    for member in &team.members {
        store.users.insert(
            member.user_id.clone(),
            User {
                team_name: team.team_name.clone(),
                is_active: member.is_active,
            },
        );
    }
    store.teams.insert(team.team_name.clone(), team.clone());
    debug!(team = team.team_name, members = team.members.len(), "Team created");

    Ok((StatusCode::CREATED, Json(json!({ "team": team }))))
}

#[debug_handler]
async fn get_team(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Team>, ApiError> {
    let name = query
        .get("team_name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("team_name query param is required"))?;

    let store = state.store.read().unwrap_or_else(PoisonError::into_inner);
    store
        .teams
        .get(name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "team not found"))
}

#[debug_handler]
async fn create_pull_request(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    counter!("mock_service.requests", "route" => "pull_request_create").increment(1);

    if let Some(latency) = state.config.latency {
        tokio::time::sleep(jitter(latency)).await;
    }

    if state.config.behaviour == Behaviour::ServerError {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "injected failure",
        ));
    }

    let mut pr: PullRequest = parse(&body)?;
    if pr.id.is_empty() || pr.name.is_empty() || pr.author_id.is_empty() {
        return Err(ApiError::bad_request(
            "pull_request_id, pull_request_name, and author_id are required",
        ));
    }

    let mut store = state.store.write().unwrap_or_else(PoisonError::into_inner);
    let team_name = match store.users.get(&pr.author_id) {
        Some(author) => author.team_name.clone(),
        None => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "author not found",
            ))
        }
    };
    if store.pull_requests.contains_key(&pr.id) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "PR_EXISTS",
            "PR id already exists",
        ));
    }

    pr.status = "OPEN".to_string();
    pr.assigned_reviewers = match state.config.behaviour {
        Behaviour::NoReviewers => vec![],
        _ => {
            let candidates: Vec<&String> = store
                .users
                .iter()
                .filter(|(id, user)| {
                    user.team_name == team_name && user.is_active && **id != pr.author_id
                })
                .map(|(id, _)| id)
                .collect();
            candidates
                .choose_multiple(&mut rand::thread_rng(), 2)
                .map(|id| id.to_string())
                .collect()
        }
    };

    store.pull_requests.insert(pr.id.clone(), pr.clone());
    gauge!("mock_service.pull_requests").set(store.pull_requests.len() as f64);

    Ok((StatusCode::CREATED, Json(json!({ "pr": pr }))))
}

fn jitter(mean: Duration) -> Duration {
    let mean_ms = mean.as_secs_f64() * 1_000.;
    match Normal::new(mean_ms, mean_ms / 10.) {
        Ok(normal) => Duration::from_secs_f64(normal.sample(&mut rand::thread_rng()).max(0.) / 1_000.),
        Err(_) => mean,
    }
}

//! Minimal HTTP helpers for iterations.
//!
//! Requests never return an error: transport failures come back as a [`Response`] with
//! status 0 and the error message, so an iteration can check it like any other reply.
use crate::transaction::TransactionOutcome;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use surge_core::DEFAULT_REQUEST_TIMEOUT;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    status: u16,
    body: String,
    error: Option<String>,
    elapsed: Duration,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    fn transport_error(error: String, elapsed: Duration) -> Self {
        Self {
            status: 0,
            body: String::new(),
            error: Some(error),
            elapsed,
        }
    }

    /// HTTP status code, 0 when the request never got a response.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Select a value out of a JSON body by a dotted path; numeric segments index arrays.
    ///
    /// `None` when the body is not JSON or the path does not exist.
    ///
    /// ```
    /// # use surge::http::Response;
    /// let res = Response::new(201, r#"{"pr":{"assigned_reviewers":["u2","u3"]}}"#);
    /// assert_eq!(res.json_path("pr.assigned_reviewers.1").unwrap(), "u3");
    /// ```
    pub fn json_path(&self, path: &str) -> Option<Value> {
        let root: Value = serde_json::from_str(&self.body).ok()?;
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&root, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .cloned()
    }
}

impl TransactionOutcome for Response {
    fn is_failure(&self) -> bool {
        self.status == 0 || self.status >= 400
    }
}

/// Per-request options.
#[derive(Clone, Debug, Default)]
pub struct Params {
    headers: Vec<(String, String)>,
}

impl Params {
    /// `Content-Type: application/json`
    pub fn json() -> Self {
        Self::default().header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

fn client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!("Failed to build HTTP client ({err}); falling back to defaults.");
                Client::new()
            })
    })
}

pub async fn post(url: &str, body: impl Into<reqwest::Body>, params: &Params) -> Response {
    send(client().post(url).body(body), params).await
}

pub async fn get(url: &str, params: &Params) -> Response {
    send(client().get(url), params).await
}

async fn send(request: RequestBuilder, params: &Params) -> Response {
    let request = params
        .headers
        .iter()
        .fold(request, |request, (name, value)| request.header(name.as_str(), value.as_str()));

    let start = Instant::now();
    let res = match request.send().await {
        Ok(res) => res,
        Err(err) => {
            debug!("Request failed: {err}");
            return Response::transport_error(err.to_string(), start.elapsed());
        }
    };

    let status = res.status().as_u16();
    match res.text().await {
        Ok(body) => Response {
            status,
            body,
            error: None,
            elapsed: start.elapsed(),
        },
        Err(err) => {
            debug!("Failed reading response body: {err}");
            Response {
                status,
                body: String::new(),
                error: Some(err.to_string()),
                elapsed: start.elapsed(),
            }
        }
    }
}

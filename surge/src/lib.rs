#![cfg_attr(docsrs, feature(doc_cfg))]
//! A ramping virtual-user load testing driver.
//!
//! A [`Scenario`] pairs a one-time setup with an iteration that every virtual user (VU) runs
//! in a loop. Awaiting the scenario ramps VUs along its stages, collects request and check
//! metrics, and evaluates thresholds into a pass/fail verdict.
//!
//! ```ignore
//! use surge::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let stats = Scenario::new("ping", setup, iteration)
//!         .stage(Duration::from_secs(10), 5)
//!         .threshold("http_req_duration", &["p(95)<300"])
//!         .await
//!         .expect("scenario configuration is valid");
//!     println!("{stats}");
//! }
//!
//! async fn setup() -> Result<(), std::convert::Infallible> {
//!     Ok(())
//! }
//!
//! async fn iteration(_: Arc<()>) {
//!     let res = ping().await;
//!     check!(res, { "is status 200" => |r: &Response| r.status() == 200 });
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//! }
//!
//! #[transaction]
//! async fn ping() -> Response {
//!     http::get("http://localhost:8080/health", &Params::default()).await
//! }
//! ```

pub mod check;
pub mod http;
pub mod scenario;
#[doc(hidden)]
pub mod transaction;

pub(crate) mod collector;
pub(crate) mod measurement;
pub(crate) mod thresholds;
pub(crate) mod timer;
pub(crate) mod vus;

pub use scenario::{ConfigurableScenario, Scenario, ScenarioError};
pub use surge_core as core;
pub use surge_macros::transaction;

pub mod prelude {
    pub use crate::check;
    pub use crate::http::{self, Params, Response};
    pub use crate::scenario::{ConfigurableScenario, Scenario, ScenarioError};
    pub use surge_core::{RunStatistics, Stage};
    pub use surge_macros::transaction;
}

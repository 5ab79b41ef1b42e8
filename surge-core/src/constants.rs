use std::time::Duration;

/// How often the ramp loop re-evaluates the target VU count.
pub const RAMP_INTERVAL: Duration = Duration::from_millis(100);

/// Time VUs are given to finish their in-flight iteration once the run is over.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Per-request timeout of the shared HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

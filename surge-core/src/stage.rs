use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A single step of the ramp schedule: over `duration`, move linearly from the previous
/// target to `target` concurrent VUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub const fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

#[derive(Debug, Error)]
pub enum StageParseError {
    #[error("Stage `{0}` must look like `<duration>:<target>`, e.g. `10s:5`")]
    Format(String),

    #[error("Invalid stage duration `{0}`: {1}")]
    Duration(String, humantime::DurationError),

    #[error("Invalid stage target `{0}`")]
    Target(String),
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| StageParseError::Format(s.to_string()))?;

        let duration = duration.trim();
        let target = target.trim();

        let duration = humantime::parse_duration(duration)
            .map_err(|err| StageParseError::Duration(duration.to_string(), err))?;
        let target = target
            .parse()
            .map_err(|_| StageParseError::Target(target.to_string()))?;

        Ok(Stage { duration, target })
    }
}

/// Total length of a ramp schedule.
pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

/// Number of VUs the schedule asks for `elapsed` into the run.
///
/// Stages are walked in order. Inside a stage the count is interpolated linearly between the
/// previous target (`start_vus` for the first stage) and the stage's target, then rounded to
/// the nearest integer. Past the end of the schedule the last target holds.
pub fn target_at(start_vus: usize, stages: &[Stage], elapsed: Duration) -> usize {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            // NOTE: zero-length stages never reach this point, so no division by zero.
            let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
            let from_f = from as f64;
            let to_f = stage.target as f64;
            return (from_f + (to_f - from_f) * progress).round() as usize;
        }
        from = stage.target;
        stage_start = stage_end;
    }

    from
}

use crate::{total_duration, Stage, Threshold, DEFAULT_GRACEFUL_STOP};
use std::num::NonZeroU32;
use std::time::Duration;

#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub name: String,
    pub start_vus: usize,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<Threshold>,
    pub graceful_stop: Duration,
    pub max_rps: Option<NonZeroU32>,
}

impl ScenarioConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_vus: 0,
            stages: vec![],
            thresholds: vec![],
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            max_rps: None,
        }
    }

    pub fn duration(&self) -> Duration {
        total_duration(&self.stages)
    }

    /// Highest VU count the schedule ever asks for.
    pub fn peak_vus(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// VU count the schedule ends on, which `duration()` extensions hold.
    pub fn last_target(&self) -> usize {
        self.stages
            .last()
            .map(|s| s.target)
            .unwrap_or(self.start_vus)
    }
}

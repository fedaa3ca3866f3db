//! Per-request statistics, read-only once a result is returned.

use serde::{Deserialize, Serialize};

/// The four generation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pedagogist,
    Coder,
    Validator,
    Debugger,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pedagogist => "pedagogist",
            Stage::Coder => "coder",
            Stage::Validator => "validator",
            Stage::Debugger => "debugger",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLatency {
    pub stage: Stage,
    pub duration_ms: u64,
}

/// Counters accumulated over one `generate` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Debugger fix attempts consumed.
    pub attempts_used: u32,
    /// Wall-clock time per stage, in execution order.
    pub stage_latencies: Vec<StageLatency>,
    pub backend_calls: u32,
    pub sandbox_calls: u32,
    pub tokens_used: u64,
    pub total_duration_ms: u64,
}

impl PipelineStats {
    pub fn record_stage(&mut self, stage: Stage, duration_ms: u64) {
        self.stage_latencies.push(StageLatency { stage, duration_ms });
    }

    /// Total time spent in `stage`.
    pub fn stage_total_ms(&self, stage: Stage) -> u64 {
        self.stage_latencies
            .iter()
            .filter(|l| l.stage == stage)
            .map(|l| l.duration_ms)
            .sum()
    }
}

//! AIMD adaptive concurrency controller: adjusts wave
//! parallelism from observed conflicts, cost, and reviewer satisfaction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Speed,
    Cost,
    Quality,
    #[default]
    Balanced,
}

impl std::str::FromStr for Strategy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speed" => Ok(Strategy::Speed),
            "cost" => Ok(Strategy::Cost),
            "quality" => Ok(Strategy::Quality),
            "balanced" | "" => Ok(Strategy::Balanced),
            other => anyhow::bail!("unknown strategy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyParams {
    pub initial_is_ceiling: bool,
    pub additive_increase: i64,
    pub multiplicative_decrease: f64,
    pub conflict_threshold: usize,
    pub cost_ceiling: Option<f64>,
}

impl Strategy {
    pub fn params(&self) -> StrategyParams {
        match self {
            Strategy::Speed => StrategyParams {
                initial_is_ceiling: true,
                additive_increase: 2,
                multiplicative_decrease: 0.75,
                conflict_threshold: 3,
                cost_ceiling: None,
            },
            Strategy::Cost => StrategyParams {
                initial_is_ceiling: false,
                additive_increase: 1,
                multiplicative_decrease: 0.5,
                conflict_threshold: 1,
                cost_ceiling: Some(1.0),
            },
            Strategy::Quality => StrategyParams {
                initial_is_ceiling: true,
                additive_increase: 0,
                multiplicative_decrease: 0.5,
                conflict_threshold: usize::MAX,
                cost_ceiling: None,
            },
            Strategy::Balanced => StrategyParams {
                initial_is_ceiling: true,
                additive_increase: 1,
                multiplicative_decrease: 0.5,
                conflict_threshold: 1,
                cost_ceiling: None,
            },
        }
    }
}

/// Observed outcome of a completed wave, fed back into the next decision.
#[derive(Debug, Clone, Default)]
pub struct WaveOutcome {
    pub conflicts: usize,
    pub avg_satisfaction: Option<f64>,
    pub wave_cost_usd: f64,
}

/// Recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveDecision {
    pub ceiling: usize,
    pub chosen: usize,
    pub conflicts: usize,
    pub avg_satisfaction: Option<f64>,
    pub reason: String,
}

const SATISFACTION_FLOOR: f64 = 0.5;

pub struct AimdController {
    strategy: Strategy,
    current: usize,
}

impl AimdController {
    pub fn new(strategy: Strategy, ceiling: usize) -> Self {
        let params = strategy.params();
        let current = if params.initial_is_ceiling { ceiling.max(1) } else { 1 };
        Self { strategy, current }
    }

    /// Warm-start from a prior run's final concurrency.
    pub fn warm_start(strategy: Strategy, ceiling: usize, prior_final: usize) -> Self {
        Self {
            strategy,
            current: prior_final.clamp(1, ceiling.max(1)),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Decide the next wave's worker cap given the ceiling (effective
    /// parallelism for the upcoming wave) and the previous wave's outcome.
    pub fn decide(&mut self, ceiling: usize, outcome: &WaveOutcome) -> WaveDecision {
        let ceiling = ceiling.max(1);
        let params = self.strategy.params();

        let clean = outcome.conflicts < params.conflict_threshold
            && outcome.avg_satisfaction.map(|s| s >= SATISFACTION_FLOOR).unwrap_or(true);

        let mut reason;
        if let Some(cost_ceiling) = params.cost_ceiling {
            if outcome.wave_cost_usd > cost_ceiling {
                self.current = (self.current.saturating_sub(1)).max(1);
                reason = "cost ceiling exceeded".to_string();
                let chosen = self.current.min(ceiling);
                self.current = chosen;
                return WaveDecision {
                    ceiling,
                    chosen,
                    conflicts: outcome.conflicts,
                    avg_satisfaction: outcome.avg_satisfaction,
                    reason,
                };
            }
        }

        if self.strategy == Strategy::Quality {
            if outcome.avg_satisfaction.map(|s| s < SATISFACTION_FLOOR).unwrap_or(false) {
                let decreased = ((self.current as f64) * params.multiplicative_decrease).floor() as i64;
                self.current = decreased.max(1) as usize;
                reason = "low satisfaction, holding quality".to_string();
            } else {
                reason = "quality strategy holds ceiling".to_string();
            }
        } else if clean {
            let increased = self.current as i64 + params.additive_increase;
            self.current = increased.max(1) as usize;
            reason = "clean wave, additive increase".to_string();
        } else {
            let decreased = ((self.current as f64) * params.multiplicative_decrease).floor() as i64;
            self.current = decreased.max(1) as usize;
            reason = "conflicted wave, multiplicative decrease".to_string();
        }

        self.current = self.current.clamp(1, ceiling);
        if self.current == ceiling && reason.contains("increase") {
            reason = format!("{reason} (capped at ceiling)");
        }

        WaveDecision {
            ceiling,
            chosen: self.current,
            conflicts: outcome.conflicts,
            avg_satisfaction: outcome.avg_satisfaction,
            reason,
        }
    }
}

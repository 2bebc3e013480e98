use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLING_PROBABILITY: f64 = 0.001;
pub const PROBABILISTIC_STRATEGY_TYPE: &str = "probabilistic";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    Probabilistic { sampling_rate: f64 },
    RateLimiting { max_traces_per_second: i16 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        SamplingStrategy::Probabilistic {
            sampling_rate: DEFAULT_SAMPLING_PROBABILITY,
        }
    }
}

/// Published by operators to change the strategy of one service, or the default one
/// e.g. `{"type": "probabilistic", "param": 0.5}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyUpdate {
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub param: f64,
}

impl From<StrategyUpdate> for SamplingStrategy {
    fn from(update: StrategyUpdate) -> Self {
        // anything that isn't probabilistic is treated as rate limiting
        if update.strategy_type == PROBABILISTIC_STRATEGY_TYPE {
            SamplingStrategy::Probabilistic {
                sampling_rate: update.param,
            }
        } else {
            SamplingStrategy::RateLimiting {
                max_traces_per_second: update.param as i16,
            }
        }
    }
}

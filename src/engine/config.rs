use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Composite edge weight coefficients (alpha, beta, gamma).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphConfig {
    pub prerequisite_weight: f64,
    pub similarity_weight: f64,
    pub temporal_weight: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            prerequisite_weight: 0.5,
            similarity_weight: 0.3,
            temporal_weight: 0.2,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("prerequisite_weight", self.prerequisite_weight),
            ("similarity_weight", self.similarity_weight),
            ("temporal_weight", self.temporal_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidValue { field, value });
            }
        }
        let sum = self.prerequisite_weight + self.similarity_weight + self.temporal_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigurationError::InvalidWeights { sum });
        }
        Ok(())
    }
}

/// How older attempts are discounted when the posterior is replayed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DecayMode {
    /// weight = exp(-rate * i), i = 0 for the most recent attempt
    Index { rate: f64 },
    /// weight = 0.5 ^ (age / half_life), age measured from the most recent attempt
    WallClock { half_life_hours: f64 },
}

impl Default for DecayMode {
    fn default() -> Self {
        DecayMode::Index { rate: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IrtConfig {
    pub enabled: bool,
    pub min_attempts: usize,
    pub blend_k: f64,
    pub max_weight: f64,
    pub discrimination: f64,
}

impl Default for IrtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_attempts: 5,
            blend_k: 10.0,
            max_weight: 0.5,
            discrimination: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasteryConfig {
    pub prior_alpha: f64,
    pub prior_beta: f64,
    /// Pseudo-count given to a seeded prior mastery.
    pub prior_strength: f64,
    pub decay: DecayMode,
    pub velocity_window: usize,
    pub expected_attempt_secs: f64,
    pub irt: IrtConfig,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            prior_alpha: 1.0,
            prior_beta: 1.0,
            prior_strength: 2.0,
            decay: DecayMode::default(),
            velocity_window: 10,
            expected_attempt_secs: 60.0,
            irt: IrtConfig::default(),
        }
    }
}

/// Bandit strategy, chosen once at configuration time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    ThompsonSampling,
    UpperConfidenceBound { exploration: f64 },
}

impl SelectionStrategy {
    pub fn parse(s: &str, exploration: f64) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "thompson" | "thompson_sampling" => Some(Self::ThompsonSampling),
            "ucb" | "upper_confidence_bound" => Some(Self::UpperConfidenceBound { exploration }),
            _ => None,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::UpperConfidenceBound { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditConfig {
    pub strategy: SelectionStrategy,
    pub prior_alpha: f64,
    pub prior_beta: f64,
    pub bandit_weight: f64,
    pub context_weight: f64,
    pub max_resources_per_step: usize,
    pub seed: Option<u64>,
    pub fallback_minutes: f64,
    pub fallback_difficulty: f64,
    pub available_minutes_per_resource: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            prior_alpha: 1.0,
            prior_beta: 1.0,
            bandit_weight: 0.6,
            context_weight: 0.4,
            max_resources_per_step: 3,
            seed: None,
            fallback_minutes: 15.0,
            fallback_difficulty: 0.1,
            available_minutes_per_resource: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    pub mastery_threshold: f64,
    pub w_mastery: f64,
    pub w_time: f64,
    pub w_diversity: f64,
    pub w_smoothness: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            mastery_threshold: 0.7,
            w_mastery: 0.4,
            w_time: 0.2,
            w_diversity: 0.2,
            w_smoothness: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptationConfig {
    pub window_size: usize,
    pub struggle_gain: f64,
    pub struggle_completion: f64,
    pub excel_gain: f64,
    pub excel_completion: f64,
    pub split_threshold_minutes: f64,
    pub near_mastery_margin: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            struggle_gain: 0.3,
            struggle_completion: 0.5,
            excel_gain: 0.7,
            excel_completion: 0.8,
            split_threshold_minutes: 30.0,
            near_mastery_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub mastery: MasteryConfig,
    pub bandit: BanditConfig,
    pub optimizer: OptimizerConfig,
    pub adaptation: AdaptationConfig,
    pub latency_budget_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            mastery: MasteryConfig::default(),
            bandit: BanditConfig::default(),
            optimizer: OptimizerConfig::default(),
            adaptation: AdaptationConfig::default(),
            latency_budget_ms: 300,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("LEARNPATH_MASTERY_THRESHOLD") {
            config.optimizer.mastery_threshold = val.clamp(0.0, 1.0);
        }
        let exploration = env_parse::<f64>("LEARNPATH_UCB_EXPLORATION").unwrap_or(2.0);
        if let Ok(val) = std::env::var("LEARNPATH_BANDIT_STRATEGY") {
            match SelectionStrategy::parse(&val, exploration) {
                Some(strategy) => config.bandit.strategy = strategy,
                None => tracing::warn!(value = %val, "unknown bandit strategy, keeping default"),
            }
        }
        if let Some(seed) = env_parse::<u64>("LEARNPATH_BANDIT_SEED") {
            config.bandit.seed = Some(seed);
        }
        if let Ok(val) = std::env::var("LEARNPATH_DECAY_MODE") {
            config.mastery.decay = match val.to_lowercase().as_str() {
                "wallclock" | "wall_clock" => DecayMode::WallClock {
                    half_life_hours: env_parse("LEARNPATH_DECAY_HALF_LIFE_HOURS").unwrap_or(168.0),
                },
                _ => DecayMode::Index {
                    rate: env_parse("LEARNPATH_DECAY_RATE").unwrap_or(0.0),
                },
            };
        } else if let Some(rate) = env_parse::<f64>("LEARNPATH_DECAY_RATE") {
            config.mastery.decay = DecayMode::Index { rate };
        }
        if let Some(enabled) = env_parse::<bool>("LEARNPATH_IRT_ENABLED") {
            config.mastery.irt.enabled = enabled;
        }
        if let Some(window) = env_parse::<usize>("LEARNPATH_ADAPT_WINDOW") {
            config.adaptation.window_size = window.max(1);
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.graph.validate()?;
        let threshold = self.optimizer.mastery_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigurationError::InvalidValue {
                field: "mastery_threshold",
                value: threshold,
            });
        }
        if self.mastery.prior_alpha <= 0.0 || self.mastery.prior_beta <= 0.0 {
            return Err(ConfigurationError::InvalidValue {
                field: "mastery.prior",
                value: self.mastery.prior_alpha.min(self.mastery.prior_beta),
            });
        }
        match self.mastery.decay {
            DecayMode::Index { rate } if rate < 0.0 => {
                return Err(ConfigurationError::InvalidValue {
                    field: "decay.rate",
                    value: rate,
                })
            }
            DecayMode::WallClock { half_life_hours } if half_life_hours <= 0.0 => {
                return Err(ConfigurationError::InvalidValue {
                    field: "decay.half_life_hours",
                    value: half_life_hours,
                })
            }
            _ => {}
        }
        if let SelectionStrategy::UpperConfidenceBound { exploration } = self.bandit.strategy {
            if exploration < 0.0 {
                return Err(ConfigurationError::InvalidValue {
                    field: "ucb.exploration",
                    value: exploration,
                });
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

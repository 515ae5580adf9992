// Engine configuration
// Loaded from JSON, every field optional with the documented defaults

use std::path::Path;

use ap_optimizer::{AnnealingConfig, BayesConfig, LossConfig, DEFAULT_SEED};
use ap_types::{config_error, ApResult};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default lumens per watt pushed into every sampler.
pub const DEFAULT_LIGHT_EFFICACY: f64 = 30_000.0;

/// Settings of the opening optimization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Iterations of the random and annealing strategies.
    pub max_steps: usize,
    pub light_efficacy: f64,
    pub loss: LossConfig,
    pub bayes: BayesConfig,
    pub annealing: AnnealingConfig,
    /// Environment map rendered for view samplers.
    pub max_env_map: String,
    /// Environment map rendered for planar samplers.
    pub avg_env_map: String,
    /// Seed of the random search generator.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            light_efficacy: DEFAULT_LIGHT_EFFICACY,
            loss: LossConfig::default(),
            bayes: BayesConfig::default(),
            annealing: AnnealingConfig::default(),
            max_env_map: "max_illumination".to_string(),
            avg_env_map: "average_illumination".to_string(),
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> ApResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ApResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!(path = %path.display(), "engine configuration loaded");
        Ok(config)
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_light_efficacy(mut self, efficacy: f64) -> Self {
        self.light_efficacy = efficacy;
        self
    }

    pub fn with_loss(mut self, loss: LossConfig) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_bayes(mut self, bayes: BayesConfig) -> Self {
        self.bayes = bayes;
        self
    }

    pub fn with_annealing(mut self, annealing: AnnealingConfig) -> Self {
        self.annealing = annealing;
        self
    }

    pub fn with_env_maps(mut self, max: impl Into<String>, avg: impl Into<String>) -> Self {
        self.max_env_map = max.into();
        self.avg_env_map = avg.into();
        self
    }

    pub fn validate(&self) -> ApResult<()> {
        if self.max_steps == 0 {
            return Err(config_error!("max_steps must be at least 1"));
        }
        if self.light_efficacy.is_nan() || self.light_efficacy <= 0.0 {
            return Err(config_error!("light_efficacy must be positive, got {}", self.light_efficacy));
        }
        if self.loss.low_stiffness <= 0.0 || self.loss.high_stiffness <= 0.0 {
            return Err(config_error!("loss stiffness must be positive"));
        }
        if self.loss.penalty_multiplier < 0.0 {
            return Err(config_error!("penalty_multiplier must be non-negative"));
        }
        if self.max_env_map.is_empty() || self.avg_env_map.is_empty() {
            return Err(config_error!("environment map identifiers must not be empty"));
        }
        self.bayes.validate()?;
        self.annealing.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_optimizer::CriterionMethod;
    use ap_types::ApError;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.light_efficacy, 30_000.0);
        assert_eq!(config.bayes.top_k, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "max_steps": 40,
                "loss": { "penalty_multiplier": 2.5 },
                "bayes": { "criterion": "Hedge4", "explore_iterations": 30 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 40);
        assert_eq!(config.loss.penalty_multiplier, 2.5);
        assert_eq!(config.loss.low_stiffness, 0.001);
        assert_eq!(config.bayes.criterion, CriterionMethod::Hedge4);
        assert_eq!(config.bayes.train_iterations, 10);
        assert_eq!(config.avg_env_map, "average_illumination");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_steps": 0}"#).unwrap_err();
        assert!(matches!(err, ApError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{"bayes": {"epsilon": 2.0}}"#).unwrap_err();
        assert!(matches!(err, ApError::Validation(_)));

        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ApError::Serialization(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::from_json_file("/nonexistent/aperture.json").unwrap_err();
        assert!(matches!(err, ApError::Io(_)));
    }
}

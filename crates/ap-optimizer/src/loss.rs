//! Goal losses, overlap penalty and the per-iteration evaluation.

use ap_types::{Sampler, SamplerGoal, SamplerMeasurement};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::OpeningDomain;

/// Largest magnitude a single goal loss reports.
const MAX_GOAL_LOSS: f64 = 1.0 - f64::EPSILON;

/// Weights of the smooth goal loss and the overlap penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Steepness of the loss below a goal's minimum.
    pub low_stiffness: f64,
    /// Steepness of the loss above a goal's maximum.
    pub high_stiffness: f64,
    pub penalty_multiplier: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            low_stiffness: 0.001,
            high_stiffness: 0.001,
            penalty_multiplier: 1.0,
        }
    }
}

impl LossConfig {
    pub fn with_stiffness(mut self, low: f64, high: f64) -> Self {
        self.low_stiffness = low;
        self.high_stiffness = high;
        self
    }

    pub fn with_penalty_multiplier(mut self, multiplier: f64) -> Self {
        self.penalty_multiplier = multiplier;
        self
    }

    /// Zero inside `[min, max]`, rising smoothly toward 1 outside it.
    ///
    /// The sigmoid rounds to exactly 1 far from the goal, so the result is
    /// clamped to stay strictly inside `(-1, 1)`.
    pub fn loss(&self, min: f64, max: f64, value: f64) -> f64 {
        let loss = if value < min {
            2.0 * sigmoid(-self.low_stiffness * (value - min)) - 1.0
        } else if value > max {
            2.0 * sigmoid(self.high_stiffness * (value - max)) - 1.0
        } else {
            0.0
        };
        loss.clamp(-MAX_GOAL_LOSS, MAX_GOAL_LOSS)
    }

    pub fn goal_loss(&self, goal: &SamplerGoal, value: f64) -> f64 {
        self.loss(goal.min, goal.max, value)
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Normalized pairwise overlap of openings within each domain node.
///
/// Each intersecting pair contributes `overlap / (vol_a + vol_b)`, so two
/// coincident openings contribute 0.5. Openings of different nodes are never
/// compared.
pub fn overlap_loss(domains: &[OpeningDomain]) -> f64 {
    domains
        .iter()
        .flat_map(|domain| domain.nodes())
        .map(|node| {
            let boxes = node.openings_bbox();
            let mut sum = 0.0;
            for (i, a) in boxes.iter().enumerate() {
                for b in &boxes[i + 1..] {
                    let overlap = a.overlap_volume(b);
                    let total = a.volume() + b.volume();
                    if overlap > 0.0 && total > 0.0 {
                        sum += overlap / total;
                    }
                }
            }
            sum
        })
        .sum()
}

/// Score of the currently rendered layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    /// `loss + penalty`, the value every strategy minimizes.
    pub objective: f64,
    /// Sum of goal losses over all samplers.
    pub loss: f64,
    /// Weighted overlap penalty.
    pub penalty: f64,
    /// Sum of raw sampler values.
    pub measured: f64,
    pub view: Vec<SamplerMeasurement>,
    pub planar: Vec<SamplerMeasurement>,
}

/// Turns sampler readings and applied openings into an [`Evaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossEvaluator {
    config: LossConfig,
}

impl LossEvaluator {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Read every sampler and score the layout.
    ///
    /// Callers must only evaluate once all samplers report rendering done.
    pub fn evaluate(
        &self,
        view_samplers: &[Box<dyn Sampler>],
        planar_samplers: &[Box<dyn Sampler>],
        domains: &[OpeningDomain],
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for sampler in view_samplers {
            let measurement = self.measure(sampler.as_ref());
            evaluation.loss += measurement.loss;
            evaluation.measured += measurement.value;
            evaluation.view.push(measurement);
        }
        for sampler in planar_samplers {
            let measurement = self.measure(sampler.as_ref());
            evaluation.loss += measurement.loss;
            evaluation.measured += measurement.value;
            evaluation.planar.push(measurement);
        }

        evaluation.penalty = self.config.penalty_multiplier * overlap_loss(domains);
        evaluation.objective = evaluation.loss + evaluation.penalty;
        evaluation
    }

    fn measure(&self, sampler: &dyn Sampler) -> SamplerMeasurement {
        let value = sampler.measurement().magnitude();
        SamplerMeasurement {
            value,
            loss: self.config.goal_loss(&sampler.goal(), value),
        }
    }
}

/// How one sampler family relates to its goals.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GoalStats {
    pub samplers: usize,
    pub reached: usize,
    pub below: usize,
    pub above: usize,
    /// Mean distance below the minimum over the samplers that fell short.
    pub mean_error_below: f64,
    /// Mean distance above the maximum over the samplers that overshot.
    pub mean_error_above: f64,
    pub loss: f64,
}

impl GoalStats {
    /// Tally `(goal, measurement)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (SamplerGoal, &'a SamplerMeasurement)>) -> Self {
        let mut stats = GoalStats::default();
        let mut error_below = 0.0;
        let mut error_above = 0.0;

        for (goal, measurement) in pairs {
            stats.samplers += 1;
            stats.loss += measurement.loss;
            if measurement.value < goal.min {
                stats.below += 1;
                error_below += goal.min - measurement.value;
            } else if measurement.value > goal.max {
                stats.above += 1;
                error_above += measurement.value - goal.max;
            } else {
                stats.reached += 1;
            }
        }

        if stats.below > 0 {
            stats.mean_error_below = error_below / stats.below as f64;
        }
        if stats.above > 0 {
            stats.mean_error_above = error_above / stats.above as f64;
        }
        stats
    }
}

/// Goal attainment of the best layout found so far.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplerStatsReport {
    pub view: GoalStats,
    pub planar: GoalStats,
    pub global_loss: f64,
}

impl SamplerStatsReport {
    pub fn new(view: GoalStats, planar: GoalStats) -> Self {
        let global_loss = view.loss + planar.loss;
        Self { view, planar, global_loss }
    }

    pub fn goals_reached(&self) -> usize {
        self.view.reached + self.planar.reached
    }

    pub fn total_samplers(&self) -> usize {
        self.view.samplers + self.planar.samplers
    }

    pub fn log(&self) {
        info!(
            reached = self.goals_reached(),
            total = self.total_samplers(),
            "Goals reached"
        );
        info!(
            below = self.planar.below,
            mean_error_below = self.planar.mean_error_below,
            above = self.planar.above,
            mean_error_above = self.planar.mean_error_above,
            loss = self.planar.loss,
            "Planar samplers"
        );
        info!(
            below = self.view.below,
            mean_error_below = self.view.mean_error_below,
            above = self.view.above,
            mean_error_above = self.view.mean_error_above,
            loss = self.view.loss,
            "View samplers"
        );
        info!(global_loss = self.global_loss, "Global loss");
    }
}

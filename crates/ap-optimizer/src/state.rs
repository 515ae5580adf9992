//! Run bookkeeping: best layout so far and run lifecycle.

use ap_types::{CutterState, SamplerMeasurement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::OpeningDomain;
use crate::loss::Evaluation;
use crate::topk::TopKCache;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Best and working layouts of the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationState {
    /// Lowest objective seen so far.
    pub best_loss: f64,
    /// Sum of raw sampler values of the best layout.
    pub best_cost: f64,
    pub best_penalty: f64,
    pub elapsed_seconds: f64,
    pub per_view_sampler: Vec<SamplerMeasurement>,
    pub per_planar_sampler: Vec<SamplerMeasurement>,
    pub top_k: TopKCache,
    pub best_cutters: Vec<CutterState>,
    /// Layout currently applied (or about to be).
    pub previous_cutters: Vec<CutterState>,
}

impl Default for OptimizationState {
    fn default() -> Self {
        Self::new(Vec::new(), 0, 0, TopKCache::default().capacity())
    }
}

impl OptimizationState {
    pub fn new(cutters: Vec<CutterState>, view_samplers: usize, planar_samplers: usize, top_k: usize) -> Self {
        Self {
            best_loss: f64::MAX,
            best_cost: f64::MAX,
            best_penalty: f64::MAX,
            elapsed_seconds: 0.0,
            per_view_sampler: vec![SamplerMeasurement::default(); view_samplers],
            per_planar_sampler: vec![SamplerMeasurement::default(); planar_samplers],
            top_k: TopKCache::new(top_k),
            best_cutters: cutters.clone(),
            previous_cutters: cutters,
        }
    }

    /// Fresh state with one zeroed cutter per requested cutter of each domain.
    pub fn for_domains(
        domains: &mut [OpeningDomain],
        view_samplers: usize,
        planar_samplers: usize,
        top_k: usize,
    ) -> Self {
        let mut cutters = Vec::new();
        for (index, domain) in domains.iter_mut().enumerate() {
            let variables = domain.number_of_variables();
            for _ in 0..domain.number_of_cutters() {
                cutters.push(CutterState::new(index, variables));
            }
        }
        debug!(cutters = cutters.len(), "optimization state sized");
        Self::new(cutters, view_samplers, planar_samplers, top_k)
    }

    /// Whether any evaluation has been recorded yet.
    pub fn has_best(&self) -> bool {
        self.best_loss < f64::MAX
    }

    /// Log the evaluation and keep it if it beats the best so far.
    pub fn record_evaluation(&mut self, evaluation: &Evaluation, iteration: usize) -> bool {
        info!(
            "Iter: {} - Loss: {:.2} Penalty: {:.2}",
            iteration, evaluation.objective, evaluation.penalty
        );
        if evaluation.objective >= self.best_loss {
            return false;
        }

        self.best_loss = evaluation.objective;
        self.best_penalty = evaluation.penalty;
        self.best_cost = evaluation.measured;
        self.best_cutters = self.previous_cutters.clone();
        self.per_view_sampler = evaluation.view.clone();
        self.per_planar_sampler = evaluation.planar.clone();
        info!(
            iteration,
            loss = evaluation.objective,
            penalty = evaluation.penalty,
            cost = evaluation.measured,
            "best layout found"
        );
        true
    }
}

/// Lifecycle of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Which search strategy drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    Random,
    SimulatedAnnealing,
    Bayesian,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Random => "random",
            StrategyKind::SimulatedAnnealing => "simulated_annealing",
            StrategyKind::Bayesian => "bayesian",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of the latest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: RunId,
    pub strategy: Option<StrategyKind>,
    pub state: RunState,
    pub iterations_completed: usize,
    pub max_iterations: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for OptimizationStatus {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            strategy: None,
            state: RunState::Idle,
            iterations_completed: 0,
            max_iterations: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

impl OptimizationStatus {
    pub fn new(strategy: StrategyKind, max_iterations: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy: Some(strategy),
            max_iterations,
            ..Self::default()
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = RunState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Wall clock seconds between start and finish (or now, while running).
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainConfig;
    use ap_types::{OpeningType, ScaleOptimization};

    fn evaluation(objective: f64) -> Evaluation {
        Evaluation {
            objective,
            loss: objective,
            penalty: 0.0,
            measured: objective * 10.0,
            view: vec![SamplerMeasurement { value: objective, loss: objective }],
            planar: Vec::new(),
        }
    }

    #[test]
    fn state_sized_from_domains() {
        let mut domains = vec![
            OpeningDomain::new(DomainConfig::new("a").with_cutters(2)),
            OpeningDomain::new(
                DomainConfig::new("b")
                    .with_scale_optimization(ScaleOptimization::VariableScale)
                    .with_opening_type(OpeningType::SpacingX),
            ),
        ];
        let state = OptimizationState::for_domains(&mut domains, 1, 2, 5);
        assert_eq!(state.previous_cutters.len(), 3);
        assert_eq!(state.previous_cutters[2].parameters.len(), 5);
        assert_eq!(state.previous_cutters[2].domain_index, 1);
        assert_eq!(state.per_planar_sampler.len(), 2);
        assert_eq!(state.top_k.capacity(), 5);
        assert!(!state.has_best());
    }

    #[test]
    fn only_improvements_are_recorded() {
        let mut state = OptimizationState::new(vec![CutterState::new(0, 2)], 1, 0, 3);
        state.previous_cutters[0].parameters = vec![0.1, 0.1];
        assert!(state.record_evaluation(&evaluation(2.0), 1));

        state.previous_cutters[0].parameters = vec![0.9, 0.9];
        assert!(!state.record_evaluation(&evaluation(2.0), 2));
        assert!(!state.record_evaluation(&evaluation(3.0), 3));

        assert_eq!(state.best_loss, 2.0);
        assert_eq!(state.best_cost, 20.0);
        assert_eq!(state.best_cutters[0].parameters, vec![0.1, 0.1]);
        assert_eq!(state.per_view_sampler[0].value, 2.0);

        assert!(state.record_evaluation(&evaluation(0.5), 4));
        assert_eq!(state.best_cutters[0].parameters, vec![0.9, 0.9]);
    }

    #[test]
    fn status_lifecycle() {
        let mut status = OptimizationStatus::new(StrategyKind::Bayesian, 26);
        assert_eq!(status.state, RunState::Idle);
        assert!(status.elapsed_seconds().is_none());

        status.mark_running();
        assert!(status.is_running());
        status.mark_completed();
        assert_eq!(status.state, RunState::Completed);
        assert!(status.elapsed_seconds().unwrap_or(-1.0) >= 0.0);
    }

    #[test]
    fn state_serializes_for_hosts() {
        let state = OptimizationState::new(vec![CutterState::new(0, 3)], 2, 2, 4);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["best_cutters"][0]["parameters"].as_array().map(|a| a.len()), Some(3));
        assert_eq!(json["top_k"]["capacity"], 4);
    }
}

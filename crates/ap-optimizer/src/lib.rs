//! # ap-optimizer
//!
//! Opening placement search for Aperture.
//!
//! Provides the domain parameterization that turns normalized cutter
//! parameters into transforms, the goal/overlap loss, run state with a top-k
//! layout cache, and the random, simulated annealing and Bayesian search
//! strategies with a built-in Gaussian process surrogate.

mod domain;
mod gp;
mod loss;
mod search;
mod state;
mod surrogate;
mod topk;

pub use domain::{DomainConfig, OpeningDomain, MAX_SPACING_REPEATS};
pub use gp::GaussianProcessOptimizer;
pub use loss::{overlap_loss, sigmoid, Evaluation, GoalStats, LossConfig, LossEvaluator, SamplerStatsReport};
pub use search::{
    apply_cutters, AnnealingConfig, BayesianSearch, RandomSearch, RunContext, SearchStrategy,
    SimulatedAnnealing, StrategySnapshot, DEFAULT_SEED,
};
pub use state::{OptimizationState, OptimizationStatus, RunId, RunState, StrategyKind};
pub use surrogate::{
    latin_hypercube, BayesConfig, CriterionMethod, KernelMethod, LearningMethod, SurrogateMethod,
    SurrogateOptimizer,
};
pub use topk::{TopKCache, TopKEntry, DEFAULT_TOP_K};

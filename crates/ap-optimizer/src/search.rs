//! Search strategies driven by the stage scheduler.
//!
//! A strategy sees the run through a [`RunContext`] lent to it for each call:
//! `init` once when a run starts, `step` after every rendered layout, and
//! `commit_geometry` to put the next layout on the cut targets.

use std::time::Instant;

use ap_types::{flatten_cutters, unflatten_into, CutterState, Sampler};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::OpeningDomain;
use crate::loss::{Evaluation, LossEvaluator};
use crate::state::{OptimizationState, StrategyKind};
use crate::surrogate::{BayesConfig, SurrogateOptimizer};
use crate::topk::TopKEntry;

/// Seed every strategy starts its generator from.
pub const DEFAULT_SEED: u64 = 1337;

/// Everything a strategy may touch during one scheduler call.
pub struct RunContext<'a> {
    pub domains: &'a mut [OpeningDomain],
    pub view_samplers: &'a mut [Box<dyn Sampler>],
    pub planar_samplers: &'a mut [Box<dyn Sampler>],
    pub evaluator: &'a LossEvaluator,
    pub state: &'a mut OptimizationState,
    /// Completed commit cycles of the current run.
    pub iteration: usize,
    pub max_iterations: usize,
}

impl RunContext<'_> {
    pub fn reset_domains(&mut self) {
        for domain in self.domains.iter_mut() {
            domain.reset_cutted();
        }
    }

    /// Score what the samplers currently see and keep it if it is the best.
    pub fn evaluate_loss(&mut self) -> Evaluation {
        let evaluation = self
            .evaluator
            .evaluate(self.view_samplers, self.planar_samplers, self.domains);
        self.state.record_evaluation(&evaluation, self.iteration);
        evaluation
    }

    pub fn apply_previous(&mut self) {
        apply_cutters(self.domains, &self.state.previous_cutters);
    }

    /// Put the best layout back and report its per-sampler scores.
    pub fn finalize_openings(&mut self) {
        apply_cutters(self.domains, &self.state.best_cutters);
        for (sampler, cost) in self.view_samplers.iter_mut().zip(&self.state.per_view_sampler) {
            sampler.set_reported_cost(*cost);
        }
        for (sampler, cost) in self.planar_samplers.iter_mut().zip(&self.state.per_planar_sampler) {
            sampler.set_reported_cost(*cost);
        }
        info!(
            best_loss = self.state.best_loss,
            best_penalty = self.state.best_penalty,
            best_cost = self.state.best_cost,
            "best layout committed"
        );
    }

    pub fn is_final(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// Apply each cutter to its top-level domain.
pub fn apply_cutters(domains: &mut [OpeningDomain], cutters: &[CutterState]) -> bool {
    let mut ok = true;
    for cutter in cutters {
        match domains.get_mut(cutter.domain_index) {
            Some(domain) => ok &= domain.apply_transform_from_parameterization(cutter.packed()),
            None => {
                warn!(domain_index = cutter.domain_index, "cutter refers to a missing domain");
                ok = false;
            }
        }
    }
    ok
}

fn randomize_all<R: Rng + ?Sized>(cutters: &mut [CutterState], rng: &mut R) {
    for cutter in cutters {
        for parameter in cutter.parameters.iter_mut() {
            *parameter = rng.random::<f64>();
        }
    }
}

fn mutate_one<R: Rng + ?Sized>(cutters: &mut [CutterState], rng: &mut R) {
    if cutters.is_empty() {
        return;
    }
    let index = rng.random_range(0..cutters.len());
    for parameter in cutters[index].parameters.iter_mut() {
        *parameter = rng.random::<f64>();
    }
}

/// Read-only view of a strategy for status displays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub temperature: Option<f64>,
    pub assignments: usize,
    pub probabilistic_assignments: usize,
    pub rejected: usize,
    pub samples: usize,
}

/// A search strategy stepped by the scheduler.
pub trait SearchStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Human-readable strategy name.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Scheduler iterations this strategy needs given the configured maximum.
    fn max_iterations(&self, configured: usize) -> usize {
        configured
    }

    fn init(&mut self, ctx: &mut RunContext<'_>);

    /// Digest the rendered layout and prepare the next one.
    fn step(&mut self, ctx: &mut RunContext<'_>);

    /// Replace the applied openings with the next layout (or the best one on
    /// the final iteration).
    fn commit_geometry(&mut self, ctx: &mut RunContext<'_>);

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot::default()
    }

    /// Surrogate mean at `x`, for strategies that model the objective.
    fn response_surface_at(&self, _x: &[f64]) -> Option<f64> {
        None
    }
}

/// Shared commit of the mutation strategies: the working copy until the last
/// iteration, then the best.
fn commit_working_or_best(ctx: &mut RunContext<'_>) {
    ctx.reset_domains();
    if ctx.is_final() {
        ctx.finalize_openings();
    } else {
        ctx.apply_previous();
    }
}

// ---- Random search ----

/// Re-draws one random cutter per iteration, keeps the best layout seen.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    seed: u64,
    rng: ChaCha8Rng,
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn init(&mut self, ctx: &mut RunContext<'_>) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        ctx.reset_domains();
        randomize_all(&mut ctx.state.previous_cutters, &mut self.rng);
        debug!(cutters = ctx.state.previous_cutters.len(), "random search initialized");
    }

    fn step(&mut self, ctx: &mut RunContext<'_>) {
        // nothing has been rendered before the first commit
        if ctx.iteration == 0 {
            return;
        }
        ctx.evaluate_loss();
        if ctx.is_final() {
            return;
        }
        mutate_one(&mut ctx.state.previous_cutters, &mut self.rng);
    }

    fn commit_geometry(&mut self, ctx: &mut RunContext<'_>) {
        commit_working_or_best(ctx);
    }
}

// ---- Simulated annealing ----

/// Cooling schedule of [`SimulatedAnnealing`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    /// Expected objective variance, scales the starting temperature.
    pub variance: f64,
    /// Probability of accepting an average uphill move at the start.
    pub initial_acceptance: f64,
    /// Temperature multiplier applied every `cooling_interval` iterations.
    pub cooling_rate: f64,
    pub cooling_interval: usize,
    pub seed: u64,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            variance: 5.0,
            initial_acceptance: 0.7,
            cooling_rate: 0.9,
            cooling_interval: 5,
            seed: DEFAULT_SEED,
        }
    }
}

impl AnnealingConfig {
    pub fn initial_temperature(&self) -> f64 {
        -self.variance / self.initial_acceptance.ln() * self.cooling_rate
    }

    pub fn validate(&self) -> ap_types::ApResult<()> {
        if !(self.initial_acceptance > 0.0 && self.initial_acceptance < 1.0) {
            return Err(ap_types::validation_error!(
                "initial_acceptance must lie in (0, 1), got {}",
                self.initial_acceptance
            ));
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate <= 1.0) {
            return Err(ap_types::validation_error!("cooling_rate must lie in (0, 1]"));
        }
        if self.variance <= 0.0 {
            return Err(ap_types::validation_error!("variance must be positive"));
        }
        if self.cooling_interval == 0 {
            return Err(ap_types::validation_error!("cooling_interval must be at least 1"));
        }
        Ok(())
    }
}

/// Metropolis acceptance over single-cutter mutations.
#[derive(Debug, Clone)]
pub struct SimulatedAnnealing {
    config: AnnealingConfig,
    rng: ChaCha8Rng,
    temperature: f64,
    best_cost: f64,
    previous_cost: f64,
    /// Layout of the last accepted move; the run's best lives in `OptimizationState`.
    best_cutters: Vec<CutterState>,
    iterations: usize,
    assignments: usize,
    probabilistic_assignments: usize,
    rejected: usize,
}

impl Default for SimulatedAnnealing {
    fn default() -> Self {
        Self::new(AnnealingConfig::default())
    }
}

impl SimulatedAnnealing {
    pub fn new(config: AnnealingConfig) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            temperature: config.initial_temperature(),
            best_cost: f64::MAX,
            previous_cost: f64::MAX,
            best_cutters: Vec::new(),
            iterations: 0,
            assignments: 0,
            probabilistic_assignments: 0,
            rejected: 0,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Cost of the last accepted move.
    pub fn accepted_cost(&self) -> f64 {
        self.best_cost
    }

    /// Accept, probabilistically accept or reject the layout just scored.
    fn metropolis(&mut self, scored: &[CutterState]) {
        if self.previous_cost < self.best_cost {
            self.best_cost = self.previous_cost;
            self.best_cutters = scored.to_vec();
            self.assignments += 1;
        } else {
            let u = self.rng.random::<f64>();
            let acceptance = ((self.best_cost - self.previous_cost) / self.temperature).exp();
            if u <= acceptance {
                self.best_cost = self.previous_cost;
                self.best_cutters = scored.to_vec();
                self.probabilistic_assignments += 1;
            } else {
                self.rejected += 1;
            }
        }

        self.iterations += 1;
        if self.iterations % self.config.cooling_interval == 0 {
            self.temperature *= self.config.cooling_rate;
            debug!(temperature = self.temperature, "annealing cooled");
        }
    }
}

impl SearchStrategy for SimulatedAnnealing {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SimulatedAnnealing
    }

    fn init(&mut self, ctx: &mut RunContext<'_>) {
        *self = Self::new(self.config);
        ctx.reset_domains();
        randomize_all(&mut ctx.state.previous_cutters, &mut self.rng);
        debug!(temperature = self.temperature, "simulated annealing initialized");
    }

    fn step(&mut self, ctx: &mut RunContext<'_>) {
        if ctx.iteration == 0 {
            return;
        }
        let evaluation = ctx.evaluate_loss();
        self.previous_cost = evaluation.objective;
        if ctx.is_final() {
            return;
        }

        self.metropolis(&ctx.state.previous_cutters);
        // the working copy continues from the layout just scored
        mutate_one(&mut ctx.state.previous_cutters, &mut self.rng);
    }

    fn commit_geometry(&mut self, ctx: &mut RunContext<'_>) {
        commit_working_or_best(ctx);
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            temperature: Some(self.temperature),
            assignments: self.assignments,
            probabilistic_assignments: self.probabilistic_assignments,
            rejected: self.rejected,
            samples: self.iterations,
        }
    }
}

// ---- Bayesian search ----

/// Latin hypercube training followed by surrogate-guided exploration.
pub struct BayesianSearch {
    config: BayesConfig,
    surrogate: Box<dyn SurrogateOptimizer>,
    rng: ChaCha8Rng,
    dims: usize,
}

impl BayesianSearch {
    pub fn new(config: BayesConfig, surrogate: Box<dyn SurrogateOptimizer>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            surrogate,
            rng,
            dims: 0,
        }
    }

    pub fn config(&self) -> &BayesConfig {
        &self.config
    }

    pub fn surrogate(&self) -> &dyn SurrogateOptimizer {
        self.surrogate.as_ref()
    }

    /// Score the rendered layout and hand it to the surrogate.
    fn observe(&mut self, ctx: &mut RunContext<'_>, refit: bool) {
        let x = flatten_cutters(&ctx.state.previous_cutters);
        let evaluation = ctx.evaluate_loss();

        let result = if refit {
            let started = Instant::now();
            let result = self.surrogate.refit_model(x, evaluation.objective);
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "surrogate refit");
            result
        } else {
            self.surrogate.add_sample(x, evaluation.objective)
        };
        if let Err(e) = result {
            warn!(error = %e, "surrogate rejected the observation");
        }

        let entry = TopKEntry {
            cutters: ctx.state.previous_cutters.clone(),
            cost: evaluation.objective,
            loss: evaluation.loss,
            penalty: evaluation.penalty,
            measured: evaluation.measured,
        };
        if let Some(rank) = ctx.state.top_k.insert(entry) {
            debug!(rank, cost = evaluation.objective, "layout cached");
        }
    }

    /// Fallback when the surrogate cannot propose: jitter the optimum.
    fn perturbed_optimum(&mut self) -> Vec<f64> {
        match self.surrogate.optimum() {
            Ok((x, _)) => x
                .into_iter()
                .map(|v| (v + (self.rng.random::<f64>() - 0.5) * 0.1).clamp(0.0, 1.0))
                .collect(),
            Err(_) => (0..self.dims).map(|_| self.rng.random::<f64>()).collect(),
        }
    }
}

impl SearchStrategy for BayesianSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bayesian
    }

    fn max_iterations(&self, _configured: usize) -> usize {
        self.config.total_iterations()
    }

    fn init(&mut self, ctx: &mut RunContext<'_>) {
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.dims = flatten_cutters(&ctx.state.previous_cutters).len();
        ctx.state.top_k = crate::topk::TopKCache::new(self.config.top_k);

        self.surrogate.configure(&self.config);
        if let Err(e) = self.surrogate.init_optimizer(self.dims) {
            warn!(error = %e, dims = self.dims, "surrogate initialization failed");
        }
        ctx.reset_domains();
        info!(
            dims = self.dims,
            train = self.config.train_iterations,
            explore = self.config.explore_iterations,
            surrogate = self.surrogate.name(),
            "bayesian optimization initialized"
        );
    }

    fn step(&mut self, ctx: &mut RunContext<'_>) {
        let train = self.config.train_iterations;
        let iteration = ctx.iteration;

        if iteration == 0 {
            debug!("waiting for the first layout");
        } else if ctx.is_final() {
            match self.surrogate.optimum() {
                Ok((x, y)) => {
                    unflatten_into(&mut ctx.state.best_cutters, &x);
                    ctx.state.best_loss = y;
                    info!(best = y, "surrogate optimum selected");
                }
                Err(e) => warn!(error = %e, "no surrogate optimum, keeping best observed layout"),
            }
        } else if iteration <= train {
            self.observe(ctx, false);
        } else if iteration == train + 1 {
            let started = Instant::now();
            match self.surrogate.fit_model() {
                Ok(()) => info!(
                    samples = self.surrogate.dataset_len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "surrogate model fitted"
                ),
                Err(e) => warn!(error = %e, "surrogate fit failed"),
            }
        } else {
            self.observe(ctx, true);
        }
    }

    fn commit_geometry(&mut self, ctx: &mut RunContext<'_>) {
        let train = self.config.train_iterations;
        let iteration = ctx.iteration;
        ctx.reset_domains();

        if ctx.is_final() {
            ctx.finalize_openings();
            return;
        }

        let x = if iteration < train {
            match self.surrogate.train_sample(iteration) {
                Ok(x) => x,
                Err(e) => {
                    warn!(error = %e, iteration, "train sample unavailable");
                    return;
                }
            }
        } else if iteration > train {
            match self.surrogate.next_step() {
                Ok(x) => x,
                Err(e) => {
                    warn!(error = %e, "acquisition failed, perturbing the optimum");
                    self.perturbed_optimum()
                }
            }
        } else {
            // fit tick: the model is built from the train set before the next layout
            return;
        };

        unflatten_into(&mut ctx.state.previous_cutters, &x);
        ctx.apply_previous();
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            samples: self.surrogate.dataset_len(),
            ..StrategySnapshot::default()
        }
    }

    fn response_surface_at(&self, x: &[f64]) -> Option<f64> {
        self.surrogate.response_surface_at(x).ok()
    }
}

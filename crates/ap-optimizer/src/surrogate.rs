//! Surrogate model interface used by Bayesian search.

use ap_types::{ApResult, SurrogateError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::topk::DEFAULT_TOP_K;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelMethod {
    /// Squared exponential, one shared lengthscale.
    #[default]
    SeIso,
    /// Squared exponential, one lengthscale per dimension.
    SeArd,
    Matern5Iso,
    Matern5Ard,
}

impl KernelMethod {
    pub fn is_ard(&self) -> bool {
        matches!(self, KernelMethod::SeArd | KernelMethod::Matern5Ard)
    }
}

/// How kernel hyperparameters are picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LearningMethod {
    /// Maximum a posteriori over a grid of candidates.
    #[default]
    Empirical,
    /// Sample the candidates in proportion to their posterior weight.
    Mcmc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CriterionMethod {
    /// Probability of improvement.
    Poi,
    /// Expected improvement.
    #[default]
    Ei,
    AnnealedEi,
    /// Lower confidence bound.
    Lcb,
    AnnealedLcb,
    ThompsonSampling,
    MutualInformation,
    /// Portfolio of four criteria, picked by accumulated reward.
    Hedge4,
    /// Portfolio of eight criteria.
    Hedge8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurrogateMethod {
    #[default]
    GaussianProcessMl,
    /// Student-t process with a normal-inverse-gamma prior on the signal.
    StudentTProcessNig,
}

/// Settings of a Bayesian optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesConfig {
    /// Space-filling samples evaluated before the first fit.
    pub train_iterations: usize,
    /// Acquisition-driven samples after the first fit.
    pub explore_iterations: usize,
    /// Refits between hyperparameter relearns.
    pub relearn_iterations: usize,
    /// Consecutive stuck steps before a random jump, 0 disables.
    pub force_jump: usize,
    /// Learn the signal variance as well as lengthscales.
    pub learn_all: bool,
    pub observation_noise: f64,
    /// Observations closer than this count as stuck.
    pub stack_threshold: f64,
    /// Probability of a purely random step.
    pub epsilon: f64,
    /// Criterion exploration weight, negative uses the criterion's default.
    pub explore_exploit: f64,
    /// Mean and standard deviation of the constant prior mean.
    pub prior: (f64, f64),
    /// Mean and standard deviation of the log lengthscale prior.
    pub kernel_prior: (f64, f64),
    /// Alpha and beta of the normal-inverse-gamma signal prior.
    pub nig: (f64, f64),
    pub kernel: KernelMethod,
    pub learning: LearningMethod,
    pub criterion: CriterionMethod,
    pub surrogate: SurrogateMethod,
    /// Candidates scored per acquisition.
    pub inner_iterations: usize,
    /// Layouts kept in the top-k cache.
    pub top_k: usize,
    pub seed: u64,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            train_iterations: 10,
            explore_iterations: 15,
            relearn_iterations: 20,
            force_jump: 0,
            learn_all: false,
            observation_noise: 0.0,
            stack_threshold: 0.0,
            epsilon: 0.0,
            explore_exploit: -1.0,
            prior: (0.0, 1.0),
            kernel_prior: (1.0, 1.0),
            nig: (1.0, 1.0),
            kernel: KernelMethod::default(),
            learning: LearningMethod::default(),
            criterion: CriterionMethod::default(),
            surrogate: SurrogateMethod::default(),
            inner_iterations: 500,
            top_k: DEFAULT_TOP_K,
            seed: 1337,
        }
    }
}

impl BayesConfig {
    pub fn with_iterations(mut self, train: usize, explore: usize) -> Self {
        self.train_iterations = train;
        self.explore_iterations = explore;
        self
    }

    pub fn with_criterion(mut self, criterion: CriterionMethod) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelMethod) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_surrogate(mut self, surrogate: SurrogateMethod) -> Self {
        self.surrogate = surrogate;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Total scheduler iterations of a run: train, explore and the final commit.
    pub fn total_iterations(&self) -> usize {
        self.train_iterations + self.explore_iterations + 1
    }

    pub fn validate(&self) -> ApResult<()> {
        if self.train_iterations == 0 {
            return Err(ap_types::validation_error!("train_iterations must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ap_types::validation_error!("epsilon must lie in [0, 1], got {}", self.epsilon));
        }
        if self.observation_noise < 0.0 {
            return Err(ap_types::validation_error!("observation_noise must be non-negative"));
        }
        if self.prior.1 <= 0.0 || self.kernel_prior.1 <= 0.0 {
            return Err(ap_types::validation_error!("prior standard deviations must be positive"));
        }
        if self.nig.0 <= 0.0 || self.nig.1 <= 0.0 {
            return Err(ap_types::validation_error!("NIG parameters must be positive"));
        }
        if self.inner_iterations == 0 {
            return Err(ap_types::validation_error!("inner_iterations must be at least 1"));
        }
        if self.top_k == 0 {
            return Err(ap_types::validation_error!("top_k must be at least 1"));
        }
        Ok(())
    }
}

/// Black-box Bayesian optimizer over the unit hypercube.
///
/// Every method degrades with a [`SurrogateError`] instead of panicking; the
/// search strategy logs and falls back.
pub trait SurrogateOptimizer: Send {
    fn name(&self) -> &str;

    fn configure(&mut self, config: &BayesConfig);

    /// Size the problem and generate the space-filling train design.
    fn init_optimizer(&mut self, dims: usize) -> Result<(), SurrogateError>;

    fn train_sample(&self, index: usize) -> Result<Vec<f64>, SurrogateError>;

    /// Store an observation without refitting.
    fn add_sample(&mut self, x: Vec<f64>, y: f64) -> Result<(), SurrogateError>;

    fn fit_model(&mut self) -> Result<(), SurrogateError>;

    /// Store an observation and update the model.
    fn refit_model(&mut self, x: Vec<f64>, y: f64) -> Result<(), SurrogateError>;

    /// Next point to evaluate.
    fn next_step(&mut self) -> Result<Vec<f64>, SurrogateError>;

    /// Best observed point and its value.
    fn optimum(&self) -> Result<(Vec<f64>, f64), SurrogateError>;

    /// Posterior mean of the objective at `x`.
    fn response_surface_at(&self, x: &[f64]) -> Result<f64, SurrogateError>;

    fn dataset_len(&self) -> usize;
}

/// Latin hypercube design of `n` points in `[0, 1]^dims`.
///
/// Every dimension is split into `n` strata and each stratum is hit once.
pub fn latin_hypercube<R: Rng + ?Sized>(n: usize, dims: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut points = vec![vec![0.0; dims]; n];
    let mut strata: Vec<usize> = (0..n).collect();
    for d in 0..dims {
        strata.shuffle(rng);
        for (point, stratum) in points.iter_mut().zip(&strata) {
            point[d] = (*stratum as f64 + rng.random::<f64>()) / n as f64;
        }
    }
    points
}

//! Gaussian process surrogate with random-candidate acquisition search.
//!
//! Observations are standardized and modeled by a zero-mean process with a
//! squared exponential or Matérn 5/2 kernel. Lengthscales are chosen from a
//! small grid by marginal likelihood plus a log-normal prior, and relearned
//! every `relearn_iterations` refits. The next point maximizes the configured
//! criterion over random candidates and local perturbations of the incumbent,
//! scored in parallel.

use std::time::Instant;

use ap_types::SurrogateError;
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::surrogate::{
    latin_hypercube, BayesConfig, CriterionMethod, KernelMethod, LearningMethod, SurrogateMethod,
    SurrogateOptimizer,
};

/// Diagonal jitter tried in turn when the kernel matrix is not positive definite.
const JITTER_LADDER: [f64; 4] = [1e-10, 1e-8, 1e-6, 1e-4];

/// Lengthscale multipliers searched when learning hyperparameters.
const LENGTHSCALE_GRID: [f64; 7] = [0.05, 0.1, 0.2, 0.35, 0.5, 1.0, 2.0];

/// Signal variances searched when `learn_all` is set.
const SIGNAL_GRID: [f64; 4] = [0.25, 0.5, 1.0, 2.0];

/// Share of acquisition candidates drawn around the incumbent.
const LOCAL_SHARE: f64 = 0.25;

/// Standard deviation of the incumbent perturbations, in unit-cube coordinates.
const LOCAL_SIGMA: f64 = 0.05;

/// Confidence parameter of the mutual information criterion.
const MI_DELTA: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Criterion {
    Poi,
    Ei,
    AnnealedEi,
    Lcb,
    AnnealedLcb,
    ThompsonSampling,
    MutualInformation,
    ExpectedReturn,
}

static HEDGE4: [Criterion; 4] = [Criterion::Ei, Criterion::Poi, Criterion::Lcb, Criterion::MutualInformation];
static HEDGE8: [Criterion; 8] = [
    Criterion::Ei,
    Criterion::Poi,
    Criterion::Lcb,
    Criterion::MutualInformation,
    Criterion::ThompsonSampling,
    Criterion::AnnealedEi,
    Criterion::AnnealedLcb,
    Criterion::ExpectedReturn,
];

#[derive(Debug, Clone, PartialEq)]
struct Hyperparameters {
    lengthscales: Vec<f64>,
    signal_var: f64,
}

/// A fitted model ready for prediction.
struct GpModel {
    cholesky: Cholesky<f64, Dyn>,
    /// `(K + σ²I)⁻¹ (y - m)`
    alpha: DVector<f64>,
    x_train: Vec<Vec<f64>>,
    hyper: Hyperparameters,
    kernel: KernelMethod,
    prior_mean: f64,
    y_mean: f64,
    y_std: f64,
    /// Best observed standardized value.
    f_best: f64,
    /// Predictive variance scale; 1 for the Gaussian process.
    variance_scale: f64,
}

impl GpModel {
    /// Standardized posterior mean and standard deviation at `x`.
    fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star = DVector::from_fn(self.x_train.len(), |i, _| {
            kernel(self.kernel, x, &self.x_train[i], &self.hyper)
        });
        let mean = self.prior_mean + k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let var = (self.hyper.signal_var - k_star.dot(&v)).max(0.0) * self.variance_scale;
        (mean, var.sqrt())
    }

    fn destandardize(&self, standardized: f64) -> f64 {
        standardized * self.y_std + self.y_mean
    }
}

/// Built-in [`SurrogateOptimizer`].
pub struct GaussianProcessOptimizer {
    config: BayesConfig,
    dims: usize,
    rng: ChaCha8Rng,
    train_design: Vec<Vec<f64>>,
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    model: Option<GpModel>,
    hyper: Option<Hyperparameters>,
    refits_since_learn: usize,
    stuck_steps: usize,
    acquisitions: usize,
    mi_gamma: f64,
    hedge_gains: Vec<f64>,
    hedge_nominees: Vec<Vec<f64>>,
}

impl Default for GaussianProcessOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianProcessOptimizer {
    pub fn new() -> Self {
        let config = BayesConfig::default();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            dims: 0,
            rng,
            train_design: Vec::new(),
            x: Vec::new(),
            y: Vec::new(),
            model: None,
            hyper: None,
            refits_since_learn: 0,
            stuck_steps: 0,
            acquisitions: 0,
            mi_gamma: 0.0,
            hedge_gains: Vec::new(),
            hedge_nominees: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn check_dims(&self, x: &[f64]) -> Result<(), SurrogateError> {
        if self.dims == 0 {
            return Err(SurrogateError::NotInitialized);
        }
        if x.len() != self.dims {
            return Err(SurrogateError::DimensionMismatch {
                expected: self.dims,
                actual: x.len(),
            });
        }
        Ok(())
    }

    fn push_observation(&mut self, x: Vec<f64>, y: f64) -> Result<(), SurrogateError> {
        self.check_dims(&x)?;
        if !y.is_finite() {
            warn!(y, "ignoring non-finite observation");
            return Ok(());
        }
        if let Some(last) = self.y.last() {
            if (y - last).abs() < self.config.stack_threshold {
                self.stuck_steps += 1;
            } else {
                self.stuck_steps = 0;
            }
        }
        self.x.push(x);
        self.y.push(y);
        Ok(())
    }

    fn random_point(&mut self) -> Vec<f64> {
        (0..self.dims).map(|_| self.rng.random::<f64>()).collect()
    }

    fn standardized(&self) -> (Vec<f64>, f64, f64) {
        let n = self.y.len() as f64;
        let mean = self.y.iter().sum::<f64>() / n;
        let var = if self.y.len() > 1 {
            self.y.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            1.0
        };
        let std = var.sqrt().max(1e-10);
        (self.y.iter().map(|y| (y - mean) / std).collect(), mean, std)
    }

    /// Per-dimension input spread, the base of ARD lengthscales.
    fn input_spread(&self) -> Vec<f64> {
        let n = self.x.len() as f64;
        (0..self.dims)
            .map(|d| {
                let mean = self.x.iter().map(|p| p[d]).sum::<f64>() / n;
                let var = self.x.iter().map(|p| (p[d] - mean).powi(2)).sum::<f64>() / n;
                var.sqrt().max(0.01)
            })
            .collect()
    }

    fn candidate_hyperparameters(&self) -> Vec<Hyperparameters> {
        let base = if self.config.kernel.is_ard() {
            self.input_spread()
        } else {
            vec![1.0; self.dims]
        };
        let signals: Vec<f64> = if self.config.learn_all {
            SIGNAL_GRID.to_vec()
        } else {
            vec![self.config.prior.1.powi(2)]
        };

        let mut out = Vec::with_capacity(LENGTHSCALE_GRID.len() * signals.len());
        for factor in LENGTHSCALE_GRID {
            for signal_var in &signals {
                out.push(Hyperparameters {
                    lengthscales: base.iter().map(|b| b * factor).collect(),
                    signal_var: *signal_var,
                });
            }
        }
        out
    }

    /// Log marginal likelihood of `targets` plus the log-normal lengthscale prior.
    fn log_posterior(&self, hyper: &Hyperparameters, targets: &DVector<f64>) -> Option<f64> {
        let (cholesky, _) = factorize(&self.x, self.config.kernel, hyper, self.config.observation_noise)?;
        let alpha = cholesky.solve(targets);
        let log_det: f64 = cholesky.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
        let n = targets.len() as f64;
        let likelihood = -0.5 * targets.dot(&alpha) - 0.5 * log_det - 0.5 * n * (2.0 * std::f64::consts::PI).ln();

        let (mu, sigma) = self.config.kernel_prior;
        let prior: f64 = hyper
            .lengthscales
            .iter()
            .map(|l| -0.5 * ((l.ln() - mu) / sigma).powi(2))
            .sum();
        Some(likelihood + prior)
    }

    fn learn_hyperparameters(&mut self, targets: &DVector<f64>) -> Option<Hyperparameters> {
        let scored: Vec<(Hyperparameters, f64)> = self
            .candidate_hyperparameters()
            .into_iter()
            .filter_map(|h| self.log_posterior(&h, targets).map(|lp| (h, lp)))
            .collect();
        if scored.is_empty() {
            return None;
        }

        let best = scored.iter().map(|(_, lp)| *lp).fold(f64::NEG_INFINITY, f64::max);
        match self.config.learning {
            LearningMethod::Empirical => scored
                .into_iter()
                .find(|(_, lp)| *lp == best)
                .map(|(h, _)| h),
            LearningMethod::Mcmc => {
                let weights: Vec<f64> = scored.iter().map(|(_, lp)| (lp - best).exp()).collect();
                let total: f64 = weights.iter().sum();
                let mut u = self.rng.random::<f64>() * total;
                for ((h, _), w) in scored.iter().zip(&weights) {
                    if u <= *w {
                        return Some(h.clone());
                    }
                    u -= w;
                }
                scored.last().map(|(h, _)| h.clone())
            }
        }
    }

    fn rebuild_model(&mut self, relearn: bool) -> Result<(), SurrogateError> {
        if self.y.is_empty() {
            return Err(SurrogateError::EmptyDataset);
        }
        let started = Instant::now();
        let (standardized, y_mean, y_std) = self.standardized();
        let prior_mean = self.config.prior.0;
        let targets = DVector::from_iterator(standardized.len(), standardized.iter().map(|y| y - prior_mean));

        if relearn || self.hyper.is_none() {
            self.hyper = self.learn_hyperparameters(&targets);
            self.refits_since_learn = 0;
        }
        let hyper = self.hyper.clone().ok_or_else(|| SurrogateError::ModelFitFailed {
            message: "no hyperparameters produced a positive definite kernel".to_string(),
        })?;

        let (cholesky, noise) = factorize(&self.x, self.config.kernel, &hyper, self.config.observation_noise)
            .ok_or_else(|| SurrogateError::ModelFitFailed {
                message: "kernel matrix is not positive definite".to_string(),
            })?;
        let alpha = cholesky.solve(&targets);

        let variance_scale = match self.config.surrogate {
            SurrogateMethod::GaussianProcessMl => 1.0,
            SurrogateMethod::StudentTProcessNig => {
                // posterior scale of the normal-inverse-gamma signal prior
                let (a, b) = self.config.nig;
                let n = targets.len() as f64;
                ((2.0 * b + targets.dot(&alpha)) / (2.0 * a + n)).max(1e-6)
            }
        };

        let f_best = standardized.iter().copied().fold(f64::INFINITY, f64::min);
        debug!(
            samples = self.y.len(),
            noise,
            signal_var = hyper.signal_var,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "surrogate model fitted"
        );
        self.model = Some(GpModel {
            cholesky,
            alpha,
            x_train: self.x.clone(),
            hyper,
            kernel: self.config.kernel,
            prior_mean,
            y_mean,
            y_std,
            f_best,
            variance_scale,
        });
        Ok(())
    }

    fn exploration_weight(&self, default: f64) -> f64 {
        if self.config.explore_exploit >= 0.0 {
            self.config.explore_exploit
        } else {
            default
        }
    }

    fn hedge_portfolio(&self) -> Option<&'static [Criterion]> {
        match self.config.criterion {
            CriterionMethod::Hedge4 => Some(&HEDGE4[..]),
            CriterionMethod::Hedge8 => Some(&HEDGE8[..]),
            _ => None,
        }
    }

    fn single_criterion(&self) -> Criterion {
        match self.config.criterion {
            CriterionMethod::Poi => Criterion::Poi,
            CriterionMethod::Ei | CriterionMethod::Hedge4 | CriterionMethod::Hedge8 => Criterion::Ei,
            CriterionMethod::AnnealedEi => Criterion::AnnealedEi,
            CriterionMethod::Lcb => Criterion::Lcb,
            CriterionMethod::AnnealedLcb => Criterion::AnnealedLcb,
            CriterionMethod::ThompsonSampling => Criterion::ThompsonSampling,
            CriterionMethod::MutualInformation => Criterion::MutualInformation,
        }
    }

    /// Random candidates plus normal perturbations (sigma `LOCAL_SIGMA`) of the incumbent.
    fn candidates(&mut self) -> Vec<Vec<f64>> {
        let total = self.config.inner_iterations.max(1);
        let local = ((total as f64) * LOCAL_SHARE) as usize;
        let incumbent = self.best_index().map(|i| self.x[i].clone());

        let mut out = Vec::with_capacity(total);
        for i in 0..total {
            match &incumbent {
                Some(center) if i < local => {
                    let point = center
                        .iter()
                        .map(|c| {
                            let noise: f64 = StandardNormal.sample(&mut self.rng);
                            (c + LOCAL_SIGMA * noise).clamp(0.0, 1.0)
                        })
                        .collect();
                    out.push(point);
                }
                _ => out.push(self.random_point()),
            }
        }
        out
    }

    /// Maximize `criterion` over `candidates`; returns the winner and its posterior mean.
    fn maximize(&mut self, model: &GpModel, criterion: Criterion, candidates: &[Vec<f64>]) -> (Vec<f64>, f64) {
        let step = (self.acquisitions + 1) as f64;
        let dims = self.dims.max(1) as f64;
        let gamma = self.mi_gamma;
        let draws: Vec<f64> = match criterion {
            Criterion::ThompsonSampling => (0..candidates.len()).map(|_| StandardNormal.sample(&mut self.rng)).collect(),
            _ => Vec::new(),
        };
        let xi = self.exploration_weight(0.01);
        let beta = self.exploration_weight(1.0);

        let scores: Vec<(f64, f64)> = candidates
            .par_iter()
            .enumerate()
            .map(|(i, x)| {
                let (mean, std) = model.predict(x);
                let score = match criterion {
                    Criterion::Ei => expected_improvement(mean, std, model.f_best, xi),
                    Criterion::AnnealedEi => expected_improvement(mean, std, model.f_best, xi / step.sqrt()),
                    Criterion::Poi => probability_of_improvement(mean, std, model.f_best, xi),
                    Criterion::Lcb => -(mean - beta * std),
                    Criterion::AnnealedLcb => {
                        let beta_t = (2.0 * (step * step * dims).ln().max(0.0)).sqrt().max(beta);
                        -(mean - beta_t * std)
                    }
                    Criterion::ThompsonSampling => -(mean + std * draws[i]),
                    Criterion::MutualInformation => {
                        let alpha = (2.0 / MI_DELTA).ln();
                        let var = std * std;
                        -(mean - alpha.sqrt() * ((var + gamma).sqrt() - gamma.sqrt()))
                    }
                    Criterion::ExpectedReturn => -mean,
                };
                (score, mean)
            })
            .collect();

        let mut best = 0;
        for (i, (score, _)) in scores.iter().enumerate() {
            if *score > scores[best].0 {
                best = i;
            }
        }
        (candidates[best].clone(), scores[best].1)
    }

    fn best_index(&self) -> Option<usize> {
        self.y
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    fn update_hedge_gains(&mut self) {
        let Some(model) = self.model.as_ref() else {
            return;
        };
        if self.hedge_nominees.len() != self.hedge_gains.len() {
            return;
        }
        for (gain, nominee) in self.hedge_gains.iter_mut().zip(&self.hedge_nominees) {
            *gain -= model.predict(nominee).0;
        }
    }

    fn pick_hedge(&mut self, count: usize) -> usize {
        if self.hedge_gains.len() != count {
            self.hedge_gains = vec![0.0; count];
        }
        let max = self.hedge_gains.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = self.hedge_gains.iter().map(|g| (g - max).exp()).collect();
        let total: f64 = weights.iter().sum();
        let mut u = self.rng.random::<f64>() * total;
        for (i, w) in weights.iter().enumerate() {
            if u <= *w {
                return i;
            }
            u -= w;
        }
        count - 1
    }
}

impl SurrogateOptimizer for GaussianProcessOptimizer {
    fn name(&self) -> &str {
        "gaussian_process"
    }

    fn configure(&mut self, config: &BayesConfig) {
        self.config = config.clone();
        self.rng = ChaCha8Rng::seed_from_u64(config.seed);
    }

    fn init_optimizer(&mut self, dims: usize) -> Result<(), SurrogateError> {
        if dims == 0 {
            return Err(SurrogateError::DimensionMismatch { expected: 1, actual: 0 });
        }
        self.dims = dims;
        self.x.clear();
        self.y.clear();
        self.model = None;
        self.hyper = None;
        self.refits_since_learn = 0;
        self.stuck_steps = 0;
        self.acquisitions = 0;
        self.mi_gamma = 0.0;
        self.hedge_gains.clear();
        self.hedge_nominees.clear();
        self.train_design = latin_hypercube(self.config.train_iterations, dims, &mut self.rng);
        debug!(dims, train = self.train_design.len(), "surrogate initialized");
        Ok(())
    }

    fn train_sample(&self, index: usize) -> Result<Vec<f64>, SurrogateError> {
        if self.dims == 0 {
            return Err(SurrogateError::NotInitialized);
        }
        self.train_design
            .get(index)
            .cloned()
            .ok_or(SurrogateError::TrainSampleOutOfRange {
                index,
                available: self.train_design.len(),
            })
    }

    fn add_sample(&mut self, x: Vec<f64>, y: f64) -> Result<(), SurrogateError> {
        self.push_observation(x, y)
    }

    fn fit_model(&mut self) -> Result<(), SurrogateError> {
        if self.y.is_empty() {
            warn!("fit requested before any sample was added");
            return Err(SurrogateError::EmptyDataset);
        }
        self.rebuild_model(true)
    }

    fn refit_model(&mut self, x: Vec<f64>, y: f64) -> Result<(), SurrogateError> {
        self.push_observation(x, y)?;
        self.refits_since_learn += 1;
        let relearn = self.config.relearn_iterations > 0 && self.refits_since_learn >= self.config.relearn_iterations;
        self.rebuild_model(relearn)?;
        self.update_hedge_gains();
        Ok(())
    }

    fn next_step(&mut self) -> Result<Vec<f64>, SurrogateError> {
        if self.dims == 0 {
            return Err(SurrogateError::NotInitialized);
        }

        if self.config.epsilon > 0.0 && self.rng.random::<f64>() < self.config.epsilon {
            debug!("epsilon-greedy random step");
            return Ok(self.random_point());
        }
        if self.config.force_jump > 0 && self.stuck_steps >= self.config.force_jump {
            debug!(stuck = self.stuck_steps, "forced jump out of a flat region");
            self.stuck_steps = 0;
            return Ok(self.random_point());
        }

        let model = self.model.take().ok_or_else(|| SurrogateError::AcquisitionFailed {
            message: "model has not been fitted".to_string(),
        })?;
        let candidates = self.candidates();

        let (chosen, mean) = match self.hedge_portfolio() {
            Some(portfolio) => {
                let mut nominees = Vec::with_capacity(portfolio.len());
                for criterion in portfolio {
                    nominees.push(self.maximize(&model, *criterion, &candidates));
                }
                let pick = self.pick_hedge(portfolio.len());
                let chosen = nominees[pick].clone();
                self.hedge_nominees = nominees.into_iter().map(|(x, _)| x).collect();
                chosen
            }
            None => {
                let criterion = self.single_criterion();
                self.maximize(&model, criterion, &candidates)
            }
        };

        let (_, std) = model.predict(&chosen);
        self.mi_gamma += std * std;
        self.acquisitions += 1;
        self.model = Some(model);

        if chosen.iter().any(|v| !v.is_finite()) {
            return Err(SurrogateError::AcquisitionFailed {
                message: format!("non-finite candidate (predicted mean {mean})"),
            });
        }
        Ok(chosen)
    }

    fn optimum(&self) -> Result<(Vec<f64>, f64), SurrogateError> {
        let best = self.best_index().ok_or(SurrogateError::EmptyDataset)?;
        Ok((self.x[best].clone(), self.y[best]))
    }

    fn response_surface_at(&self, x: &[f64]) -> Result<f64, SurrogateError> {
        self.check_dims(x)?;
        let model = self.model.as_ref().ok_or(SurrogateError::NotInitialized)?;
        Ok(model.destandardize(model.predict(x).0))
    }

    fn dataset_len(&self) -> usize {
        self.y.len()
    }
}

fn scaled_distance_sq(a: &[f64], b: &[f64], lengthscales: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .zip(lengthscales)
        .map(|((x, y), l)| ((x - y) / l).powi(2))
        .sum()
}

fn kernel(method: KernelMethod, a: &[f64], b: &[f64], hyper: &Hyperparameters) -> f64 {
    let r_sq = scaled_distance_sq(a, b, &hyper.lengthscales);
    match method {
        KernelMethod::SeIso | KernelMethod::SeArd => hyper.signal_var * (-0.5 * r_sq).exp(),
        KernelMethod::Matern5Iso | KernelMethod::Matern5Ard => {
            let sqrt5_r = (5.0 * r_sq).sqrt();
            hyper.signal_var * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
        }
    }
}

/// Cholesky factor of `K + σ²I`, escalating the jitter until it succeeds.
fn factorize(
    x: &[Vec<f64>],
    method: KernelMethod,
    hyper: &Hyperparameters,
    noise: f64,
) -> Option<(Cholesky<f64, Dyn>, f64)> {
    let n = x.len();
    let k = DMatrix::from_fn(n, n, |i, j| kernel(method, &x[i], &x[j], hyper));
    JITTER_LADDER.iter().find_map(|jitter| {
        let total = noise + jitter;
        let mut m = k.clone();
        for i in 0..n {
            m[(i, i)] += total;
        }
        Cholesky::new(m).map(|c| (c, total))
    })
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Hart's rational approximation of the standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let upper = norm_pdf(x.abs()) * poly;
    if x >= 0.0 {
        1.0 - upper
    } else {
        upper
    }
}

fn expected_improvement(mean: f64, std: f64, f_best: f64, xi: f64) -> f64 {
    let gain = f_best - mean - xi;
    if std < 1e-12 {
        return gain.max(0.0);
    }
    let z = gain / std;
    (gain * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
}

fn probability_of_improvement(mean: f64, std: f64, f_best: f64, xi: f64) -> f64 {
    let gain = f_best - mean - xi;
    if std < 1e-12 {
        return if gain > 0.0 { 1.0 } else { 0.0 };
    }
    norm_cdf(gain / std)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &[f64]) -> f64 {
        x.iter().map(|v| (v - 0.3).powi(2)).sum()
    }

    fn trained(config: BayesConfig, dims: usize) -> GaussianProcessOptimizer {
        let mut gp = GaussianProcessOptimizer::new();
        gp.configure(&config);
        gp.init_optimizer(dims).unwrap();
        for i in 0..config.train_iterations {
            let x = gp.train_sample(i).unwrap();
            let y = quadratic(&x);
            gp.add_sample(x, y).unwrap();
        }
        gp
    }

    #[test]
    fn fit_on_empty_dataset_fails() {
        let mut gp = GaussianProcessOptimizer::new();
        gp.init_optimizer(2).unwrap();
        assert_eq!(gp.fit_model(), Err(SurrogateError::EmptyDataset));
        assert_eq!(gp.optimum(), Err(SurrogateError::EmptyDataset));
    }

    #[test]
    fn use_before_init_is_reported() {
        let mut gp = GaussianProcessOptimizer::new();
        assert_eq!(gp.train_sample(0), Err(SurrogateError::NotInitialized));
        assert_eq!(gp.next_step(), Err(SurrogateError::NotInitialized));
        assert!(matches!(gp.add_sample(vec![0.1], 1.0), Err(SurrogateError::NotInitialized)));
    }

    #[test]
    fn train_design_has_requested_size() {
        let gp = trained(BayesConfig::default().with_iterations(6, 4), 3);
        assert_eq!(gp.dataset_len(), 6);
        assert!(matches!(
            gp.train_sample(6),
            Err(SurrogateError::TrainSampleOutOfRange { index: 6, available: 6 })
        ));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut gp = GaussianProcessOptimizer::new();
        gp.init_optimizer(2).unwrap();
        assert_eq!(
            gp.add_sample(vec![0.1, 0.2, 0.3], 1.0),
            Err(SurrogateError::DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn model_interpolates_observations() {
        let mut gp = trained(BayesConfig::default().with_iterations(8, 4), 2);
        gp.fit_model().unwrap();
        let (x, y) = gp.optimum().unwrap();
        let predicted = gp.response_surface_at(&x).unwrap();
        assert!((predicted - y).abs() < 0.05, "predicted {predicted} vs observed {y}");
    }

    #[test]
    fn next_step_stays_in_unit_cube_for_every_criterion() {
        let criteria = [
            CriterionMethod::Poi,
            CriterionMethod::Ei,
            CriterionMethod::AnnealedEi,
            CriterionMethod::Lcb,
            CriterionMethod::AnnealedLcb,
            CriterionMethod::ThompsonSampling,
            CriterionMethod::MutualInformation,
            CriterionMethod::Hedge4,
            CriterionMethod::Hedge8,
        ];
        for criterion in criteria {
            let config = BayesConfig {
                inner_iterations: 64,
                ..BayesConfig::default().with_iterations(6, 3).with_criterion(criterion)
            };
            let mut gp = trained(config, 2);
            gp.fit_model().unwrap();
            for _ in 0..3 {
                let x = gp.next_step().unwrap();
                assert_eq!(x.len(), 2);
                assert!(x.iter().all(|v| (0.0..=1.0).contains(v)), "{criterion:?}: {x:?}");
                let y = quadratic(&x);
                gp.refit_model(x, y).unwrap();
            }
            assert_eq!(gp.dataset_len(), 9);
        }
    }

    #[test]
    fn every_kernel_and_surrogate_fits() {
        let kernels = [
            KernelMethod::SeIso,
            KernelMethod::SeArd,
            KernelMethod::Matern5Iso,
            KernelMethod::Matern5Ard,
        ];
        for kernel in kernels {
            for surrogate in [SurrogateMethod::GaussianProcessMl, SurrogateMethod::StudentTProcessNig] {
                let config = BayesConfig {
                    learning: LearningMethod::Mcmc,
                    learn_all: true,
                    ..BayesConfig::default().with_kernel(kernel).with_surrogate(surrogate)
                };
                let mut gp = trained(config, 3);
                assert!(gp.fit_model().is_ok(), "{kernel:?}/{surrogate:?}");
                assert!(gp.response_surface_at(&[0.5, 0.5, 0.5]).unwrap().is_finite());
            }
        }
    }

    #[test]
    fn full_epsilon_always_jumps() {
        let config = BayesConfig {
            epsilon: 1.0,
            ..BayesConfig::default().with_iterations(4, 2)
        };
        let mut gp = trained(config, 2);
        // no fit needed: every step is random
        assert!(gp.next_step().is_ok());
    }

    #[test]
    fn duplicate_points_still_factorize() {
        let mut gp = GaussianProcessOptimizer::new();
        gp.init_optimizer(1).unwrap();
        for _ in 0..4 {
            gp.add_sample(vec![0.5], 1.0).unwrap();
        }
        assert!(gp.fit_model().is_ok());
    }

    #[test]
    fn local_candidates_are_normal_around_incumbent() {
        let config = BayesConfig {
            inner_iterations: 400,
            ..BayesConfig::default().with_iterations(8, 4)
        };
        let mut gp = trained(config, 2);
        let center = gp.x[gp.best_index().unwrap()].clone();
        let candidates = gp.candidates();
        assert_eq!(candidates.len(), 400);

        let local = (400.0 * LOCAL_SHARE) as usize;
        let deviations: Vec<f64> = candidates[..local]
            .iter()
            .flat_map(|x| x.iter().zip(&center).map(|(v, c)| v - c))
            .collect();
        assert!(deviations.iter().all(|d| d.abs() < 6.0 * LOCAL_SIGMA), "{deviations:?}");
        let rms = (deviations.iter().map(|d| d * d).sum::<f64>() / deviations.len() as f64).sqrt();
        assert!(rms > 0.5 * LOCAL_SIGMA && rms < 1.5 * LOCAL_SIGMA, "rms {rms}");
    }

    #[test]
    fn normal_helpers_are_sane() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_cdf(-1.96) - 0.025).abs() < 1e-3);
        assert!(expected_improvement(0.0, 1.0, 0.0, 0.0) > 0.0);
        assert_eq!(probability_of_improvement(1.0, 0.0, 0.0, 0.0), 0.0);
    }
}

// Opening optimization engine
// Ticks a search strategy through geometry updates and progressive sampler renders

use std::time::Instant;

use ap_optimizer::{
    apply_cutters, BayesianSearch, GaussianProcessOptimizer, LossEvaluator, OptimizationState,
    OptimizationStatus, OpeningDomain, RandomSearch, RunContext, SamplerStatsReport, GoalStats,
    SearchStrategy, SimulatedAnnealing, StrategyKind, StrategySnapshot, SurrogateOptimizer,
};
use ap_types::{
    flatten_cutters, ApResult, ConfigurationError, Environment, RequestError, Sampler, SamplerKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;

/// Builds a fresh surrogate for every Bayesian run.
pub type SurrogateFactory = Box<dyn Fn() -> Box<dyn SurrogateOptimizer> + Send>;

/// Scheduler stage, one transition per tick at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Init,
    OptStep,
    CsgOps,
    SetMaxEnvMap,
    ViewSamplers,
    SetAvgEnvMap,
    PlanarSamplers,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::OptStep => "opt_step",
            Stage::CsgOps => "csg_ops",
            Stage::SetMaxEnvMap => "set_max_env_map",
            Stage::ViewSamplers => "view_samplers",
            Stage::SetAvgEnvMap => "set_avg_env_map",
            Stage::PlanarSamplers => "planar_samplers",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Drives opening optimization runs from host ticks.
///
/// The engine owns the domain trees, both sampler families and the lighting
/// environment. A host calls [`OpeningEngine::advance`] once per frame and
/// keeps feeding rendered frames to the samplers of the current stage.
pub struct OpeningEngine {
    config: EngineConfig,
    domains: Vec<OpeningDomain>,
    view_samplers: Vec<Box<dyn Sampler>>,
    planar_samplers: Vec<Box<dyn Sampler>>,
    environment: Box<dyn Environment>,
    surrogate_factory: SurrogateFactory,
    evaluator: LossEvaluator,
    strategy: Option<Box<dyn SearchStrategy>>,
    state: OptimizationState,
    status: OptimizationStatus,
    stage: Stage,
    enabled: bool,
    iteration: usize,
    max_iterations: usize,
    started: Option<Instant>,
}

impl OpeningEngine {
    pub fn new(config: EngineConfig, environment: impl Environment + 'static) -> Self {
        let evaluator = LossEvaluator::new(config.loss);
        Self {
            config,
            domains: Vec::new(),
            view_samplers: Vec::new(),
            planar_samplers: Vec::new(),
            environment: Box::new(environment),
            surrogate_factory: Box::new(default_surrogate),
            evaluator,
            strategy: None,
            state: OptimizationState::default(),
            status: OptimizationStatus::default(),
            stage: Stage::Init,
            enabled: false,
            iteration: 0,
            max_iterations: 0,
            started: None,
        }
    }

    /// Swap the surrogate used by Bayesian runs.
    pub fn with_surrogate_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SurrogateOptimizer> + Send + 'static,
    {
        self.surrogate_factory = Box::new(factory);
        self
    }

    pub fn with_domain(mut self, domain: OpeningDomain) -> Self {
        self.add_domain(domain);
        self
    }

    pub fn with_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.add_sampler(sampler);
        self
    }

    pub fn add_domain(&mut self, domain: OpeningDomain) {
        debug!(domain = domain.name(), cutters = domain.number_of_cutters(), "domain registered");
        self.domains.push(domain);
    }

    /// Register a sampler with the family matching its kind.
    pub fn add_sampler(&mut self, sampler: Box<dyn Sampler>) {
        debug!(sampler = sampler.name(), kind = ?sampler.kind(), "sampler registered");
        match sampler.kind() {
            SamplerKind::View => self.view_samplers.push(sampler),
            SamplerKind::Planar => self.planar_samplers.push(sampler),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn domains(&self) -> &[OpeningDomain] {
        &self.domains
    }

    pub fn domains_mut(&mut self) -> &mut [OpeningDomain] {
        &mut self.domains
    }

    pub fn view_samplers(&self) -> &[Box<dyn Sampler>] {
        &self.view_samplers
    }

    pub fn view_samplers_mut(&mut self) -> &mut [Box<dyn Sampler>] {
        &mut self.view_samplers
    }

    pub fn planar_samplers(&self) -> &[Box<dyn Sampler>] {
        &self.planar_samplers
    }

    pub fn planar_samplers_mut(&mut self) -> &mut [Box<dyn Sampler>] {
        &mut self.planar_samplers
    }

    pub fn environment(&self) -> &dyn Environment {
        self.environment.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_optimizing(&self) -> bool {
        self.enabled
    }

    /// Commit cycles completed in the current run.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    pub fn status(&self) -> &OptimizationStatus {
        &self.status
    }

    pub fn strategy_snapshot(&self) -> Option<StrategySnapshot> {
        self.strategy.as_ref().map(|s| s.snapshot())
    }

    /// Check that a run could start with the current scene.
    pub fn preflight(&self) -> ApResult<()> {
        if self.view_samplers.is_empty() && self.planar_samplers.is_empty() {
            return Err(ConfigurationError::NoSamplers.into());
        }
        if self.domains.is_empty() {
            return Err(ConfigurationError::NoDomains.into());
        }
        if let Some(domain) = self.domains.iter().find_map(|d| d.first_missing_cut_target()) {
            return Err(ConfigurationError::MissingCutTarget {
                domain: domain.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn start_optimization(&mut self) -> bool {
        self.start(StrategyKind::Random)
    }

    pub fn start_optimization_sa(&mut self) -> bool {
        self.start(StrategyKind::SimulatedAnnealing)
    }

    pub fn start_bayes_optimization(&mut self) -> bool {
        self.start(StrategyKind::Bayesian)
    }

    /// Start a run of `kind`. Returns `false` and leaves the engine untouched
    /// when the scene is incomplete.
    pub fn start(&mut self, kind: StrategyKind) -> bool {
        if let Err(e) = self.preflight() {
            error!(strategy = %kind, error = %e, "cannot start optimization");
            return false;
        }
        if self.enabled {
            warn!(strategy = %kind, "restarting while a run is active");
            self.status.mark_cancelled();
        }

        let efficacy = self.config.light_efficacy;
        for sampler in self.view_samplers.iter_mut().chain(self.planar_samplers.iter_mut()) {
            sampler.set_light_efficacy(efficacy);
        }

        let strategy: Box<dyn SearchStrategy> = match kind {
            StrategyKind::Random => Box::new(RandomSearch::new(self.config.seed)),
            StrategyKind::SimulatedAnnealing => Box::new(SimulatedAnnealing::new(self.config.annealing)),
            StrategyKind::Bayesian => Box::new(BayesianSearch::new(
                self.config.bayes.clone(),
                (self.surrogate_factory)(),
            )),
        };

        self.max_iterations = strategy.max_iterations(self.config.max_steps);
        self.state = OptimizationState::for_domains(
            &mut self.domains,
            self.view_samplers.len(),
            self.planar_samplers.len(),
            self.config.bayes.top_k,
        );
        self.strategy = Some(strategy);
        self.iteration = 0;
        self.stage = Stage::Init;
        self.enabled = true;
        self.status = OptimizationStatus::new(kind, self.max_iterations);
        self.status.mark_running();
        self.started = Some(Instant::now());

        info!(
            run = %self.status.id,
            strategy = %kind,
            max_iterations = self.max_iterations,
            domains = self.domains.len(),
            view_samplers = self.view_samplers.len(),
            planar_samplers = self.planar_samplers.len(),
            "optimization started"
        );
        true
    }

    /// Abort the active run and return to [`Stage::Init`].
    pub fn stop_optimization(&mut self) {
        if self.status.is_running() {
            self.status.mark_cancelled();
            info!(run = %self.status.id, iteration = self.iteration, "optimization stopped");
        } else {
            debug!(error = %RequestError::NotRunning, "stop ignored");
        }
        self.halt();
    }

    /// One scheduler tick. Returns the stage after the tick.
    pub fn advance(&mut self, _delta_seconds: f64) -> Stage {
        if !self.enabled {
            return self.stage;
        }

        match self.stage {
            Stage::Init => {
                self.with_strategy(|strategy, ctx| strategy.init(ctx));
                self.stage = Stage::OptStep;
            }
            Stage::OptStep => {
                if self.iteration == self.max_iterations + 1 {
                    self.finish();
                } else {
                    self.with_strategy(|strategy, ctx| strategy.step(ctx));
                    self.stage = Stage::CsgOps;
                }
            }
            Stage::CsgOps => {
                self.with_strategy(|strategy, ctx| strategy.commit_geometry(ctx));
                self.iteration += 1;
                self.status.iterations_completed = self.iteration;
                self.stage = Stage::SetMaxEnvMap;
            }
            Stage::SetMaxEnvMap => {
                if self.environment.set_env_map(&self.config.max_env_map) {
                    restart_rendering(&mut self.view_samplers);
                    self.stage = Stage::ViewSamplers;
                }
            }
            Stage::ViewSamplers => {
                if all_done(&self.view_samplers) {
                    self.stage = Stage::SetAvgEnvMap;
                }
            }
            Stage::SetAvgEnvMap => {
                if self.environment.set_env_map(&self.config.avg_env_map) {
                    restart_rendering(&mut self.planar_samplers);
                    self.stage = Stage::PlanarSamplers;
                }
            }
            Stage::PlanarSamplers => {
                if all_done(&self.planar_samplers) {
                    self.stage = Stage::OptStep;
                }
            }
        }

        debug!(stage = %self.stage, iteration = self.iteration, "tick");
        self.stage
    }

    /// Re-apply the `k`-th best cached layout.
    ///
    /// The entry replaces the best snapshot of the run: `best_cutters`,
    /// `best_loss`, `best_cost` and `best_penalty` all take the cached values,
    /// so a later finalize commits this layout. Out of range requests fall
    /// back to the best cached layout. Returns the index actually applied, or
    /// `None` when nothing is cached.
    pub fn apply_k_opening(&mut self, k: usize) -> Option<usize> {
        let available = self.state.top_k.len();
        if available == 0 {
            warn!(requested = k, "no cached layouts to apply");
            return None;
        }
        let index = if k < available {
            k
        } else {
            let err = RequestError::TopKOutOfRange { requested: k, available };
            warn!(error = %err, "applying the best cached layout instead");
            0
        };

        let entry = self.state.top_k.get(index)?.clone();
        for domain in &mut self.domains {
            domain.reset_cutted();
        }
        apply_cutters(&mut self.domains, &entry.cutters);

        self.state.best_cutters = entry.cutters;
        self.state.best_cost = entry.measured;
        self.state.best_loss = entry.cost;
        self.state.best_penalty = entry.penalty;
        info!(k = index, cost = entry.cost, penalty = entry.penalty, "cached layout applied");
        Some(index)
    }

    /// Goal statistics of both sampler families for the last evaluation.
    pub fn sampler_stats(&self) -> SamplerStatsReport {
        let view = GoalStats::from_pairs(
            self.view_samplers
                .iter()
                .map(|s| s.goal())
                .zip(self.state.per_view_sampler.iter()),
        );
        let planar = GoalStats::from_pairs(
            self.planar_samplers
                .iter()
                .map(|s| s.goal())
                .zip(self.state.per_planar_sampler.iter()),
        );
        let report = SamplerStatsReport::new(view, planar);
        report.log();
        report
    }

    /// Surrogate mean on a `resolution` x `resolution` grid over the first two
    /// parameters, the others held at the best layout. Row major, first
    /// parameter outer.
    pub fn debug_response_surface(&self, resolution: usize) -> Option<Vec<f64>> {
        let strategy = self.strategy.as_ref()?;
        let mut point = flatten_cutters(&self.state.best_cutters);
        if resolution == 0 || point.len() < 2 {
            warn!(resolution, dims = point.len(), "response surface needs two parameters and a grid");
            return None;
        }

        let denom = (resolution.max(2) - 1) as f64;
        let mut surface = Vec::with_capacity(resolution * resolution);
        for i in 0..resolution {
            point[0] = i as f64 / denom;
            for j in 0..resolution {
                point[1] = j as f64 / denom;
                surface.push(strategy.response_surface_at(&point)?);
            }
        }
        debug!(resolution, strategy = strategy.name(), "response surface sampled");
        Some(surface)
    }

    // ---- internals ----

    fn with_strategy(&mut self, f: impl FnOnce(&mut dyn SearchStrategy, &mut RunContext<'_>)) {
        let Some(strategy) = self.strategy.as_mut() else {
            warn!(stage = %self.stage, "tick without a strategy");
            return;
        };
        let mut ctx = RunContext {
            domains: &mut self.domains,
            view_samplers: &mut self.view_samplers,
            planar_samplers: &mut self.planar_samplers,
            evaluator: &self.evaluator,
            state: &mut self.state,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
        };
        f(strategy.as_mut(), &mut ctx);
    }

    fn finish(&mut self) {
        if let Some(started) = self.started.take() {
            self.state.elapsed_seconds = started.elapsed().as_secs_f64();
        }
        self.status.mark_completed();
        info!(
            run = %self.status.id,
            iterations = self.iteration,
            elapsed_seconds = self.state.elapsed_seconds,
            best_loss = self.state.best_loss,
            "optimization finished"
        );
        self.sampler_stats();
        self.halt();
    }

    fn halt(&mut self) {
        self.enabled = false;
        self.stage = Stage::Init;
        self.iteration = 0;
        self.started = None;
    }
}

fn default_surrogate() -> Box<dyn SurrogateOptimizer> {
    Box::new(GaussianProcessOptimizer::new())
}

fn restart_rendering(samplers: &mut [Box<dyn Sampler>]) {
    for sampler in samplers.iter_mut() {
        sampler.set_should_reset(true);
        sampler.set_rendering_done(false);
    }
}

fn all_done(samplers: &[Box<dyn Sampler>]) -> bool {
    samplers.iter().all(|s| s.rendering_done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_optimizer::{BayesConfig, DomainConfig, RunState};
    use ap_types::{
        ApError, CapturedFrame, CutRecorder, Measurement, PlanarSampler, SamplerGoal, SamplerMeasurement,
        SkyLight, ViewSampler,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct ReadLog {
        reads: usize,
        early_reads: usize,
        efficacy: Option<f64>,
    }

    /// Sampler wrapper that records every measurement read.
    struct Watched<S> {
        inner: S,
        log: Arc<Mutex<ReadLog>>,
    }

    impl<S: Sampler> Watched<S> {
        fn new(inner: S) -> (Self, Arc<Mutex<ReadLog>>) {
            let log = Arc::new(Mutex::new(ReadLog::default()));
            (Self { inner, log: log.clone() }, log)
        }
    }

    impl<S: Sampler> Sampler for Watched<S> {
        fn kind(&self) -> SamplerKind {
            self.inner.kind()
        }
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn goal(&self) -> SamplerGoal {
            self.inner.goal()
        }
        fn samples_per_pixel(&self) -> u32 {
            self.inner.samples_per_pixel()
        }
        fn capture(&mut self, frame: &CapturedFrame) {
            self.inner.capture(frame)
        }
        fn measurement(&self) -> Measurement {
            let mut log = self.log.lock();
            log.reads += 1;
            if !self.inner.rendering_done() {
                log.early_reads += 1;
            }
            self.inner.measurement()
        }
        fn set_should_reset(&mut self, reset: bool) {
            self.inner.set_should_reset(reset)
        }
        fn should_reset(&self) -> bool {
            self.inner.should_reset()
        }
        fn rendering_done(&self) -> bool {
            self.inner.rendering_done()
        }
        fn set_rendering_done(&mut self, done: bool) {
            self.inner.set_rendering_done(done)
        }
        fn set_light_efficacy(&mut self, efficacy: f64) {
            self.log.lock().efficacy = Some(efficacy);
            self.inner.set_light_efficacy(efficacy)
        }
        fn set_reported_cost(&mut self, cost: SamplerMeasurement) {
            self.inner.set_reported_cost(cost)
        }
        fn reported_cost(&self) -> Option<SamplerMeasurement> {
            self.inner.reported_cost()
        }
    }

    struct Scene {
        engine: OpeningEngine,
        recorder: CutRecorder,
        view_log: Arc<Mutex<ReadLog>>,
        planar_log: Arc<Mutex<ReadLog>>,
    }

    fn scene(config: EngineConfig) -> Scene {
        let recorder = CutRecorder::new();
        let domain = OpeningDomain::new(DomainConfig::new("south_wall").with_cutters(2))
            .with_cut_target(recorder.clone());
        let (view, view_log) = Watched::new(ViewSampler::new("window_view", SamplerGoal::new(0.5, 5.0)));
        let (planar, planar_log) = Watched::new(PlanarSampler::new("desk", SamplerGoal::new(300.0, 500.0)));
        let engine = OpeningEngine::new(config, SkyLight::new())
            .with_domain(domain)
            .with_sampler(Box::new(view))
            .with_sampler(Box::new(planar));
        Scene {
            engine,
            recorder,
            view_log,
            planar_log,
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig::default()
            .with_max_steps(6)
            .with_bayes(BayesConfig::default().with_iterations(4, 3).with_top_k(3))
    }

    /// Stand-in renderer: brighter the closer the openings sit to the centre.
    fn render(scene: &mut Scene) {
        let radiance: f32 = scene
            .recorder
            .applied()
            .iter()
            .map(|cut| (1.0 - cut.transform.translation.x.abs() / 100.0) as f32 * 0.004)
            .sum();
        let family = match scene.engine.stage() {
            Stage::ViewSamplers => scene.engine.view_samplers_mut(),
            Stage::PlanarSamplers => scene.engine.planar_samplers_mut(),
            _ => return,
        };
        for sampler in family.iter_mut() {
            let frame = CapturedFrame::uniform(sampler.samples_per_pixel(), [radiance; 3], 4);
            sampler.capture(&frame);
        }
    }

    /// Tick until the run ends, rendering after every tick.
    fn drive(scene: &mut Scene, max_ticks: usize) -> usize {
        for tick in 0..max_ticks {
            if !scene.engine.is_optimizing() {
                return tick;
            }
            scene.engine.advance(1.0 / 60.0);
            render(scene);
        }
        max_ticks
    }

    #[test]
    fn preflight_reports_missing_pieces() {
        let mut engine = OpeningEngine::new(EngineConfig::default(), SkyLight::new());
        assert!(matches!(
            engine.preflight(),
            Err(ApError::Configuration(ConfigurationError::NoSamplers))
        ));
        assert!(!engine.start_optimization());

        engine.add_sampler(Box::new(PlanarSampler::new("desk", SamplerGoal::default())));
        assert!(matches!(
            engine.preflight(),
            Err(ApError::Configuration(ConfigurationError::NoDomains))
        ));

        let neighbor = OpeningDomain::new(DomainConfig::new("east"));
        engine.add_domain(
            OpeningDomain::new(DomainConfig::new("south"))
                .with_cut_target(CutRecorder::new())
                .with_neighbor(neighbor),
        );
        match engine.preflight() {
            Err(ApError::Configuration(ConfigurationError::MissingCutTarget { domain })) => {
                assert_eq!(domain, "east")
            }
            other => panic!("unexpected preflight result: {other:?}"),
        }
        assert!(!engine.start_bayes_optimization());
        assert!(!engine.is_optimizing());
        assert_eq!(engine.stage(), Stage::Init);
        assert_eq!(engine.status().state, RunState::Idle);
    }

    #[test]
    fn stages_follow_the_render_cycle() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_optimization());
        assert_eq!(scene.view_log.lock().efficacy, Some(30_000.0));
        assert_eq!(scene.planar_log.lock().efficacy, Some(30_000.0));

        assert_eq!(scene.engine.advance(0.0), Stage::OptStep);
        assert_eq!(scene.engine.advance(0.0), Stage::CsgOps);
        assert_eq!(scene.engine.advance(0.0), Stage::SetMaxEnvMap);
        assert_eq!(scene.engine.iteration(), 1);
        // skylight needs one tick to switch
        assert_eq!(scene.engine.advance(0.0), Stage::SetMaxEnvMap);
        assert_eq!(scene.engine.advance(0.0), Stage::ViewSamplers);
        assert!(!scene.engine.view_samplers()[0].rendering_done());
        assert!(scene.engine.view_samplers()[0].should_reset());

        // waits while the view sampler is still rendering
        assert_eq!(scene.engine.advance(0.0), Stage::ViewSamplers);
        render(&mut scene);
        assert_eq!(scene.engine.advance(0.0), Stage::ViewSamplers);
        render(&mut scene);
        assert_eq!(scene.engine.advance(0.0), Stage::SetAvgEnvMap);
        assert_eq!(scene.engine.advance(0.0), Stage::SetAvgEnvMap);
        assert_eq!(scene.engine.environment().current_env_map(), Some("average_illumination"));
        assert_eq!(scene.engine.advance(0.0), Stage::PlanarSamplers);
        render(&mut scene);
        render(&mut scene);
        assert_eq!(scene.engine.advance(0.0), Stage::OptStep);
    }

    #[test]
    fn random_run_completes_and_commits_best_layout() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_optimization());
        let ticks = drive(&mut scene, 10_000);
        assert!(ticks < 10_000);

        let engine = &scene.engine;
        assert_eq!(engine.status().state, RunState::Completed);
        assert_eq!(engine.status().iterations_completed, 7);
        assert!(engine.state().has_best());
        assert_eq!(engine.stage(), Stage::Init);
        assert_eq!(scene.recorder.applied_count(), 2);
        assert!(engine.planar_samplers()[0].reported_cost().is_some());
        assert!(engine.view_samplers()[0].reported_cost().is_some());
    }

    #[test]
    fn measurements_are_never_read_before_rendering_is_done() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::SimulatedAnnealing,
            StrategyKind::Bayesian,
        ] {
            let mut scene = scene(small_config());
            assert!(scene.engine.start(kind));
            drive(&mut scene, 10_000);
            assert_eq!(scene.engine.status().state, RunState::Completed, "{kind}");
            for log in [&scene.view_log, &scene.planar_log] {
                let log = log.lock();
                assert!(log.reads > 0, "{kind}");
                assert_eq!(log.early_reads, 0, "{kind}");
            }
        }
    }

    #[test]
    fn annealing_run_reports_snapshot() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_optimization_sa());
        drive(&mut scene, 10_000);
        let snapshot = scene.engine.strategy_snapshot().unwrap();
        assert!(snapshot.temperature.is_some());
        // iteration 0 waits and the last one finalizes
        assert_eq!(snapshot.samples, 5);
    }

    #[test]
    fn bayes_run_fills_cache_and_applies_k() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_bayes_optimization());
        assert_eq!(scene.engine.max_iterations(), 8);
        drive(&mut scene, 10_000);
        assert_eq!(scene.engine.status().state, RunState::Completed);
        assert_eq!(scene.engine.state().top_k.len(), 3);

        let second = scene.engine.state().top_k.get(1).unwrap().clone();
        assert_eq!(scene.engine.apply_k_opening(1), Some(1));
        assert_eq!(scene.engine.state().best_loss, second.cost);
        assert_eq!(scene.engine.state().best_cost, second.measured);
        assert_eq!(scene.engine.state().best_penalty, second.penalty);
        assert_eq!(scene.engine.state().best_cutters, second.cutters);
        assert_eq!(scene.recorder.applied_count(), 2);

        let best = scene.engine.state().top_k.get(0).unwrap().clone();
        assert_eq!(scene.engine.apply_k_opening(99), Some(0));
        assert_eq!(scene.engine.state().best_loss, best.cost);

        let surface = scene.engine.debug_response_surface(4).unwrap();
        assert_eq!(surface.len(), 16);
        assert!(surface.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn apply_k_without_cache_is_a_no_op() {
        let mut scene = scene(small_config());
        assert_eq!(scene.engine.apply_k_opening(0), None);
        assert_eq!(scene.recorder.applied_count(), 0);
        assert!(scene.engine.debug_response_surface(3).is_none());
    }

    #[test]
    fn stop_returns_to_init() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_optimization_sa());
        for _ in 0..5 {
            scene.engine.advance(0.0);
        }
        assert!(scene.engine.iteration() > 0);

        scene.engine.stop_optimization();
        assert!(!scene.engine.is_optimizing());
        assert_eq!(scene.engine.stage(), Stage::Init);
        assert_eq!(scene.engine.iteration(), 0);
        assert_eq!(scene.engine.status().state, RunState::Cancelled);
        assert_eq!(scene.engine.advance(0.0), Stage::Init);
    }

    #[test]
    fn sampler_stats_cover_both_families() {
        let mut scene = scene(small_config());
        assert!(scene.engine.start_optimization());
        drive(&mut scene, 10_000);
        let report = scene.engine.sampler_stats();
        assert_eq!(report.total_samplers(), 2);
        assert!(report.goals_reached() <= 2);
    }
}

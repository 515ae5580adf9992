// Headless demo: optimizes two facades of a synthetic room
// APERTURE_LOG sets the log filter, APERTURE_STRATEGY picks random, sa or bayes

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context};
use ap_engine::{EngineConfig, OpeningEngine, Stage};
use ap_optimizer::{DomainConfig, OpeningDomain, StrategyKind};
use ap_types::{
    CapturedFrame, CutRecorder, OpeningType, PlanarSampler, SamplerGoal, ScaleOptimization,
    SkyLight, Transform, ViewSampler,
};
use nalgebra::{UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAME_PERIOD: Duration = Duration::from_millis(1);
const SAMPLES_PER_FRAME: u32 = 4;
const PIXELS: usize = 16;

/// Radiance model standing in for the path tracer.
struct SyntheticRenderer {
    walls: Vec<CutRecorder>,
    sensors: HashMap<String, Vector3<f64>>,
    progress: HashMap<String, u32>,
    rng: ChaCha8Rng,
}

impl SyntheticRenderer {
    fn new(walls: Vec<CutRecorder>, seed: u64) -> Self {
        Self {
            walls,
            sensors: HashMap::new(),
            progress: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn place_sensor(&mut self, name: &str, position: Vector3<f64>) {
        self.sensors.insert(name.to_string(), position);
    }

    /// Opening area seen from `position`, attenuated by squared distance.
    fn radiance_at(&self, position: &Vector3<f64>) -> f64 {
        self.walls
            .iter()
            .flat_map(|wall| wall.openings_area())
            .map(|(center, area)| area / (1.0 + (center - position).norm_squared()))
            .sum::<f64>()
            * 1e-4
    }

    /// Advance every sampler of the current stage by one frame.
    fn render(&mut self, engine: &mut OpeningEngine) {
        let samplers = match engine.stage() {
            Stage::ViewSamplers => engine.view_samplers_mut(),
            Stage::PlanarSamplers => engine.planar_samplers_mut(),
            _ => return,
        };
        for sampler in samplers.iter_mut() {
            let index = {
                let accumulated = self.progress.entry(sampler.name().to_string()).or_insert(0);
                if sampler.should_reset() {
                    *accumulated = 0;
                }
                *accumulated = (*accumulated + SAMPLES_PER_FRAME).min(sampler.samples_per_pixel());
                *accumulated
            };

            let position = self.sensors.get(sampler.name()).copied().unwrap_or_else(Vector3::zeros);
            let radiance = self.radiance_at(&position);
            // noise fades as samples accumulate
            let spread = 0.2 / f64::from(index.max(1));
            let pixels = (0..PIXELS)
                .map(|_| {
                    let v = (radiance * (1.0 + self.rng.random_range(-spread..=spread))).max(0.0) as f32;
                    [v, v, v * 0.95]
                })
                .collect();
            sampler.capture(&CapturedFrame::new(index, pixels));
        }
    }
}

trait OpeningsArea {
    fn openings_area(&self) -> Vec<(Vector3<f64>, f64)>;
}

impl OpeningsArea for CutRecorder {
    fn openings_area(&self) -> Vec<(Vector3<f64>, f64)> {
        self.applied()
            .iter()
            .map(|cut| {
                let extent = cut.bounds.max - cut.bounds.min;
                ((cut.bounds.min + cut.bounds.max) * 0.5, extent.x.abs() * extent.y.abs())
            })
            .collect()
    }
}

fn build_scene(config: EngineConfig) -> (OpeningEngine, SyntheticRenderer) {
    let south = CutRecorder::new();
    let east = CutRecorder::new();
    let seed = config.seed;

    let east_wall = OpeningDomain::new(
        DomainConfig::new("east_facade")
            .with_transform(
                Transform::from_translation(Vector3::new(300.0, 0.0, 300.0))
                    .with_rotation(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -std::f64::consts::FRAC_PI_2)),
            )
            .with_scale_optimization(ScaleOptimization::UniformScale),
    )
    .with_cut_target(east.clone());

    let south_wall = OpeningDomain::new(
        DomainConfig::new("south_facade")
            .with_transform(Transform::from_translation(Vector3::new(0.0, 0.0, 600.0)).with_scale(Vector3::new(4.0, 2.0, 1.0)))
            .with_opening_type(OpeningType::SpacingX)
            .with_scale_optimization(ScaleOptimization::VariableScale)
            .with_scale_ranges((0.3, 1.2), (0.5, 1.5))
            .with_cutters(2),
    )
    .with_cut_target(south.clone())
    .with_neighbor(east_wall);

    let mut renderer = SyntheticRenderer::new(vec![south, east], seed);
    renderer.place_sensor("desk", Vector3::new(0.0, -50.0, 350.0));
    renderer.place_sensor("sofa", Vector3::new(200.0, -80.0, 200.0));
    renderer.place_sensor("reading_view", Vector3::new(0.0, 0.0, 100.0));

    let engine = OpeningEngine::new(config, SkyLight::new())
        .with_domain(south_wall)
        .with_sampler(Box::new(PlanarSampler::new("desk", SamplerGoal::new(300.0, 500.0))))
        .with_sampler(Box::new(PlanarSampler::new("sofa", SamplerGoal::new(150.0, 300.0))))
        .with_sampler(Box::new(ViewSampler::new("reading_view", SamplerGoal::new(100.0, 2_000.0))));

    (engine, renderer)
}

fn strategy_from_env() -> anyhow::Result<StrategyKind> {
    match std::env::var("APERTURE_STRATEGY").as_deref() {
        Err(_) | Ok("bayes") => Ok(StrategyKind::Bayesian),
        Ok("random") => Ok(StrategyKind::Random),
        Ok("sa") => Ok(StrategyKind::SimulatedAnnealing),
        Ok(other) => bail!("unknown strategy {other:?}, expected random, sa or bayes"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("APERTURE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path).with_context(|| format!("loading {path}"))?,
        None => EngineConfig::default().with_max_steps(40),
    };
    let kind = strategy_from_env()?;

    let (mut engine, mut renderer) = build_scene(config);
    if !engine.start(kind) {
        engine.preflight()?;
        bail!("engine refused to start");
    }

    let mut ticker = tokio::time::interval(FRAME_PERIOD);
    let mut ticks = 0u64;
    while engine.is_optimizing() {
        ticker.tick().await;
        engine.advance(FRAME_PERIOD.as_secs_f64());
        renderer.render(&mut engine);
        ticks += 1;
    }
    info!(ticks, status = ?engine.status().state, "run finished");

    println!("{}", serde_json::to_string_pretty(engine.state())?);
    println!("{}", serde_json::to_string_pretty(&engine.sampler_stats())?);
    if let Some(snapshot) = engine.strategy_snapshot() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    if let Some(surface) = engine.debug_response_surface(8) {
        for row in surface.chunks(8) {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:8.3}")).collect();
            println!("{}", cells.join(" "));
        }
    }
    for sampler in engine.view_samplers().iter().chain(engine.planar_samplers()) {
        if let Some(cost) = sampler.reported_cost() {
            info!(sampler = sampler.name(), value = cost.value, loss = cost.loss, "final reading");
        }
    }
    Ok(())
}

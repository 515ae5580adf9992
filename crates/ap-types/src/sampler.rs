//! Sampler proxies: virtual light sensors fed by a multi-frame renderer.
//!
//! The host renders each sampler over several frames and hands the latest
//! frame to [`Sampler::capture`]. A sampler only reports
//! [`Sampler::rendering_done`] once the renderer has accumulated its full
//! sample budget since the last reset. Reading [`Sampler::measurement`] before
//! that yields whatever partial frame was captured last.

use std::f64::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Default samples per pixel for planar samplers.
pub const PLANAR_SAMPLES_PER_PIXEL: u32 = 6;
/// Default samples per pixel for view samplers.
pub const VIEW_SAMPLES_PER_PIXEL: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerKind {
    /// Irradiance patch, reports illuminance.
    Planar,
    /// Frustum block, reports peak luminance.
    View,
}

/// Acceptable measurement range of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerGoal {
    pub min: f64,
    pub max: f64,
}

impl Default for SamplerGoal {
    fn default() -> Self {
        Self { min: 2.0, max: 2.0 }
    }
}

impl SamplerGoal {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A goal evaluated against a reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplerMeasurement {
    pub value: f64,
    pub loss: f64,
}

/// Raw reading of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: Vector3<f64>,
    pub valid: bool,
}

impl Measurement {
    pub fn invalid() -> Self {
        Self {
            value: Vector3::zeros(),
            valid: false,
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.value.norm()
    }
}

/// One frame of the host renderer's progressive capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedFrame {
    /// Path tracing samples accumulated so far.
    pub sample_index: u32,
    /// Linear RGB radiance per pixel.
    pub pixels: Vec<[f32; 3]>,
}

impl CapturedFrame {
    pub fn new(sample_index: u32, pixels: Vec<[f32; 3]>) -> Self {
        Self { sample_index, pixels }
    }

    /// Frame where every pixel has the same radiance.
    pub fn uniform(sample_index: u32, rgb: [f32; 3], pixel_count: usize) -> Self {
        Self::new(sample_index, vec![rgb; pixel_count])
    }
}

/// A light sensor in the scene.
pub trait Sampler: Send {
    fn kind(&self) -> SamplerKind;

    fn name(&self) -> &str;

    fn goal(&self) -> SamplerGoal;

    /// Accumulated samples at which a capture completes the rendering.
    fn samples_per_pixel(&self) -> u32;

    /// Feed the renderer's latest progressive frame.
    fn capture(&mut self, frame: &CapturedFrame);

    fn measurement(&self) -> Measurement;

    fn set_should_reset(&mut self, reset: bool);

    fn should_reset(&self) -> bool;

    fn rendering_done(&self) -> bool;

    fn set_rendering_done(&mut self, done: bool);

    fn set_light_efficacy(&mut self, efficacy: f64);

    /// Final value and loss written back when a run commits its best layout.
    fn set_reported_cost(&mut self, cost: SamplerMeasurement);

    fn reported_cost(&self) -> Option<SamplerMeasurement>;
}

/// Progress bookkeeping shared by both sampler kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CaptureProgress {
    samples_per_pixel: u32,
    should_reset: bool,
    rendering_done: bool,
    captures: u64,
}

impl CaptureProgress {
    fn new(samples_per_pixel: u32, should_reset: bool) -> Self {
        Self {
            samples_per_pixel,
            should_reset,
            rendering_done: false,
            captures: 0,
        }
    }

    fn observe(&mut self, frame: &CapturedFrame) {
        self.rendering_done = frame.sample_index == self.samples_per_pixel && !self.should_reset;
        self.should_reset = false;
        self.captures = self.captures.wrapping_add(1);
    }
}

/// Irradiance sensor on a small planar patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanarSampler {
    name: String,
    goal: SamplerGoal,
    light_efficacy: f64,
    progress: CaptureProgress,
    illuminance: Option<Vector3<f64>>,
    min_luminance: Vector3<f64>,
    max_luminance: Vector3<f64>,
    reported: Option<SamplerMeasurement>,
}

impl PlanarSampler {
    pub fn new(name: impl Into<String>, goal: SamplerGoal) -> Self {
        Self {
            name: name.into(),
            goal,
            light_efficacy: 1.0,
            progress: CaptureProgress::new(PLANAR_SAMPLES_PER_PIXEL, true),
            illuminance: None,
            min_luminance: Vector3::zeros(),
            max_luminance: Vector3::zeros(),
            reported: None,
        }
    }

    pub fn with_samples_per_pixel(mut self, spp: u32) -> Self {
        self.progress.samples_per_pixel = spp;
        self
    }

    pub fn light_efficacy(&self) -> f64 {
        self.light_efficacy
    }

    /// Darkest and brightest pixel of the last frame, in nits.
    pub fn luminance_range(&self) -> (Vector3<f64>, Vector3<f64>) {
        (self.min_luminance, self.max_luminance)
    }
}

impl Sampler for PlanarSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Planar
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn goal(&self) -> SamplerGoal {
        self.goal
    }

    fn samples_per_pixel(&self) -> u32 {
        self.progress.samples_per_pixel
    }

    fn capture(&mut self, frame: &CapturedFrame) {
        self.progress.observe(frame);
        if frame.pixels.is_empty() {
            self.illuminance = None;
            return;
        }

        let mut sum = Vector3::zeros();
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for px in &frame.pixels {
            let value = Vector3::new(px[0] as f64, px[1] as f64, px[2] as f64) * self.light_efficacy;
            sum += value;
            min = min.inf(&value);
            max = max.sup(&value);
        }
        // mean radiance over the hemisphere patch to lux
        self.illuminance = Some(sum / frame.pixels.len() as f64 * PI);
        self.min_luminance = min;
        self.max_luminance = max;
    }

    fn measurement(&self) -> Measurement {
        match self.illuminance {
            Some(value) => Measurement { value, valid: true },
            None => Measurement::invalid(),
        }
    }

    fn set_should_reset(&mut self, reset: bool) {
        self.progress.should_reset = reset;
    }

    fn should_reset(&self) -> bool {
        self.progress.should_reset
    }

    fn rendering_done(&self) -> bool {
        self.progress.rendering_done
    }

    fn set_rendering_done(&mut self, done: bool) {
        self.progress.rendering_done = done;
    }

    fn set_light_efficacy(&mut self, efficacy: f64) {
        self.light_efficacy = efficacy;
    }

    fn set_reported_cost(&mut self, cost: SamplerMeasurement) {
        self.reported = Some(cost);
    }

    fn reported_cost(&self) -> Option<SamplerMeasurement> {
        self.reported
    }
}

/// Luminance sensor looking through a view frustum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSampler {
    name: String,
    goal: SamplerGoal,
    light_efficacy: f64,
    progress: CaptureProgress,
    average: Vector3<f64>,
    max_value: Option<Vector3<f64>>,
    reported: Option<SamplerMeasurement>,
}

impl ViewSampler {
    pub fn new(name: impl Into<String>, goal: SamplerGoal) -> Self {
        Self {
            name: name.into(),
            goal,
            light_efficacy: 1.0,
            progress: CaptureProgress::new(VIEW_SAMPLES_PER_PIXEL, false),
            average: Vector3::zeros(),
            max_value: None,
            reported: None,
        }
    }

    pub fn with_samples_per_pixel(mut self, spp: u32) -> Self {
        self.progress.samples_per_pixel = spp;
        self
    }

    pub fn light_efficacy(&self) -> f64 {
        self.light_efficacy
    }

    pub fn average(&self) -> Vector3<f64> {
        self.average
    }
}

impl Sampler for ViewSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::View
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn goal(&self) -> SamplerGoal {
        self.goal
    }

    fn samples_per_pixel(&self) -> u32 {
        self.progress.samples_per_pixel
    }

    fn capture(&mut self, frame: &CapturedFrame) {
        self.progress.observe(frame);
        if frame.pixels.is_empty() {
            self.max_value = None;
            return;
        }

        let mut sum = Vector3::zeros();
        let mut max = Vector3::zeros();
        for px in &frame.pixels {
            let value = Vector3::new(px[0] as f64, px[1] as f64, px[2] as f64);
            sum += value;
            max = max.sup(&value);
        }
        self.average = sum / frame.pixels.len() as f64;
        self.max_value = Some(max);
    }

    fn measurement(&self) -> Measurement {
        match self.max_value {
            Some(value) => Measurement { value, valid: true },
            None => Measurement::invalid(),
        }
    }

    fn set_should_reset(&mut self, reset: bool) {
        self.progress.should_reset = reset;
    }

    fn should_reset(&self) -> bool {
        self.progress.should_reset
    }

    fn rendering_done(&self) -> bool {
        self.progress.rendering_done
    }

    fn set_rendering_done(&mut self, done: bool) {
        self.progress.rendering_done = done;
    }

    fn set_light_efficacy(&mut self, efficacy: f64) {
        self.light_efficacy = efficacy;
    }

    fn set_reported_cost(&mut self, cost: SamplerMeasurement) {
        self.reported = Some(cost);
    }

    fn reported_cost(&self) -> Option<SamplerMeasurement> {
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_requires_full_sample_budget() {
        let mut sampler = ViewSampler::new("view", SamplerGoal::default()).with_samples_per_pixel(4);
        sampler.capture(&CapturedFrame::uniform(2, [1.0, 1.0, 1.0], 4));
        assert!(!sampler.rendering_done());
        sampler.capture(&CapturedFrame::uniform(4, [1.0, 1.0, 1.0], 4));
        assert!(sampler.rendering_done());
    }

    #[test]
    fn reset_request_blocks_one_capture() {
        let mut sampler = PlanarSampler::new("desk", SamplerGoal::default()).with_samples_per_pixel(1);
        sampler.set_should_reset(true);
        sampler.capture(&CapturedFrame::uniform(1, [0.1, 0.1, 0.1], 4));
        assert!(!sampler.rendering_done());
        assert!(!sampler.should_reset());

        sampler.capture(&CapturedFrame::uniform(1, [0.1, 0.1, 0.1], 4));
        assert!(sampler.rendering_done());
    }

    #[test]
    fn planar_illuminance_scales_with_efficacy_and_pi() {
        let mut sampler = PlanarSampler::new("desk", SamplerGoal::default());
        sampler.set_light_efficacy(100.0);
        sampler.capture(&CapturedFrame::new(6, vec![[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]));

        let m = sampler.measurement();
        assert!(m.valid);
        assert!((m.value.x - 50.0 * PI).abs() < 1e-9);
        assert_eq!(m.value.y, 0.0);

        let (min, max) = sampler.luminance_range();
        assert_eq!(min.x, 0.0);
        assert_eq!(max.x, 100.0);
    }

    #[test]
    fn view_reports_peak_without_efficacy() {
        let mut sampler = ViewSampler::new("eye", SamplerGoal::new(0.0, 1.0));
        sampler.set_light_efficacy(30_000.0);
        sampler.capture(&CapturedFrame::new(32, vec![[0.5, 0.2, 0.1], [0.1, 0.9, 0.1]]));

        let m = sampler.measurement();
        assert!(m.valid);
        assert_eq!(m.value, Vector3::new(0.5, 0.9, 0.1).map(|v| v as f32 as f64));
        assert!((sampler.average().x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn measurement_is_invalid_before_any_capture() {
        let sampler = PlanarSampler::new("desk", SamplerGoal::default());
        assert!(!sampler.measurement().valid);
        assert_eq!(sampler.measurement().magnitude(), 0.0);
    }

    #[test]
    fn goal_contains_is_inclusive() {
        let goal = SamplerGoal::new(100.0, 300.0);
        assert!(goal.contains(100.0));
        assert!(goal.contains(300.0));
        assert!(!goal.contains(300.1));
    }
}

// Aperture opening optimization engine
// Schedules search strategies against host-rendered samplers

pub mod config;
pub mod engine;

pub use config::{EngineConfig, DEFAULT_LIGHT_EFFICACY};
pub use engine::{OpeningEngine, Stage, SurrogateFactory};

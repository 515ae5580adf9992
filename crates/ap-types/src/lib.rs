//! Core types and collaborator interfaces for Aperture.
//!
//! Everything the optimizer talks to outside of itself (cut geometry, light
//! samplers, the sky environment) is a trait defined here, next to the plain
//! data the optimizer passes around.

pub mod environment;
pub mod errors;
pub mod geometry;
pub mod parameters;
pub mod sampler;

pub use environment::*;
pub use errors::*;
pub use geometry::*;
pub use parameters::*;
pub use sampler::*;

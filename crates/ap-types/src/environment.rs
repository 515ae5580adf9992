//! Scene lighting environment collaborator.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Switches the sky environment map used by the renderer.
pub trait Environment: Send {
    /// Request `env_map`. Returns `true` only when it is already active, so a
    /// caller polls until the change has settled.
    fn set_env_map(&mut self, env_map: &str) -> bool;

    fn current_env_map(&self) -> Option<&str>;
}

/// Skylight that takes one call to switch cubemaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkyLight {
    cubemap: Option<String>,
    switches: usize,
}

impl SkyLight {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the cubemap actually changed.
    pub fn switches(&self) -> usize {
        self.switches
    }
}

impl Environment for SkyLight {
    fn set_env_map(&mut self, env_map: &str) -> bool {
        if self.cubemap.as_deref() == Some(env_map) {
            return true;
        }
        debug!(env_map, "switching skylight cubemap");
        self.cubemap = Some(env_map.to_string());
        self.switches += 1;
        false
    }

    fn current_env_map(&self) -> Option<&str> {
        self.cubemap.as_deref()
    }
}

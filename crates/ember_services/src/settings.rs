//! Settings management

use ember_gpu::{LifecycleConfig, MAX_FRAMES_IN_FLIGHT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub renderer: RendererSettings,
    pub memory: MemorySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererSettings {
    /// Swapchain depth; clamped to 2..=3 when applied.
    pub frames_in_flight: usize,
    pub fence_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub arena_size: u64,
    pub uniform_buffer_size: u64,
    pub instance_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            renderer: RendererSettings {
                frames_in_flight: 3,
                fence_timeout_ms: 2000,
            },
            memory: MemorySettings {
                arena_size: 16 * 1024 * 1024,
                uniform_buffer_size: 1024 * 1024,
                instance_capacity: 1024,
            },
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or malformed. The fallback is logged, never fatal.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    %error,
                    "using default settings"
                );
                Self::default()
            }
        }
    }

    /// Translate into the GPU layer's sizing, clamping what needs clamping.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            arena_size: self.memory.arena_size,
            uniform_buffer_size: self.memory.uniform_buffer_size,
            instance_capacity: self.memory.instance_capacity,
            frames_in_flight: self.renderer.frames_in_flight.clamp(2, MAX_FRAMES_IN_FLIGHT),
            fence_timeout: Duration::from_millis(self.renderer.fence_timeout_ms),
        }
    }
}

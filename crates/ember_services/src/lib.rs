//! Ember Services Layer
//!
//! Platform abstraction for settings and engine configuration.

pub mod settings;

pub use settings::{Settings, SettingsError};

//! Configuration for the vigil pipeline.
//!
//! Sources, lowest priority first: compiled defaults, a TOML file, then
//! `VIGIL_`-prefixed environment variables (`__` separates nesting levels,
//! e.g. `VIGIL_PIPELINE__MAX_TURNS=3`).

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{figment_for, load_settings, DEFAULT_CONFIG_FILE};
pub use types::*;

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ApiKey, VigilSettings};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "vigil.toml";

/// Fallback credential variable for the reasoner.
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// Assemble the layered sources without extracting.
///
/// An explicit `path` must exist; the default file is optional.
pub fn figment_for(path: Option<&Path>) -> Result<Figment> {
    let file = match path {
        Some(p) if !p.exists() => return Err(SettingsError::MissingFile(p.to_path_buf())),
        Some(p) => p.to_path_buf(),
        None => Path::new(DEFAULT_CONFIG_FILE).to_path_buf(),
    };
    debug!(path = %file.display(), "loading settings");

    Ok(Figment::from(Serialized::defaults(VigilSettings::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("VIGIL_").split("__")))
}

/// Load, fill the credential fallback, and validate.
pub fn load_settings(path: Option<&Path>) -> Result<VigilSettings> {
    let mut settings: VigilSettings = figment_for(path)?.extract()?;

    if settings.reasoner.api_key.as_ref().map_or(true, ApiKey::is_empty) {
        if let Ok(key) = std::env::var(OPENAI_KEY_VAR) {
            if !key.trim().is_empty() {
                debug!("using {OPENAI_KEY_VAR} for reasoner credentials");
                settings.reasoner.api_key = Some(ApiKey::new(key));
            }
        }
    }

    settings.validate()?;
    Ok(settings)
}

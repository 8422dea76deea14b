//! Configuration file loader
//! Loads the YAML tier policy table consumed by the access gate

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::ConsentConfig;
use crate::consent::policy::TierPolicy;
use crate::error::ConsentError;

/// Load a YAML file and deserialize it
fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConsentError> {
    if !path.exists() {
        return Err(ConsentError::ConfigError(format!(
            "Configuration file not found: {:?}",
            path
        )));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ConsentError::ConfigError(format!("Failed to read {:?}: {}", path, e)))?;

    serde_yaml::from_str(&contents)
        .map_err(|e| ConsentError::ConfigError(format!("Failed to parse {:?}: {}", path, e)))
}

/// Load and validate a tier policy table from a YAML file.
pub fn load_tier_policy(path: &Path) -> Result<TierPolicy, ConsentError> {
    info!("Loading tier policy from: {:?}", path);
    let policy = load_yaml::<TierPolicy>(path)?.normalized();
    policy.validate()?;
    info!("Loaded tier policy with {} rules", policy.rules.len());
    Ok(policy)
}

/// Tier policy from the configured file, or the built-in table.
pub fn tier_policy_from_config(config: &ConsentConfig) -> Result<TierPolicy, ConsentError> {
    match &config.tier_policy_path {
        Some(path) => load_tier_policy(Path::new(path)),
        None => Ok(TierPolicy::default()),
    }
}

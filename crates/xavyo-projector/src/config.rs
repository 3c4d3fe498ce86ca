//! Projector configuration.

use serde::{Deserialize, Serialize};
use xavyo_delta::ItemPath;

/// Configuration for the projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Maximum iterations when a template enables iteration without a
    /// maximum.
    pub default_max_iterations: u32,
    /// Focus paths that must be unique besides `name`.
    pub unique_paths: Vec<ItemPath>,
    /// Recompute outbound values of every projection, not only of those
    /// whose sources changed.
    pub reconcile_projections: bool,
    /// Run the dependency check after the last wave.
    pub check_final_dependencies: bool,
    /// Upper bound on the number of waves.
    pub max_waves_cap: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: 5,
            unique_paths: Vec::new(),
            reconcile_projections: false,
            check_final_dependencies: true,
            max_waves_cap: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProjectorConfig = serde_json::from_value(serde_json::json!({
            "unique_paths": ["emailAddress"],
            "max_waves_cap": 4
        }))
        .unwrap();
        assert_eq!(config.default_max_iterations, 5);
        assert_eq!(config.unique_paths, vec![ItemPath::name("emailAddress")]);
        assert_eq!(config.max_waves_cap, 4);
        assert!(config.check_final_dependencies);
    }
}

use std::collections::HashMap;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::File;
use serde::Deserialize;
use throttling::ThrottlingEssentials;
use throttling::quotas::PropertyQuotaOptions;

use crate::simulation::SimulationSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationConfigFile {
    pub essentials: ThrottlingEssentials,
    /// Property key to the quota applied to its values
    pub property_quotas: HashMap<String, PropertyQuotaOptions>,
    pub simulation: SimulationSettings,
}

pub fn load_simulation_config<P: AsRef<Path>>(path: P) -> Result<SimulationConfigFile, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).build()?;

    config.try_deserialize()
}

/// Load simulation config with fallback to default
pub fn load_simulation_config_or_default(path: &str) -> SimulationConfigFile {
    match load_simulation_config(path) {
        Ok(config) => {
            tracing::info!("Loaded simulation config from {path}");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load simulation config from {}: {}. Using defaults.", path, err);
            SimulationConfigFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("throttling_app_{}_{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = SimulationConfigFile::default();

        assert!(config.essentials.enabled);
        assert_eq!(config.essentials.queue_limit, 500);
        assert!(config.property_quotas.is_empty());
        assert_eq!(config.simulation, SimulationSettings::default());
    }

    #[test]
    fn test_load_from_toml() {
        let path = write_config(
            "full",
            r#"
            [essentials]
            capacity_limit = 32
            queue_limit = 64
            refresh_period = -1.0

            [property_quotas.consumer]
            global_limit = 0.5
            blacklist = ["intruder"]

            [simulation]
            concurrency = 8
            consumers = ["a", "b"]
            duration_secs = 3
            "#,
        );

        let config = load_simulation_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.essentials.capacity_limit, Some(32));
        assert_eq!(config.essentials.queue_limit, 64);
        assert_eq!(config.essentials.refresh_period, None);
        assert_eq!(config.property_quotas["consumer"].global_limit, Some(0.5));
        assert_eq!(config.property_quotas["consumer"].blacklist, vec!["intruder".to_string()]);
        assert_eq!(config.simulation.concurrency, 8);
        assert_eq!(config.simulation.consumers, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.simulation.duration(), Duration::from_secs(3));
        assert_eq!(config.simulation.metrics_interval_ms, SimulationSettings::default().metrics_interval_ms);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_simulation_config_or_default("does/not/exist.toml");

        assert_eq!(config.simulation, SimulationSettings::default());
        assert_eq!(config.essentials, ThrottlingEssentials::default());
    }
}

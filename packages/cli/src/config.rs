//! `traceability.toml` loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use traceability_layers::LayerDefinition;
use traceability_membership::alerts::AlertRule;
use traceability_records::RecordSource;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG: &str = "traceability.toml";

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the schema.
    #[error("invalid config {path}: {source}")]
    Toml {
        /// Configuration file.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
    /// Two `[[layers]]` entries share a name (file, layer name).
    #[error("config {0} defines layer '{1}' more than once")]
    DuplicateLayer(PathBuf, String),
}

/// Contents of `traceability.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The survey export to analyze.
    pub records: RecordSource,
    /// Zone layers, in load order.
    #[serde(default)]
    pub layers: Vec<LayerDefinition>,
}

impl Config {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Toml`] if the document does not match the schema
    /// * [`ConfigError::DuplicateLayer`] if two layers share a name
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        for (i, layer) in config.layers.iter().enumerate() {
            if config.layers[..i].iter().any(|l| l.name == layer.name) {
                return Err(ConfigError::DuplicateLayer(
                    path.to_path_buf(),
                    layer.name.clone(),
                ));
            }
        }

        Ok(config)
    }

    /// Reads `path`. Returns the config and the directory relative paths in
    /// it resolve against.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the file cannot be read
    /// * Any error from [`Config::from_toml`]
    pub fn load(path: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text, path)?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        log::debug!(
            "Loaded {} with {} layers",
            path.display(),
            config.layers.len()
        );
        Ok((config, base_dir))
    }

    /// Alert rules for every layer with `alert = true`.
    #[must_use]
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.layers
            .iter()
            .filter(|layer| layer.alert)
            .map(|layer| AlertRule {
                layer: layer.name.clone(),
                label_field: layer.label_field.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [records]
        path = "survey.json"
        id_field = "A3_Farmer_ID"
        location_field = "B2_Plot_location"

        [[layers]]
        name = "protected_areas"
        path = "layers/protected_areas.geojson"
        label_field = "NAMOBJ"

        [[layers]]
        name = "peatland"
        path = "layers/khg.geojson"
        crs = "EPSG:32749"
        alert = false
    "#;

    #[test]
    fn parses_records_and_layers() {
        let config = Config::from_toml(EXAMPLE, Path::new("traceability.toml")).unwrap();
        assert_eq!(config.records.location_field, "B2_Plot_location");
        assert_eq!(config.layers.len(), 2);
        assert_eq!(config.layers[1].crs.as_deref(), Some("EPSG:32749"));
    }

    #[test]
    fn alert_rules_skip_disabled_layers() {
        let config = Config::from_toml(EXAMPLE, Path::new("traceability.toml")).unwrap();
        assert_eq!(
            config.alert_rules(),
            vec![AlertRule {
                layer: "protected_areas".to_string(),
                label_field: Some("NAMOBJ".to_string()),
            }]
        );
    }

    #[test]
    fn duplicate_layer_names_are_rejected() {
        let text = r#"
            [records]
            path = "survey.csv"
            location_field = "loc"

            [[layers]]
            name = "peatland"
            path = "a.geojson"

            [[layers]]
            name = "peatland"
            path = "b.geojson"
        "#;
        assert!(matches!(
            Config::from_toml(text, Path::new("traceability.toml")),
            Err(ConfigError::DuplicateLayer(_, name)) if name == "peatland"
        ));
    }

    #[test]
    fn missing_records_section_is_rejected() {
        assert!(matches!(
            Config::from_toml("layers = []", Path::new("traceability.toml")),
            Err(ConfigError::Toml { .. })
        ));
    }
}

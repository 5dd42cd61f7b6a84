use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::status_log::DEFAULT_LOG_CAPACITY;

pub const DEFAULT_CONFIG_PATH: &str = "configs/dashboard.toml";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub dashboard_name: String,
    pub enable_logging: bool,
    pub logging: LoggingConfig,
    pub actuators: ActuatorConfig,
    pub status_log: StatusLogConfig,
    pub classifier: ClassifierConfig,
    /// Initial contents of the in-process store, keyed by path.
    pub seed: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorConfig {
    pub cooldown_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatusLogConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub soil_dry_below: f64,
    pub soil_moderate_below: f64,
    pub tank_low_below: f64,
    pub temperature_cold_below: f64,
    pub temperature_hot_above: f64,
    pub humidity_dry_below: f64,
    pub humidity_humid_above: f64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            dashboard_name: "Agri-Bot".to_string(),
            enable_logging: true,
            logging: LoggingConfig::default(),
            actuators: ActuatorConfig::default(),
            status_log: StatusLogConfig::default(),
            classifier: ClassifierConfig::default(),
            seed: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self { cooldown_ms: 1000 }
    }
}

impl Default for StatusLogConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_LOG_CAPACITY }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            soil_dry_below: 30.0,
            soil_moderate_below: 60.0,
            tank_low_below: 20.0,
            temperature_cold_below: 15.0,
            temperature_hot_above: 30.0,
            humidity_dry_below: 40.0,
            humidity_humid_above: 70.0,
        }
    }
}

impl DashboardConfig {
    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: DashboardConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.actuators.cooldown_ms)
    }

    /// Seed values converted to store payloads.
    pub fn seed_values(&self) -> Result<Vec<(String, Value)>, serde_json::Error> {
        self.seed
            .iter()
            .map(|(path, value)| Ok((path.clone(), serde_json::to_value(value)?)))
            .collect()
    }
}

pub fn load_config(path: &str) -> Result<DashboardConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    DashboardConfig::parse(&content)
}

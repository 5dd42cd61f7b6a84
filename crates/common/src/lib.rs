use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod memory_store;
pub mod metrics;
pub mod status_log;
pub mod store;

pub use classifier::{Bands, Category};
pub use config::DashboardConfig;
pub use diagnostics::SharedDiagnostics;
pub use memory_store::MemoryStore;
pub use metrics::{CommandRecord, CommandRecorder};
pub use status_log::{StatusChangeLog, StatusLogEntry};
pub use store::{Notification, RemoteStore, StoreError, Subscription, SubscriptionId};

/// Store paths the dashboard reads and writes.
pub mod paths {
    pub const SOIL_SENSOR_1: &str = "soil/sensor1_percent";
    pub const SOIL_SENSOR_2: &str = "soil/sensor2_percent";
    pub const SOIL_PUMP_1: &str = "soil/pump1";
    pub const SOIL_PUMP_2: &str = "soil/pump2";
    pub const WEATHER_TEMPERATURE: &str = "weather/temperature";
    pub const WEATHER_HUMIDITY: &str = "weather/humidity";
    pub const LIGHT_STATE: &str = "light/state";
    pub const TANK_LEVEL: &str = "tank/level_percent";
    pub const TANK_PUMP: &str = "tank/pump";
    pub const LAST_MOTION: &str = "security/last_motion_time";
}

/// A locally mirrored remote value: either never observed (or lost) or present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteValue<T> {
    Unknown,
    Present(T),
}

impl<T> Default for RemoteValue<T> {
    fn default() -> Self {
        RemoteValue::Unknown
    }
}

impl<T> RemoteValue<T> {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RemoteValue::Unknown)
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            RemoteValue::Present(v) => Some(v),
            RemoteValue::Unknown => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteValue<U> {
        match self {
            RemoteValue::Present(v) => RemoteValue::Present(f(v)),
            RemoteValue::Unknown => RemoteValue::Unknown,
        }
    }
}

impl<T> From<Option<T>> for RemoteValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => RemoteValue::Present(v),
            None => RemoteValue::Unknown,
        }
    }
}

/// Enumerated reading published on `light/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightState {
    Dark,
    Bright,
}

/// Conversion from a raw store payload into a typed reading.
///
/// Returning `None` means the payload is not a valid reading of this type;
/// mirrors treat that exactly like an absent value.
pub trait Decode: Sized + Send + Sync + 'static {
    fn decode(raw: &Value) -> Option<Self>;
}

impl Decode for bool {
    fn decode(raw: &Value) -> Option<Self> {
        raw.as_bool()
    }
}

impl Decode for f64 {
    fn decode(raw: &Value) -> Option<Self> {
        let number = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        number.is_finite().then_some(number)
    }
}

impl Decode for String {
    fn decode(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Decode for LightState {
    fn decode(raw: &Value) -> Option<Self> {
        match raw.as_str()? {
            "DARK" => Some(LightState::Dark),
            "BRIGHT" => Some(LightState::Bright),
            _ => None,
        }
    }
}

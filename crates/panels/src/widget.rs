//! Per-panel view models.
//!
//! Every panel on the dashboard is the same composition: a few mirrored
//! paths, a classifier per path, optionally a controller per actuated path,
//! optionally a change log. Panels are therefore declared as [`WidgetSpec`]
//! data and mounted by one [`WidgetViewModel`] implementation.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use common::classifier::{
    classify_light, classify_motion, classify_pump_group, classify_switch, gauge_fill,
    round_one_decimal, SwitchWording,
};
use common::config::ClassifierConfig;
use common::{
    paths, Bands, Category, Decode, LightState, RemoteStore, RemoteValue, SharedDiagnostics,
    StatusChangeLog, StatusLogEntry,
};

use crate::actuator::{ActuatorCommandState, ActuatorController, ToggleRequest};
use crate::mirror::{Observer, RemoteValueMirror};
use crate::registry::ControllerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelKind {
    SoilMoisture,
    TankLevel,
    Temperature,
    Humidity,
    Pump,
    Light,
    Motion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub entity_key: &'static str,
    pub label: &'static str,
    pub path: &'static str,
    pub kind: ChannelKind,
    pub actuated: bool,
}

impl ChannelSpec {
    const fn sensor(
        entity_key: &'static str,
        label: &'static str,
        path: &'static str,
        kind: ChannelKind,
    ) -> Self {
        Self { entity_key, label, path, kind, actuated: false }
    }

    const fn pump(entity_key: &'static str, label: &'static str, path: &'static str) -> Self {
        Self { entity_key, label, path, kind: ChannelKind::Pump, actuated: true }
    }
}

/// Which category a panel shows in its header badge.
#[derive(Debug, Clone, PartialEq)]
pub enum Headline {
    None,
    Channel(&'static str),
    PumpGroup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub channels: Vec<ChannelSpec>,
    pub track_changes: bool,
    pub headline: Headline,
}

impl WidgetSpec {
    pub fn soil_moisture() -> Self {
        Self {
            name: "soil",
            title: "Soil Moistures",
            channels: vec![
                ChannelSpec::sensor(
                    "sensor1",
                    "Soil Moisture 1",
                    paths::SOIL_SENSOR_1,
                    ChannelKind::SoilMoisture,
                ),
                ChannelSpec::sensor(
                    "sensor2",
                    "Soil Moisture 2",
                    paths::SOIL_SENSOR_2,
                    ChannelKind::SoilMoisture,
                ),
            ],
            track_changes: true,
            headline: Headline::None,
        }
    }

    pub fn irrigation() -> Self {
        Self {
            name: "irrigation",
            title: "Water Pumps",
            channels: vec![
                ChannelSpec::pump("pump1", "Pump 1", paths::SOIL_PUMP_1),
                ChannelSpec::pump("pump2", "Pump 2", paths::SOIL_PUMP_2),
            ],
            track_changes: true,
            headline: Headline::PumpGroup,
        }
    }

    pub fn tank() -> Self {
        Self {
            name: "tank",
            title: "Water Tank",
            channels: vec![
                ChannelSpec::sensor(
                    "tank_level",
                    "Tank Level",
                    paths::TANK_LEVEL,
                    ChannelKind::TankLevel,
                ),
                ChannelSpec::pump("tank_pump", "Tank Pump", paths::TANK_PUMP),
            ],
            track_changes: true,
            headline: Headline::Channel("tank_level"),
        }
    }

    pub fn light() -> Self {
        Self {
            name: "light",
            title: "Light Sensor",
            channels: vec![ChannelSpec::sensor(
                "light",
                "Light",
                paths::LIGHT_STATE,
                ChannelKind::Light,
            )],
            track_changes: true,
            headline: Headline::Channel("light"),
        }
    }

    pub fn security() -> Self {
        Self {
            name: "security",
            title: "Security System",
            channels: vec![ChannelSpec::sensor(
                "motion",
                "Last Motion",
                paths::LAST_MOTION,
                ChannelKind::Motion,
            )],
            track_changes: true,
            headline: Headline::Channel("motion"),
        }
    }

    pub fn weather() -> Self {
        Self {
            name: "weather",
            title: "Weather",
            channels: vec![
                ChannelSpec::sensor(
                    "temperature",
                    "Temperature",
                    paths::WEATHER_TEMPERATURE,
                    ChannelKind::Temperature,
                ),
                ChannelSpec::sensor(
                    "humidity",
                    "Humidity",
                    paths::WEATHER_HUMIDITY,
                    ChannelKind::Humidity,
                ),
            ],
            track_changes: false,
            headline: Headline::None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::soil_moisture(),
            Self::irrigation(),
            Self::tank(),
            Self::light(),
            Self::security(),
            Self::weather(),
        ]
    }
}

/// Everything a panel needs at mount time. Cheap to clone.
#[derive(Clone)]
pub struct PanelContext {
    pub store: Arc<dyn RemoteStore>,
    pub registry: ControllerRegistry,
    pub diagnostics: Arc<SharedDiagnostics>,
    pub classifier: ClassifierConfig,
    pub log_capacity: usize,
}

enum ChannelMirror {
    Numeric(RemoteValueMirror<f64>, Bands),
    Switch(RemoteValueMirror<bool>),
    Light(RemoteValueMirror<LightState>),
    Motion(RemoteValueMirror<String>),
}

impl ChannelMirror {
    fn release(&self) {
        match self {
            ChannelMirror::Numeric(m, _) => m.release(),
            ChannelMirror::Switch(m) => m.release(),
            ChannelMirror::Light(m) => m.release(),
            ChannelMirror::Motion(m) => m.release(),
        }
    }
}

struct Channel {
    spec: ChannelSpec,
    mirror: ChannelMirror,
    controller: Option<ActuatorController>,
}

impl Channel {
    fn category(&self) -> Category {
        match &self.mirror {
            ChannelMirror::Numeric(m, bands) => bands.classify(&m.current()),
            ChannelMirror::Switch(m) => classify_switch(&m.current(), SwitchWording::OnOff),
            ChannelMirror::Light(m) => classify_light(&m.current()),
            ChannelMirror::Motion(m) => classify_motion(&m.current()),
        }
    }

    fn display_value(&self) -> String {
        const MISSING: &str = "--";
        match &self.mirror {
            ChannelMirror::Numeric(m, _) => match (m.current(), self.spec.kind) {
                (RemoteValue::Unknown, _) => MISSING.to_string(),
                (RemoteValue::Present(v), ChannelKind::Temperature) => {
                    format!("{:.1}°C", round_one_decimal(v))
                }
                (RemoteValue::Present(v), ChannelKind::Humidity) => {
                    format!("{:.1}%", round_one_decimal(v))
                }
                (RemoteValue::Present(v), _) => format!("{}%", v),
            },
            ChannelMirror::Switch(m) => match m.current() {
                RemoteValue::Present(true) => "ON".to_string(),
                RemoteValue::Present(false) => "OFF".to_string(),
                RemoteValue::Unknown => MISSING.to_string(),
            },
            ChannelMirror::Light(m) => match m.current() {
                RemoteValue::Present(LightState::Dark) => "DARK".to_string(),
                RemoteValue::Present(LightState::Bright) => "BRIGHT".to_string(),
                RemoteValue::Unknown => MISSING.to_string(),
            },
            ChannelMirror::Motion(m) => match m.current() {
                RemoteValue::Present(at) => at,
                RemoteValue::Unknown => MISSING.to_string(),
            },
        }
    }

    fn gauge(&self) -> Option<f64> {
        match (&self.mirror, self.spec.kind) {
            (ChannelMirror::Numeric(m, _), ChannelKind::SoilMoisture | ChannelKind::TankLevel) => {
                Some(gauge_fill(&m.current()))
            }
            _ => None,
        }
    }

    fn snapshot(&self) -> ChannelSnapshot {
        let category = self.category();
        ChannelSnapshot {
            entity_key: self.spec.entity_key.to_string(),
            label: self.spec.label.to_string(),
            path: self.spec.path.to_string(),
            value: self.display_value(),
            category,
            alert: category.is_alert(),
            gauge: self.gauge(),
            command_state: self.controller.as_ref().map(|c| c.state()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub entity_key: String,
    pub label: String,
    pub path: String,
    pub value: String,
    pub category: Category,
    pub alert: bool,
    pub gauge: Option<f64>,
    pub command_state: Option<ActuatorCommandState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSnapshot {
    pub name: String,
    pub title: String,
    pub headline: Option<Category>,
    pub channels: Vec<ChannelSnapshot>,
    pub log: Vec<StatusLogEntry>,
}

impl WidgetSnapshot {
    pub fn channel(&self, entity_key: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.entity_key == entity_key)
    }
}

/// Mounted state of one panel. Dropping it (or calling [`unmount`]) releases
/// every subscription it holds; commands already in flight keep running.
///
/// [`unmount`]: WidgetViewModel::unmount
pub struct WidgetViewModel {
    spec: WidgetSpec,
    channels: Vec<Channel>,
    log: Option<StatusChangeLog>,
}

impl WidgetViewModel {
    pub fn mount(spec: WidgetSpec, ctx: &PanelContext) -> Self {
        let log = spec.track_changes.then(|| StatusChangeLog::new(ctx.log_capacity));

        let channels = spec
            .channels
            .iter()
            .map(|channel| mount_channel(channel, ctx, log.as_ref()))
            .collect();

        debug!(widget = spec.name, "widget mounted");
        Self { spec, channels, log }
    }

    pub fn name(&self) -> &str {
        self.spec.name
    }

    pub fn title(&self) -> &str {
        self.spec.title
    }

    pub fn log(&self) -> Option<&StatusChangeLog> {
        self.log.as_ref()
    }

    pub fn entity_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.channels.iter().map(|c| c.spec.entity_key)
    }

    pub fn actuated_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.channels
            .iter()
            .filter(|c| c.controller.is_some())
            .map(|c| c.spec.entity_key)
    }

    fn channel(&self, entity_key: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.spec.entity_key == entity_key)
    }

    pub fn numeric(&self, entity_key: &str) -> Option<RemoteValue<f64>> {
        match &self.channel(entity_key)?.mirror {
            ChannelMirror::Numeric(m, _) => Some(m.current()),
            _ => None,
        }
    }

    pub fn switch(&self, entity_key: &str) -> Option<RemoteValue<bool>> {
        match &self.channel(entity_key)?.mirror {
            ChannelMirror::Switch(m) => Some(m.current()),
            _ => None,
        }
    }

    pub fn light(&self, entity_key: &str) -> Option<RemoteValue<LightState>> {
        match &self.channel(entity_key)?.mirror {
            ChannelMirror::Light(m) => Some(m.current()),
            _ => None,
        }
    }

    pub fn motion(&self, entity_key: &str) -> Option<RemoteValue<String>> {
        match &self.channel(entity_key)?.mirror {
            ChannelMirror::Motion(m) => Some(m.current()),
            _ => None,
        }
    }

    pub fn category(&self, entity_key: &str) -> Option<Category> {
        self.channel(entity_key).map(Channel::category)
    }

    pub fn command_state(&self, entity_key: &str) -> Option<ActuatorCommandState> {
        self.channel(entity_key)?.controller.as_ref().map(|c| c.state())
    }

    pub fn headline(&self) -> Option<Category> {
        match &self.spec.headline {
            Headline::None => None,
            Headline::Channel(key) => self.category(key),
            Headline::PumpGroup => {
                let readings: Vec<RemoteValue<bool>> = self
                    .channels
                    .iter()
                    .filter_map(|c| match &c.mirror {
                        ChannelMirror::Switch(m) => Some(m.current()),
                        _ => None,
                    })
                    .collect();
                Some(classify_pump_group(&readings))
            }
        }
    }

    /// Forwards to the controller owning the channel's path. `None` if the
    /// channel does not exist or is not actuated.
    pub fn toggle(&self, entity_key: &str) -> Option<ToggleRequest> {
        self.channel(entity_key)?.controller.as_ref().map(|c| c.toggle())
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            name: self.spec.name.to_string(),
            title: self.spec.title.to_string(),
            headline: self.headline(),
            channels: self.channels.iter().map(Channel::snapshot).collect(),
            log: self.log.as_ref().map(|l| l.entries()).unwrap_or_default(),
        }
    }

    pub fn unmount(self) {
        for channel in &self.channels {
            channel.mirror.release();
        }
        debug!(widget = self.spec.name, "widget unmounted");
    }
}

fn mount_channel(spec: &ChannelSpec, ctx: &PanelContext, log: Option<&StatusChangeLog>) -> Channel {
    let mirror = match spec.kind {
        ChannelKind::SoilMoisture
        | ChannelKind::TankLevel
        | ChannelKind::Temperature
        | ChannelKind::Humidity => {
            let bands = match spec.kind {
                ChannelKind::SoilMoisture => Bands::soil_moisture(&ctx.classifier),
                ChannelKind::TankLevel => Bands::tank_level(&ctx.classifier),
                ChannelKind::Temperature => Bands::temperature(&ctx.classifier),
                _ => Bands::humidity(&ctx.classifier),
            };
            let classify = bands.clone();
            let mirror = bind_tracked(spec, ctx, log, move |v: &RemoteValue<f64>| {
                classify.classify(v)
            });
            ChannelMirror::Numeric(mirror, bands)
        }
        ChannelKind::Pump => ChannelMirror::Switch(bind_tracked(spec, ctx, log, |v| {
            classify_switch(v, SwitchWording::OnOff)
        })),
        ChannelKind::Light => ChannelMirror::Light(bind_tracked(spec, ctx, log, classify_light)),
        ChannelKind::Motion => ChannelMirror::Motion(bind_tracked(spec, ctx, log, classify_motion)),
    };

    let controller = spec.actuated.then(|| ctx.registry.controller_for(spec.path));

    Channel {
        spec: spec.clone(),
        mirror,
        controller,
    }
}

/// Binds a mirror whose category changes are offered to the log.
///
/// The mirror starts out Unknown, so a first notification that still
/// classifies as Unknown is not a transition and is not logged.
fn bind_tracked<T, F>(
    spec: &ChannelSpec,
    ctx: &PanelContext,
    log: Option<&StatusChangeLog>,
    classify: F,
) -> RemoteValueMirror<T>
where
    T: Decode + Clone,
    F: Fn(&RemoteValue<T>) -> Category + Send + Sync + 'static,
{
    let observer = log.cloned().map(|log| {
        let entity_key = spec.entity_key;
        let shown = Mutex::new(classify(&RemoteValue::Unknown));
        let observer: Observer<T> = Arc::new(move |value: &RemoteValue<T>| {
            let category = classify(value);
            {
                let mut shown = shown.lock().unwrap_or_else(PoisonError::into_inner);
                if *shown == category {
                    return;
                }
                *shown = category;
            }
            if let Some(entry) = log.record(entity_key, category.label()) {
                debug!(
                    entity = entity_key,
                    status = %entry.rendered_status,
                    "status change logged"
                );
            }
        });
        observer
    });

    RemoteValueMirror::bind_with_observer(
        Arc::clone(&ctx.store),
        spec.path,
        Arc::clone(&ctx.diagnostics),
        observer,
    )
}

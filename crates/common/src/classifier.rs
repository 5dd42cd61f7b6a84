//! Pure mapping from mirrored readings to the categories every panel shows.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::{LightState, RemoteValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Unknown,
    NoData,
    Dry,
    Moderate,
    Hydrated,
    LowLevel,
    Normal,
    Cold,
    Optimal,
    Hot,
    DryAir,
    Comfortable,
    Humid,
    On,
    Off,
    Active,
    Inactive,
    Dark,
    Bright,
    MotionDetected,
    NoMotionData,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Unknown => "Unknown",
            Category::NoData => "No Data",
            Category::Dry => "Dry - Needs Water",
            Category::Moderate => "Moderate",
            Category::Hydrated => "Well Hydrated",
            Category::LowLevel => "Low Level",
            Category::Normal => "Normal",
            Category::Cold => "Cold",
            Category::Optimal => "Optimal",
            Category::Hot => "Hot",
            Category::DryAir => "Dry",
            Category::Comfortable => "Comfortable",
            Category::Humid => "Humid",
            Category::On => "ON",
            Category::Off => "OFF",
            Category::Active => "Active",
            Category::Inactive => "Inactive",
            Category::Dark => "Dark",
            Category::Bright => "Bright",
            Category::MotionDetected => "Motion Detected",
            Category::NoMotionData => "No Motion Data",
        }
    }

    /// True for the categories a panel should raise as an alert.
    pub fn is_alert(&self) -> bool {
        matches!(self, Category::Dry | Category::LowLevel | Category::MotionDetected)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Below(f64),
    AtMost(f64),
}

impl Bound {
    fn contains(&self, value: f64) -> bool {
        match *self {
            Bound::Below(limit) => value < limit,
            Bound::AtMost(limit) => value <= limit,
        }
    }
}

/// Ascending numeric bands: the first bound that admits the value wins,
/// `rest` covers everything above the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    unknown: Category,
    steps: Vec<(Bound, Category)>,
    rest: Category,
}

impl Bands {
    pub fn new(unknown: Category, steps: Vec<(Bound, Category)>, rest: Category) -> Self {
        Self { unknown, steps, rest }
    }

    pub fn soil_moisture(config: &ClassifierConfig) -> Self {
        Self::new(
            Category::NoData,
            vec![
                (Bound::Below(config.soil_dry_below), Category::Dry),
                (Bound::Below(config.soil_moderate_below), Category::Moderate),
            ],
            Category::Hydrated,
        )
    }

    pub fn tank_level(config: &ClassifierConfig) -> Self {
        Self::new(
            Category::Unknown,
            vec![(Bound::Below(config.tank_low_below), Category::LowLevel)],
            Category::Normal,
        )
    }

    pub fn temperature(config: &ClassifierConfig) -> Self {
        Self::new(
            Category::NoData,
            vec![
                (Bound::Below(config.temperature_cold_below), Category::Cold),
                (Bound::AtMost(config.temperature_hot_above), Category::Optimal),
            ],
            Category::Hot,
        )
    }

    pub fn humidity(config: &ClassifierConfig) -> Self {
        Self::new(
            Category::NoData,
            vec![
                (Bound::Below(config.humidity_dry_below), Category::DryAir),
                (Bound::AtMost(config.humidity_humid_above), Category::Comfortable),
            ],
            Category::Humid,
        )
    }

    pub fn classify(&self, reading: &RemoteValue<f64>) -> Category {
        let value = match reading {
            RemoteValue::Unknown => return self.unknown,
            RemoteValue::Present(v) => *v,
        };
        self.steps
            .iter()
            .find(|(bound, _)| bound.contains(value))
            .map(|(_, category)| *category)
            .unwrap_or(self.rest)
    }
}

/// Wording used for a boolean channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchWording {
    OnOff,
    ActiveInactive,
}

pub fn classify_switch(reading: &RemoteValue<bool>, wording: SwitchWording) -> Category {
    match (reading, wording) {
        (RemoteValue::Unknown, _) => Category::Unknown,
        (RemoteValue::Present(true), SwitchWording::OnOff) => Category::On,
        (RemoteValue::Present(false), SwitchWording::OnOff) => Category::Off,
        (RemoteValue::Present(true), SwitchWording::ActiveInactive) => Category::Active,
        (RemoteValue::Present(false), SwitchWording::ActiveInactive) => Category::Inactive,
    }
}

/// Headline for a group of pumps: unknown only when every pump is unknown.
pub fn classify_pump_group<'a, I>(readings: I) -> Category
where
    I: IntoIterator<Item = &'a RemoteValue<bool>>,
{
    let mut any_known = false;
    for reading in readings {
        match reading {
            RemoteValue::Present(true) => return Category::Active,
            RemoteValue::Present(false) => any_known = true,
            RemoteValue::Unknown => {}
        }
    }
    if any_known {
        Category::Inactive
    } else {
        Category::Unknown
    }
}

pub fn classify_light(reading: &RemoteValue<LightState>) -> Category {
    match reading {
        RemoteValue::Unknown => Category::Unknown,
        RemoteValue::Present(LightState::Dark) => Category::Dark,
        RemoteValue::Present(LightState::Bright) => Category::Bright,
    }
}

pub fn classify_motion(reading: &RemoteValue<String>) -> Category {
    match reading {
        RemoteValue::Unknown => Category::NoMotionData,
        RemoteValue::Present(_) => Category::MotionDetected,
    }
}

/// Fill fraction for a 0–100 gauge; unknown readings draw an empty gauge.
pub fn gauge_fill(reading: &RemoteValue<f64>) -> f64 {
    match reading {
        RemoteValue::Present(v) => v.clamp(0.0, 100.0) / 100.0,
        RemoteValue::Unknown => 0.0,
    }
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present(v: f64) -> RemoteValue<f64> {
        RemoteValue::Present(v)
    }

    #[test]
    fn soil_boundaries_are_inclusive_on_the_low_side() {
        let bands = Bands::soil_moisture(&ClassifierConfig::default());
        assert_eq!(bands.classify(&present(29.0)), Category::Dry);
        assert_eq!(bands.classify(&present(30.0)), Category::Moderate);
        assert_eq!(bands.classify(&present(59.9)), Category::Moderate);
        assert_eq!(bands.classify(&present(60.0)), Category::Hydrated);
        assert_eq!(bands.classify(&present(0.0)), Category::Dry);
        assert_eq!(bands.classify(&RemoteValue::Unknown), Category::NoData);
    }

    #[test]
    fn classification_is_repeatable() {
        let bands = Bands::soil_moisture(&ClassifierConfig::default());
        let first = bands.classify(&present(30.0));
        for _ in 0..100 {
            assert_eq!(bands.classify(&present(30.0)), first);
        }
    }

    #[test]
    fn temperature_upper_bound_is_inclusive() {
        let bands = Bands::temperature(&ClassifierConfig::default());
        assert_eq!(bands.classify(&present(14.9)), Category::Cold);
        assert_eq!(bands.classify(&present(15.0)), Category::Optimal);
        assert_eq!(bands.classify(&present(30.0)), Category::Optimal);
        assert_eq!(bands.classify(&present(30.1)), Category::Hot);
    }

    #[test]
    fn humidity_and_tank_bands() {
        let config = ClassifierConfig::default();
        let humidity = Bands::humidity(&config);
        assert_eq!(humidity.classify(&present(39.0)), Category::DryAir);
        assert_eq!(humidity.classify(&present(70.0)), Category::Comfortable);
        assert_eq!(humidity.classify(&present(71.0)), Category::Humid);

        let tank = Bands::tank_level(&config);
        assert_eq!(tank.classify(&present(19.0)), Category::LowLevel);
        assert_eq!(tank.classify(&present(20.0)), Category::Normal);
        assert_eq!(tank.classify(&RemoteValue::Unknown), Category::Unknown);
    }

    #[test]
    fn switches() {
        assert_eq!(classify_switch(&RemoteValue::Unknown, SwitchWording::OnOff), Category::Unknown);
        assert_eq!(
            classify_switch(&RemoteValue::Present(false), SwitchWording::OnOff),
            Category::Off
        );
        assert_eq!(
            classify_switch(&RemoteValue::Present(true), SwitchWording::ActiveInactive),
            Category::Active
        );
    }

    #[test]
    fn pump_group_is_unknown_only_when_all_are_unknown() {
        let unknown = RemoteValue::Unknown;
        let off = RemoteValue::Present(false);
        let on = RemoteValue::Present(true);
        assert_eq!(classify_pump_group([&unknown, &unknown]), Category::Unknown);
        assert_eq!(classify_pump_group([&unknown, &off]), Category::Inactive);
        assert_eq!(classify_pump_group([&off, &on]), Category::Active);
    }

    #[test]
    fn gauge_is_clamped() {
        assert_eq!(gauge_fill(&present(140.0)), 1.0);
        assert_eq!(gauge_fill(&present(-5.0)), 0.0);
        assert_eq!(gauge_fill(&present(45.0)), 0.45);
        assert_eq!(round_one_decimal(23.46), 23.5);
    }
}

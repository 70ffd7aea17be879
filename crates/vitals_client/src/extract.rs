//! Wearable metric bundle and typed extraction of the vitals sent with each sync.
//!
//! The Fitbit responses for skin temperature, breathing rate and SpO2 are not
//! shape-stable: depending on endpoint variant and account, the reading arrives
//! as a dated series, a single object or a bare array. Each metric is therefore
//! modelled as an untagged enum whose variants are the known shapes, declared in
//! the order they should be tried. Anything that matches none of them yields `None`.
//! Series are kept as raw entries and only the first one is decoded, so a
//! malformed later day never hides the current reading.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::one_decimal;

/// Raw responses from one bundle fetch, kept opaque.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WearableMetrics {
    pub profile: Value,
    pub steps: Value,
    pub heart: Value,
    pub sleep: Value,
    pub temperature: Value,
    pub skin_temperature: Value,
    pub oxygen_saturation: Value,
    pub breathing_rate: Value,
}

/// Vitals forwarded to the sync server, one decimal place each.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WearableVitals {
    pub skin_temperature: Option<String>,
    pub breathing_rate: Option<String>,
    pub oxygen_saturation: Option<String>,
}

impl WearableVitals {
    pub fn from_metrics(metrics: &WearableMetrics) -> Self {
        Self {
            skin_temperature: extract_skin_temperature(metrics).map(one_decimal),
            breathing_rate: extract_breathing_rate(metrics).map(one_decimal),
            oxygen_saturation: extract_spo2(metrics).map(one_decimal),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.skin_temperature.is_none()
            && self.breathing_rate.is_none()
            && self.oxygen_saturation.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct Dated<T> {
    value: T,
}

/// Skin temperature is reported either in degrees or, for the nightly
/// endpoint, as a deviation from the personal baseline.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SkinReading {
    Degrees(f64),
    Relative {
        #[serde(rename = "nightlyRelative")]
        nightly_relative: f64,
    },
}

impl SkinReading {
    fn value(&self) -> f64 {
        match self {
            SkinReading::Degrees(v) => *v,
            SkinReading::Relative { nightly_relative } => *nightly_relative,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SkinTemperatureShape {
    /// `{"tempSkin": [{"dateTime": .., "value": ..}]}`
    Series {
        #[serde(rename = "tempSkin")]
        temp_skin: Vec<Value>,
    },
    /// `{"value": ..}`
    Single(Dated<SkinReading>),
    /// `[{"value": ..}]`
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct BreathingSummary {
    #[serde(rename = "breathingRate")]
    breathing_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BreathingRateShape {
    /// `{"br": [{"value": {"breathingRate": ..}}]}`
    Series { br: Vec<Value> },
    /// `{"value": {"breathingRate": ..}}`
    Single(Dated<BreathingSummary>),
    /// `{"value": 15.2}`
    Scalar(Dated<f64>),
    /// `[{"value": {"breathingRate": ..}}]`
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct Spo2Summary {
    avg: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Spo2Shape {
    /// `{"spo2": [{"value": {"avg": ..}}]}`
    Series { spo2: Vec<Value> },
    /// `{"value": {"avg": .., "min": .., "max": ..}}`, the documented daily summary
    Single(Dated<Spo2Summary>),
    /// `{"value": 96.5}`
    Scalar(Dated<f64>),
    /// `[{"value": {"avg": ..}}]`
    Bare(Vec<Value>),
}

fn parse<T: for<'de> Deserialize<'de>>(value: &Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    T::deserialize(value).ok()
}

fn first<T: for<'de> Deserialize<'de>>(entries: &[Value]) -> Option<Dated<T>> {
    parse(entries.first()?)
}

pub fn extract_skin_temperature(metrics: &WearableMetrics) -> Option<f64> {
    match parse::<SkinTemperatureShape>(&metrics.skin_temperature)? {
        SkinTemperatureShape::Series { temp_skin: entries } | SkinTemperatureShape::Bare(entries) => {
            first::<SkinReading>(&entries).map(|e| e.value.value())
        }
        SkinTemperatureShape::Single(entry) => Some(entry.value.value()),
    }
}

pub fn extract_breathing_rate(metrics: &WearableMetrics) -> Option<f64> {
    match parse::<BreathingRateShape>(&metrics.breathing_rate)? {
        BreathingRateShape::Series { br: entries } | BreathingRateShape::Bare(entries) => {
            first::<BreathingSummary>(&entries).map(|e| e.value.breathing_rate)
        }
        BreathingRateShape::Single(entry) => Some(entry.value.breathing_rate),
        BreathingRateShape::Scalar(entry) => Some(entry.value),
    }
}

pub fn extract_spo2(metrics: &WearableMetrics) -> Option<f64> {
    match parse::<Spo2Shape>(&metrics.oxygen_saturation)? {
        Spo2Shape::Series { spo2: entries } | Spo2Shape::Bare(entries) => {
            first::<Spo2Summary>(&entries).map(|e| e.value.avg)
        }
        Spo2Shape::Single(entry) => Some(entry.value.avg),
        Spo2Shape::Scalar(entry) => Some(entry.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_skin(v: Value) -> WearableMetrics {
        WearableMetrics {
            skin_temperature: v,
            ..Default::default()
        }
    }

    fn with_br(v: Value) -> WearableMetrics {
        WearableMetrics {
            breathing_rate: v,
            ..Default::default()
        }
    }

    fn with_spo2(v: Value) -> WearableMetrics {
        WearableMetrics {
            oxygen_saturation: v,
            ..Default::default()
        }
    }

    #[test]
    fn skin_temperature_shapes() {
        let series = json!({"tempSkin": [{"dateTime": "2025-06-01", "value": {"nightlyRelative": -0.4}}]});
        assert_eq!(extract_skin_temperature(&with_skin(series)), Some(-0.4));
        assert_eq!(extract_skin_temperature(&with_skin(json!({"value": 33.1}))), Some(33.1));
        assert_eq!(
            extract_skin_temperature(&with_skin(json!([{"value": 32.9}]))),
            Some(32.9)
        );
        assert_eq!(extract_skin_temperature(&with_skin(json!({"tempSkin": []}))), None);
        assert_eq!(extract_skin_temperature(&with_skin(json!({"other": 1}))), None);
        assert_eq!(extract_skin_temperature(&with_skin(Value::Null)), None);
    }

    #[test]
    fn breathing_rate_shapes_in_priority_order() {
        let series = json!({"br": [{"dateTime": "2025-06-01", "value": {"breathingRate": 14.8}}]});
        assert_eq!(extract_breathing_rate(&with_br(series)), Some(14.8));
        assert_eq!(
            extract_breathing_rate(&with_br(json!({"value": {"breathingRate": 15.0}}))),
            Some(15.0)
        );
        assert_eq!(extract_breathing_rate(&with_br(json!({"value": 16.2}))), Some(16.2));
        assert_eq!(
            extract_breathing_rate(&with_br(json!([{"value": {"breathingRate": 13.5}}]))),
            Some(13.5)
        );
        assert_eq!(extract_breathing_rate(&with_br(json!({"br": "n/a"}))), None);
    }

    #[test]
    fn spo2_shapes() {
        let daily = json!({"dateTime": "2025-06-01", "value": {"avg": 96.4, "min": 94.0, "max": 98.1}});
        assert_eq!(extract_spo2(&with_spo2(daily)), Some(96.4));
        assert_eq!(
            extract_spo2(&with_spo2(json!({"spo2": [{"value": {"avg": 95.0}}]}))),
            Some(95.0)
        );
        assert_eq!(extract_spo2(&with_spo2(json!({"value": 97}))), Some(97.0));
        assert_eq!(extract_spo2(&with_spo2(json!([]))), None);
    }

    #[test]
    fn series_reads_first_entry_despite_malformed_later_days() {
        let br = json!({"br": [{"value": {"breathingRate": 14.8}}, {"value": {}}]});
        assert_eq!(extract_breathing_rate(&with_br(br)), Some(14.8));

        let spo2 = json!({"spo2": [{"value": {"avg": 95.5}}, {"value": "pending"}]});
        assert_eq!(extract_spo2(&with_spo2(spo2)), Some(95.5));

        let skin = json!({"tempSkin": [{"value": {"nightlyRelative": 0.2}}, {"dateTime": "2025-06-02"}]});
        assert_eq!(extract_skin_temperature(&with_skin(skin)), Some(0.2));

        let bare = json!([{"value": {"breathingRate": 12.1}}, null]);
        assert_eq!(extract_breathing_rate(&with_br(bare)), Some(12.1));
    }

    #[test]
    fn malformed_first_series_entry_yields_none() {
        let br = json!({"br": [{"value": {}}, {"value": {"breathingRate": 14.8}}]});
        assert_eq!(extract_breathing_rate(&with_br(br)), None);
    }

    #[test]
    fn vitals_are_formatted_to_one_decimal() {
        let m = WearableMetrics {
            skin_temperature: json!({"value": 33.25}),
            breathing_rate: json!({"value": 15}),
            oxygen_saturation: Value::Null,
            ..Default::default()
        };
        let v = WearableVitals::from_metrics(&m);
        assert_eq!(v.skin_temperature.as_deref(), Some("33.3"));
        assert_eq!(v.breathing_rate.as_deref(), Some("15.0"));
        assert_eq!(v.oxygen_saturation, None);
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({"skinTemperature": "33.3", "breathingRate": "15.0", "oxygenSaturation": null})
        );
    }
}

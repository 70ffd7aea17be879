//! Raw record model shared by the device reader, the aggregator and the sync payload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::VitalsError;
use crate::utils::iso8601;

/// Catalog of record types read from the on-device health store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Steps,
    HeartRate,
    Distance,
    Weight,
    Height,
    Hydration,
    BloodPressure,
    BodyTemperature,
    RespiratoryRate,
    Vo2Max,
    BloodGlucose,
    OxygenSaturation,
    RestingHeartRate,
    SleepSession,
    TotalCaloriesBurned,
    ActiveCaloriesBurned,
}

impl RecordType {
    pub const ALL: [RecordType; 16] = [
        RecordType::ActiveCaloriesBurned,
        RecordType::Distance,
        RecordType::Steps,
        RecordType::HeartRate,
        RecordType::BloodPressure,
        RecordType::Weight,
        RecordType::Height,
        RecordType::Hydration,
        RecordType::BodyTemperature,
        RecordType::RespiratoryRate,
        RecordType::Vo2Max,
        RecordType::BloodGlucose,
        RecordType::OxygenSaturation,
        RecordType::RestingHeartRate,
        RecordType::SleepSession,
        RecordType::TotalCaloriesBurned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Steps => "Steps",
            RecordType::HeartRate => "HeartRate",
            RecordType::Distance => "Distance",
            RecordType::Weight => "Weight",
            RecordType::Height => "Height",
            RecordType::Hydration => "Hydration",
            RecordType::BloodPressure => "BloodPressure",
            RecordType::BodyTemperature => "BodyTemperature",
            RecordType::RespiratoryRate => "RespiratoryRate",
            RecordType::Vo2Max => "Vo2Max",
            RecordType::BloodGlucose => "BloodGlucose",
            RecordType::OxygenSaturation => "OxygenSaturation",
            RecordType::RestingHeartRate => "RestingHeartRate",
            RecordType::SleepSession => "SleepSession",
            RecordType::TotalCaloriesBurned => "TotalCaloriesBurned",
            RecordType::ActiveCaloriesBurned => "ActiveCaloriesBurned",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = VitalsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| VitalsError::InvalidInput(format!("unknown record type: {s}")))
    }
}

/// One sample or interval as returned by a data source.
///
/// The record is held as the source's JSON object and serialized back verbatim,
/// so timestamp keys and offsets reach the sync server exactly as read. The
/// timestamps are parsed once for ordering and duration math. Instantaneous
/// records from the device store carry `time` instead of `startTime`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct RawRecord {
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    fields: Map<String, Value>,
}

const START_KEYS: [&str; 2] = ["startTime", "time"];
const END_KEY: &str = "endTime";

fn parse_timestamp(key: &str, value: &Value) -> Result<DateTime<Utc>, VitalsError> {
    let text = value
        .as_str()
        .ok_or_else(|| VitalsError::InvalidInput(format!("{key} must be a string")))?;
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| VitalsError::InvalidInput(format!("{key} is not RFC 3339: {e}")))
}

impl TryFrom<Map<String, Value>> for RawRecord {
    type Error = VitalsError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let (key, raw) = START_KEYS
            .iter()
            .find_map(|key| fields.get(*key).map(|v| (*key, v)))
            .ok_or_else(|| VitalsError::InvalidInput("record has no startTime or time".into()))?;
        let start_time = parse_timestamp(key, raw)?;
        let end_time = match fields.get(END_KEY) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_timestamp(END_KEY, raw)?),
        };
        Ok(Self {
            start_time,
            end_time,
            fields,
        })
    }
}

impl From<RawRecord> for Map<String, Value> {
    fn from(record: RawRecord) -> Self {
        record.fields
    }
}

impl RawRecord {
    pub fn new(start_time: DateTime<Utc>, end_time: Option<DateTime<Utc>>) -> Self {
        let mut fields = Map::new();
        fields.insert("startTime".into(), Value::String(iso8601(start_time)));
        if let Some(end) = end_time {
            fields.insert(END_KEY.into(), Value::String(iso8601(end)));
        }
        Self {
            start_time,
            end_time,
            fields,
        }
    }

    /// Builder helper used by fallback datasets and tests. Timestamp keys are
    /// ignored when the value does not parse.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        if START_KEYS.contains(&key) {
            match parse_timestamp(key, &value) {
                Ok(ts) => self.start_time = ts,
                Err(_) => return self,
            }
            for other in START_KEYS {
                self.fields.remove(other);
            }
        } else if key == END_KEY {
            match parse_timestamp(key, &value) {
                Ok(ts) => self.end_time = Some(ts),
                Err(_) => return self,
            }
        }
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// The record as read, timestamps included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Read a numeric field by JSON pointer, e.g. `/energy/inKilocalories`.
    pub fn measure(&self, pointer: &str) -> Option<f64> {
        let rest = pointer.strip_prefix('/')?;
        let (head, tail) = match rest.split_once('/') {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };
        let root = self.fields.get(head)?;
        let value = match tail {
            Some(tail) => root.pointer(&format!("/{tail}"))?,
            None => root,
        };
        value.as_f64()
    }

    pub fn count(&self) -> Option<f64> {
        self.measure("/count")
    }

    /// BPM of the first heart-rate sample.
    pub fn first_sample_bpm(&self) -> Option<f64> {
        self.measure("/samples/0/beatsPerMinute")
    }

    pub fn meters(&self) -> Option<f64> {
        self.measure("/distance/inMeters")
    }

    pub fn kilocalories(&self) -> Option<f64> {
        self.measure("/energy/inKilocalories")
    }

    pub fn kilograms(&self) -> Option<f64> {
        self.measure("/weight/inKilograms")
    }

    pub fn milliliters(&self) -> Option<f64> {
        self.measure("/volume/inMilliliters")
    }

    pub fn systolic_mmhg(&self) -> Option<f64> {
        self.measure("/systolic/inMillimetersOfMercury")
    }

    /// Interval length in hours; zero when the record has no end.
    pub fn duration_hours(&self) -> f64 {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 3_600_000.0)
            .unwrap_or(0.0)
    }
}

/// Records grouped by type, each list in fetch order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawHealthDataset(BTreeMap<RecordType, Vec<RawRecord>>);

impl RawHealthDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store records for a type. Empty lists are dropped: absence means "no data".
    pub fn insert(&mut self, record_type: RecordType, records: Vec<RawRecord>) {
        if records.is_empty() {
            self.0.remove(&record_type);
        } else {
            self.0.insert(record_type, records);
        }
    }

    /// Records for a type, `None` when the type is absent or was stored empty.
    pub fn records(&self, record_type: RecordType) -> Option<&[RawRecord]> {
        self.0
            .get(&record_type)
            .map(Vec::as_slice)
            .filter(|r| !r.is_empty())
    }

    pub fn record_types(&self) -> impl Iterator<Item = RecordType> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(RecordType, Vec<RawRecord>)> for RawHealthDataset {
    fn from_iter<I: IntoIterator<Item = (RecordType, Vec<RawRecord>)>>(iter: I) -> Self {
        let mut ds = RawHealthDataset::new();
        for (t, records) in iter {
            ds.insert(t, records);
        }
        ds
    }
}

/// Trailing windows offered by the dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    pub fn span(self) -> Duration {
        match self {
            TimeRange::Day => Duration::hours(24),
            TimeRange::Week => Duration::days(7),
            TimeRange::Month => Duration::days(30),
        }
    }

    /// `[end - span, end]`.
    pub fn window_ending(self, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (end - self.span(), end)
    }
}

impl FromStr for TimeRange {
    type Err = VitalsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            other => Err(VitalsError::InvalidInput(format!(
                "unknown time range: {other} (expected 24h, 7d or 30d)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn record_deserializes_with_time_alias_and_keeps_fields() {
        let payload = json!({
            "time": "2025-06-01T07:00:00Z",
            "weight": {"inKilograms": 70.5},
            "metadata": {"id": "abc"}
        });
        let r: RawRecord = serde_json::from_value(payload).expect("record");
        assert_eq!(r.start_time(), ts(7));
        assert_eq!(r.end_time(), None);
        assert_eq!(r.kilograms(), Some(70.5));
        assert!(r.fields().contains_key("metadata"));
    }

    #[test]
    fn record_forwards_time_key_and_offset_unchanged() {
        let payload = json!({
            "time": "2025-06-01T07:00:00.123+02:00",
            "weight": {"inKilograms": 70.5}
        });
        let r: RawRecord = serde_json::from_value(payload.clone()).expect("record");
        assert_eq!(r.start_time(), ts(5) + Duration::milliseconds(123));
        assert_eq!(serde_json::to_value(&r).unwrap(), payload);
    }

    #[test]
    fn record_without_start_is_rejected() {
        let err = serde_json::from_value::<RawRecord>(json!({"count": 3})).unwrap_err();
        assert!(err.to_string().contains("startTime"));
        assert!(serde_json::from_value::<RawRecord>(json!({"startTime": "yesterday"})).is_err());
    }

    #[test]
    fn builder_timestamps_stay_in_sync_with_fields() {
        let r = RawRecord::new(ts(1), None).with("endTime", json!("2025-06-01T03:30:00Z"));
        assert_eq!(r.end_time(), Some(ts(3) + Duration::minutes(30)));
        assert_eq!(r.duration_hours(), 2.5);
        assert_eq!(r.fields()["startTime"], json!(iso8601(ts(1))));
    }

    #[test]
    fn first_sample_bpm_reads_nested_array() {
        let r = RawRecord::new(ts(1), Some(ts(2)))
            .with("samples", json!([{"time": "2025-06-01T01:00:00Z", "beatsPerMinute": 64}]));
        assert_eq!(r.first_sample_bpm(), Some(64.0));
        assert_eq!(RawRecord::new(ts(1), None).first_sample_bpm(), None);
    }

    #[test]
    fn duration_hours_handles_missing_end() {
        assert_eq!(RawRecord::new(ts(0), Some(ts(8))).duration_hours(), 8.0);
        assert_eq!(RawRecord::new(ts(0), None).duration_hours(), 0.0);
    }

    #[test]
    fn dataset_drops_empty_lists_and_serializes_by_name() {
        let mut ds = RawHealthDataset::new();
        ds.insert(RecordType::Steps, vec![RawRecord::new(ts(1), None).with("count", json!(10))]);
        ds.insert(RecordType::Hydration, vec![]);
        assert_eq!(ds.len(), 1);
        assert!(ds.records(RecordType::Hydration).is_none());

        let v = serde_json::to_value(&ds).unwrap();
        assert_eq!(v["Steps"][0]["count"], json!(10));
        assert!(v.get("Hydration").is_none());
    }

    #[test]
    fn record_type_round_trips_through_str() {
        for t in RecordType::ALL {
            assert_eq!(t.as_str().parse::<RecordType>().unwrap(), t);
        }
        assert!("Nutrition".parse::<RecordType>().is_err());
    }

    #[test]
    fn time_range_window() {
        let (start, end) = TimeRange::Week.window_ending(ts(12));
        assert_eq!(end - start, Duration::days(7));
        assert_eq!("30d".parse::<TimeRange>().unwrap(), TimeRange::Month);
        assert!("1y".parse::<TimeRange>().is_err());
    }
}

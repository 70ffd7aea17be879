//! Derive per-domain summary statistics from a [`RawHealthDataset`].
//!
//! Every function here is pure: the dataset is never reordered, so aggregating
//! the same input twice yields identical summaries. A domain appears in the
//! summary only when its source record type is present and non-empty.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::records::{RawHealthDataset, RawRecord, RecordType};
use crate::utils::{round_to, round_to_i64};

/// Difference in kilograms beyond which the weight trend is no longer stable.
const WEIGHT_TREND_THRESHOLD_KG: f64 = 0.5;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<StepsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<DistanceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<HeartRateSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<CaloriesSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_calories: Option<CaloriesSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<WeightSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water: Option<WaterSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<BloodPressureSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepsSummary {
    pub total: i64,
    pub latest: Option<i64>,
    pub average: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistanceSummary {
    /// Meters, two decimals.
    pub total: f64,
    pub latest: Option<f64>,
    pub average: i64,
}

/// `average`, `min` and `max` are `None` when any record lacks a sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HeartRateSummary {
    pub latest: Option<f64>,
    pub average: Option<i64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CaloriesSummary {
    pub total: i64,
    pub latest: Option<f64>,
    pub average: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WeightTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeightSummary {
    pub latest: Option<f64>,
    pub trend: WeightTrend,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SleepSummary {
    pub total_hours: f64,
    pub average_hours: f64,
    pub sessions: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WaterSummary {
    pub latest: Option<f64>,
    pub average: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BloodPressureSummary {
    pub latest: Option<f64>,
    pub average: i64,
}

/// Aggregate every known domain present in `data`.
pub fn aggregate(data: &RawHealthDataset) -> AggregatedSummary {
    AggregatedSummary {
        steps: data.records(RecordType::Steps).map(steps),
        distance: data.records(RecordType::Distance).map(distance),
        heart_rate: data.records(RecordType::HeartRate).map(heart_rate),
        calories: data.records(RecordType::TotalCaloriesBurned).map(calories),
        active_calories: data.records(RecordType::ActiveCaloriesBurned).map(calories),
        weight: data.records(RecordType::Weight).map(weight),
        sleep: data.records(RecordType::SleepSession).map(sleep),
        water: data.records(RecordType::Hydration).map(water),
        blood_pressure: data.records(RecordType::BloodPressure).map(blood_pressure),
    }
}

/// Record with the greatest start time; on ties the earliest in input order wins.
pub fn most_recent(records: &[RawRecord]) -> Option<&RawRecord> {
    records.iter().fold(None, |best: Option<&RawRecord>, r| match best {
        Some(b) if r.start_time() <= b.start_time() => Some(b),
        _ => Some(r),
    })
}

fn latest_of(records: &[RawRecord], value: impl Fn(&RawRecord) -> Option<f64>) -> Option<f64> {
    most_recent(records).and_then(value)
}

fn sum_of(records: &[RawRecord], value: impl Fn(&RawRecord) -> Option<f64>) -> f64 {
    records.iter().map(|r| value(r).unwrap_or(0.0)).sum()
}

fn steps(records: &[RawRecord]) -> StepsSummary {
    let total = sum_of(records, RawRecord::count);
    StepsSummary {
        total: round_to_i64(total),
        latest: latest_of(records, RawRecord::count).map(round_to_i64),
        average: round_to_i64(total / records.len() as f64),
    }
}

fn distance(records: &[RawRecord]) -> DistanceSummary {
    let total = sum_of(records, RawRecord::meters);
    DistanceSummary {
        total: round_to(total, 2),
        latest: latest_of(records, RawRecord::meters),
        average: round_to_i64(total / records.len() as f64),
    }
}

fn heart_rate(records: &[RawRecord]) -> HeartRateSummary {
    let latest = latest_of(records, RawRecord::first_sample_bpm);
    let rates: Option<Vec<f64>> = records.iter().map(RawRecord::first_sample_bpm).collect();
    let Some(rates) = rates else {
        tracing::debug!(
            records = records.len(),
            "heart rate record without samples; average/min/max unavailable"
        );
        return HeartRateSummary {
            latest,
            average: None,
            min: None,
            max: None,
        };
    };
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    HeartRateSummary {
        latest,
        average: Some(round_to_i64(mean)),
        min: rates.iter().copied().reduce(f64::min),
        max: rates.iter().copied().reduce(f64::max),
    }
}

fn calories(records: &[RawRecord]) -> CaloriesSummary {
    let total = round_to_i64(sum_of(records, RawRecord::kilocalories));
    CaloriesSummary {
        total,
        latest: latest_of(records, RawRecord::kilocalories),
        average: round_to_i64(total as f64 / records.len() as f64),
    }
}

fn weight(records: &[RawRecord]) -> WeightSummary {
    WeightSummary {
        latest: latest_of(records, RawRecord::kilograms),
        trend: weight_trend(records),
    }
}

/// Compare the earliest and the latest weigh-in. Stable sort keeps input order on ties.
pub fn weight_trend(records: &[RawRecord]) -> WeightTrend {
    if records.len() < 2 {
        return WeightTrend::Stable;
    }
    let mut by_time: Vec<&RawRecord> = records.iter().collect();
    by_time.sort_by_key(|r| r.start_time());

    let first = by_time.first().and_then(|r| r.kilograms());
    let last = by_time.last().and_then(|r| r.kilograms());
    match (first, last) {
        (Some(first), Some(last)) if last > first + WEIGHT_TREND_THRESHOLD_KG => {
            WeightTrend::Increasing
        }
        (Some(first), Some(last)) if last < first - WEIGHT_TREND_THRESHOLD_KG => {
            WeightTrend::Decreasing
        }
        _ => WeightTrend::Stable,
    }
}

fn sleep(records: &[RawRecord]) -> SleepSummary {
    let total_hours: f64 = records.iter().map(RawRecord::duration_hours).sum();
    SleepSummary {
        total_hours: round_to(total_hours, 1),
        average_hours: round_to(total_hours / records.len() as f64, 1),
        sessions: records.len(),
    }
}

fn water(records: &[RawRecord]) -> WaterSummary {
    let total = sum_of(records, RawRecord::milliliters);
    WaterSummary {
        latest: latest_of(records, RawRecord::milliliters),
        average: round_to_i64(total / records.len() as f64),
    }
}

fn blood_pressure(records: &[RawRecord]) -> BloodPressureSummary {
    let total = sum_of(records, RawRecord::systolic_mmhg);
    BloodPressureSummary {
        latest: latest_of(records, RawRecord::systolic_mmhg),
        average: round_to_i64(total / records.len() as f64),
    }
}

//! Composite 0-100 health score derived from an [`AggregatedSummary`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedSummary;
use crate::utils::round_half_up;

/// Returned when none of steps, heart rate or sleep is available.
pub const DEFAULT_SCORE: u8 = 75;
pub const DAILY_STEP_GOAL: f64 = 10_000.0;

const STEPS_WEIGHT: f64 = 40.0;

/// Average of the factor scores that are present.
///
/// Each present factor contributes its points to the numerator and one to the
/// divisor, so a missing factor neither helps nor hurts the result.
pub fn score(summary: &AggregatedSummary) -> u8 {
    let factors: Vec<f64> = [
        summary.steps.as_ref().map(|s| steps_factor(s.total as f64)),
        summary.heart_rate.as_ref().map(|h| heart_rate_factor(h.average)),
        summary.sleep.as_ref().map(|s| sleep_factor(s.average_hours)),
    ]
    .into_iter()
    .flatten()
    .collect();

    if factors.is_empty() {
        return DEFAULT_SCORE;
    }
    let mean = factors.iter().sum::<f64>() / factors.len() as f64;
    round_half_up(mean).clamp(0.0, 100.0) as u8
}

pub fn steps_factor(total: f64) -> f64 {
    (total / DAILY_STEP_GOAL).clamp(0.0, 1.0) * STEPS_WEIGHT
}

/// 30 inside 60-100 bpm, 20 within 10 bpm of that band, 10 otherwise or when unknown.
pub fn heart_rate_factor(average: Option<i64>) -> f64 {
    match average {
        Some(60..=100) => 30.0,
        Some(50..=59) | Some(101..=110) => 20.0,
        _ => 10.0,
    }
}

/// 30 for 7-9 hours, 20 within an hour of that band, 10 otherwise.
pub fn sleep_factor(average_hours: f64) -> f64 {
    if (7.0..=9.0).contains(&average_hours) {
        30.0
    } else if (6.0..=10.0).contains(&average_hours) {
        20.0
    } else {
        10.0
    }
}

/// Qualitative band shown next to the score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum HealthRating {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl HealthRating {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => HealthRating::Excellent,
            60..=79 => HealthRating::Good,
            40..=59 => HealthRating::Fair,
            _ => HealthRating::NeedsImprovement,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HealthRating::Excellent => "Excellent",
            HealthRating::Good => "Good",
            HealthRating::Fair => "Fair",
            HealthRating::NeedsImprovement => "Needs Improvement",
        }
    }
}

//! Numeric features derived from a student's score history.
//!
//! Every extractor is total: short histories produce sentinel values
//! (zero trend, zero improvement) instead of errors. Callers that need a
//! minimum history length enforce it themselves.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

use crate::models::{ScoreRecord, StudentHistory};

/// Number of most recent records used for the trend slope.
pub const TREND_WINDOW: usize = 3;
/// Record count treated as "fully engaged" for one reporting period.
pub const ENGAGEMENT_PERIOD: f64 = 30.0;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (no Bessel correction).
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn population_variance(values: &[f64]) -> f64 {
    population_std(values).powi(2)
}

/// Finite-difference slope over the last [`TREND_WINDOW`] scores; 0 when the
/// window is not full.
pub fn recent_trend(scores: &[f64]) -> f64 {
    let start = scores.len().saturating_sub(TREND_WINDOW);
    let window = &scores[start..];
    if window.len() < TREND_WINDOW {
        return 0.0;
    }
    (window[window.len() - 1] - window[0]) / window.len() as f64
}

/// `(mean(second half) - mean(first half)) / 100` over the chronological
/// history, split at the midpoint.
pub fn improvement_rate(history: &StudentHistory) -> f64 {
    let scores = history.scores();
    if scores.len() < 2 {
        return 0.0;
    }
    let (first, second) = scores.split_at(scores.len() / 2);
    (mean(second) - mean(first)) / 100.0
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> usize {
    values.collect::<HashSet<_>>().len()
}

/// Inputs of the performance regressor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceFeatures {
    pub mean: f64,
    pub std_dev: f64,
    pub trend: f64,
    pub topic_diversity: usize,
    pub assignment_type_diversity: usize,
}

impl PerformanceFeatures {
    pub const WIDTH: usize = 5;

    pub fn extract(history: &StudentHistory) -> Self {
        let scores = history.scores();
        let records = history.records();
        Self {
            mean: mean(&scores),
            std_dev: population_std(&scores),
            trend: recent_trend(&scores),
            topic_diversity: distinct(records.iter().map(|r| r.topic.as_str())),
            assignment_type_diversity: distinct(records.iter().map(|r| r.assignment_type.as_str())),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let row: [f64; Self::WIDTH] = [
            self.mean,
            self.std_dev,
            self.trend,
            self.topic_diversity as f64,
            self.assignment_type_diversity as f64,
        ];
        row.to_vec()
    }
}

/// Inputs of the risk classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskFeatures {
    pub mean: f64,
    pub std_dev: f64,
    pub trend: f64,
}

impl RiskFeatures {
    pub const WIDTH: usize = 3;

    pub fn extract(history: &StudentHistory) -> Self {
        let scores = history.scores();
        Self {
            mean: mean(&scores),
            std_dev: population_std(&scores),
            trend: recent_trend(&scores),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let row: [f64; Self::WIDTH] = [self.mean, self.std_dev, self.trend];
        row.to_vec()
    }
}

/// Inputs of the behavior classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorFeatures {
    pub mean: f64,
    /// `1 - std/100`; negative for very dispersed histories.
    pub consistency: f64,
    /// `count / 30`, uncapped.
    pub engagement: f64,
    pub improvement_rate: f64,
}

impl BehaviorFeatures {
    pub const WIDTH: usize = 4;

    pub fn extract(history: &StudentHistory) -> Self {
        let scores = history.scores();
        Self {
            mean: mean(&scores),
            consistency: 1.0 - population_std(&scores) / 100.0,
            engagement: scores.len() as f64 / ENGAGEMENT_PERIOD,
            improvement_rate: improvement_rate(history),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let row: [f64; Self::WIDTH] = [
            self.mean,
            self.consistency,
            self.engagement,
            self.improvement_rate,
        ];
        row.to_vec()
    }
}

/// Inputs of the grading regressor: coarse categorical identity of an
/// assessment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingFeatures {
    pub topic_code: u64,
    pub assignment_code: u64,
    pub weekday: u32,
    pub max_score: f64,
}

impl GradingFeatures {
    pub const WIDTH: usize = 4;

    pub fn new(topic: &str, assignment_type: &str, date: NaiveDate, max_score: f64) -> Self {
        Self {
            topic_code: stable_hash(topic) % 100,
            assignment_code: stable_hash(assignment_type) % 10,
            weekday: date.weekday().num_days_from_monday(),
            max_score,
        }
    }

    pub fn from_record(record: &ScoreRecord) -> Self {
        Self::new(
            &record.topic,
            &record.assignment_type,
            record.date,
            record.max_score,
        )
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let row: [f64; Self::WIDTH] = [
            self.topic_code as f64,
            self.assignment_code as f64,
            self.weekday as f64,
            self.max_score,
        ];
        row.to_vec()
    }
}

/// 64-bit FNV-1a. Stable across processes, unlike the std hasher.
pub fn stable_hash(value: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    value.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(scores: &[(&str, f64, u32, &str)]) -> StudentHistory {
        let records = scores
            .iter()
            .map(|(topic, score, day, kind)| {
                ScoreRecord::new(
                    *topic,
                    *score,
                    100.0,
                    NaiveDate::from_ymd_opt(2024, 1, *day).unwrap(),
                    *kind,
                )
                .unwrap()
            })
            .collect();
        StudentHistory::new("student1", records)
    }

    #[test]
    fn population_statistics() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        assert!((population_std(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn trend_uses_last_three_scores() {
        assert!((recent_trend(&[10.0, 60.0, 70.0, 90.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn short_histories_yield_sentinels() {
        let one = history(&[("Mathematics", 70.0, 1, "quiz")]);
        let features = PerformanceFeatures::extract(&one);
        assert_eq!(features.trend, 0.0);
        assert_eq!(improvement_rate(&one), 0.0);

        let two = history(&[("Mathematics", 70.0, 1, "quiz"), ("Physics", 90.0, 2, "exam")]);
        assert_eq!(RiskFeatures::extract(&two).trend, 0.0);
    }

    #[test]
    fn equal_dates_do_not_break_trend() {
        let same_day = history(&[("Mathematics", 40.0, 5, "quiz"), ("Mathematics", 90.0, 5, "quiz")]);
        let features = RiskFeatures::extract(&same_day);
        assert_eq!(features.trend, 0.0);
        assert!(features.trend.is_finite());
    }

    #[test]
    fn improvement_rate_splits_at_midpoint() {
        let h = history(&[
            ("Mathematics", 50.0, 1, "quiz"),
            ("Mathematics", 60.0, 2, "quiz"),
            ("Mathematics", 70.0, 3, "quiz"),
            ("Mathematics", 80.0, 4, "quiz"),
            ("Mathematics", 90.0, 5, "quiz"),
        ]);
        // first half [50, 60], second half [70, 80, 90]
        assert!((improvement_rate(&h) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn improvement_rate_with_two_records_uses_each_score() {
        let h = history(&[("Physics", 90.0, 2, "exam"), ("Physics", 60.0, 1, "exam")]);
        assert!((improvement_rate(&h) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn diversity_counts_distinct_categories() {
        let h = history(&[
            ("Mathematics", 85.0, 1, "quiz"),
            ("Mathematics", 78.0, 2, "exam"),
            ("Physics", 92.0, 3, "quiz"),
        ]);
        let features = PerformanceFeatures::extract(&h);
        assert_eq!(features.topic_diversity, 2);
        assert_eq!(features.assignment_type_diversity, 2);
        assert_eq!(features.to_vec().len(), PerformanceFeatures::WIDTH);
    }

    #[test]
    fn behavior_features_follow_definitions() {
        let h = history(&[
            ("Mathematics", 60.0, 1, "quiz"),
            ("Mathematics", 80.0, 2, "quiz"),
            ("Mathematics", 100.0, 3, "quiz"),
        ]);
        let features = BehaviorFeatures::extract(&h);
        let expected_std = (800.0_f64 / 3.0).sqrt();
        assert!((features.consistency - (1.0 - expected_std / 100.0)).abs() < 1e-12);
        assert!((features.engagement - 0.1).abs() < 1e-12);
        // first half [60], second half [80, 100]
        assert!((features.improvement_rate - 0.3).abs() < 1e-12);
    }

    #[test]
    fn grading_codes_are_stable_and_bounded() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(); // Monday
        let a = GradingFeatures::new("Mathematics", "quiz", date, 100.0);
        let b = GradingFeatures::new("Mathematics", "quiz", date, 100.0);
        assert_eq!(a, b);
        assert!(a.topic_code < 100);
        assert!(a.assignment_code < 10);
        assert_eq!(a.weekday, 0);
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
    }
}

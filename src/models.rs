use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{InsightError, Result};

pub const DEFAULT_MAX_SCORE: f64 = 100.0;

/// One assessment result. Scores are clamped into 0..=100 on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawScoreRecord")]
pub struct ScoreRecord {
    pub topic: String,
    pub score: f64,
    pub max_score: f64,
    pub date: NaiveDate,
    pub assignment_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScoreRecord {
    topic: String,
    score: f64,
    #[serde(default = "default_max_score")]
    max_score: f64,
    date: NaiveDate,
    #[serde(default = "default_assignment_type")]
    assignment_type: String,
}

fn default_max_score() -> f64 {
    DEFAULT_MAX_SCORE
}

fn default_assignment_type() -> String {
    "assignment".to_string()
}

impl TryFrom<RawScoreRecord> for ScoreRecord {
    type Error = InsightError;

    fn try_from(raw: RawScoreRecord) -> Result<Self> {
        ScoreRecord::new(
            raw.topic,
            raw.score,
            raw.max_score,
            raw.date,
            raw.assignment_type,
        )
    }
}

impl ScoreRecord {
    pub fn new(
        topic: impl Into<String>,
        score: f64,
        max_score: f64,
        date: NaiveDate,
        assignment_type: impl Into<String>,
    ) -> Result<Self> {
        if !score.is_finite() {
            return Err(InsightError::InvalidRecord(format!(
                "score must be a finite number, got {score}"
            )));
        }
        if !(max_score.is_finite() && max_score > 0.0) {
            return Err(InsightError::InvalidRecord(format!(
                "max score must be positive, got {max_score}"
            )));
        }

        Ok(Self {
            topic: topic.into(),
            score: score.clamp(0.0, 100.0),
            max_score,
            date,
            assignment_type: assignment_type.into(),
        })
    }
}

/// Score records of one student, kept in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentHistory {
    pub student_id: String,
    records: Vec<ScoreRecord>,
}

impl StudentHistory {
    pub fn new(student_id: impl Into<String>, mut records: Vec<ScoreRecord>) -> Self {
        // stable: same-day records keep submission order
        records.sort_by_key(|record| record.date);
        Self {
            student_id: student_id.into(),
            records,
        }
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.records.iter().map(|record| record.score).collect()
    }

    /// Scores grouped by topic, topics in order of first appearance.
    pub fn topic_scores(&self) -> Vec<(String, Vec<f64>)> {
        let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
        for record in &self.records {
            match groups.iter_mut().find(|(topic, _)| *topic == record.topic) {
                Some((_, scores)) => scores.push(record.score),
                None => groups.push((record.topic.clone(), vec![record.score])),
            }
        }
        groups
    }

    /// Mean score per topic, topics in order of first appearance.
    pub fn topic_averages(&self) -> Vec<(String, f64)> {
        self.topic_scores()
            .into_iter()
            .map(|(topic, scores)| {
                let avg = scores.iter().sum::<f64>() / scores.len() as f64;
                (topic, avg)
            })
            .collect()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.records.iter().any(|record| record.topic == topic)
    }
}

/// Parses `{ "student_id": [records...] }`, keeping the file's student order.
pub fn parse_training_set(json: &str) -> Result<Vec<StudentHistory>> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    let mut histories = Vec::with_capacity(object.len());

    for (student_id, value) in object {
        let records: Vec<ScoreRecord> = serde_json::from_value(value)?;
        histories.push(StudentHistory::new(student_id, records));
    }

    Ok(histories)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_mean(mean: f64) -> Self {
        if mean < 60.0 {
            RiskLevel::High
        } else if mean < 75.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn class_index(self) -> usize {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
        }
    }

    pub fn from_class_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RiskLevel::Low),
            1 => Some(RiskLevel::Medium),
            2 => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Learning styles emitted by the trained behavior classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorClass {
    ConsistentImprover,
    GradualImprover,
    StrugglingLearner,
}

impl BehaviorClass {
    pub const ALL: [BehaviorClass; 3] = [
        BehaviorClass::ConsistentImprover,
        BehaviorClass::GradualImprover,
        BehaviorClass::StrugglingLearner,
    ];

    pub fn from_features(improvement_rate: f64, consistency: f64) -> Self {
        if improvement_rate > 0.1 && consistency > 0.7 {
            BehaviorClass::ConsistentImprover
        } else if improvement_rate > 0.05 {
            BehaviorClass::GradualImprover
        } else {
            BehaviorClass::StrugglingLearner
        }
    }

    pub fn class_index(self) -> usize {
        match self {
            BehaviorClass::ConsistentImprover => 0,
            BehaviorClass::GradualImprover => 1,
            BehaviorClass::StrugglingLearner => 2,
        }
    }

    pub fn from_class_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BehaviorClass::ConsistentImprover => "Consistent Improver",
            BehaviorClass::GradualImprover => "Gradual Improver",
            BehaviorClass::StrugglingLearner => "Struggling Learner",
        }
    }

    pub fn recommendations(self) -> Vec<String> {
        let items: &[&str] = match self {
            BehaviorClass::ConsistentImprover => &[
                "Continue with current study habits",
                "Consider advanced topics",
                "Mentor other students",
            ],
            BehaviorClass::GradualImprover => &[
                "Focus on consistent practice",
                "Set specific goals",
                "Track progress regularly",
            ],
            BehaviorClass::StrugglingLearner => &[
                "Seek additional help",
                "Break down complex topics",
                "Practice fundamental concepts",
            ],
        };
        items.iter().map(|item| item.to_string()).collect()
    }
}

/// Learning styles emitted by the dispersion/mean heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorProfile {
    Consistent,
    HighAchiever,
    NeedsSupport,
    Balanced,
}

impl BehaviorProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            BehaviorProfile::Consistent => "Consistent",
            BehaviorProfile::HighAchiever => "High Achiever",
            BehaviorProfile::NeedsSupport => "Needs Support",
            BehaviorProfile::Balanced => "Balanced",
        }
    }
}

/// The two label vocabularies are kept apart; callers branch on the exact text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningStyle {
    Trained(BehaviorClass),
    Heuristic(BehaviorProfile),
    Unknown,
}

impl LearningStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            LearningStyle::Trained(class) => class.as_str(),
            LearningStyle::Heuristic(profile) => profile.as_str(),
            LearningStyle::Unknown => "Unknown",
        }
    }
}

impl Serialize for LearningStyle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorAnalysis {
    pub learning_style: LearningStyle,
    pub consistency: f64,
    pub engagement: f64,
    pub improvement_rate: f64,
    pub recommendations: Vec<String>,
}

impl BehaviorAnalysis {
    pub fn degraded() -> Self {
        Self {
            learning_style: LearningStyle::Unknown,
            consistency: 0.7,
            engagement: 0.8,
            improvement_rate: 0.2,
            recommendations: vec!["Analysis unavailable".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub topic: String,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Prerequisite,
    Target,
    Improvement,
    Review,
    Practice,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub estimated_time: String,
}

impl PathStep {
    pub fn new(topic: impl Into<String>, kind: StepKind, estimated_time: &str) -> Self {
        Self {
            topic: topic.into(),
            kind,
            estimated_time: estimated_time.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningPath {
    pub optimized_path: Vec<PathStep>,
    pub path_length: usize,
    pub estimated_completion_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

/// A model-family output tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction<T> {
    pub value: T,
    pub source: PredictionSource,
}

impl<T> Prediction<T> {
    pub fn model(value: T) -> Self {
        Self {
            value,
            source: PredictionSource::Model,
        }
    }

    pub fn heuristic(value: T) -> Self {
        Self {
            value,
            source: PredictionSource::Heuristic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Average,
    Struggling,
}

impl PerformanceLevel {
    pub fn from_mean(mean: f64) -> Self {
        if mean >= 90.0 {
            PerformanceLevel::Excellent
        } else if mean >= 75.0 {
            PerformanceLevel::Good
        } else if mean >= 60.0 {
            PerformanceLevel::Average
        } else {
            PerformanceLevel::Struggling
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "excellent",
            PerformanceLevel::Good => "good",
            PerformanceLevel::Average => "average",
            PerformanceLevel::Struggling => "struggling",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn record_scores_are_clamped() {
        let high = ScoreRecord::new("Mathematics", 120.0, 100.0, day(1), "quiz").unwrap();
        let low = ScoreRecord::new("Mathematics", -4.0, 100.0, day(1), "quiz").unwrap();
        assert_eq!(high.score, 100.0);
        assert_eq!(low.score, 0.0);
    }

    #[test]
    fn record_rejects_non_positive_max_score() {
        assert!(ScoreRecord::new("Mathematics", 50.0, 0.0, day(1), "quiz").is_err());
    }

    #[test]
    fn history_is_sorted_by_date() {
        let history = StudentHistory::new(
            "student1",
            vec![
                ScoreRecord::new("Physics", 70.0, 100.0, day(9), "exam").unwrap(),
                ScoreRecord::new("Mathematics", 60.0, 100.0, day(2), "quiz").unwrap(),
                ScoreRecord::new("Chemistry", 80.0, 100.0, day(5), "lab").unwrap(),
            ],
        );
        assert_eq!(history.scores(), vec![60.0, 80.0, 70.0]);
    }

    #[test]
    fn topic_averages_keep_first_appearance_order() {
        let history = StudentHistory::new(
            "student1",
            vec![
                ScoreRecord::new("Mathematics", 85.0, 100.0, day(1), "quiz").unwrap(),
                ScoreRecord::new("Physics", 92.0, 100.0, day(2), "quiz").unwrap(),
                ScoreRecord::new("Mathematics", 78.0, 100.0, day(3), "exam").unwrap(),
            ],
        );
        let averages = history.topic_averages();
        assert_eq!(averages[0].0, "Mathematics");
        assert!((averages[0].1 - 81.5).abs() < 1e-9);
        assert_eq!(averages[1].0, "Physics");
    }

    #[test]
    fn training_set_parses_camel_case_records_in_file_order() {
        let json = r#"{
            "class1_student2": [
                {"topic": "Physics", "score": 71.5, "maxScore": 100, "date": "2024-01-03", "assignmentType": "lab"}
            ],
            "class1_student1": [
                {"topic": "Mathematics", "score": 64.0, "date": "2024-01-01"}
            ]
        }"#;
        let set = parse_training_set(json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].student_id, "class1_student2");
        assert_eq!(set[0].records()[0].assignment_type, "lab");
        assert_eq!(set[1].records()[0].max_score, 100.0);
        assert_eq!(set[1].records()[0].assignment_type, "assignment");
    }

    #[test]
    fn risk_thresholds_are_exact() {
        assert_eq!(RiskLevel::from_mean(59.99), RiskLevel::High);
        assert_eq!(RiskLevel::from_mean(60.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_mean(74.99), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_mean(75.0), RiskLevel::Low);
    }

    #[test]
    fn behavior_vocabularies_are_disjoint() {
        let profiles = [
            BehaviorProfile::Consistent,
            BehaviorProfile::HighAchiever,
            BehaviorProfile::NeedsSupport,
            BehaviorProfile::Balanced,
        ];
        for class in BehaviorClass::ALL {
            for profile in profiles {
                assert_ne!(class.as_str(), profile.as_str());
            }
        }
    }

    #[test]
    fn learning_style_serializes_as_label() {
        let style = LearningStyle::Heuristic(BehaviorProfile::HighAchiever);
        assert_eq!(serde_json::to_string(&style).unwrap(), "\"High Achiever\"");
    }
}

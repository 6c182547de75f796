//! The service context: one owned bundle of model slots and topic tables,
//! swapped wholesale on retraining, plus the per-student and per-class
//! answers built on top of it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{InsightError, Result};
use crate::fallback;
use crate::features::mean;
use crate::forest::ForestParams;
use crate::models::{
    BehaviorAnalysis, LearningPath, LearningStyle, PerformanceLevel, Prediction,
    PredictionSource, Recommendation, RiskLevel, StudentHistory,
};
use crate::planner::{self, StudyPlan, STRONG_TOPIC_SCORE, WEAK_TOPIC_SCORE};
use crate::predictors::{
    Assessment, BehaviorModel, GradingModel, ModelFamily, PerformanceModel, RiskModel, Slot,
};
use crate::similarity::{LearningPatterns, TopicSimilarity};
use crate::snapshot::{self, ModelSnapshot, TrainingRecord};

/// Topic mean at or above which a class report lists the topic as strong.
pub const CLASS_STRONG_TOPIC_SCORE: f64 = 80.0;
const INSIGHT_TOPIC_LIMIT: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct ModelBundle {
    pub performance: Slot<PerformanceModel>,
    pub risk: Slot<RiskModel>,
    pub grading: Slot<GradingModel>,
    pub behavior: Slot<BehaviorModel>,
    pub topic_similarity: Option<TopicSimilarity>,
    pub learning_patterns: Option<LearningPatterns>,
    pub last_training: Option<TrainingRecord>,
}

impl From<ModelSnapshot> for ModelBundle {
    fn from(snapshot: ModelSnapshot) -> Self {
        Self {
            performance: snapshot.performance.into(),
            risk: snapshot.risk.into(),
            grading: snapshot.grading.into(),
            behavior: snapshot.behavior.into(),
            topic_similarity: snapshot.topic_similarity,
            learning_patterns: snapshot.learning_patterns,
            last_training: snapshot.last_training,
        }
    }
}

impl ModelBundle {
    pub fn to_snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            performance: self.performance.to_option(),
            risk: self.risk.to_option(),
            grading: self.grading.to_option(),
            behavior: self.behavior.to_option(),
            topic_similarity: self.topic_similarity.clone(),
            learning_patterns: self.learning_patterns.clone(),
            last_training: self.last_training.clone(),
            ..ModelSnapshot::default()
        }
    }

    /// Whether a training run has already produced this bundle, whatever
    /// it managed to train.
    pub fn has_trained(&self) -> bool {
        self.last_training.is_some()
            || self.performance.is_trained()
            || self.risk.is_trained()
            || self.grading.is_trained()
            || self.behavior.is_trained()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub performance: bool,
    pub risk: bool,
    pub grading: bool,
    pub behavior: bool,
    pub content_recommendation: bool,
    pub learning_path: bool,
    pub similarity_pairs: usize,
    pub transitions: usize,
    pub training_runs: usize,
    pub last_training: Option<TrainingRecord>,
}

impl ModelStatus {
    pub fn all_trained(&self) -> bool {
        self.performance
            && self.risk
            && self.grading
            && self.behavior
            && self.content_recommendation
            && self.learning_path
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    pub students: usize,
    pub score_rows: usize,
    pub trained: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub similarity_pairs: usize,
    pub transitions: usize,
}

/// Replaces `slot` on success; on failure the previous content stays.
fn retrain<M: ModelFamily>(slot: &mut Slot<M>, outcome: Result<M>, report: &mut TrainingReport) {
    match outcome {
        Ok(model) => {
            *slot = Slot::Trained(model);
            report.trained.push(M::NAME);
        }
        Err(err) => {
            warn!(model = M::NAME, %err, "training skipped, keeping previous model");
            report.skipped.push(M::NAME);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeEstimate {
    pub predicted_grade: f64,
    pub max_score: f64,
    pub grade_percentage: f64,
    pub grade_letter: &'static str,
    pub source: PredictionSource,
}

pub fn letter_grade(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A"
    } else if percentage >= 80.0 {
        "B"
    } else if percentage >= 70.0 {
        "C"
    } else if percentage >= 60.0 {
        "D"
    } else {
        "F"
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub overall_performance: f64,
    pub confidence_score: f64,
    pub source: PredictionSource,
    pub weak_topics: Vec<String>,
    pub strong_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tutoring {
    pub needed: bool,
    pub recommended_sessions: u32,
    pub focus_topics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyAdjustment {
    Increase,
    Maintain,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPacing {
    Accelerated,
    Standard,
    Remedial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalizationLevel {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveLearning {
    pub difficulty_adjustment: DifficultyAdjustment,
    pub content_pacing: ContentPacing,
    pub personalization_level: PersonalizationLevel,
}

impl AdaptiveLearning {
    pub fn for_prediction(predicted: f64, records: usize) -> Self {
        let difficulty_adjustment = if predicted > 80.0 {
            DifficultyAdjustment::Increase
        } else if predicted < 60.0 {
            DifficultyAdjustment::Decrease
        } else {
            DifficultyAdjustment::Maintain
        };
        let content_pacing = if predicted > 85.0 {
            ContentPacing::Accelerated
        } else if predicted > 70.0 {
            ContentPacing::Standard
        } else {
            ContentPacing::Remedial
        };
        Self {
            difficulty_adjustment,
            content_pacing,
            personalization_level: if records > 10 {
                PersonalizationLevel::High
            } else {
                PersonalizationLevel::Medium
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    Excellent,
    Good,
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusTrend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSummary {
    pub overall_status: OverallStatus,
    pub learning_style: LearningStyle,
    pub risk_level: RiskLevel,
    pub performance_trend: StatusTrend,
    pub key_message: String,
}

impl InsightSummary {
    fn for_prediction(predicted: f64, learning_style: LearningStyle, risk_level: RiskLevel) -> Self {
        let (overall_status, performance_trend, key_message) = if predicted > 85.0 {
            (
                OverallStatus::Excellent,
                StatusTrend::Improving,
                "Student shows exceptional performance with strong potential for continued growth.",
            )
        } else if predicted > 70.0 {
            (
                OverallStatus::Good,
                StatusTrend::Stable,
                "Student demonstrates solid understanding with room for improvement in specific areas.",
            )
        } else {
            (
                OverallStatus::NeedsAttention,
                StatusTrend::Declining,
                "Student requires additional support and focused intervention strategies.",
            )
        };
        Self {
            overall_status,
            learning_style,
            risk_level,
            performance_trend,
            key_message: key_message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComprehensiveInsights {
    pub student_id: String,
    pub performance: PerformanceSummary,
    pub behavior: BehaviorAnalysis,
    pub content_recommendations: Vec<Recommendation>,
    pub learning_path: LearningPath,
    pub study_plan: StudyPlan,
    pub tutoring: Tutoring,
    pub adaptive_learning: AdaptiveLearning,
    pub summary: InsightSummary,
}

impl ComprehensiveInsights {
    /// Same shape as a real answer, filled with neutral values.
    pub fn degraded(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            performance: PerformanceSummary {
                overall_performance: 75.0,
                confidence_score: 80.0,
                source: PredictionSource::Heuristic,
                weak_topics: Vec::new(),
                strong_topics: Vec::new(),
            },
            behavior: BehaviorAnalysis::degraded(),
            content_recommendations: Vec::new(),
            learning_path: LearningPath {
                optimized_path: Vec::new(),
                path_length: 0,
                estimated_completion_time: "Unknown".to_string(),
            },
            study_plan: StudyPlan::degraded(),
            tutoring: Tutoring {
                needed: false,
                recommended_sessions: 0,
                focus_topics: Vec::new(),
            },
            adaptive_learning: AdaptiveLearning {
                difficulty_adjustment: DifficultyAdjustment::Maintain,
                content_pacing: ContentPacing::Standard,
                personalization_level: PersonalizationLevel::Medium,
            },
            summary: InsightSummary {
                overall_status: OverallStatus::Unknown,
                learning_style: LearningStyle::Unknown,
                risk_level: RiskLevel::Medium,
                performance_trend: StatusTrend::Stable,
                key_message: "Analysis unavailable".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAnalysis {
    pub student_id: String,
    pub overall_performance: f64,
    pub performance_level: PerformanceLevel,
    pub risk_level: RiskLevel,
    pub risk_source: PredictionSource,
    pub weak_topics: Vec<String>,
    pub strong_topics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceDistribution {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub struggling: usize,
}

impl PerformanceDistribution {
    fn record(&mut self, level: PerformanceLevel) {
        match level {
            PerformanceLevel::Excellent => self.excellent += 1,
            PerformanceLevel::Good => self.good += 1,
            PerformanceLevel::Average => self.average += 1,
            PerformanceLevel::Struggling => self.struggling += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RiskDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl RiskDistribution {
    fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassStatistics {
    pub average_performance: f64,
    pub performance_distribution: PerformanceDistribution,
    pub risk_distribution: RiskDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassAnalysis {
    pub total_students: usize,
    pub student_analyses: Vec<StudentAnalysis>,
    pub class_statistics: ClassStatistics,
}

fn topics_where(history: &StudentHistory, keep: impl Fn(f64) -> bool) -> Vec<String> {
    history
        .topic_averages()
        .into_iter()
        .filter(|(_, avg)| keep(*avg))
        .map(|(topic, _)| topic)
        .collect()
}

pub struct InsightService {
    params: ForestParams,
    snapshot_path: Option<PathBuf>,
    bundle: RwLock<Arc<ModelBundle>>,
    training: Mutex<()>,
    training_runs: AtomicUsize,
}

impl InsightService {
    pub fn new(params: ForestParams) -> Self {
        Self::with_bundle(params, ModelBundle::default())
    }

    pub fn with_bundle(params: ForestParams, bundle: ModelBundle) -> Self {
        Self {
            params,
            snapshot_path: None,
            bundle: RwLock::new(Arc::new(bundle)),
            training: Mutex::new(()),
            training_runs: AtomicUsize::new(0),
        }
    }

    /// Saves the bundle to `path` after every training run.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Starts from the snapshot at `path`. A missing or unreadable snapshot
    /// leaves every family on its heuristic.
    pub fn load(params: ForestParams, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bundle = match snapshot::load(&path) {
            Ok(Some(snapshot)) => ModelBundle::from(snapshot),
            Ok(None) => ModelBundle::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring unreadable model snapshot");
                ModelBundle::default()
            }
        };
        Self::with_bundle(params, bundle).with_snapshot_path(path)
    }

    /// The bundle current at the time of the call. Later retraining does not
    /// affect a bundle already handed out.
    pub fn bundle(&self) -> Arc<ModelBundle> {
        let guard = self.bundle.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn replace_bundle(&self, bundle: ModelBundle) {
        let mut guard = self.bundle.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(bundle);
    }

    pub fn training_runs(&self) -> usize {
        self.training_runs.load(Ordering::SeqCst)
    }

    pub fn train(&self, histories: &[StudentHistory]) -> Result<TrainingReport> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
        self.train_locked(histories)
    }

    /// Trains from `source` unless the bundle already came out of a
    /// training run, including one that lacked the data for some families.
    /// Concurrent callers wait on the training guard; only the first of them
    /// invokes `source`. Use [`InsightService::train`] to retrain on new data.
    pub fn ensure_trained<F>(&self, source: F) -> Result<Option<TrainingReport>>
    where
        F: FnOnce() -> Result<Vec<StudentHistory>>,
    {
        if self.bundle().has_trained() {
            return Ok(None);
        }

        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
        if self.bundle().has_trained() {
            debug!("models trained by a concurrent caller");
            return Ok(None);
        }

        let histories = source()?;
        self.train_locked(&histories).map(Some)
    }

    fn train_locked(&self, histories: &[StudentHistory]) -> Result<TrainingReport> {
        let mut report = TrainingReport {
            students: histories.len(),
            score_rows: histories.iter().map(StudentHistory::len).sum(),
            ..TrainingReport::default()
        };
        info!(
            students = report.students,
            rows = report.score_rows,
            trees = self.params.n_estimators,
            "training model families"
        );

        let mut next = ModelBundle::clone(&self.bundle());
        retrain(
            &mut next.performance,
            PerformanceModel::train(histories, &self.params),
            &mut report,
        );
        retrain(&mut next.risk, RiskModel::train(histories, &self.params), &mut report);
        retrain(
            &mut next.grading,
            GradingModel::train(histories, &self.params),
            &mut report,
        );
        retrain(
            &mut next.behavior,
            BehaviorModel::train(histories, &self.params),
            &mut report,
        );

        if !histories.is_empty() {
            let similarity = TopicSimilarity::build(histories);
            let patterns = LearningPatterns::build(histories);
            report.similarity_pairs = similarity.len();
            report.transitions = patterns.len();
            next.topic_similarity = Some(similarity);
            next.learning_patterns = Some(patterns);
        }

        next.last_training = Some(TrainingRecord {
            students: report.students,
            score_rows: report.score_rows,
            finished_at: Utc::now(),
        });
        let snapshot = next.to_snapshot();
        self.replace_bundle(next);
        self.training_runs.fetch_add(1, Ordering::SeqCst);
        info!(
            trained = ?report.trained,
            skipped = ?report.skipped,
            similarity_pairs = report.similarity_pairs,
            transitions = report.transitions,
            "training finished"
        );

        if let Some(path) = &self.snapshot_path {
            snapshot::save(path, &snapshot)?;
        }
        Ok(report)
    }

    pub fn status(&self) -> ModelStatus {
        let bundle = self.bundle();
        ModelStatus {
            performance: bundle.performance.is_trained(),
            risk: bundle.risk.is_trained(),
            grading: bundle.grading.is_trained(),
            behavior: bundle.behavior.is_trained(),
            content_recommendation: bundle.topic_similarity.is_some(),
            learning_path: bundle.learning_patterns.is_some(),
            similarity_pairs: bundle.topic_similarity.as_ref().map_or(0, TopicSimilarity::len),
            transitions: bundle.learning_patterns.as_ref().map_or(0, LearningPatterns::len),
            training_runs: self.training_runs(),
            last_training: bundle.last_training.clone(),
        }
    }

    pub fn predict_performance(&self, history: &StudentHistory) -> Prediction<f64> {
        self.bundle().performance.predict(history)
    }

    pub fn predict_risk(&self, history: &StudentHistory) -> Prediction<RiskLevel> {
        self.bundle().risk.predict(history)
    }

    pub fn analyze_behavior(&self, history: &StudentHistory) -> BehaviorAnalysis {
        if history.is_empty() {
            warn!(student_id = %history.student_id, "no scores to analyze behavior");
            return BehaviorAnalysis::degraded();
        }
        self.bundle().behavior.predict(history).value
    }

    pub fn grade(&self, assessment: &Assessment) -> GradeEstimate {
        let prediction = self.bundle().grading.predict(assessment);
        let predicted_grade = round_to(prediction.value, 2);
        let grade_percentage = if predicted_grade > 0.0 {
            round_to(predicted_grade / assessment.max_score * 100.0, 2)
        } else {
            0.0
        };

        GradeEstimate {
            predicted_grade,
            max_score: assessment.max_score,
            grade_percentage,
            grade_letter: letter_grade(grade_percentage),
            source: prediction.source,
        }
    }

    /// Similar-topic suggestions once a similarity table exists, the
    /// weak/strong heuristic before that.
    pub fn content_recommendations(
        &self,
        history: &StudentHistory,
        target_topic: Option<&str>,
    ) -> Vec<Recommendation> {
        match &self.bundle().topic_similarity {
            Some(table) => planner::recommend_content(history, table, target_topic),
            None => fallback::content_recommendations(history),
        }
    }

    pub fn learning_path(&self, history: &StudentHistory, targets: Option<&[String]>) -> LearningPath {
        match &self.bundle().learning_patterns {
            Some(_) => planner::learning_path(history, targets),
            None => fallback::learning_path(history),
        }
    }

    pub fn study_plan(&self, history: &StudentHistory) -> StudyPlan {
        if history.is_empty() {
            return StudyPlan::degraded();
        }
        planner::study_plan(history)
    }

    /// Never fails: anything that goes wrong yields
    /// [`ComprehensiveInsights::degraded`].
    pub fn comprehensive_insights(&self, history: &StudentHistory) -> ComprehensiveInsights {
        match self.try_comprehensive_insights(history) {
            Ok(insights) => insights,
            Err(err) => {
                warn!(student_id = %history.student_id, %err, "insights unavailable, returning degraded response");
                ComprehensiveInsights::degraded(&history.student_id)
            }
        }
    }

    fn try_comprehensive_insights(&self, history: &StudentHistory) -> Result<ComprehensiveInsights> {
        if history.is_empty() {
            return Err(InsightError::InsufficientData {
                needed: 1,
                found: 0,
            });
        }

        let performance = self.predict_performance(history);
        let predicted = performance.value;
        let confidence_score = match performance.source {
            PredictionSource::Model => predicted.clamp(60.0, 95.0),
            PredictionSource::Heuristic => 75.0,
        };
        let risk_level = self.predict_risk(history).value;
        let behavior = self.analyze_behavior(history);

        let weak_topics: Vec<String> = topics_where(history, |avg| avg < WEAK_TOPIC_SCORE)
            .into_iter()
            .take(INSIGHT_TOPIC_LIMIT)
            .collect();
        let strong_topics: Vec<String> = topics_where(history, |avg| avg > STRONG_TOPIC_SCORE)
            .into_iter()
            .take(INSIGHT_TOPIC_LIMIT)
            .collect();

        let tutoring = Tutoring {
            needed: risk_level == RiskLevel::High,
            recommended_sessions: match risk_level {
                RiskLevel::High => 2,
                RiskLevel::Medium => 1,
                RiskLevel::Low => 0,
            },
            focus_topics: weak_topics.clone(),
        };

        Ok(ComprehensiveInsights {
            student_id: history.student_id.clone(),
            performance: PerformanceSummary {
                overall_performance: round_to(predicted, 1),
                confidence_score: round_to(confidence_score, 1),
                source: performance.source,
                weak_topics,
                strong_topics,
            },
            summary: InsightSummary::for_prediction(predicted, behavior.learning_style, risk_level),
            behavior,
            content_recommendations: self.content_recommendations(history, None),
            learning_path: match &self.bundle().learning_patterns {
                Some(_) => planner::learning_path(history, None),
                None => fallback::review_path(history),
            },
            study_plan: self.study_plan(history),
            tutoring,
            adaptive_learning: AdaptiveLearning::for_prediction(predicted, history.len()),
        })
    }

    pub fn class_analysis(&self, students: &[StudentHistory]) -> ClassAnalysis {
        let mut analysis = ClassAnalysis {
            total_students: students.len(),
            ..ClassAnalysis::default()
        };

        for history in students {
            let overall = mean(&history.scores());
            let level = PerformanceLevel::from_mean(overall);
            let risk = self.predict_risk(history);

            analysis.class_statistics.performance_distribution.record(level);
            analysis.class_statistics.risk_distribution.record(risk.value);
            analysis.student_analyses.push(StudentAnalysis {
                student_id: history.student_id.clone(),
                overall_performance: overall,
                performance_level: level,
                risk_level: risk.value,
                risk_source: risk.source,
                weak_topics: topics_where(history, |avg| avg < WEAK_TOPIC_SCORE),
                strong_topics: topics_where(history, |avg| avg >= CLASS_STRONG_TOPIC_SCORE),
            });
        }

        let means: Vec<f64> = analysis
            .student_analyses
            .iter()
            .map(|student| student.overall_performance)
            .collect();
        analysis.class_statistics.average_performance = mean(&means);
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BehaviorProfile, ScoreRecord};
    use crate::predictors::tests::{cohort, small_params};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn history(id: &str, rows: &[(&str, f64)]) -> StudentHistory {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (topic, score))| {
                ScoreRecord::new(
                    *topic,
                    *score,
                    100.0,
                    NaiveDate::from_ymd_opt(2024, 5, 1 + i as u32).unwrap(),
                    "quiz",
                )
                .unwrap()
            })
            .collect();
        StudentHistory::new(id, records)
    }

    fn trained_service() -> InsightService {
        let service = InsightService::new(small_params());
        service.train(&cohort(24, 8)).unwrap();
        service
    }

    #[test]
    fn cold_service_answers_from_heuristics() {
        let service = InsightService::new(small_params());
        let h = history("s1", &[("Mathematics", 55.0), ("Physics", 65.0), ("Chemistry", 60.0)]);

        let performance = service.predict_performance(&h);
        assert_eq!(performance.source, PredictionSource::Heuristic);
        assert_eq!(performance.value, 60.0);
        assert_eq!(service.predict_risk(&h).value, RiskLevel::Medium);
        assert!(!service.status().performance);
        assert!(!service.status().content_recommendation);
    }

    #[test]
    fn training_fills_every_slot() {
        let service = trained_service();
        let status = service.status();
        assert!(status.all_trained(), "{status:?}");
        assert_eq!(status.training_runs, 1);
        assert!(status.similarity_pairs > 0);
    }

    #[test]
    fn insufficient_retraining_keeps_previous_models() {
        let service = trained_service();
        let report = service.train(&cohort(4, 3)).unwrap();
        assert!(report.trained.is_empty());
        assert_eq!(report.skipped, vec!["performance", "risk", "grading", "behavior"]);

        let status = service.status();
        assert!(status.performance && status.risk && status.grading && status.behavior);
        assert_eq!(status.training_runs, 2);
    }

    #[test]
    fn concurrent_first_requests_train_once() {
        let service = InsightService::new(small_params());
        let loads = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    service
                        .ensure_trained(|| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok(cohort(24, 8))
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(service.training_runs(), 1);
        assert!(service.status().performance);
    }

    #[test]
    fn small_data_is_not_reloaded_on_every_request() {
        let service = InsightService::new(small_params());
        let loads = AtomicUsize::new(0);
        let load_small = || -> Result<Vec<StudentHistory>> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(cohort(5, 4))
        };

        let first = service.ensure_trained(load_small).unwrap().unwrap();
        assert!(first.trained.is_empty());
        assert!(service.ensure_trained(load_small).unwrap().is_none());

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(service.training_runs(), 1);
        let status = service.status();
        assert!(!status.performance);
        assert_eq!(status.last_training.map(|t| t.students), Some(5));
    }

    #[test]
    fn small_data_training_is_remembered_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");

        let first = InsightService::load(small_params(), &path);
        first.ensure_trained(|| Ok(cohort(5, 4))).unwrap();

        let restarted = InsightService::load(small_params(), &path);
        let outcome = restarted
            .ensure_trained(|| -> Result<Vec<StudentHistory>> {
                panic!("training data reloaded after restart")
            })
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(restarted.training_runs(), 0);
        assert_eq!(
            restarted.status().last_training.map(|t| t.score_rows),
            Some(20)
        );
    }

    #[test]
    fn malformed_snapshot_model_answers_from_heuristics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        std::fs::write(
            &path,
            r#"{"performance":{"scaler":null,"forest":{"task":{"kind":"regression"},"n_features":5,"trees":[{"nodes":[]}]}}}"#,
        )
        .unwrap();

        let service = InsightService::load(small_params(), &path);
        assert!(!service.status().performance);

        let h = history(
            "s3",
            &[("Mathematics", 62.0), ("Physics", 71.0), ("Chemistry", 80.0), ("Physics", 67.0)],
        );
        let insights = service.comprehensive_insights(&h);
        assert_eq!(insights.performance.source, PredictionSource::Heuristic);
        assert_eq!(insights.performance.overall_performance, 70.0);
        assert_eq!(insights.student_id, "s3");
    }

    #[test]
    fn ensure_trained_propagates_source_errors() {
        let service = InsightService::new(small_params());
        let outcome = service.ensure_trained(|| Err(InsightError::Snapshot("offline".to_string())));
        assert!(outcome.is_err());
        assert_eq!(service.training_runs(), 0);
    }

    #[test]
    fn trained_performance_stays_in_range() {
        let service = trained_service();
        for h in cohort(12, 5) {
            let prediction = service.predict_performance(&h);
            assert_eq!(prediction.source, PredictionSource::Model);
            assert!((0.0..=100.0).contains(&prediction.value));
        }
    }

    #[test]
    fn cold_grade_is_zero_and_failing() {
        let service = InsightService::new(small_params());
        let estimate = service.grade(&Assessment {
            topic: "Mathematics".to_string(),
            assignment_type: "exam".to_string(),
            max_score: 50.0,
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        });
        assert_eq!(estimate.predicted_grade, 0.0);
        assert_eq!(estimate.grade_percentage, 0.0);
        assert_eq!(estimate.grade_letter, "F");
        assert_eq!(estimate.source, PredictionSource::Heuristic);
    }

    #[test]
    fn trained_grade_is_within_max_score() {
        let service = trained_service();
        let estimate = service.grade(&Assessment {
            topic: "Physics".to_string(),
            assignment_type: "lab".to_string(),
            max_score: 100.0,
            date: NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(),
        });
        assert_eq!(estimate.source, PredictionSource::Model);
        assert!((0.0..=100.0).contains(&estimate.predicted_grade));
        assert_eq!(estimate.grade_letter, letter_grade(estimate.grade_percentage));
    }

    #[test]
    fn letter_grade_boundaries() {
        assert_eq!(letter_grade(90.0), "A");
        assert_eq!(letter_grade(89.99), "B");
        assert_eq!(letter_grade(70.0), "C");
        assert_eq!(letter_grade(60.0), "D");
        assert_eq!(letter_grade(59.99), "F");
    }

    #[test]
    fn recommendations_switch_to_similarity_table_after_training() {
        let h = history("s1", &[("Mathematics", 50.0), ("Physics", 92.0), ("Physics", 90.0)]);
        let cold = InsightService::new(small_params());
        assert_eq!(cold.content_recommendations(&h, None), fallback::content_recommendations(&h));
        assert_eq!(cold.learning_path(&h, None), fallback::learning_path(&h));

        let warm = trained_service();
        let table = warm.bundle().topic_similarity.clone().unwrap();
        assert_eq!(
            warm.content_recommendations(&h, None),
            planner::recommend_content(&h, &table, None)
        );
        assert_eq!(warm.learning_path(&h, None), planner::learning_path(&h, None));
    }

    #[test]
    fn empty_history_gets_degraded_insights() {
        let service = trained_service();
        let insights = service.comprehensive_insights(&StudentHistory::new("ghost", Vec::new()));
        assert_eq!(insights, ComprehensiveInsights::degraded("ghost"));
        assert_eq!(insights.summary.learning_style, LearningStyle::Unknown);
    }

    #[test]
    fn cold_insights_use_fixed_confidence() {
        let service = InsightService::new(small_params());
        let h = history(
            "s2",
            &[("Mathematics", 90.0), ("Mathematics", 92.0), ("Physics", 88.0), ("Chemistry", 45.0)],
        );
        let insights = service.comprehensive_insights(&h);

        assert_eq!(insights.performance.confidence_score, 75.0);
        assert_eq!(insights.performance.overall_performance, 78.8);
        assert_eq!(insights.performance.weak_topics, vec!["Chemistry".to_string()]);
        assert_eq!(
            insights.performance.strong_topics,
            vec!["Mathematics".to_string(), "Physics".to_string()]
        );
        assert_eq!(insights.summary.overall_status, OverallStatus::Good);
        assert_eq!(insights.summary.risk_level, RiskLevel::Low);
        assert!(!insights.tutoring.needed);
        assert_eq!(
            insights.behavior.learning_style,
            LearningStyle::Heuristic(BehaviorProfile::Balanced)
        );
        assert_eq!(insights.adaptive_learning.content_pacing, ContentPacing::Standard);

        let topics: Vec<&str> = insights
            .learning_path
            .optimized_path
            .iter()
            .map(|step| step.topic.as_str())
            .collect();
        assert_eq!(topics, vec!["Mathematics", "Physics", "Chemistry"]);
        assert_eq!(insights.learning_path.estimated_completion_time, "6 hours");
    }

    #[test]
    fn trained_confidence_is_clamped() {
        let service = trained_service();
        for h in cohort(6, 6) {
            let insights = service.comprehensive_insights(&h);
            assert_eq!(insights.performance.source, PredictionSource::Model);
            assert!((60.0..=95.0).contains(&insights.performance.confidence_score));
        }
    }

    #[test]
    fn class_analysis_counts_distributions() {
        let service = InsightService::new(small_params());
        let students = vec![
            history("a", &[("Mathematics", 95.0), ("Physics", 92.0)]),
            history("b", &[("Mathematics", 50.0), ("Physics", 40.0)]),
            history("c", &[("Mathematics", 70.0), ("Physics", 80.0)]),
        ];
        let analysis = service.class_analysis(&students);

        assert_eq!(analysis.total_students, 3);
        assert_eq!(
            analysis.class_statistics.performance_distribution,
            PerformanceDistribution {
                excellent: 1,
                good: 1,
                average: 0,
                struggling: 1,
            }
        );
        assert_eq!(
            analysis.class_statistics.risk_distribution,
            RiskDistribution {
                low: 2,
                medium: 0,
                high: 1,
            }
        );
        assert!((analysis.class_statistics.average_performance - 71.1666).abs() < 1e-3);
        assert_eq!(analysis.student_analyses[2].strong_topics, vec!["Physics".to_string()]);
        assert_eq!(analysis.student_analyses[1].weak_topics.len(), 2);
    }

    #[test]
    fn training_writes_snapshot_that_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");

        let service = InsightService::new(small_params()).with_snapshot_path(&path);
        service.train(&cohort(24, 8)).unwrap();

        let reloaded = InsightService::load(small_params(), &path);
        let status = reloaded.status();
        assert!(status.all_trained());
        assert_eq!(status.training_runs, 0);

        let histories = cohort(1, 6);
        assert_eq!(
            reloaded.predict_risk(&histories[0]).value,
            service.predict_risk(&histories[0]).value
        );
    }
}

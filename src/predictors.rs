//! The four trained model families and the slot that pairs each with its
//! heuristic stand-in.
//!
//! Training never updates a model in place: a successful run produces a new
//! model, an unsuccessful one returns [`InsightError::InsufficientData`] and
//! leaves the caller's previous model untouched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{InsightError, Result};
use crate::fallback;
use crate::features::{BehaviorFeatures, GradingFeatures, PerformanceFeatures, RiskFeatures};
use crate::forest::{ForestParams, RandomForest, StandardScaler};
use crate::models::{
    BehaviorAnalysis, BehaviorClass, LearningStyle, Prediction, RiskLevel, StudentHistory,
};

/// Records a student needs before their history is used by a model.
pub const MIN_HISTORY: usize = 3;
/// Qualifying students needed to train the per-student families.
pub const MIN_TRAINING_STUDENTS: usize = 11;
/// Individual score rows needed to train the grading family.
pub const MIN_GRADING_ROWS: usize = 51;

/// A model family with a heuristic fallback sharing its output contract.
pub trait ModelFamily {
    type Input: ?Sized;
    type Output;

    const NAME: &'static str;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output>;

    /// Structural check run on models read from disk.
    fn validate(&self) -> Result<()>;

    fn fallback(input: &Self::Input) -> Self::Output;
}

/// Either a trained model or the heuristic, chosen once per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<M> {
    Trained(M),
    Fallback,
}

impl<M> Default for Slot<M> {
    fn default() -> Self {
        Slot::Fallback
    }
}

impl<M> From<Option<M>> for Slot<M> {
    fn from(model: Option<M>) -> Self {
        match model {
            Some(model) => Slot::Trained(model),
            None => Slot::Fallback,
        }
    }
}

impl<M: Clone> Slot<M> {
    pub fn to_option(&self) -> Option<M> {
        match self {
            Slot::Trained(model) => Some(model.clone()),
            Slot::Fallback => None,
        }
    }
}

impl<M> Slot<M> {
    pub fn is_trained(&self) -> bool {
        matches!(self, Slot::Trained(_))
    }
}

impl<M: ModelFamily> Slot<M> {
    pub fn predict(&self, input: &M::Input) -> Prediction<M::Output> {
        match self {
            Slot::Trained(model) => match model.infer(input) {
                Ok(value) => Prediction::model(value),
                Err(err) if err.is_recoverable() => {
                    debug!(model = M::NAME, %err, "model declined input, using heuristic");
                    Prediction::heuristic(M::fallback(input))
                }
                Err(err) => {
                    warn!(model = M::NAME, %err, "model inference failed, using heuristic");
                    Prediction::heuristic(M::fallback(input))
                }
            },
            Slot::Fallback => Prediction::heuristic(M::fallback(input)),
        }
    }
}

fn require_history(history: &StudentHistory) -> Result<()> {
    if history.len() < MIN_HISTORY {
        return Err(InsightError::InsufficientData {
            needed: MIN_HISTORY,
            found: history.len(),
        });
    }
    Ok(())
}

fn qualifying(histories: &[StudentHistory]) -> impl Iterator<Item = &StudentHistory> {
    histories.iter().filter(|h| h.len() >= MIN_HISTORY)
}

fn require_rows(rows: usize, needed: usize) -> Result<()> {
    if rows < needed {
        return Err(InsightError::InsufficientData {
            needed,
            found: rows,
        });
    }
    Ok(())
}

/// Scales `raw` with `scaler`, or returns it unchanged when the scaler was
/// fitted on a different feature width.
fn scaled_or_raw(raw: Vec<f64>, scaler: Option<&StandardScaler>) -> Result<Vec<f64>> {
    let Some(scaler) = scaler else {
        return Ok(raw);
    };
    match scaler.transform(&raw) {
        Ok(scaled) => Ok(scaled),
        Err(InsightError::FeatureShapeMismatch { expected, found }) => {
            debug!(expected, found, "scaler width mismatch, predicting on unscaled features");
            Ok(raw)
        }
        Err(err) => Err(err),
    }
}

/// Fits a scaler on `rows` and returns it with the scaled rows.
fn fit_scaled(rows: &[Vec<f64>]) -> Result<(StandardScaler, Vec<Vec<f64>>)> {
    let scaler = StandardScaler::fit(rows)?;
    let scaled = scaler.transform_all(rows)?;
    Ok((scaler, scaled))
}

fn validate_scaled(scaler: Option<&StandardScaler>, forest: &RandomForest) -> Result<()> {
    if let Some(scaler) = scaler {
        scaler.validate()?;
    }
    forest.validate()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceModel {
    scaler: Option<StandardScaler>,
    forest: RandomForest,
}

impl PerformanceModel {
    pub fn train(histories: &[StudentHistory], params: &ForestParams) -> Result<Self> {
        let (rows, targets): (Vec<Vec<f64>>, Vec<f64>) = qualifying(histories)
            .map(|h| {
                let features = PerformanceFeatures::extract(h);
                (features.to_vec(), features.mean)
            })
            .unzip();
        require_rows(rows.len(), MIN_TRAINING_STUDENTS)?;

        let (scaler, scaled) = fit_scaled(&rows)?;
        let forest = RandomForest::fit_regressor(&scaled, &targets, params)?;
        Ok(Self {
            scaler: Some(scaler),
            forest,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_scaler(mut self, scaler: Option<StandardScaler>) -> Self {
        self.scaler = scaler;
        self
    }
}

impl ModelFamily for PerformanceModel {
    type Input = StudentHistory;
    type Output = f64;

    const NAME: &'static str = "performance";

    fn infer(&self, history: &StudentHistory) -> Result<f64> {
        require_history(history)?;
        let raw = PerformanceFeatures::extract(history).to_vec();
        let input = scaled_or_raw(raw, self.scaler.as_ref())?;
        let prediction = self.forest.predict_value(&input)?;
        Ok(prediction.clamp(0.0, 100.0))
    }

    fn validate(&self) -> Result<()> {
        validate_scaled(self.scaler.as_ref(), &self.forest)
    }

    fn fallback(history: &StudentHistory) -> f64 {
        fallback::performance(history).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    scaler: Option<StandardScaler>,
    forest: RandomForest,
}

impl RiskModel {
    pub fn train(histories: &[StudentHistory], params: &ForestParams) -> Result<Self> {
        let (rows, labels): (Vec<Vec<f64>>, Vec<usize>) = qualifying(histories)
            .map(|h| {
                let features = RiskFeatures::extract(h);
                (
                    features.to_vec(),
                    RiskLevel::from_mean(features.mean).class_index(),
                )
            })
            .unzip();
        require_rows(rows.len(), MIN_TRAINING_STUDENTS)?;

        let (scaler, scaled) = fit_scaled(&rows)?;
        let forest = RandomForest::fit_classifier(&scaled, &labels, 3, params)?;
        Ok(Self {
            scaler: Some(scaler),
            forest,
        })
    }
}

impl ModelFamily for RiskModel {
    type Input = StudentHistory;
    type Output = RiskLevel;

    const NAME: &'static str = "risk";

    fn infer(&self, history: &StudentHistory) -> Result<RiskLevel> {
        require_history(history)?;
        let raw = RiskFeatures::extract(history).to_vec();
        let input = scaled_or_raw(raw, self.scaler.as_ref())?;
        let class = self.forest.predict_class(&input)?;
        RiskLevel::from_class_index(class).ok_or(InsightError::DegenerateStatistic)
    }

    fn validate(&self) -> Result<()> {
        validate_scaled(self.scaler.as_ref(), &self.forest)
    }

    fn fallback(history: &StudentHistory) -> RiskLevel {
        fallback::risk(history)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorModel {
    forest: RandomForest,
}

impl BehaviorModel {
    pub fn train(histories: &[StudentHistory], params: &ForestParams) -> Result<Self> {
        let (rows, labels): (Vec<Vec<f64>>, Vec<usize>) = qualifying(histories)
            .map(|h| {
                let features = BehaviorFeatures::extract(h);
                let class =
                    BehaviorClass::from_features(features.improvement_rate, features.consistency);
                (features.to_vec(), class.class_index())
            })
            .unzip();
        require_rows(rows.len(), MIN_TRAINING_STUDENTS)?;

        let forest = RandomForest::fit_classifier(&rows, &labels, BehaviorClass::ALL.len(), params)?;
        Ok(Self { forest })
    }
}

impl ModelFamily for BehaviorModel {
    type Input = StudentHistory;
    type Output = BehaviorAnalysis;

    const NAME: &'static str = "behavior";

    fn infer(&self, history: &StudentHistory) -> Result<BehaviorAnalysis> {
        require_history(history)?;
        let features = BehaviorFeatures::extract(history);
        let class = self.forest.predict_class(&features.to_vec())?;
        let class = BehaviorClass::from_class_index(class).ok_or(InsightError::DegenerateStatistic)?;

        Ok(BehaviorAnalysis {
            learning_style: LearningStyle::Trained(class),
            consistency: features.consistency,
            engagement: features.engagement,
            improvement_rate: features.improvement_rate,
            recommendations: class.recommendations(),
        })
    }

    fn validate(&self) -> Result<()> {
        self.forest.validate()
    }

    fn fallback(history: &StudentHistory) -> BehaviorAnalysis {
        fallback::behavior_analysis(history)
    }
}

/// An assessment to grade: categorical identity plus the day it is graded.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub topic: String,
    pub assignment_type: String,
    pub max_score: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingModel {
    forest: RandomForest,
}

impl GradingModel {
    pub fn train(histories: &[StudentHistory], params: &ForestParams) -> Result<Self> {
        let (rows, targets): (Vec<Vec<f64>>, Vec<f64>) = histories
            .iter()
            .flat_map(|h| h.records())
            .map(|record| (GradingFeatures::from_record(record).to_vec(), record.score))
            .unzip();
        require_rows(rows.len(), MIN_GRADING_ROWS)?;

        let forest = RandomForest::fit_regressor(&rows, &targets, params)?;
        Ok(Self { forest })
    }
}

impl ModelFamily for GradingModel {
    type Input = Assessment;
    type Output = f64;

    const NAME: &'static str = "grading";

    fn infer(&self, assessment: &Assessment) -> Result<f64> {
        let features = GradingFeatures::new(
            &assessment.topic,
            &assessment.assignment_type,
            assessment.date,
            assessment.max_score,
        );
        let prediction = self.forest.predict_value(&features.to_vec())?;
        Ok(prediction.clamp(0.0, assessment.max_score.max(0.0)))
    }

    fn validate(&self) -> Result<()> {
        self.forest.validate()
    }

    fn fallback(_assessment: &Assessment) -> f64 {
        fallback::grade()
    }
}

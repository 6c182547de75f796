//! Topic-to-topic tables learned from a whole cohort.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InsightError, Result};
use crate::features::mean;
use crate::models::StudentHistory;

/// Minimum overlapping observations needed to compare two topics.
pub const MIN_OVERLAP: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPair {
    pub topic_a: String,
    pub topic_b: String,
    pub similarity: f64,
}

/// Ordered-pair similarity table. `(a, b)` and `(b, a)` are computed
/// independently; self-pairs never appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TopicPair>", into = "Vec<TopicPair>")]
pub struct TopicSimilarity {
    pairs: Vec<TopicPair>,
}

impl From<Vec<TopicPair>> for TopicSimilarity {
    fn from(pairs: Vec<TopicPair>) -> Self {
        Self { pairs }
    }
}

impl From<TopicSimilarity> for Vec<TopicPair> {
    fn from(table: TopicSimilarity) -> Self {
        table.pairs
    }
}

impl TopicSimilarity {
    pub fn build(histories: &[StudentHistory]) -> Self {
        let observations = collect_topic_scores(histories);
        let mut pairs = Vec::new();

        for (i, (topic_a, scores_a)) in observations.iter().enumerate() {
            for (j, (topic_b, scores_b)) in observations.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Some(similarity) = pair_similarity(scores_a, scores_b) {
                    pairs.push(TopicPair {
                        topic_a: topic_a.clone(),
                        topic_b: topic_b.clone(),
                        similarity,
                    });
                }
            }
        }

        debug!(
            topics = observations.len(),
            pairs = pairs.len(),
            "built topic similarity table"
        );
        Self { pairs }
    }

    /// Pairs whose first element is `topic`, in table order.
    pub fn neighbours<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a TopicPair> + 'a {
        self.pairs.iter().filter(move |pair| pair.topic_a == topic)
    }

    pub fn pairs(&self) -> &[TopicPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Every score per topic across all students, in order of occurrence.
fn collect_topic_scores(histories: &[StudentHistory]) -> Vec<(String, Vec<f64>)> {
    let mut observations: Vec<(String, Vec<f64>)> = Vec::new();
    for history in histories {
        for record in history.records() {
            match observations.iter_mut().find(|(topic, _)| *topic == record.topic) {
                Some((_, scores)) => scores.push(record.score),
                None => observations.push((record.topic.clone(), vec![record.score])),
            }
        }
    }
    observations
}

/// Correlation over the common prefix, or magnitude similarity when the
/// correlation is undefined. `None` when fewer than [`MIN_OVERLAP`] points overlap.
fn pair_similarity(scores_a: &[f64], scores_b: &[f64]) -> Option<f64> {
    let overlap = scores_a.len().min(scores_b.len());
    if overlap < MIN_OVERLAP {
        return None;
    }
    let a = &scores_a[..overlap];
    let b = &scores_b[..overlap];

    match pearson(a, b) {
        Ok(correlation) => Some(correlation),
        Err(_) => Some(magnitude_similarity(a, b)),
    }
}

pub fn magnitude_similarity(a: &[f64], b: &[f64]) -> f64 {
    1.0 - (mean(a) - mean(b)).abs() / 100.0
}

/// Pearson correlation coefficient of two equal-length samples.
pub fn pearson(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() || a.len() < MIN_OVERLAP {
        return Err(InsightError::DegenerateStatistic);
    }
    let mean_a = mean(a);
    let mean_b = mean(b);

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        covariance += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let correlation = covariance / (var_a * var_b).sqrt();
    if !correlation.is_finite() {
        return Err(InsightError::DegenerateStatistic);
    }
    Ok(correlation.clamp(-1.0, 1.0))
}

/// Topic transitions `from -> to` that students tended to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Transition>", into = "Vec<Transition>")]
pub struct LearningPatterns {
    transitions: Vec<Transition>,
}

impl From<Vec<Transition>> for LearningPatterns {
    fn from(transitions: Vec<Transition>) -> Self {
        Self { transitions }
    }
}

impl From<LearningPatterns> for Vec<Transition> {
    fn from(patterns: LearningPatterns) -> Self {
        patterns.transitions
    }
}

impl LearningPatterns {
    pub const MIN_RECORDS: usize = 5;
    pub const MIN_OBSERVATIONS: usize = 3;
    pub const PASS_SCORE: f64 = 70.0;
    pub const MIN_SUCCESS_RATE: f64 = 0.7;

    pub fn build(histories: &[StudentHistory]) -> Self {
        let mut outcomes: Vec<((String, String), Vec<f64>)> = Vec::new();

        for history in histories.iter().filter(|h| h.len() >= Self::MIN_RECORDS) {
            for step in history.records().windows(2) {
                let key = (step[0].topic.clone(), step[1].topic.clone());
                let passed = if step[1].score >= Self::PASS_SCORE { 1.0 } else { 0.0 };
                match outcomes.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, seen)) => seen.push(passed),
                    None => outcomes.push((key, vec![passed])),
                }
            }
        }

        let transitions = outcomes
            .into_iter()
            .filter(|(_, seen)| seen.len() >= Self::MIN_OBSERVATIONS)
            .map(|((from, to), seen)| Transition {
                from,
                to,
                success_rate: mean(&seen),
            })
            .filter(|t| t.success_rate > Self::MIN_SUCCESS_RATE)
            .collect();

        Self { transitions }
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

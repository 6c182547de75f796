//! Arithmetic stand-ins for every trained model.
//!
//! Each function returns the same shape and value range as its model
//! counterpart so callers never need to know which one answered. The
//! behavior heuristic has its own label vocabulary ([`BehaviorProfile`]),
//! distinct from the trained classifier's.

use crate::features::{improvement_rate, mean, population_std};
use crate::models::{
    BehaviorAnalysis, BehaviorProfile, LearningPath, LearningStyle, PathStep, Recommendation,
    RiskLevel, StepKind, StudentHistory,
};
use crate::planner::{STRONG_TOPIC_SCORE, WEAK_TOPIC_SCORE};

/// Steps listed in a review-only path; the length still counts every topic.
const REVIEW_PATH_STEPS: usize = 5;

pub fn performance(history: &StudentHistory) -> f64 {
    mean(&history.scores())
}

pub fn risk(history: &StudentHistory) -> RiskLevel {
    RiskLevel::from_mean(performance(history))
}

pub fn behavior_profile(scores: &[f64]) -> BehaviorProfile {
    let avg = mean(scores);
    if population_std(scores) < 10.0 {
        BehaviorProfile::Consistent
    } else if avg > 80.0 {
        BehaviorProfile::HighAchiever
    } else if avg < 60.0 {
        BehaviorProfile::NeedsSupport
    } else {
        BehaviorProfile::Balanced
    }
}

pub fn behavior_analysis(history: &StudentHistory) -> BehaviorAnalysis {
    let scores = history.scores();
    let consistency = 1.0 - population_std(&scores) / 100.0;
    let engagement = mean(&scores) / 100.0;

    BehaviorAnalysis {
        learning_style: LearningStyle::Heuristic(behavior_profile(&scores)),
        consistency: consistency.clamp(0.3, 0.9),
        engagement: engagement.clamp(0.4, 0.95),
        improvement_rate: improvement_rate(history),
        recommendations: [
            "Maintain consistent study schedule",
            "Focus on weak areas identified",
            "Practice active learning techniques",
            "Set specific, achievable goals",
        ]
        .iter()
        .map(|item| item.to_string())
        .collect(),
    }
}

fn weak_and_strong_topics(history: &StudentHistory) -> (Vec<String>, Vec<String>) {
    let averages = history.topic_averages();
    let weak = averages
        .iter()
        .filter(|(_, avg)| *avg < WEAK_TOPIC_SCORE)
        .map(|(topic, _)| topic.clone())
        .collect();
    let strong = averages
        .iter()
        .filter(|(_, avg)| *avg > STRONG_TOPIC_SCORE)
        .map(|(topic, _)| topic.clone())
        .collect();
    (weak, strong)
}

/// Up to three "strengthen fundamentals" items followed by up to two
/// "build on strength" items.
pub fn content_recommendations(history: &StudentHistory) -> Vec<Recommendation> {
    let (weak, strong) = weak_and_strong_topics(history);

    let fundamentals = weak.iter().take(3).map(|topic| Recommendation {
        topic: topic.clone(),
        reason: format!("Focus on {topic} fundamentals to improve performance"),
        confidence: 0.8,
    });
    let extensions = strong.iter().take(2).map(|topic| Recommendation {
        topic: format!("Advanced {topic}"),
        reason: format!("Build on strong {topic} foundation"),
        confidence: 0.7,
    });

    fundamentals.chain(extensions).collect()
}

/// Review and practice for weak topics, advanced work for strong ones.
pub fn learning_path(history: &StudentHistory) -> LearningPath {
    let (weak, strong) = weak_and_strong_topics(history);

    let mut steps: Vec<PathStep> = weak
        .iter()
        .take(3)
        .map(|topic| PathStep::new(topic.clone(), StepKind::Review, "2-3 hours"))
        .collect();
    steps.extend(
        weak.iter()
            .take(2)
            .map(|topic| PathStep::new(format!("{topic} Practice"), StepKind::Practice, "1-2 hours")),
    );
    steps.extend(
        strong
            .iter()
            .take(2)
            .map(|topic| PathStep::new(format!("Advanced {topic}"), StepKind::Advanced, "3-4 hours")),
    );

    LearningPath {
        path_length: steps.len(),
        estimated_completion_time: format!("{} hours", steps.len() * 2),
        optimized_path: steps,
    }
}

/// Two hours of review for every topic studied, in first-seen order. Used
/// by the insights summary when no transition table exists.
pub fn review_path(history: &StudentHistory) -> LearningPath {
    let topics: Vec<String> = history
        .topic_scores()
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();

    LearningPath {
        optimized_path: topics
            .iter()
            .take(REVIEW_PATH_STEPS)
            .map(|topic| PathStep::new(topic.clone(), StepKind::Review, "2 hours"))
            .collect(),
        path_length: topics.len(),
        estimated_completion_time: format!("{} hours", topics.len() * 2),
    }
}

/// Without a grading model no grade can be estimated.
pub fn grade() -> f64 {
    0.0
}

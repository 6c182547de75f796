//! Content suggestions, learning paths and study plans.

use serde::Serialize;

use crate::models::{LearningPath, PathStep, Recommendation, StepKind, StudentHistory};
use crate::similarity::TopicSimilarity;

/// Topic means below this are weak.
pub const WEAK_TOPIC_SCORE: f64 = 70.0;
/// Topic means above this are strong.
pub const STRONG_TOPIC_SCORE: f64 = 85.0;
pub const NEEDS_WORK_SCORE: f64 = 60.0;
pub const MASTERED_SCORE: f64 = 80.0;
pub const MAX_RECOMMENDATIONS: usize = 5;
const WEAK_TOPIC_SIMILARITY: f64 = 0.5;
const TARGET_TOPIC_SIMILARITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mastery {
    Mastered,
    Developing,
    NeedsWork,
}

impl Mastery {
    pub fn from_average(avg: f64) -> Self {
        if avg >= MASTERED_SCORE {
            Mastery::Mastered
        } else if avg >= NEEDS_WORK_SCORE {
            Mastery::Developing
        } else {
            Mastery::NeedsWork
        }
    }
}

/// Topics with a mean score below 70, in order of first appearance.
pub fn weak_topics(history: &StudentHistory) -> Vec<String> {
    history
        .topic_averages()
        .into_iter()
        .filter(|(_, avg)| *avg < WEAK_TOPIC_SCORE)
        .map(|(topic, _)| topic)
        .collect()
}

/// Similar-topic suggestions, best first, at most five.
///
/// With a target topic, neighbours of that topic above 0.3 similarity are
/// suggested; otherwise neighbours above 0.5 of every weak topic.
pub fn recommend_content(
    history: &StudentHistory,
    similarity: &TopicSimilarity,
    target_topic: Option<&str>,
) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = match target_topic {
        Some(target) => similarity
            .neighbours(target)
            .filter(|pair| pair.similarity > TARGET_TOPIC_SIMILARITY)
            .map(|pair| Recommendation {
                topic: pair.topic_b.clone(),
                reason: format!("Similar to {target}"),
                confidence: pair.similarity,
            })
            .collect(),
        None => weak_topics(history)
            .iter()
            .flat_map(|weak| {
                similarity
                    .neighbours(weak)
                    .filter(|pair| pair.similarity > WEAK_TOPIC_SIMILARITY)
                    .map(move |pair| Recommendation {
                        topic: pair.topic_b.clone(),
                        reason: format!("Strengthen {weak}"),
                        confidence: pair.similarity,
                    })
            })
            .collect(),
    };

    // stable: equal confidences keep table order
    recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    recommendations.truncate(MAX_RECOMMENDATIONS);
    recommendations
}

/// Fixed prerequisite table: Advanced Mathematics and Physics both need
/// Mathematics.
pub fn prerequisites(target: &str, history: &StudentHistory) -> Vec<PathStep> {
    match target {
        "Advanced Mathematics" | "Physics" if !history.has_topic("Mathematics") => {
            vec![PathStep::new("Mathematics", StepKind::Prerequisite, "1 week")]
        }
        _ => Vec::new(),
    }
}

/// Ordered steps toward `targets`, or improvement steps for topics that
/// still need work when no targets are given.
pub fn plan_steps(history: &StudentHistory, targets: Option<&[String]>) -> Vec<PathStep> {
    match targets {
        Some(targets) if !targets.is_empty() => {
            let mut steps = Vec::new();
            for target in targets.iter().filter(|t| !history.has_topic(t)) {
                steps.extend(prerequisites(target, history));
                steps.push(PathStep::new(target.clone(), StepKind::Target, "2-3 weeks"));
            }
            steps
        }
        _ => history
            .topic_averages()
            .into_iter()
            .filter(|(_, avg)| Mastery::from_average(*avg) == Mastery::NeedsWork)
            .map(|(topic, _)| PathStep::new(topic, StepKind::Improvement, "1-2 weeks"))
            .collect(),
    }
}

pub fn learning_path(history: &StudentHistory, targets: Option<&[String]>) -> LearningPath {
    let steps = plan_steps(history, targets);
    LearningPath {
        path_length: steps.len(),
        estimated_completion_time: completion_time(&steps),
        optimized_path: steps,
    }
}

/// Sums the leading week count of every step, e.g. "2-3 weeks" counts 2.
pub fn completion_time(steps: &[PathStep]) -> String {
    let weeks: u32 = steps
        .iter()
        .filter(|step| step.estimated_time.contains("week"))
        .filter_map(|step| leading_number(&step.estimated_time))
        .sum();

    if weeks > 0 {
        format!("{weeks} weeks")
    } else {
        "Variable".to_string()
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn from_average(avg: f64) -> Self {
        if avg < 60.0 {
            Priority::High
        } else if avg < 75.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusArea {
    pub topic: String,
    pub current_performance: f64,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudySchedule {
    pub frequency: String,
    pub session_duration: String,
    pub breaks: String,
}

impl StudySchedule {
    pub fn for_mean(avg: f64) -> Self {
        let intensive = avg < WEAK_TOPIC_SCORE;
        Self {
            frequency: (if intensive { "4-5 times per week" } else { "3-4 times per week" }).to_string(),
            session_duration: (if intensive { "60-90 minutes" } else { "45-60 minutes" }).to_string(),
            breaks: "15-minute breaks every 45 minutes".to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            frequency: "Unknown".to_string(),
            session_duration: "Unknown".to_string(),
            breaks: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyPlan {
    pub learning_path: Vec<PathStep>,
    pub recommended_content: Vec<PathStep>,
    pub study_schedule: StudySchedule,
    pub focus_areas: Vec<FocusArea>,
    pub estimated_completion_time: String,
}

impl StudyPlan {
    pub fn degraded() -> Self {
        Self {
            learning_path: Vec::new(),
            recommended_content: Vec::new(),
            study_schedule: StudySchedule::unknown(),
            focus_areas: Vec::new(),
            estimated_completion_time: "Unknown".to_string(),
        }
    }
}

pub fn study_plan(history: &StudentHistory) -> StudyPlan {
    let averages = history.topic_averages();
    let overall = crate::features::mean(&history.scores());
    let weak = weak_topics(history);
    let strong_count = averages.iter().filter(|(_, avg)| *avg > STRONG_TOPIC_SCORE).count();

    let mut focus_areas: Vec<FocusArea> = averages
        .iter()
        .map(|(topic, avg)| FocusArea {
            topic: topic.clone(),
            current_performance: (avg * 10.0).round() / 10.0,
            priority: Priority::from_average(*avg),
        })
        .collect();
    focus_areas.sort_by(|a, b| b.priority.cmp(&a.priority));
    focus_areas.truncate(5);

    StudyPlan {
        learning_path: weak
            .iter()
            .take(3)
            .map(|topic| PathStep::new(topic.clone(), StepKind::Review, "2 hours"))
            .collect(),
        recommended_content: weak
            .iter()
            .take(2)
            .map(|topic| PathStep::new(topic.clone(), StepKind::Practice, "1 hour"))
            .collect(),
        study_schedule: StudySchedule::for_mean(overall),
        focus_areas,
        estimated_completion_time: format!("{} hours", weak.len() * 2 + strong_count),
    }
}

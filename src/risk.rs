use serde::Serialize;

use crate::features::{mean, population_std, population_variance};
use crate::models::{RiskLevel, StudentHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub overall_performance: f64,
    pub trend: TrendDirection,
    pub topic_performance: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeaknessAnalysis {
    pub topic: String,
    pub current_performance: f64,
    pub average_performance: f64,
    pub weakness_level: RiskLevel,
    pub improvement_suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub student_id: String,
    pub overall_performance: f64,
    pub trend: TrendDirection,
    pub weaknesses: Vec<WeaknessAnalysis>,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub trend_direction: TrendDirection,
    pub trend_strength: TrendStrength,
    pub recent_performance: Option<f64>,
}

fn percentage(score: f64, max: f64) -> f64 {
    if max > 0.0 {
        score / max * 100.0
    } else {
        0.0
    }
}

/// Overall and per-topic percentage of attainable points, plus a coarse
/// trend comparing the last three results against the earlier ones.
pub fn performance_metrics(history: &StudentHistory) -> PerformanceMetrics {
    let records = history.records();
    if records.is_empty() {
        return PerformanceMetrics {
            overall_performance: 0.0,
            trend: TrendDirection::Stable,
            topic_performance: Vec::new(),
        };
    }

    let total: f64 = records.iter().map(|r| r.score).sum();
    let total_max: f64 = records.iter().map(|r| r.max_score).sum();

    let mut topics: Vec<(String, f64, f64)> = Vec::new();
    for record in records {
        match topics.iter_mut().find(|(topic, _, _)| *topic == record.topic) {
            Some((_, score, max)) => {
                *score += record.score;
                *max += record.max_score;
            }
            None => topics.push((record.topic.clone(), record.score, record.max_score)),
        }
    }

    PerformanceMetrics {
        overall_performance: percentage(total, total_max),
        trend: normalized_trend(history),
        topic_performance: topics
            .into_iter()
            .map(|(topic, score, max)| (topic, percentage(score, max)))
            .collect(),
    }
}

fn normalized_trend(history: &StudentHistory) -> TrendDirection {
    let ratios: Vec<f64> = history
        .records()
        .iter()
        .map(|r| r.score / r.max_score)
        .collect();
    if ratios.len() < 2 {
        return TrendDirection::Stable;
    }

    let recent = &ratios[ratios.len().saturating_sub(3)..];
    let older = if ratios.len() > 3 {
        &ratios[..ratios.len() - 3]
    } else {
        &ratios[..1]
    };

    let (recent_avg, older_avg) = (mean(recent), mean(older));
    if recent_avg > older_avg + 0.1 {
        TrendDirection::Improving
    } else if recent_avg < older_avg - 0.1 {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

pub fn topic_suggestions(topic: &str, level: RiskLevel) -> Vec<String> {
    match level {
        RiskLevel::High => vec![
            format!("Focus on fundamental concepts in {topic}"),
            "Consider additional tutoring or study groups".to_string(),
            "Review basic materials before advanced topics".to_string(),
            "Practice with simpler problems first".to_string(),
        ],
        RiskLevel::Medium => vec![
            format!("Practice more {topic} problems regularly"),
            "Review past assignments and identify common mistakes".to_string(),
            "Seek clarification on challenging concepts".to_string(),
            "Use additional study resources".to_string(),
        ],
        RiskLevel::Low => vec![
            format!("Maintain current performance in {topic}"),
            "Challenge yourself with advanced problems".to_string(),
            "Help peers who struggle with this topic".to_string(),
        ],
    }
}

pub fn analyze_weaknesses(metrics: &PerformanceMetrics) -> Vec<WeaknessAnalysis> {
    metrics
        .topic_performance
        .iter()
        .map(|(topic, performance)| {
            let level = RiskLevel::from_mean(*performance);
            WeaknessAnalysis {
                topic: topic.clone(),
                current_performance: *performance,
                average_performance: *performance,
                weakness_level: level,
                improvement_suggestions: topic_suggestions(topic, level),
            }
        })
        .collect()
}

/// Escalates on low overall performance or on several badly weak topics.
pub fn determine_risk_level(overall: f64, weaknesses: &[WeaknessAnalysis]) -> RiskLevel {
    let high = weaknesses
        .iter()
        .filter(|w| w.weakness_level == RiskLevel::High)
        .count();

    if overall < 60.0 || high >= 2 {
        RiskLevel::High
    } else if overall < 75.0 || high >= 1 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn risk_recommendations(level: RiskLevel) -> Vec<String> {
    let items: &[&str] = match level {
        RiskLevel::High => &[
            "Consider meeting with academic advisor",
            "Focus on foundational topics first",
            "Increase study time significantly",
            "Seek additional support resources",
        ],
        RiskLevel::Medium => &[
            "Create a structured study plan",
            "Focus on identified weak areas",
            "Regular practice and review",
            "Consider study groups",
        ],
        RiskLevel::Low => &[
            "Maintain current study habits",
            "Continue challenging yourself",
            "Help peers when possible",
        ],
    };
    items.iter().map(|item| item.to_string()).collect()
}

pub fn analyze_performance(history: &StudentHistory) -> PerformanceReport {
    let metrics = performance_metrics(history);
    let weaknesses = analyze_weaknesses(&metrics);
    let risk_level = determine_risk_level(metrics.overall_performance, &weaknesses);

    PerformanceReport {
        student_id: history.student_id.clone(),
        overall_performance: metrics.overall_performance,
        trend: metrics.trend,
        weaknesses,
        recommendations: risk_recommendations(risk_level),
        risk_level,
    }
}

/// Direction and strength of the last three scores.
pub fn analyze_trends(history: &StudentHistory) -> TrendSummary {
    let scores = history.scores();
    if scores.len() < 3 {
        return TrendSummary {
            trend_direction: TrendDirection::InsufficientData,
            trend_strength: TrendStrength::Weak,
            recent_performance: None,
        };
    }

    let recent = &scores[scores.len() - 3..];
    let (first, last) = (recent[0], recent[2]);
    let trend_direction = if last > first {
        TrendDirection::Improving
    } else if last < first {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };

    let variance = population_variance(recent);
    let trend_strength = if variance > 100.0 {
        TrendStrength::Strong
    } else if variance > 50.0 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    };

    TrendSummary {
        trend_direction,
        trend_strength,
        recent_performance: Some(last),
    }
}

/// Confidence in a prediction, growing with history length and consistency.
pub fn prediction_confidence(history: &StudentHistory) -> f64 {
    let scores = history.scores();
    if scores.len() < 3 {
        return 50.0;
    }
    let consistency = 1.0 - population_std(&scores) / 100.0;
    let confidence = (50.0 + scores.len() as f64 * 2.0 + consistency * 20.0).min(95.0);
    confidence.round()
}

pub fn improvement_suggestions(history: &StudentHistory) -> Vec<String> {
    let mut suggestions = Vec::new();

    let weak = crate::planner::weak_topics(history);
    if !weak.is_empty() {
        suggestions.push(format!("Focus on improving: {}", weak.join(", ")));
    }
    if analyze_trends(history).trend_direction == TrendDirection::Declining {
        suggestions.push("Recent performance is declining, seek help.".to_string());
    }
    if mean(&history.scores()) < 60.0 {
        suggestions.push("Immediate intervention recommended.".to_string());
    }

    suggestions
}

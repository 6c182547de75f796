use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{PredictionSource, StudentHistory};
use crate::risk;
use crate::service::{ClassAnalysis, StudentAnalysis};

fn topic_list(topics: &[String]) -> String {
    if topics.is_empty() {
        "none".to_string()
    } else {
        topics.join(", ")
    }
}

/// Students most in need of attention first: high risk, then lowest mean.
pub fn rank_by_need(analysis: &ClassAnalysis) -> Vec<&StudentAnalysis> {
    let mut ranked: Vec<&StudentAnalysis> = analysis.student_analyses.iter().collect();
    ranked.sort_by(|a, b| {
        b.risk_level
            .class_index()
            .cmp(&a.risk_level.class_index())
            .then(a.overall_performance.total_cmp(&b.overall_performance))
    });
    ranked
}

pub fn build_report(
    scope: Option<&str>,
    generated_on: NaiveDate,
    analysis: &ClassAnalysis,
    histories: &[StudentHistory],
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all classes");
    let stats = &analysis.class_statistics;

    let _ = writeln!(output, "# Learning Insights Class Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} students)",
        scope_label, generated_on, analysis.total_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Overview");

    if analysis.student_analyses.is_empty() {
        let _ = writeln!(output, "No score records found for this scope.");
        return output;
    }

    let _ = writeln!(
        output,
        "- Average performance: {:.1}",
        stats.average_performance
    );
    let dist = &stats.performance_distribution;
    let _ = writeln!(
        output,
        "- Performance: {} excellent, {} good, {} average, {} struggling",
        dist.excellent, dist.good, dist.average, dist.struggling
    );
    let risk_dist = &stats.risk_distribution;
    let _ = writeln!(
        output,
        "- Risk: {} high, {} medium, {} low",
        risk_dist.high, risk_dist.medium, risk_dist.low
    );

    let heuristic = analysis
        .student_analyses
        .iter()
        .filter(|s| s.risk_source == PredictionSource::Heuristic)
        .count();
    if heuristic > 0 {
        let _ = writeln!(
            output,
            "- Risk for {heuristic} students estimated from score averages (no trained model)"
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    for student in rank_by_need(analysis).iter().take(10) {
        let _ = writeln!(
            output,
            "- {} ({} risk, {}) mean {:.1}; weak topics: {}",
            student.student_id,
            student.risk_level.as_str(),
            student.performance_level.as_str(),
            student.overall_performance,
            topic_list(&student.weak_topics)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Strengths");

    let mut any_strong = false;
    for student in analysis.student_analyses.iter() {
        if student.strong_topics.is_empty() {
            continue;
        }
        any_strong = true;
        let _ = writeln!(
            output,
            "- {}: {}",
            student.student_id,
            topic_list(&student.strong_topics)
        );
    }
    if !any_strong {
        let _ = writeln!(output, "No student averages 80 or more in any topic.");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Suggested Interventions");

    let mut any_suggestion = false;
    for history in histories {
        let suggestions = risk::improvement_suggestions(history);
        if suggestions.is_empty() {
            continue;
        }
        any_suggestion = true;
        let _ = writeln!(output, "- {}: {}", history.student_id, suggestions.join(" "));
    }
    if !any_suggestion {
        let _ = writeln!(output, "No interventions suggested.");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;
    use crate::models::ScoreRecord;
    use crate::service::InsightService;

    fn history(id: &str, rows: &[(&str, f64)]) -> StudentHistory {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (topic, score))| {
                ScoreRecord::new(
                    *topic,
                    *score,
                    100.0,
                    NaiveDate::from_ymd_opt(2026, 2, 1 + i as u32).unwrap(),
                    "exam",
                )
                .unwrap()
            })
            .collect();
        StudentHistory::new(id, records)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn report_lists_riskiest_students_first() {
        let histories = vec![
            history("class1_student1", &[("Mathematics", 91.0), ("Physics", 88.0)]),
            history("class1_student2", &[("Mathematics", 48.0), ("Physics", 52.0), ("Physics", 45.0)]),
            history("class1_student3", &[("Chemistry", 68.0), ("Biology", 72.0)]),
        ];
        let service = InsightService::new(ForestParams::default());
        let analysis = service.class_analysis(&histories);
        let report = build_report(Some("class1"), today(), &analysis, &histories);

        assert!(report.starts_with("# Learning Insights Class Report\n"));
        assert!(report.contains("Generated for class1 on 2026-03-01 (3 students)"));
        assert!(report.contains("- Risk: 1 high, 1 medium, 1 low"));
        assert!(report.contains("- Risk for 3 students estimated from score averages"));

        let attention = report.split("## Students Needing Attention").nth(1).unwrap();
        let student2 = attention.find("class1_student2").unwrap();
        let student3 = attention.find("class1_student3").unwrap();
        assert!(student2 < student3);
        assert!(report.contains("- class1_student1: Mathematics, Physics"));
        assert!(report.contains("Immediate intervention recommended."));
    }

    #[test]
    fn empty_class_reports_no_records() {
        let service = InsightService::new(ForestParams::default());
        let analysis = service.class_analysis(&[]);
        let report = build_report(None, today(), &analysis, &[]);
        assert!(report.contains("Generated for all classes"));
        assert!(report.contains("No score records found for this scope."));
    }
}

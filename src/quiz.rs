//! Practice quizzes built from a student's weak topics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::features::stable_hash;
use crate::models::StudentHistory;
use crate::planner::{NEEDS_WORK_SCORE, WEAK_TOPIC_SCORE};

pub const QUIZ_TIME_LIMIT_MINUTES: u32 = 30;
const TOPIC_QUESTION_POINTS: u32 = 10;
const GENERAL_QUESTION_POINTS: u32 = 15;
const OPTION_COUNT: u64 = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizQuestion {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
    pub points: u32,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizBody {
    pub questions: Vec<QuizQuestion>,
    pub total_questions: usize,
    pub time_limit: u32,
    pub difficulty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub title: String,
    pub description: String,
    pub questions: QuizBody,
    pub max_score: u32,
    pub weak_subjects: Vec<String>,
    pub course_title: String,
    pub generated_at: DateTime<Utc>,
}

/// What to build a quiz from, besides the history.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizRequest {
    pub quiz_type: String,
    pub course_title: String,
    pub difficulty: String,
}

/// Topics averaging below 60 get three questions, other weak topics two.
fn questions_for(avg: f64) -> usize {
    if avg < NEEDS_WORK_SCORE {
        3
    } else {
        2
    }
}

fn answer_index(seed: &str) -> usize {
    (stable_hash(seed) % OPTION_COUNT) as usize
}

fn topic_questions<'a>(
    topic: &'a str,
    avg: f64,
    kind: &str,
) -> impl Iterator<Item = QuizQuestion> + 'a {
    let kind = kind.to_string();
    (0..questions_for(avg)).map(move |i| QuizQuestion {
        question: format!(
            "Question {} about {topic}: What is the main concept in {topic}?",
            i + 1
        ),
        kind: kind.clone(),
        options: ["A", "B", "C", "D"]
            .iter()
            .map(|letter| format!("Option {letter} for {topic}"))
            .collect(),
        correct_answer: answer_index(&format!("{topic}#{i}")),
        points: TOPIC_QUESTION_POINTS,
        subject: topic.to_string(),
    })
}

fn general_questions(course_title: &str, kind: &str) -> [QuizQuestion; 2] {
    let options = |items: [&str; 4]| items.iter().map(|item| item.to_string()).collect();
    [
        QuizQuestion {
            question: format!(
                "General question about {course_title}: What is the primary focus of this course?"
            ),
            kind: kind.to_string(),
            options: options([
                "Understanding basic concepts",
                "Advanced problem solving",
                "Practical applications",
                "Theoretical foundations",
            ]),
            correct_answer: answer_index(course_title),
            points: GENERAL_QUESTION_POINTS,
            subject: "General".to_string(),
        },
        QuizQuestion {
            question: format!(
                "Another question about {course_title}: Which approach is most effective for learning this subject?"
            ),
            kind: kind.to_string(),
            options: options([
                "Memorization only",
                "Practice and application",
                "Reading textbooks only",
                "Avoiding difficult topics",
            ]),
            correct_answer: 1,
            points: GENERAL_QUESTION_POINTS,
            subject: "General".to_string(),
        },
    ]
}

/// Builds the same quiz for the same history, request and timestamp.
pub fn generate(history: &StudentHistory, request: &QuizRequest, generated_at: DateTime<Utc>) -> Quiz {
    let kind = request.quiz_type.to_lowercase();
    let weak: Vec<(String, f64)> = history
        .topic_averages()
        .into_iter()
        .filter(|(_, avg)| *avg < WEAK_TOPIC_SCORE)
        .collect();

    let mut questions: Vec<QuizQuestion> = weak
        .iter()
        .flat_map(|(topic, avg)| topic_questions(topic, *avg, &kind))
        .collect();
    questions.extend(general_questions(&request.course_title, &kind));

    let weak_subjects: Vec<String> = weak.into_iter().map(|(topic, _)| topic).collect();
    let scope = if weak_subjects.is_empty() {
        request.course_title.clone()
    } else {
        weak_subjects.join(", ")
    };

    Quiz {
        quiz_id: format!("quiz_{}", generated_at.timestamp()),
        title: format!("Quiz: {scope}"),
        description: format!("Personalized quiz based on weak subjects: {scope}"),
        max_score: questions.iter().map(|q| q.points).sum(),
        questions: QuizBody {
            total_questions: questions.len(),
            questions,
            time_limit: QUIZ_TIME_LIMIT_MINUTES,
            difficulty: request.difficulty.clone(),
        },
        weak_subjects,
        course_title: request.course_title.clone(),
        generated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreRecord;
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;

    fn history(rows: &[(&str, f64)]) -> StudentHistory {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (topic, score))| {
                ScoreRecord::new(
                    *topic,
                    *score,
                    100.0,
                    NaiveDate::from_ymd_opt(2024, 4, 1 + i as u32).unwrap(),
                    "quiz",
                )
                .unwrap()
            })
            .collect();
        StudentHistory::new("student1", records)
    }

    fn request() -> QuizRequest {
        QuizRequest {
            quiz_type: "Multiple_Choice".to_string(),
            course_title: "Physical Sciences".to_string(),
            difficulty: "adaptive".to_string(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 30, 0).unwrap()
    }

    #[test]
    fn weakest_topics_get_more_questions() {
        let h = history(&[
            ("Mathematics", 50.0),
            ("Physics", 65.0),
            ("Chemistry", 90.0),
            ("Mathematics", 58.0),
        ]);
        let quiz = generate(&h, &request(), at());

        assert_eq!(quiz.weak_subjects, vec!["Mathematics".to_string(), "Physics".to_string()]);
        let subjects: Vec<&str> = quiz
            .questions
            .questions
            .iter()
            .map(|q| q.subject.as_str())
            .collect();
        assert_eq!(
            subjects,
            vec!["Mathematics", "Mathematics", "Mathematics", "Physics", "Physics", "General", "General"]
        );
        assert_eq!(quiz.questions.total_questions, 7);
        assert_eq!(quiz.max_score, 80);
        assert_eq!(quiz.title, "Quiz: Mathematics, Physics");
        assert_eq!(quiz.questions.time_limit, 30);
        assert!(quiz.questions.questions.iter().all(|q| q.kind == "multiple_choice"));
        assert!(quiz.questions.questions.iter().all(|q| q.correct_answer < 4 && q.options.len() == 4));
        assert_eq!(quiz.questions.questions[6].correct_answer, 1);
    }

    #[test]
    fn quiz_is_reproducible() {
        let h = history(&[("Biology", 40.0), ("Biology", 62.0)]);
        let first = generate(&h, &request(), at());
        let second = generate(&h, &request(), at());
        assert_eq!(first, second);
        assert_eq!(first.quiz_id, format!("quiz_{}", at().timestamp()));
    }

    #[test]
    fn strong_student_gets_course_questions_only() {
        let h = history(&[("Mathematics", 88.0), ("Physics", 92.0)]);
        let quiz = generate(&h, &request(), at());
        assert!(quiz.weak_subjects.is_empty());
        assert_eq!(quiz.questions.total_questions, 2);
        assert_eq!(quiz.max_score, 30);
        assert_eq!(quiz.title, "Quiz: Physical Sciences");
    }
}

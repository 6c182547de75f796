use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{ScoreRecord, StudentHistory, DEFAULT_MAX_SCORE};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    external_id: &str,
    full_name: &str,
    class_name: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO learning_insights.students (id, external_id, full_name, class_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (external_id) DO UPDATE
        SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(external_id)
    .bind(full_name)
    .bind(class_name)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

/// Returns whether the row was new; an already imported `source_key` is skipped.
async fn insert_score(
    pool: &PgPool,
    student_id: Uuid,
    record: &ScoreRecord,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO learning_insights.score_records
        (id, student_id, topic, score, max_score, assessed_on, assignment_type, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(&record.topic)
    .bind(record.score)
    .bind(record.max_score)
    .bind(record.date)
    .bind(&record.assignment_type)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = [
        ("class1_student1", "Avery Lee", "class1"),
        ("class1_student2", "Jules Moreno", "class1"),
        ("class2_student1", "Kiara Patel", "class2"),
    ];

    let scores = [
        ("seed-001", "class1_student1", "Mathematics", 85.0, "quiz", (2026, 1, 6)),
        ("seed-002", "class1_student1", "Mathematics", 78.0, "exam", (2026, 1, 13)),
        ("seed-003", "class1_student1", "Physics", 92.0, "lab", (2026, 1, 20)),
        ("seed-004", "class1_student1", "Physics", 65.0, "quiz", (2026, 1, 27)),
        ("seed-005", "class1_student1", "Chemistry", 88.0, "project", (2026, 2, 3)),
        ("seed-006", "class1_student2", "Mathematics", 55.0, "quiz", (2026, 1, 7)),
        ("seed-007", "class1_student2", "Biology", 62.0, "assignment", (2026, 1, 14)),
        ("seed-008", "class1_student2", "Mathematics", 58.0, "exam", (2026, 1, 21)),
        ("seed-009", "class1_student2", "Physics", 49.0, "lab", (2026, 1, 28)),
        ("seed-010", "class2_student1", "Chemistry", 71.0, "quiz", (2026, 1, 8)),
        ("seed-011", "class2_student1", "Biology", 76.0, "assignment", (2026, 1, 15)),
        ("seed-012", "class2_student1", "Chemistry", 83.0, "exam", (2026, 1, 22)),
        ("seed-013", "class2_student1", "Mathematics", 90.0, "project", (2026, 1, 29)),
    ];

    for (external_id, name, class_name) in students {
        upsert_student(pool, external_id, name, class_name).await?;
    }

    let mut inserted = 0usize;
    for (source_key, external_id, topic, score, assignment_type, (y, m, d)) in scores {
        let student_id: Uuid =
            sqlx::query("SELECT id FROM learning_insights.students WHERE external_id = $1")
                .bind(external_id)
                .fetch_one(pool)
                .await?
                .get("id");

        let date = NaiveDate::from_ymd_opt(y, m, d).context("invalid date")?;
        let record = ScoreRecord::new(topic, score, DEFAULT_MAX_SCORE, date, assignment_type)?;
        if insert_score(pool, student_id, &record, source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Folds rows ordered by student into one history per student, keeping the
/// order in which students first appear.
pub fn group_histories(rows: Vec<(String, ScoreRecord)>) -> Vec<StudentHistory> {
    let mut grouped: Vec<(String, Vec<ScoreRecord>)> = Vec::new();
    for (student_id, record) in rows {
        match grouped.last_mut() {
            Some((current, records)) if *current == student_id => records.push(record),
            _ => grouped.push((student_id, vec![record])),
        }
    }
    grouped
        .into_iter()
        .map(|(student_id, records)| StudentHistory::new(student_id, records))
        .collect()
}

pub async fn fetch_histories(
    pool: &PgPool,
    class_name: Option<&str>,
    student: Option<&str>,
) -> anyhow::Result<Vec<StudentHistory>> {
    let mut query = String::from(
        "SELECT st.external_id, r.topic, r.score, r.max_score, r.assessed_on, r.assignment_type \
         FROM learning_insights.score_records r \
         JOIN learning_insights.students st ON st.id = r.student_id",
    );

    if class_name.is_some() {
        query.push_str(" WHERE st.class_name = $1");
    } else if student.is_some() {
        query.push_str(" WHERE st.external_id = $1");
    }
    query.push_str(" ORDER BY st.external_id, r.assessed_on, r.created_at");

    let mut rows = sqlx::query(&query);
    if let Some(value) = class_name.or(student) {
        rows = rows.bind(value);
    }

    let records = rows
        .fetch_all(pool)
        .await
        .context("failed to fetch score records")?;

    let mut pairs: Vec<(String, ScoreRecord)> = Vec::with_capacity(records.len());
    for row in records {
        let record = ScoreRecord::new(
            row.get::<String, _>("topic"),
            row.get("score"),
            row.get("max_score"),
            row.get("assessed_on"),
            row.get::<String, _>("assignment_type"),
        )?;
        pairs.push((row.get("external_id"), record));
    }

    Ok(group_histories(pairs))
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    student_id: String,
    full_name: String,
    class_name: String,
    topic: String,
    score: f64,
    max_score: Option<f64>,
    date: NaiveDate,
    assignment_type: Option<String>,
    source_key: Option<String>,
}

impl CsvRow {
    fn to_record(&self) -> anyhow::Result<ScoreRecord> {
        let record = ScoreRecord::new(
            self.topic.clone(),
            self.score,
            self.max_score.unwrap_or(DEFAULT_MAX_SCORE),
            self.date,
            self.assignment_type
                .clone()
                .unwrap_or_else(|| "assignment".to_string()),
        )?;
        Ok(record)
    }
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let record = row.to_record()?;
        let student_id = upsert_student(pool, &row.student_id, &row.full_name, &row.class_name).await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_score(pool, student_id, &record, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

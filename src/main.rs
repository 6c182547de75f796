use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod config;
mod db;
mod error;
mod fallback;
mod features;
mod forest;
mod logging;
mod models;
mod planner;
mod predictors;
mod quiz;
mod report;
mod risk;
mod service;
mod similarity;
mod snapshot;

use crate::config::InsightsConfig;
use crate::models::StudentHistory;
use crate::predictors::Assessment;
use crate::service::InsightService;

#[derive(Parser)]
#[command(name = "learning-insights")]
#[command(about = "Student performance insights and learning paths for Group Scholar", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small fixed set of score records
    Seed,
    /// Import score records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Train every model family and save the snapshot
    #[command(group(
        ArgGroup::new("source")
            .args(["data", "from_db"])
            .multiple(false)
    ))]
    Train {
        /// Training JSON, defaults to the configured training data path
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        from_db: bool,
    },
    /// Show which model families are trained
    Status,
    /// Comprehensive insights for one student
    Insights {
        #[arg(long)]
        student: String,
        /// Read histories from a training JSON file instead of Postgres
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Estimate the grade of an assessment
    Grade {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "assignment")]
        assignment_type: String,
        #[arg(long, default_value_t = 100.0)]
        max_score: f64,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Plan a learning path for one student
    Path {
        #[arg(long)]
        student: String,
        /// Target topics, repeatable
        #[arg(long = "target")]
        targets: Vec<String>,
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Build a practice quiz from a student's weak topics
    Quiz {
        #[arg(long)]
        student: String,
        #[arg(long, default_value = "multiple_choice")]
        quiz_type: String,
        #[arg(long, default_value = "General Studies")]
        course: String,
        #[arg(long, default_value = "adaptive")]
        difficulty: String,
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Generate a markdown class report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_training_file(path: &Path) -> anyhow::Result<Vec<StudentHistory>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read training data {}", path.display()))?;
    let histories = models::parse_training_set(&json)
        .with_context(|| format!("invalid training data {}", path.display()))?;
    Ok(histories)
}

/// Histories from a training file when one is given, from Postgres otherwise.
async fn load_histories(
    data: Option<&Path>,
    class_name: Option<&str>,
    student: Option<&str>,
) -> anyhow::Result<Vec<StudentHistory>> {
    match data {
        Some(path) => {
            let histories = read_training_file(path)?;
            Ok(histories
                .into_iter()
                .filter(|h| student.map_or(true, |id| h.student_id == id))
                .filter(|h| class_name.map_or(true, |class| h.student_id.starts_with(&format!("{class}_"))))
                .collect())
        }
        None => {
            let pool = connect().await?;
            db::fetch_histories(&pool, class_name, student).await
        }
    }
}

async fn find_student(data: Option<&Path>, student: &str) -> anyhow::Result<StudentHistory> {
    let histories = load_histories(data, None, Some(student)).await?;
    match histories.into_iter().next() {
        Some(history) => Ok(history),
        None => bail!("no score records found for student {student}"),
    }
}

/// Trains from the configured training file the first time a trained model
/// is needed and none is available yet.
fn warm_up(service: &InsightService, config: &InsightsConfig) -> anyhow::Result<()> {
    let path = config.storage.training_data_path.clone();
    if !path.exists() {
        info!(path = %path.display(), "no training data, using heuristics");
        return Ok(());
    }

    service.ensure_trained(|| {
        let json = std::fs::read_to_string(&path)?;
        models::parse_training_set(&json)
    })?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = InsightsConfig::load(cli.config.as_deref())?;
    logging::init_logging(&config.logging.level);

    let service = InsightService::load(config.forest, &config.storage.snapshot_path);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new score records).");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} score records from {}.", csv.display());
        }
        Commands::Train { data, from_db } => {
            let histories = if from_db {
                let pool = connect().await?;
                db::fetch_histories(&pool, None, None).await?
            } else {
                let path = data.unwrap_or_else(|| config.storage.training_data_path.clone());
                read_training_file(&path)?
            };

            let report = service.train(&histories)?;
            println!(
                "Trained on {} students ({} score records).",
                report.students, report.score_rows
            );
            println!("Trained: {}", report.trained.join(", "));
            if !report.skipped.is_empty() {
                println!(
                    "Not enough data for: {} (previous models kept)",
                    report.skipped.join(", ")
                );
            }
            println!(
                "Topic similarity pairs: {}, successful transitions: {}",
                report.similarity_pairs, report.transitions
            );

            let bundle = service.bundle();
            if let Some(table) = &bundle.topic_similarity {
                let mut strongest = table.pairs().to_vec();
                strongest.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
                for pair in strongest.iter().take(5) {
                    println!(
                        "- {} ~ {} similarity {:.2}",
                        pair.topic_a, pair.topic_b, pair.similarity
                    );
                }
            }
            if let Some(patterns) = &bundle.learning_patterns {
                for transition in patterns.transitions().iter().take(5) {
                    println!(
                        "- {} -> {} passed {:.0}% of the time",
                        transition.from,
                        transition.to,
                        transition.success_rate * 100.0
                    );
                }
            }
            println!(
                "Snapshot written to {}.",
                config.storage.snapshot_path.display()
            );
        }
        Commands::Status => {
            let status = service.status();
            if !status.all_trained() {
                info!("untrained families answer from heuristics");
            }
            print_json(&status)?;
        }
        Commands::Insights { student, data } => {
            let history = find_student(data.as_deref(), &student).await?;
            warm_up(&service, &config)?;

            print_json(&serde_json::json!({
                "comprehensive_insights": service.comprehensive_insights(&history),
                "performance_analysis": risk::analyze_performance(&history),
                "trend_analysis": risk::analyze_trends(&history),
                "prediction_confidence": risk::prediction_confidence(&history),
                "improvement_suggestions": risk::improvement_suggestions(&history),
            }))?;
        }
        Commands::Grade {
            topic,
            assignment_type,
            max_score,
            date,
        } => {
            warm_up(&service, &config)?;
            let estimate = service.grade(&Assessment {
                topic,
                assignment_type,
                max_score,
                date: date.unwrap_or_else(|| Local::now().date_naive()),
            });
            print_json(&estimate)?;
        }
        Commands::Path {
            student,
            targets,
            data,
        } => {
            let history = find_student(data.as_deref(), &student).await?;
            warm_up(&service, &config)?;

            let targets = (!targets.is_empty()).then_some(targets);
            let path = service.learning_path(&history, targets.as_deref());
            let target_topic = targets.as_ref().and_then(|t| t.first()).map(String::as_str);

            print_json(&serde_json::json!({
                "learning_path": path,
                "content_recommendations": service.content_recommendations(&history, target_topic),
                "study_plan": service.study_plan(&history),
            }))?;
        }
        Commands::Quiz {
            student,
            quiz_type,
            course,
            difficulty,
            data,
        } => {
            let history = find_student(data.as_deref(), &student).await?;
            let request = quiz::QuizRequest {
                quiz_type,
                course_title: course,
                difficulty,
            };
            print_json(&quiz::generate(&history, &request, Utc::now()))?;
        }
        Commands::Report { class, data, out } => {
            let histories = load_histories(data.as_deref(), class.as_deref(), None).await?;
            warm_up(&service, &config)?;

            let analysis = service.class_analysis(&histories);
            let report = report::build_report(
                class.as_deref(),
                Local::now().date_naive(),
                &analysis,
                &histories,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

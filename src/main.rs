use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use assessment_coverage::config::DatabaseConfig;
use assessment_coverage::coverage::{compute_matrix, Term};
use assessment_coverage::models::{Assessment, StudentRef, StudentStatusResult};
use assessment_coverage::status::{compute_status, DEFAULT_TOTAL_COMPETENCE_GOALS};
use assessment_coverage::{db, report};

#[derive(Parser)]
#[command(name = "assessment-coverage")]
#[command(about = "Assessment status and competence goal coverage for school classes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with goals and assessments
    Seed,
    /// Import assessments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import competence goals from a CSV file
    ImportGoals {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show readiness status for the students of a class
    Status {
        #[arg(long)]
        class: String,
        /// Only this student
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TOTAL_COMPETENCE_GOALS)]
        total_goals: u32,
        /// Evaluate as of this day instead of today (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Show the competence goal coverage matrix of a class
    Matrix {
        #[arg(long)]
        class: String,
        #[arg(long, default_value_t = Term::All)]
        term: Term,
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report for a class
    Report {
        #[arg(long)]
        class: String,
        #[arg(long, default_value_t = Term::All)]
        term: Term,
        #[arg(long, default_value_t = DEFAULT_TOTAL_COMPETENCE_GOALS)]
        total_goals: u32,
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let config = DatabaseConfig::from_env()?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("failed to connect to Postgres")
}

fn assessments_of(assessments: &[Assessment], student: &StudentRef) -> Vec<Assessment> {
    assessments
        .iter()
        .filter(|a| a.student_id == student.id)
        .cloned()
        .collect()
}

#[derive(Serialize)]
struct StudentStatusView<'a> {
    student: &'a StudentRef,
    #[serde(flatten)]
    result: &'a StudentStatusResult,
}

fn student_statuses(
    students: Vec<StudentRef>,
    assessments: &[Assessment],
    total_goals: u32,
    today: NaiveDate,
) -> Vec<(StudentRef, StudentStatusResult)> {
    students
        .into_iter()
        .map(|student| {
            let own = assessments_of(assessments, &student);
            let result = compute_status(&own, total_goals, today);
            (student, result)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let pool = connect().await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} assessments from {}.", csv.display());
        }
        Commands::ImportGoals { csv } => {
            let written = db::import_goals_csv(&pool, &csv).await?;
            println!("Wrote {written} competence goals from {}.", csv.display());
        }
        Commands::Status {
            class,
            email,
            total_goals,
            today,
            json,
        } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let class = db::fetch_class(&pool, &class).await?;
            let students = match email.as_deref() {
                Some(email) => vec![db::fetch_student_by_email(&pool, email).await?],
                None => db::fetch_class_students(&pool, class.id).await?,
            };
            let student_filter = email
                .is_some()
                .then(|| students.first().map(|student| student.id))
                .flatten();
            let assessments = db::fetch_assessments(&pool, class.id, student_filter).await?;
            let statuses = student_statuses(students, &assessments, total_goals, today);

            if json {
                let views: Vec<StudentStatusView<'_>> = statuses
                    .iter()
                    .map(|(student, result)| StudentStatusView { student, result })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
                return Ok(());
            }

            if statuses.is_empty() {
                println!("No students found in {}.", class.name);
                return Ok(());
            }

            println!("Student status in {} as of {today}:", class.name);
            for (student, result) in &statuses {
                println!(
                    "- {} {} ({} assessments, {} written, {} oral, coverage {}%)",
                    student.name,
                    result.status,
                    result.assessment_count,
                    result.written_count,
                    result.oral_count,
                    result.competence_coverage
                );
                for warning in &result.warnings {
                    println!("    {}", warning.message);
                }
            }
        }
        Commands::Matrix {
            class,
            term,
            today,
            json,
        } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let class = db::fetch_class(&pool, &class).await?;
            let students = db::fetch_class_students(&pool, class.id).await?;
            let goals = db::fetch_goals(&pool, &class.subject, class.grade_level).await?;
            let assessments = db::fetch_assessments(&pool, class.id, None).await?;
            let matrix = compute_matrix(&students, &goals, &assessments, term, today);

            if json {
                println!("{}", serde_json::to_string_pretty(&matrix)?);
                return Ok(());
            }

            println!(
                "Coverage in {} for {} ({} to {}): {}% assessed, {} outdated, {} missing",
                class.name,
                term,
                matrix.window.start,
                matrix.window.end,
                matrix.summary.coverage,
                matrix.summary.outdated,
                matrix.summary.missing
            );
            for row in &matrix.rows {
                let cells: Vec<String> = matrix
                    .goals
                    .iter()
                    .zip(&row.cells)
                    .map(|(goal, state)| format!("{}={}", goal.code, state))
                    .collect();
                println!("- {}: {}", row.student.name, cells.join(", "));
            }
        }
        Commands::Report {
            class,
            term,
            total_goals,
            today,
            out,
        } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let class = db::fetch_class(&pool, &class).await?;
            let students = db::fetch_class_students(&pool, class.id).await?;
            let goals = db::fetch_goals(&pool, &class.subject, class.grade_level).await?;
            let assessments = db::fetch_assessments(&pool, class.id, None).await?;

            let matrix = compute_matrix(&students, &goals, &assessments, term, today);
            let statuses = student_statuses(students, &assessments, total_goals, today);
            let report = report::build_report(&class, today, &statuses, &matrix);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

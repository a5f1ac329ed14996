use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Assessment, AssessmentForm, AssessmentType, ClassGroup, CompetenceGoal, StudentRef, MAX_GRADE,
    MIN_GRADE,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}

/// An assessment as it arrives from seed data or a CSV file, before ids and
/// goal links are resolved.
struct NewAssessment<'a> {
    student_id: Uuid,
    class_group_id: Uuid,
    assessed_on: NaiveDate,
    assessment_type: AssessmentType,
    form: AssessmentForm,
    grade: Option<u8>,
    source_key: &'a str,
}

async fn upsert_student(conn: &mut PgConnection, name: &str, email: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO assessment_coverage.students (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_class_group(
    conn: &mut PgConnection,
    name: &str,
    subject: &str,
    grade_level: i32,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO assessment_coverage.class_groups (id, name, subject, grade_level)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
        SET subject = EXCLUDED.subject, grade_level = EXCLUDED.grade_level
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(subject)
    .bind(grade_level)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

/// Appends the student to the end of the class list unless already a member.
async fn add_member(
    conn: &mut PgConnection,
    class_group_id: Uuid,
    student_id: Uuid,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assessment_coverage.class_members (class_group_id, student_id, position)
        SELECT $1, $2, COALESCE(MAX(position), -1) + 1
        FROM assessment_coverage.class_members
        WHERE class_group_id = $1
        ON CONFLICT (class_group_id, student_id) DO NOTHING
        "#,
    )
    .bind(class_group_id)
    .bind(student_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_goal(
    conn: &mut PgConnection,
    subject: &str,
    grade_level: i32,
    code: &str,
    area: &str,
    description: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO assessment_coverage.competence_goals
        (id, subject, grade_level, code, area, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (subject, grade_level, code) DO UPDATE
        SET area = EXCLUDED.area, description = EXCLUDED.description
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subject)
    .bind(grade_level)
    .bind(code)
    .bind(area)
    .bind(description)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns the new id, or `None` when `source_key` was already imported.
async fn insert_assessment(
    conn: &mut PgConnection,
    new: &NewAssessment<'_>,
) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query(
        r#"
        INSERT INTO assessment_coverage.assessments
        (id, student_id, class_group_id, assessed_on, assessment_type, form, grade, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.student_id)
    .bind(new.class_group_id)
    .bind(new.assessed_on)
    .bind(new.assessment_type.as_str())
    .bind(new.form.as_str())
    .bind(new.grade.map(i16::from))
    .bind(new.source_key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|row| row.get("id")))
}

/// Links goals by code within the class's subject and grade level. Unknown
/// codes are logged and skipped.
async fn link_goal_codes(
    conn: &mut PgConnection,
    assessment_id: Uuid,
    subject: &str,
    grade_level: i32,
    codes: &[&str],
) -> anyhow::Result<usize> {
    let mut linked = 0usize;
    for code in codes {
        let goal_id: Option<Uuid> = sqlx::query(
            r#"
            SELECT id FROM assessment_coverage.competence_goals
            WHERE subject = $1 AND grade_level = $2 AND code = $3
            "#,
        )
        .bind(subject)
        .bind(grade_level)
        .bind(*code)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.get("id"));

        let Some(goal_id) = goal_id else {
            tracing::warn!(%subject, grade_level, %code, "unknown competence goal code, link skipped");
            continue;
        };

        sqlx::query(
            r#"
            INSERT INTO assessment_coverage.assessment_goal_links (assessment_id, goal_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(assessment_id)
        .bind(goal_id)
        .execute(&mut *conn)
        .await?;
        linked += 1;
    }
    Ok(linked)
}

fn split_goal_codes(raw: Option<&str>) -> Vec<&str> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .collect()
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    const SUBJECT: &str = "MAT";
    const GRADE_LEVEL: i32 = 9;

    let goals = [
        ("MAT-01", "Numbers and algebra", "Explore and describe structures in number patterns"),
        ("MAT-02", "Numbers and algebra", "Formulate and solve problems using algebra"),
        ("MAT-03", "Geometry", "Explore properties of polygons and use them in problem solving"),
        ("MAT-04", "Functions", "Model situations with linear functions and interpret the model"),
        ("MAT-05", "Statistics", "Collect data and present it with suitable representations"),
    ];

    let students = [
        ("Sigrid Haugen", "sigrid.haugen@example.no"),
        ("Jonas Berg", "jonas.berg@example.no"),
        ("Amina Yusuf", "amina.yusuf@example.no"),
    ];

    let today = Utc::now().date_naive();
    let assessments: [(&str, usize, i64, AssessmentType, AssessmentForm, Option<u8>, &[&str]); 7] = [
        ("seed-001", 0, 12, AssessmentType::Ongoing, AssessmentForm::Written, Some(5), &["MAT-01", "MAT-02"]),
        ("seed-002", 0, 40, AssessmentType::Midterm, AssessmentForm::Written, Some(4), &["MAT-03"]),
        ("seed-003", 0, 20, AssessmentType::Ongoing, AssessmentForm::Oral, Some(5), &["MAT-04"]),
        ("seed-004", 1, 75, AssessmentType::Ongoing, AssessmentForm::Written, Some(3), &["MAT-01"]),
        ("seed-005", 1, 95, AssessmentType::Ongoing, AssessmentForm::Written, None, &["MAT-05"]),
        ("seed-006", 2, 6, AssessmentType::Ongoing, AssessmentForm::Practical, Some(4), &["MAT-03"]),
        ("seed-007", 2, 30, AssessmentType::Ongoing, AssessmentForm::OralPractical, None, &[]),
    ];

    let mut tx = pool.begin().await?;
    let class_group_id = upsert_class_group(&mut tx, "9A Mathematics", SUBJECT, GRADE_LEVEL).await?;

    for (code, area, description) in goals {
        upsert_goal(&mut tx, SUBJECT, GRADE_LEVEL, code, area, description).await?;
    }

    let mut student_ids = Vec::with_capacity(students.len());
    for (name, email) in students {
        let student_id = upsert_student(&mut tx, name, email).await?;
        add_member(&mut tx, class_group_id, student_id).await?;
        student_ids.push(student_id);
    }

    for (source_key, student, days_ago, assessment_type, form, grade, codes) in assessments {
        let new = NewAssessment {
            student_id: student_ids[student],
            class_group_id,
            assessed_on: today - Duration::days(days_ago),
            assessment_type,
            form,
            grade,
            source_key,
        };
        if let Some(assessment_id) = insert_assessment(&mut tx, &new).await? {
            link_goal_codes(&mut tx, assessment_id, SUBJECT, GRADE_LEVEL, codes).await?;
        }
    }

    tx.commit().await?;
    tracing::info!(students = student_ids.len(), goals = goals.len(), "seed data written");
    Ok(())
}

pub async fn fetch_class(pool: &PgPool, name: &str) -> anyhow::Result<ClassGroup> {
    let row = sqlx::query(
        r#"
        SELECT id, name, subject, grade_level
        FROM assessment_coverage.class_groups
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("class group '{name}' not found"))?;

    Ok(ClassGroup {
        id: row.get("id"),
        name: row.get("name"),
        subject: row.get("subject"),
        grade_level: row.get("grade_level"),
    })
}

/// Students of a class in class-list order.
pub async fn fetch_class_students(
    pool: &PgPool,
    class_group_id: Uuid,
) -> anyhow::Result<Vec<StudentRef>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.full_name
        FROM assessment_coverage.class_members m
        JOIN assessment_coverage.students s ON s.id = m.student_id
        WHERE m.class_group_id = $1
        ORDER BY m.position, s.full_name
        "#,
    )
    .bind(class_group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentRef {
            id: row.get("id"),
            name: row.get("full_name"),
        })
        .collect())
}

pub async fn fetch_student_by_email(pool: &PgPool, email: &str) -> anyhow::Result<StudentRef> {
    let row = sqlx::query("SELECT id, full_name FROM assessment_coverage.students WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no student with email '{email}'"))?;

    Ok(StudentRef {
        id: row.get("id"),
        name: row.get("full_name"),
    })
}

pub async fn fetch_goals(
    pool: &PgPool,
    subject: &str,
    grade_level: i32,
) -> anyhow::Result<Vec<CompetenceGoal>> {
    let rows = sqlx::query(
        r#"
        SELECT id, code, area, description, subject, grade_level
        FROM assessment_coverage.competence_goals
        WHERE subject = $1 AND grade_level = $2
        "#,
    )
    .bind(subject)
    .bind(grade_level)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CompetenceGoal {
            id: row.get("id"),
            code: row.get("code"),
            area: row.get("area"),
            description: row.get("description"),
            subject: row.get("subject"),
            grade_level: row.get("grade_level"),
        })
        .collect())
}

/// Assessments recorded in a class, optionally narrowed to one student, with
/// their linked goal ids.
pub async fn fetch_assessments(
    pool: &PgPool,
    class_group_id: Uuid,
    student_id: Option<Uuid>,
) -> anyhow::Result<Vec<Assessment>> {
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.student_id, a.class_group_id, a.assessed_on,
               a.assessment_type, a.form, a.grade,
               COALESCE(
                   array_agg(l.goal_id) FILTER (WHERE l.goal_id IS NOT NULL),
                   ARRAY[]::uuid[]
               ) AS goal_ids
        FROM assessment_coverage.assessments a
        LEFT JOIN assessment_coverage.assessment_goal_links l ON l.assessment_id = a.id
        WHERE a.class_group_id = $1
          AND ($2::uuid IS NULL OR a.student_id = $2)
        GROUP BY a.id
        ORDER BY a.assessed_on
        "#,
    )
    .bind(class_group_id)
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let assessments = rows
        .iter()
        .map(assessment_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;
    tracing::debug!(count = assessments.len(), %class_group_id, "fetched assessments");
    Ok(assessments)
}

fn assessment_from_row(row: &PgRow) -> anyhow::Result<Assessment> {
    let id: Uuid = row.get("id");
    let assessment_type: String = row.get("assessment_type");
    let form: String = row.get("form");
    let grade: Option<i16> = row.get("grade");

    let assessment = Assessment {
        id,
        student_id: row.get("student_id"),
        class_group_id: row.get("class_group_id"),
        date: row.get("assessed_on"),
        assessment_type: assessment_type.parse()?,
        form: form.parse()?,
        grade: grade
            .map(u8::try_from)
            .transpose()
            .with_context(|| format!("assessment {id} has a negative grade"))?,
        competence_goal_ids: row.get("goal_ids"),
    };
    assessment
        .validate()
        .with_context(|| format!("assessment {id} failed validation"))?;
    Ok(assessment)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_name: String,
        student_email: String,
        class_name: String,
        subject: String,
        grade_level: i32,
        assessed_on: NaiveDate,
        assessment_type: String,
        form: String,
        grade: Option<u8>,
        goal_codes: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("invalid CSV row at line {line}"))?;
        let assessment_type: AssessmentType = row
            .assessment_type
            .parse()
            .with_context(|| format!("line {line}"))?;
        let form: AssessmentForm = row.form.parse().with_context(|| format!("line {line}"))?;
        if let Some(grade) = row.grade {
            anyhow::ensure!(
                (MIN_GRADE..=MAX_GRADE).contains(&grade),
                "line {line}: grade {grade} is outside {MIN_GRADE}..={MAX_GRADE}"
            );
        }

        let student_id = upsert_student(&mut tx, &row.student_name, &row.student_email).await?;
        let class_group_id =
            upsert_class_group(&mut tx, &row.class_name, &row.subject, row.grade_level).await?;
        add_member(&mut tx, class_group_id, student_id).await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let new = NewAssessment {
            student_id,
            class_group_id,
            assessed_on: row.assessed_on,
            assessment_type,
            form,
            grade: row.grade,
            source_key: &source_key,
        };

        if let Some(assessment_id) = insert_assessment(&mut tx, &new).await? {
            let codes = split_goal_codes(row.goal_codes.as_deref());
            link_goal_codes(&mut tx, assessment_id, &row.subject, row.grade_level, &codes).await?;
            inserted += 1;
        } else {
            tracing::debug!(%source_key, "assessment already imported");
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Loads competence goals from a CSV with columns
/// `subject,grade_level,code,area,description`.
pub async fn import_goals_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct GoalRow {
        subject: String,
        grade_level: i32,
        code: String,
        area: String,
        description: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;
    let mut written = 0usize;

    for result in reader.deserialize::<GoalRow>() {
        let row = result?;
        if upsert_goal(
            &mut tx,
            &row.subject,
            row.grade_level,
            &row.code,
            &row.area,
            &row.description,
        )
        .await?
        {
            written += 1;
        }
    }

    tx.commit().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_codes_split_on_semicolons() {
        assert_eq!(
            split_goal_codes(Some(" MAT-01; MAT-02;;")),
            vec!["MAT-01", "MAT-02"]
        );
        assert!(split_goal_codes(None).is_empty());
        assert!(split_goal_codes(Some("")).is_empty());
    }
}

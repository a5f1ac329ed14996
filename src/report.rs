use std::fmt::Write;

use chrono::NaiveDate;

use crate::coverage::{CoverageMatrix, CoverageState};
use crate::models::{ClassGroup, StatusLevel, StudentRef, StudentStatusResult};
use crate::status::summarize_statuses;

const GAP_LIMIT: usize = 5;

fn cell_symbol(state: CoverageState) -> &'static str {
    match state {
        CoverageState::Assessed => "●",
        CoverageState::Outdated => "◐",
        CoverageState::Missing => "○",
    }
}

pub fn build_report(
    class: &ClassGroup,
    today: NaiveDate,
    statuses: &[(StudentRef, StudentStatusResult)],
    matrix: &CoverageMatrix,
) -> String {
    let mut output = String::new();
    let tally = summarize_statuses(statuses.iter().map(|(_, result)| result));

    let _ = writeln!(output, "# Assessment Coverage Report");
    let _ = writeln!(
        output,
        "Class {} ({} grade {}), generated {}",
        class.name, class.subject, class.grade_level, today
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Student Status");
    let _ = writeln!(
        output,
        "{} OK, {} warning, {} critical",
        tally.ok, tally.warning, tally.critical
    );
    let _ = writeln!(output);

    if statuses.is_empty() {
        let _ = writeln!(output, "No students in this class.");
    } else {
        for (student, result) in statuses {
            let last = result
                .last_assessment_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "never".to_string());
            let _ = writeln!(
                output,
                "- {} [{}]: {} assessments ({} written, {} oral), last {}",
                student.name,
                result.status,
                result.assessment_count,
                result.written_count,
                result.oral_count,
                last
            );
            if result.status != StatusLevel::Ok {
                for warning in &result.warnings {
                    let _ = writeln!(output, "  - {}", warning.message);
                }
            }
        }
    }

    let summary = &matrix.summary;
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Competence Goal Coverage ({}: {} to {})",
        matrix.term, matrix.window.start, matrix.window.end
    );
    let _ = writeln!(
        output,
        "{}% assessed ({} assessed, {} outdated, {} missing)",
        summary.coverage, summary.assessed, summary.outdated, summary.missing
    );

    if !matrix.goals.is_empty() && !matrix.rows.is_empty() {
        let _ = writeln!(output);
        let header: Vec<&str> = matrix.goals.iter().map(|goal| goal.code.as_str()).collect();
        let _ = writeln!(output, "| Student | {} |", header.join(" | "));
        let _ = writeln!(output, "|---|{}", "---|".repeat(header.len()));
        for row in &matrix.rows {
            let cells: Vec<&str> = row.cells.iter().map(|state| cell_symbol(*state)).collect();
            let _ = writeln!(output, "| {} | {} |", row.student.name, cells.join(" | "));
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "● assessed, ◐ outdated, ○ missing");
    }

    let gaps: Vec<_> = matrix
        .goal_gaps()
        .into_iter()
        .filter(|gap| gap.missing > 0)
        .take(GAP_LIMIT)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Least Covered Goals");

    if gaps.is_empty() {
        let _ = writeln!(output, "No goal is missing for any student.");
    } else {
        for gap in gaps {
            let _ = writeln!(
                output,
                "- {} ({}): missing for {} students, outdated for {}",
                gap.code, gap.area, gap.missing, gap.outdated
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{compute_matrix, Term};
    use crate::models::{Assessment, AssessmentForm, AssessmentType, CompetenceGoal};
    use crate::status::compute_status;
    use chrono::Duration;
    use uuid::Uuid;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 10).unwrap()
    }

    fn class() -> ClassGroup {
        ClassGroup {
            id: Uuid::new_v4(),
            name: "9A".to_string(),
            subject: "MAT".to_string(),
            grade_level: 9,
        }
    }

    #[test]
    fn report_lists_statuses_and_gaps() {
        let student = StudentRef {
            id: Uuid::new_v4(),
            name: "Sigrid Haugen".to_string(),
        };
        let goal = CompetenceGoal {
            id: Uuid::new_v4(),
            code: "MAT-01".to_string(),
            area: "Algebra".to_string(),
            description: "Solve equations".to_string(),
            subject: "MAT".to_string(),
            grade_level: 9,
        };
        let assessments = vec![Assessment {
            id: Uuid::new_v4(),
            student_id: student.id,
            class_group_id: Uuid::nil(),
            date: today() - Duration::days(100),
            assessment_type: AssessmentType::Ongoing,
            form: AssessmentForm::Oral,
            grade: Some(3),
            competence_goal_ids: vec![goal.id],
        }];

        let result = compute_status(&assessments, 1, today());
        let matrix = compute_matrix(
            &[student.clone()],
            &[goal],
            &assessments,
            Term::All,
            today(),
        );
        let report = build_report(&class(), today(), &[(student, result)], &matrix);

        assert!(report.contains("# Assessment Coverage Report"));
        assert!(report.contains("0 OK, 0 warning, 1 critical"));
        assert!(report.contains("- Sigrid Haugen [CRITICAL]: 1 assessments (0 written, 1 oral)"));
        assert!(report.contains("0% assessed (0 assessed, 1 outdated, 0 missing)"));
        assert!(report.contains("| Sigrid Haugen | ◐ |"));
        assert!(report.contains("No goal is missing for any student."));
    }

    #[test]
    fn empty_class_report() {
        let matrix = compute_matrix(&[], &[], &[], Term::Spring, today());
        let report = build_report(&class(), today(), &[], &matrix);

        assert!(report.contains("No students in this class."));
        assert!(report.contains("0% assessed"));
        assert!(!report.contains("| Student |"));
    }
}

//! Per-student readiness status.
//!
//! `compute_status` folds one student's assessments into counts, a coarse
//! coverage percentage, a list of warnings and a tri-state status. The
//! coverage figure here is an assessment-count proxy (`count / total goals`);
//! goal-linked coverage lives in [`crate::coverage`].

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{
    percent, Assessment, AssessmentForm, StatusLevel, StudentStatusResult, Warning, WarningKind,
};

/// Goal count callers pass when they have no curriculum to count against.
pub const DEFAULT_TOTAL_COMPETENCE_GOALS: u32 = 10;
pub const MIN_WRITTEN_ASSESSMENTS: usize = 2;
pub const LOW_COVERAGE_PERCENT: u32 = 50;
pub const LONG_TIME_DAYS: i64 = 90;

/// Figures derived from the assessment list before any rule runs.
#[derive(Debug, Clone)]
struct StatusFacts {
    assessment_count: usize,
    written_count: usize,
    oral_count: usize,
    distinct_forms: BTreeSet<AssessmentForm>,
    last_assessment_date: Option<NaiveDate>,
    competence_coverage: u32,
    today: NaiveDate,
}

impl StatusFacts {
    fn collect(assessments: &[Assessment], total_competence_goals: u32, today: NaiveDate) -> Self {
        let assessment_count = assessments.len();
        let written_count = assessments.iter().filter(|a| a.form.is_written()).count();
        let oral_count = assessments.iter().filter(|a| a.form.is_oral()).count();
        let distinct_forms = assessments.iter().map(|a| a.form).collect();
        let last_assessment_date = assessments.iter().map(|a| a.date).max();

        let competence_coverage = if total_competence_goals == 0 {
            0
        } else {
            percent(assessment_count, total_competence_goals as usize).min(100)
        };

        Self {
            assessment_count,
            written_count,
            oral_count,
            distinct_forms,
            last_assessment_date,
            competence_coverage,
            today,
        }
    }
}

type WarningRule = fn(&StatusFacts) -> Option<Warning>;

/// Every rule runs; each adds at most one warning, in this order.
const WARNING_RULES: [WarningRule; 4] = [
    min_written_warning,
    single_form_warning,
    low_coverage_warning,
    long_time_warning,
];

fn min_written_warning(facts: &StatusFacts) -> Option<Warning> {
    (facts.written_count < MIN_WRITTEN_ASSESSMENTS).then(|| Warning {
        kind: WarningKind::MinWritten,
        message: format!(
            "Only {} written assessment(s) recorded; at least {} required",
            facts.written_count, MIN_WRITTEN_ASSESSMENTS
        ),
    })
}

fn single_form_warning(facts: &StatusFacts) -> Option<Warning> {
    if facts.assessment_count == 0 || facts.distinct_forms.len() != 1 {
        return None;
    }
    let form = facts.distinct_forms.iter().next()?;
    Some(Warning {
        kind: WarningKind::SingleForm,
        message: format!("All assessments use the same form ({form})"),
    })
}

fn low_coverage_warning(facts: &StatusFacts) -> Option<Warning> {
    (facts.competence_coverage < LOW_COVERAGE_PERCENT).then(|| Warning {
        kind: WarningKind::LowCoverage,
        message: format!(
            "Competence coverage is {}% (below {}%)",
            facts.competence_coverage, LOW_COVERAGE_PERCENT
        ),
    })
}

fn long_time_warning(facts: &StatusFacts) -> Option<Warning> {
    let last = facts.last_assessment_date?;
    let days = (facts.today - last).num_days();
    (days > LONG_TIME_DAYS).then(|| Warning {
        kind: WarningKind::LongTime,
        message: format!("No assessment in {days} days (last on {last})"),
    })
}

type StatusRule = (fn(&StatusFacts, &[Warning]) -> bool, StatusLevel);

/// Checked top to bottom; the first matching predicate decides the status.
const STATUS_RULES: [StatusRule; 3] = [
    (lacks_written_basis, StatusLevel::Critical),
    (has_warnings, StatusLevel::Warning),
    (always, StatusLevel::Ok),
];

fn lacks_written_basis(facts: &StatusFacts, _: &[Warning]) -> bool {
    facts.assessment_count == 0 || facts.written_count < MIN_WRITTEN_ASSESSMENTS
}

fn has_warnings(_: &StatusFacts, warnings: &[Warning]) -> bool {
    !warnings.is_empty()
}

fn always(_: &StatusFacts, _: &[Warning]) -> bool {
    true
}

/// Computes the readiness status of one student.
///
/// `assessments` should already be scoped to the student (and class or
/// subject, if the caller wants that). `total_competence_goals` is the
/// denominator of the coverage proxy; pass [`DEFAULT_TOTAL_COMPETENCE_GOALS`]
/// when no curriculum count is at hand. A value of 0 yields 0% coverage.
/// `today` anchors the long-time check.
///
/// The result does not depend on the order of `assessments`.
pub fn compute_status(
    assessments: &[Assessment],
    total_competence_goals: u32,
    today: NaiveDate,
) -> StudentStatusResult {
    let facts = StatusFacts::collect(assessments, total_competence_goals, today);
    let warnings: Vec<Warning> = WARNING_RULES.iter().filter_map(|rule| rule(&facts)).collect();

    let status = STATUS_RULES
        .iter()
        .find(|(applies, _)| applies(&facts, &warnings))
        .map(|(_, level)| *level)
        .unwrap_or(StatusLevel::Ok);

    tracing::debug!(
        assessments = facts.assessment_count,
        written = facts.written_count,
        warnings = warnings.len(),
        %status,
        "computed student status"
    );

    StudentStatusResult {
        status,
        warnings,
        assessment_count: facts.assessment_count,
        written_count: facts.written_count,
        oral_count: facts.oral_count,
        last_assessment_date: facts.last_assessment_date,
        competence_coverage: facts.competence_coverage,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub ok: usize,
    pub warning: usize,
    pub critical: usize,
}

pub fn summarize_statuses<'a, I>(results: I) -> StatusTally
where
    I: IntoIterator<Item = &'a StudentStatusResult>,
{
    let mut tally = StatusTally::default();
    for result in results {
        match result.status {
            StatusLevel::Ok => tally.ok += 1,
            StatusLevel::Warning => tally.warning += 1,
            StatusLevel::Critical => tally.critical += 1,
        }
    }
    tally
}

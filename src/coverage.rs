//! Student x competence-goal coverage matrix.
//!
//! Each cell records whether a student has a fresh, a stale, or no assessment
//! linked to a goal inside the selected term window. Cell states only ever
//! move forward along `Missing < Outdated < Assessed`, so the order in which
//! assessments are folded in does not matter.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::models::{percent, Assessment, CompetenceGoal, StudentRef};

/// Linked assessments older than this many days count as outdated.
pub const FRESHNESS_DAYS: i64 = 56;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    #[default]
    All,
    Autumn,
    Spring,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::All => "all",
            Term::Autumn => "autumn",
            Term::Spring => "spring",
        }
    }

    /// Resolves the term against the calendar year of `today`.
    ///
    /// `All` is the academic year that ends in June of that calendar year.
    pub fn window(&self, today: NaiveDate) -> TermWindow {
        let year = today.year();
        match self {
            Term::Autumn => TermWindow::new(start_of(year, 8, 1), end_of(year, 12, 31)),
            Term::Spring => TermWindow::new(start_of(year, 1, 1), end_of(year, 6, 30)),
            Term::All => TermWindow::new(start_of(year - 1, 8, 1), end_of(year, 6, 30)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Term {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Term::All),
            "autumn" => Ok(Term::Autumn),
            "spring" => Ok(Term::Spring),
            _ => Err(ParseError::UnknownTerm(value.to_string())),
        }
    }
}

// Only out-of-range years fail here; clamp those to the widest bound.
fn start_of(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn end_of(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MAX)
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TermWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageState {
    #[default]
    Missing,
    Outdated,
    Assessed,
}

impl CoverageState {
    /// Least upper bound of two states.
    pub fn merge(self, other: CoverageState) -> CoverageState {
        self.max(other)
    }

    /// State a single linked assessment contributes on its own.
    pub fn from_assessment_date(date: NaiveDate, fresh_since: NaiveDate) -> CoverageState {
        if date >= fresh_since {
            CoverageState::Assessed
        } else {
            CoverageState::Outdated
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageState::Missing => "missing",
            CoverageState::Outdated => "outdated",
            CoverageState::Assessed => "assessed",
        }
    }
}

impl fmt::Display for CoverageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageRow {
    pub student: StudentRef,
    /// One entry per goal, aligned with [`CoverageMatrix::goals`].
    pub cells: Vec<CoverageState>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageSummary {
    pub assessed: usize,
    pub outdated: usize,
    pub missing: usize,
    pub total: usize,
    pub coverage: u32,
}

impl CoverageSummary {
    fn from_rows(rows: &[CoverageRow]) -> Self {
        let mut summary = CoverageSummary::default();
        for state in rows.iter().flat_map(|row| row.cells.iter()) {
            match state {
                CoverageState::Assessed => summary.assessed += 1,
                CoverageState::Outdated => summary.outdated += 1,
                CoverageState::Missing => summary.missing += 1,
            }
        }
        summary.total = summary.assessed + summary.outdated + summary.missing;
        summary.coverage = percent(summary.assessed, summary.total);
        summary
    }
}

/// How many students still lack a given goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalGap {
    pub goal_id: Uuid,
    pub code: String,
    pub area: String,
    pub missing: usize,
    pub outdated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageMatrix {
    pub term: Term,
    pub window: TermWindow,
    /// Sorted by `(area, code)`.
    pub goals: Vec<CompetenceGoal>,
    /// In the order the students were supplied.
    pub rows: Vec<CoverageRow>,
    pub summary: CoverageSummary,
}

impl CoverageMatrix {
    pub fn cell(&self, student_id: Uuid, goal_id: Uuid) -> Option<CoverageState> {
        let column = self.goals.iter().position(|goal| goal.id == goal_id)?;
        let row = self.rows.iter().find(|row| row.student.id == student_id)?;
        row.cells.get(column).copied()
    }

    /// Goals ordered by most missing students first, then by `(area, code)`.
    pub fn goal_gaps(&self) -> Vec<GoalGap> {
        let mut gaps: Vec<GoalGap> = self
            .goals
            .iter()
            .enumerate()
            .map(|(column, goal)| {
                let states = self.rows.iter().filter_map(|row| row.cells.get(column));
                let (mut missing, mut outdated) = (0, 0);
                for state in states {
                    match state {
                        CoverageState::Missing => missing += 1,
                        CoverageState::Outdated => outdated += 1,
                        CoverageState::Assessed => {}
                    }
                }
                GoalGap {
                    goal_id: goal.id,
                    code: goal.code.clone(),
                    area: goal.area.clone(),
                    missing,
                    outdated,
                }
            })
            .collect();

        // Stable sort keeps the (area, code) order among ties.
        gaps.sort_by(|a, b| b.missing.cmp(&a.missing));
        gaps
    }
}

/// Builds the coverage matrix for a class group.
///
/// Only assessments dated inside `term`'s window count. Assessments of
/// students outside `students` and links to goals outside `goals` are
/// ignored.
pub fn compute_matrix(
    students: &[StudentRef],
    goals: &[CompetenceGoal],
    assessments: &[Assessment],
    term: Term,
    today: NaiveDate,
) -> CoverageMatrix {
    let window = term.window(today);
    let fresh_since = today - Duration::days(FRESHNESS_DAYS);

    let mut goals = goals.to_vec();
    goals.sort_by(|a, b| a.area.cmp(&b.area).then_with(|| a.code.cmp(&b.code)));

    let mut states: HashMap<Uuid, HashMap<Uuid, CoverageState>> = students
        .iter()
        .map(|student| (student.id, HashMap::new()))
        .collect();

    let in_window = assessments.iter().filter(|a| window.contains(a.date));
    for assessment in in_window {
        let Some(per_goal) = states.get_mut(&assessment.student_id) else {
            continue;
        };
        let contributed = CoverageState::from_assessment_date(assessment.date, fresh_since);
        for goal_id in &assessment.competence_goal_ids {
            let cell = per_goal.entry(*goal_id).or_default();
            *cell = cell.merge(contributed);
        }
    }

    let rows: Vec<CoverageRow> = students
        .iter()
        .map(|student| {
            let per_goal = states.get(&student.id);
            let cells = goals
                .iter()
                .map(|goal| {
                    per_goal
                        .and_then(|cells| cells.get(&goal.id))
                        .copied()
                        .unwrap_or_default()
                })
                .collect();
            CoverageRow {
                student: student.clone(),
                cells,
            }
        })
        .collect();

    let summary = CoverageSummary::from_rows(&rows);
    tracing::debug!(
        students = rows.len(),
        goals = goals.len(),
        assessed = summary.assessed,
        outdated = summary.outdated,
        missing = summary.missing,
        %term,
        "computed coverage matrix"
    );

    CoverageMatrix {
        term,
        window,
        goals,
        rows,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentForm, AssessmentType};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 20).unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn student(name: &str) -> StudentRef {
        StudentRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    fn goal(area: &str, code: &str) -> CompetenceGoal {
        CompetenceGoal {
            id: Uuid::new_v4(),
            code: code.to_string(),
            area: area.to_string(),
            description: format!("{area} {code}"),
            subject: "MAT".to_string(),
            grade_level: 9,
        }
    }

    fn linked(student: &StudentRef, goals: &[&CompetenceGoal], days_ago: i64) -> Assessment {
        Assessment {
            id: Uuid::new_v4(),
            student_id: student.id,
            class_group_id: Uuid::nil(),
            date: today() - Duration::days(days_ago),
            assessment_type: AssessmentType::Ongoing,
            form: AssessmentForm::Written,
            grade: Some(4),
            competence_goal_ids: goals.iter().map(|g| g.id).collect(),
        }
    }

    #[test]
    fn term_windows_follow_calendar_year() {
        let today = date(2026, 10, 16);
        assert_eq!(
            Term::Autumn.window(today),
            TermWindow::new(date(2026, 8, 1), date(2026, 12, 31))
        );
        assert_eq!(
            Term::Spring.window(today),
            TermWindow::new(date(2026, 1, 1), date(2026, 6, 30))
        );
        assert_eq!(
            Term::All.window(today),
            TermWindow::new(date(2025, 8, 1), date(2026, 6, 30))
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window = Term::Spring.window(today());
        assert!(window.contains(date(2026, 1, 1)));
        assert!(window.contains(date(2026, 6, 30)));
        assert!(!window.contains(date(2026, 7, 1)));
        assert!(!window.contains(date(2025, 12, 31)));
    }

    #[test]
    fn terms_parse_case_insensitively() {
        assert_eq!("Autumn".parse::<Term>(), Ok(Term::Autumn));
        assert_eq!("all".parse::<Term>(), Ok(Term::All));
        assert_eq!(
            "summer".parse::<Term>(),
            Err(ParseError::UnknownTerm("summer".to_string()))
        );
    }

    #[test]
    fn merge_is_order_independent() {
        use CoverageState::*;
        let states = [Missing, Outdated, Assessed];
        for a in states {
            for b in states {
                assert_eq!(a.merge(b), b.merge(a));
                assert_eq!(a.merge(b), a.max(b));
            }
        }
        assert_eq!(Assessed.merge(Outdated), Assessed);
        assert_eq!(Missing.merge(Outdated), Outdated);
    }

    #[test]
    fn fresh_link_is_assessed_old_link_is_outdated() {
        let s = student("Sigrid");
        let g = goal("Tall og algebra", "MAT-01");

        let fresh = compute_matrix(
            &[s.clone()],
            &[g.clone()],
            &[linked(&s, &[&g], 10)],
            Term::All,
            today(),
        );
        assert_eq!(fresh.cell(s.id, g.id), Some(CoverageState::Assessed));

        let stale = compute_matrix(
            &[s.clone()],
            &[g.clone()],
            &[linked(&s, &[&g], 100)],
            Term::All,
            today(),
        );
        assert_eq!(stale.cell(s.id, g.id), Some(CoverageState::Outdated));

        let none = compute_matrix(&[s.clone()], &[g.clone()], &[], Term::All, today());
        assert_eq!(none.cell(s.id, g.id), Some(CoverageState::Missing));
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let s = student("Sigrid");
        let g = goal("Geometri", "MAT-02");

        let on_cutoff = compute_matrix(
            &[s.clone()],
            &[g.clone()],
            &[linked(&s, &[&g], FRESHNESS_DAYS)],
            Term::All,
            today(),
        );
        assert_eq!(on_cutoff.cell(s.id, g.id), Some(CoverageState::Assessed));

        let past_cutoff = compute_matrix(
            &[s.clone()],
            &[g.clone()],
            &[linked(&s, &[&g], FRESHNESS_DAYS + 1)],
            Term::All,
            today(),
        );
        assert_eq!(past_cutoff.cell(s.id, g.id), Some(CoverageState::Outdated));
    }

    #[test]
    fn newer_assessment_upgrades_regardless_of_order() {
        let s = student("Sigrid");
        let g = goal("Geometri", "MAT-02");
        let old = linked(&s, &[&g], 100);
        let recent = linked(&s, &[&g], 5);

        for assessments in [vec![old.clone(), recent.clone()], vec![recent, old]] {
            let matrix = compute_matrix(&[s.clone()], &[g.clone()], &assessments, Term::All, today());
            assert_eq!(matrix.cell(s.id, g.id), Some(CoverageState::Assessed));
        }
    }

    #[test]
    fn adding_assessments_never_downgrades() {
        let s = student("Sigrid");
        let g = goal("Statistikk", "MAT-03");
        let mut assessments = Vec::new();
        let mut previous = CoverageState::Missing;

        for days_ago in [200, 100, 30, 90, 3] {
            assessments.push(linked(&s, &[&g], days_ago));
            let matrix = compute_matrix(&[s.clone()], &[g.clone()], &assessments, Term::All, today());
            let current = matrix.cell(s.id, g.id).unwrap();
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, CoverageState::Assessed);
    }

    #[test]
    fn assessments_outside_window_are_ignored() {
        let s = student("Sigrid");
        let g = goal("Geometri", "MAT-02");

        // 2025-07-31 falls before the academic year that starts in August.
        let before_year = linked(&s, &[&g], (today() - date(2025, 7, 31)).num_days());
        let matrix = compute_matrix(&[s.clone()], &[g.clone()], &[before_year], Term::All, today());
        assert_eq!(matrix.cell(s.id, g.id), Some(CoverageState::Missing));

        let spring = linked(&s, &[&g], 10);
        let autumn = compute_matrix(&[s.clone()], &[g.clone()], &[spring], Term::Autumn, today());
        assert_eq!(autumn.cell(s.id, g.id), Some(CoverageState::Missing));
    }

    #[test]
    fn unlinked_and_foreign_assessments_do_not_count() {
        let s = student("Sigrid");
        let outsider = student("Ola");
        let g = goal("Geometri", "MAT-02");
        let other_goal = goal("Geometri", "MAT-99");

        let assessments = vec![
            linked(&s, &[], 3),
            linked(&s, &[&other_goal], 3),
            linked(&outsider, &[&g], 3),
        ];
        let matrix = compute_matrix(&[s.clone()], &[g.clone()], &assessments, Term::All, today());
        assert_eq!(matrix.cell(s.id, g.id), Some(CoverageState::Missing));
        assert_eq!(matrix.cell(outsider.id, g.id), None);
    }

    #[test]
    fn goals_sorted_by_area_then_code_students_keep_order() {
        let students = vec![student("Zara"), student("Anders"), student("Mia")];
        let goals = vec![
            goal("Statistikk", "MAT-05"),
            goal("Algebra", "MAT-09"),
            goal("Algebra", "MAT-02"),
        ];

        let matrix = compute_matrix(&students, &goals, &[], Term::All, today());
        let codes: Vec<&str> = matrix.goals.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(codes, vec!["MAT-02", "MAT-09", "MAT-05"]);
        let names: Vec<&str> = matrix.rows.iter().map(|r| r.student.name.as_str()).collect();
        assert_eq!(names, vec!["Zara", "Anders", "Mia"]);
    }

    #[test]
    fn summary_counts_cells() {
        let a = student("Astrid");
        let b = student("Bjørn");
        let g1 = goal("Algebra", "MAT-01");
        let g2 = goal("Algebra", "MAT-02");
        let g3 = goal("Geometri", "MAT-03");

        let assessments = vec![
            linked(&a, &[&g1, &g2], 7),
            linked(&b, &[&g1], 80),
        ];
        let matrix = compute_matrix(
            &[a, b],
            &[g1.clone(), g2, g3],
            &assessments,
            Term::All,
            today(),
        );

        assert_eq!(
            matrix.summary,
            CoverageSummary {
                assessed: 2,
                outdated: 1,
                missing: 3,
                total: 6,
                coverage: 33,
            }
        );

        let gaps = matrix.goal_gaps();
        let codes: Vec<&str> = gaps.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(codes, vec!["MAT-03", "MAT-02", "MAT-01"]);
        assert_eq!(gaps[0].missing, 2);
        assert_eq!(gaps[2].outdated, 1);
    }

    #[test]
    fn empty_inputs_have_zero_coverage() {
        let matrix = compute_matrix(&[], &[], &[], Term::Spring, today());
        assert_eq!(matrix.summary.total, 0);
        assert_eq!(matrix.summary.coverage, 0);

        let no_goals = compute_matrix(&[student("Eva")], &[], &[], Term::All, today());
        assert_eq!(no_goals.rows[0].cells.len(), 0);
        assert_eq!(no_goals.summary.coverage, 0);
    }

    #[test]
    fn cell_states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(CoverageState::Outdated).unwrap(),
            serde_json::json!("outdated")
        );
    }
}

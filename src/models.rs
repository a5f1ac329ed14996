use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseError, ValidationError};

pub const MIN_GRADE: u8 = 1;
pub const MAX_GRADE: u8 = 6;

/// Stage within the school term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentType {
    Ongoing,
    Midterm,
    Final,
}

impl AssessmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::Ongoing => "ONGOING",
            AssessmentType::Midterm => "MIDTERM",
            AssessmentType::Final => "FINAL",
        }
    }
}

impl fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssessmentType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ONGOING" => Ok(AssessmentType::Ongoing),
            "MIDTERM" => Ok(AssessmentType::Midterm),
            "FINAL" => Ok(AssessmentType::Final),
            _ => Err(ParseError::UnknownType(value.to_string())),
        }
    }
}

/// Modality of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentForm {
    Written,
    Oral,
    OralPractical,
    Practical,
}

impl AssessmentForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentForm::Written => "WRITTEN",
            AssessmentForm::Oral => "ORAL",
            AssessmentForm::OralPractical => "ORAL_PRACTICAL",
            AssessmentForm::Practical => "PRACTICAL",
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, AssessmentForm::Written)
    }

    /// Oral-practical counts as oral. Practical alone counts as neither.
    pub fn is_oral(&self) -> bool {
        matches!(self, AssessmentForm::Oral | AssessmentForm::OralPractical)
    }
}

impl fmt::Display for AssessmentForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssessmentForm {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WRITTEN" => Ok(AssessmentForm::Written),
            "ORAL" => Ok(AssessmentForm::Oral),
            "ORAL_PRACTICAL" => Ok(AssessmentForm::OralPractical),
            "PRACTICAL" => Ok(AssessmentForm::Practical),
            _ => Err(ParseError::UnknownForm(value.to_string())),
        }
    }
}

/// One evaluation of a student. Read-only input to both engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_group_id: Uuid,
    /// Day the student was evaluated, not the day it was recorded.
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub assessment_type: AssessmentType,
    pub form: AssessmentForm,
    /// `None` means evaluated without a numeric grade.
    pub grade: Option<u8>,
    #[serde(default)]
    pub competence_goal_ids: Vec<Uuid>,
}

impl Assessment {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.grade {
            Some(grade) if !(MIN_GRADE..=MAX_GRADE).contains(&grade) => {
                Err(ValidationError::GradeOutOfRange(grade))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetenceGoal {
    pub id: Uuid,
    pub code: String,
    /// Grouping label the goal belongs to within its subject.
    pub area: String,
    pub description: String,
    pub subject: String,
    pub grade_level: i32,
}

/// A class taught in one subject at one grade level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassGroup {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub grade_level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusLevel {
    Ok,
    Warning,
    Critical,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Ok => "OK",
            StatusLevel::Warning => "WARNING",
            StatusLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    MinWritten,
    SingleForm,
    LowCoverage,
    LongTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
}

/// Readiness view of one student. Rebuilt on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatusResult {
    pub status: StatusLevel,
    pub warnings: Vec<Warning>,
    pub assessment_count: usize,
    pub written_count: usize,
    pub oral_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_assessment_date: Option<NaiveDate>,
    pub competence_coverage: u32,
}

impl StudentStatusResult {
    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|warning| warning.kind == kind)
    }
}

/// Integer percentage of `part` in `total`, rounded half away from zero.
/// A zero total yields 0.
pub fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * part as f64 / total as f64).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_parse_wire_names() {
        assert_eq!("WRITTEN".parse::<AssessmentForm>(), Ok(AssessmentForm::Written));
        assert_eq!(
            "oral_practical".parse::<AssessmentForm>(),
            Ok(AssessmentForm::OralPractical)
        );
        assert_eq!(
            "essay".parse::<AssessmentForm>(),
            Err(ParseError::UnknownForm("essay".to_string()))
        );
        assert_eq!(" final ".parse::<AssessmentType>(), Ok(AssessmentType::Final));
    }

    #[test]
    fn oral_bucket_excludes_practical() {
        assert!(AssessmentForm::Oral.is_oral());
        assert!(AssessmentForm::OralPractical.is_oral());
        assert!(!AssessmentForm::Practical.is_oral());
        assert!(!AssessmentForm::Practical.is_written());
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 0), 0);
    }

    #[test]
    fn grade_outside_range_is_rejected() {
        let mut assessment = Assessment {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            class_group_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            assessment_type: AssessmentType::Ongoing,
            form: AssessmentForm::Written,
            grade: Some(4),
            competence_goal_ids: Vec::new(),
        };
        assert!(assessment.validate().is_ok());

        assessment.grade = None;
        assert!(assessment.validate().is_ok());

        assessment.grade = Some(7);
        assert_eq!(
            assessment.validate(),
            Err(ValidationError::GradeOutOfRange(7))
        );
    }

    #[test]
    fn status_result_serializes_camel_case() {
        let result = StudentStatusResult {
            status: StatusLevel::Critical,
            warnings: vec![Warning {
                kind: WarningKind::MinWritten,
                message: "x".to_string(),
            }],
            assessment_count: 0,
            written_count: 0,
            oral_count: 0,
            last_assessment_date: None,
            competence_coverage: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "CRITICAL");
        assert_eq!(json["warnings"][0]["type"], "MIN_WRITTEN");
        assert_eq!(json["competenceCoverage"], 0);
        assert!(json.get("lastAssessmentDate").is_none());
    }
}

//! Assessment status and competence-goal coverage for school classes.
//!
//! [`status::compute_status`] turns one student's assessments into a readiness
//! status with warnings. [`coverage::compute_matrix`] turns a class's
//! assessments and its subject's competence goals into a student x goal
//! coverage matrix. Both are pure functions over in-memory records; [`db`]
//! loads those records from Postgres and [`report`] renders the results.

pub mod config;
pub mod coverage;
pub mod db;
pub mod error;
pub mod models;
pub mod report;
pub mod status;

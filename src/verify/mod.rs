//! Checks device-returned assignments against the submitted formula.
//!
//! The device reports one value per line (optionally followed by a `,`).
//! Validity is always recomputed here; nothing the device sends is trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cnf::{Clause, Formula};

/// Device output files holding candidate assignments.
pub const SOLUTION_PREFIX: &str = "data_out_";
pub const SOLUTION_SUFFIX: &str = ".csv";

pub fn is_solution_artifact(name: &str) -> bool {
    name.starts_with(SOLUTION_PREFIX) && name.ends_with(SOLUTION_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    /// Position `i` is the value of variable `i + 1`
    pub variables: Vec<bool>,
    pub is_valid: bool,
    pub job_id: Option<Uuid>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub job_id: Option<Uuid>,
    pub solutions: Vec<Solution>,
    pub valid_solutions: usize,
    pub total_runs: usize,
    pub clause_count: usize,
    pub variable_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Parse a device assignment file.
///
/// Blank lines are skipped without taking a position. A line that is not a
/// number keeps its position but stays `false`.
pub fn parse_solution(text: &str) -> Vec<bool> {
    let mut variables = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line = line.strip_suffix(',').unwrap_or(line).trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<i64>() {
            Ok(value) => variables.push(value != 0),
            Err(e) => {
                tracing::warn!(line = i, content = line, error = %e, "Skipping malformed solution line");
                variables.push(false);
            }
        }
    }
    variables
}

fn literal_value(literal: i32, assignment: &[bool]) -> bool {
    let index = literal.unsigned_abs() as usize;
    if index == 0 {
        return false;
    }
    match assignment.get(index - 1) {
        Some(&value) => value != (literal < 0),
        None => false,
    }
}

fn clause_satisfied(clause: &Clause, assignment: &[bool]) -> bool {
    clause.iter().any(|&literal| literal_value(literal, assignment))
}

/// True iff every clause has a literal made true by `assignment`.
/// Variables beyond the assignment's length count as unsatisfying.
pub fn verify(formula: &Formula, assignment: &[bool]) -> bool {
    formula
        .clauses
        .iter()
        .all(|clause| clause_satisfied(clause, assignment))
}

/// Indices of clauses `assignment` leaves unsatisfied.
pub fn unsatisfied_clauses(formula: &Formula, assignment: &[bool]) -> Vec<usize> {
    formula
        .clauses
        .iter()
        .enumerate()
        .filter(|(_, clause)| !clause_satisfied(clause, assignment))
        .map(|(i, _)| i)
        .collect()
}

/// Parse and verify one solution file.
pub fn check_solution(
    formula: &Formula,
    job_id: Option<Uuid>,
    source: impl Into<String>,
    text: &str,
) -> Solution {
    let variables = parse_solution(text);
    let is_valid = verify(formula, &variables);
    Solution {
        variables,
        is_valid,
        job_id,
        source: source.into(),
    }
}

/// Verify every `(file name, contents)` pair independently and aggregate.
pub fn verify_all<I>(formula: &Formula, job_id: Option<Uuid>, artifacts: I) -> VerificationReport
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let solutions: Vec<Solution> = artifacts
        .into_iter()
        .map(|(name, bytes)| {
            let text = String::from_utf8_lossy(&bytes);
            let solution = check_solution(formula, job_id, name, &text);
            tracing::debug!(
                source = %solution.source,
                variables = solution.variables.len(),
                valid = solution.is_valid,
                "Checked solution"
            );
            solution
        })
        .collect();

    let valid_solutions = solutions.iter().filter(|s| s.is_valid).count();
    VerificationReport {
        job_id,
        total_runs: solutions.len(),
        valid_solutions,
        solutions,
        clause_count: formula.clauses.len(),
        variable_count: formula.variable_count,
        timestamp: Utc::now(),
    }
}

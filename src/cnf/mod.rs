//! DIMACS CNF codec.
//!
//! The device only understands 3-literal clauses, so every parsed clause is
//! normalized to exactly three slots: longer clauses keep their first three
//! literals and shorter ones are padded with the `0` sentinel.
//!
//! - [`Formula::parse`]: DIMACS text to [`Formula`]
//! - [`encode`]: [`Formula`] to the fixed-width [`EncodedProblem`]
//! - [`EncodedProblem::serialize`]: the six decimal sequences sent to the device

pub mod encode;

pub use encode::{encode, DataInfoFile, EncodedProblem, ENABLE_BIT, MAX_CLAUSES, POLARITY_BIT};

use crate::error::ParseError;

/// Number of literal slots per clause.
pub const CLAUSE_WIDTH: usize = 3;

pub type Clause = [i32; CLAUSE_WIDTH];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub variable_count: usize,
    pub clauses: Vec<Clause>,
}

impl Formula {
    pub fn new(variable_count: usize, clauses: Vec<Clause>) -> Self {
        Self {
            variable_count,
            clauses,
        }
    }

    /// Parse DIMACS text.
    ///
    /// ```
    /// use satlink::cnf::Formula;
    /// let formula = Formula::parse("p cnf 3 1\n1 -2 3 0\n").unwrap();
    /// assert_eq!(formula.variable_count, 3);
    /// assert_eq!(formula.clauses, vec![[1, -2, 3]]);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut variable_count = 0;
        let mut declared_clauses = None;
        let mut clauses = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('c') {
                continue;
            }

            if line.starts_with('p') {
                let (vars, count) = parse_problem_line(line, line_no)?;
                variable_count = vars;
                declared_clauses = Some(count);
                continue;
            }

            if let Some(clause) = parse_clause_line(line, line_no)? {
                clauses.push(clause);
            }
        }

        if let Some(declared) = declared_clauses {
            if declared != clauses.len() {
                tracing::debug!(
                    declared,
                    parsed = clauses.len(),
                    "Clause count differs from problem line"
                );
            }
        }

        Ok(Self {
            variable_count,
            clauses,
        })
    }

    /// Render as DIMACS text. Padding zeros are not written.
    pub fn to_dimacs(&self) -> String {
        let mut out = format!("p cnf {} {}\n", self.variable_count, self.clauses.len());
        for clause in &self.clauses {
            for literal in clause.iter().filter(|&&l| l != 0) {
                out.push_str(&literal.to_string());
                out.push(' ');
            }
            out.push_str("0\n");
        }
        out
    }
}

fn parse_problem_line(line: &str, line_no: usize) -> Result<(usize, usize), ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 || parts[0] != "p" || parts[1] != "cnf" {
        return Err(ParseError::new(
            line_no,
            format!("invalid problem line format: {}", line),
        ));
    }
    let vars = parts[2]
        .parse::<usize>()
        .map_err(|_| ParseError::new(line_no, format!("invalid variable count: {}", parts[2])))?;
    let count = parts[3]
        .parse::<usize>()
        .map_err(|_| ParseError::new(line_no, format!("invalid clause count: {}", parts[3])))?;
    Ok((vars, count))
}

/// Literals up to the first `0`, normalized to three slots.
/// Returns `None` when the clause has no literals.
fn parse_clause_line(line: &str, line_no: usize) -> Result<Option<Clause>, ParseError> {
    let mut literals = Vec::with_capacity(CLAUSE_WIDTH);
    for token in line.split_whitespace() {
        let literal = token
            .parse::<i32>()
            .map_err(|_| ParseError::new(line_no, format!("invalid literal: {}", token)))?;
        if literal == 0 {
            break;
        }
        literals.push(literal);
    }

    if literals.is_empty() {
        return Ok(None);
    }

    let mut clause = [0; CLAUSE_WIDTH];
    for (slot, literal) in clause.iter_mut().zip(literals) {
        *slot = literal;
    }
    Ok(Some(clause))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_clause() {
        let formula = Formula::parse("p cnf 3 1\n1 -2 3 0\n").unwrap();
        assert_eq!(formula.variable_count, 3);
        assert_eq!(formula.clauses, vec![[1, -2, 3]]);
    }

    #[test]
    fn parse_rejects_non_numeric_variable_count() {
        let err = Formula::parse("p cnf abc 1").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("variable count"));
    }

    #[test]
    fn parse_rejects_bad_problem_line() {
        assert!(Formula::parse("p cnf 3\n").is_err());
        assert!(Formula::parse("p dnf 3 1\n").is_err());
        assert!(Formula::parse("p cnf 3 x\n").is_err());
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let text = "c a comment\n\nc another\np cnf 2 1\n\n1 2 0\n";
        let formula = Formula::parse(text).unwrap();
        assert_eq!(formula.clauses, vec![[1, 2, 0]]);
    }

    #[test]
    fn parse_truncates_long_clauses() {
        let formula = Formula::parse("p cnf 5 1\n1 2 3 4 5 0\n").unwrap();
        assert_eq!(formula.clauses, vec![[1, 2, 3]]);
    }

    #[test]
    fn parse_pads_short_clauses() {
        let formula = Formula::parse("p cnf 2 2\n-1 0\n1 2 0\n").unwrap();
        assert_eq!(formula.clauses, vec![[-1, 0, 0], [1, 2, 0]]);
    }

    #[test]
    fn parse_drops_empty_clauses() {
        let formula = Formula::parse("p cnf 2 1\n0\n1 0\n").unwrap();
        assert_eq!(formula.clauses, vec![[1, 0, 0]]);
    }

    #[test]
    fn parse_stops_at_terminator() {
        let formula = Formula::parse("p cnf 3 1\n1 0 2 3\n").unwrap();
        assert_eq!(formula.clauses, vec![[1, 0, 0]]);
    }

    #[test]
    fn parse_reports_bad_literal_with_line() {
        let err = Formula::parse("p cnf 3 1\n1 x 3 0\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("invalid literal: x"));
    }

    #[test]
    fn parse_without_problem_line() {
        let formula = Formula::parse("1 2 3 0\n").unwrap();
        assert_eq!(formula.variable_count, 0);
        assert_eq!(formula.clauses.len(), 1);
    }

    #[test]
    fn dimacs_output_reparses() {
        let formula = Formula::new(3, vec![[1, -2, 3], [-3, 0, 0]]);
        let text = formula.to_dimacs();
        assert_eq!(text, "p cnf 3 2\n1 -2 3 0\n-3 0\n");
        assert_eq!(Formula::parse(&text).unwrap(), formula);
    }
}

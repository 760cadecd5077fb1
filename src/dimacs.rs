//! DIMACS CNF reading and writing.
//!
//! Implements the standard `p cnf` format plus two comment extensions:
//!
//! ```text
//! c p show v1 v2 ... 0          # declares data variables
//! c p weight <lit> <rational> 0 # declares a literal weight
//! ```
//!
//! All other comment lines are ignored. If no `show` declaration appears,
//! every declared variable is a data variable.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use log::{info, warn};
use num_rational::BigRational;

use crate::cnf::Cnf;
use crate::types::{parse_weight, var_of, PkcError, VarKind};

fn parse_error(line: usize, msg: impl Into<String>) -> PkcError {
    PkcError::Parse {
        line,
        msg: msg.into(),
    }
}

/// Parses the tail of a `c p show`/`c p weight` comment.
fn process_comment(
    tokens: &[&str],
    line: usize,
    shows: &mut BTreeSet<i32>,
    weights: &mut BTreeMap<i32, BigRational>,
) -> Result<(), PkcError> {
    if tokens.first() != Some(&"p") {
        return Ok(());
    }
    match tokens.get(1) {
        Some(&"show") => {
            for tok in &tokens[2..] {
                let var: i32 = tok
                    .parse()
                    .map_err(|_| parse_error(line, format!("couldn't read data variable '{}'", tok)))?;
                if var == 0 {
                    return Ok(());
                }
                shows.insert(var);
            }
            Err(parse_error(line, "show declaration not zero-terminated"))
        }
        Some(&"weight") => {
            let lit_tok = tokens
                .get(2)
                .ok_or_else(|| parse_error(line, "couldn't read weight literal"))?;
            let lit: i32 = lit_tok
                .parse()
                .map_err(|_| parse_error(line, format!("couldn't read weight literal '{}'", lit_tok)))?;
            let wt_tok = tokens
                .get(3)
                .ok_or_else(|| parse_error(line, format!("couldn't read weight for literal {}", lit)))?;
            let wt = parse_weight(wt_tok)
                .ok_or_else(|| parse_error(line, format!("couldn't read weight for literal {}", lit)))?;
            if tokens.get(4) != Some(&"0") {
                warn!(
                    "line #{}: no terminating zero in weight declaration for literal {} (accepting weight)",
                    line, lit
                );
            }
            weights.insert(lit, wt);
            Ok(())
        }
        _ => Ok(()),
    }
}

impl Cnf {
    /// Reads a CNF from a DIMACS stream. With `process_comments` the
    /// `c p show` and `c p weight` extensions are honored.
    pub fn from_dimacs<R: BufRead>(reader: R, process_comments: bool) -> Result<Cnf, PkcError> {
        let mut cnf: Option<Cnf> = None;
        let mut expected_clauses = 0usize;
        let mut shows: BTreeSet<i32> = BTreeSet::new();
        let mut weights: BTreeMap<i32, BigRational> = BTreeMap::new();
        let mut pending: Vec<i32> = Vec::new();
        let mut finished_clauses = 0usize;

        for (lineno0, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = lineno0 + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.first() {
                None => continue,
                Some(&"c") => {
                    if process_comments {
                        process_comment(&tokens[1..], lineno, &mut shows, &mut weights)?;
                    }
                }
                Some(&"p") => {
                    if cnf.is_some() {
                        return Err(parse_error(lineno, "duplicate header line"));
                    }
                    if tokens.get(1) != Some(&"cnf") {
                        return Err(parse_error(
                            lineno,
                            format!("not a CNF file: header type '{}'", tokens.get(1).unwrap_or(&"")),
                        ));
                    }
                    let nvar: i32 = tokens
                        .get(2)
                        .and_then(|t| t.parse().ok())
                        .filter(|&n| n >= 0)
                        .ok_or_else(|| parse_error(lineno, "invalid CNF header"))?;
                    expected_clauses = tokens
                        .get(3)
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| parse_error(lineno, "invalid CNF header"))?;
                    cnf = Some(Cnf::new(nvar));
                }
                Some(_) => {
                    let cnf = cnf
                        .as_mut()
                        .ok_or_else(|| parse_error(lineno, "clause before header line"))?;
                    for tok in &tokens {
                        let lit: i32 = tok
                            .parse()
                            .map_err(|_| parse_error(lineno, format!("couldn't find literal or 0: '{}'", tok)))?;
                        if lit == 0 {
                            cnf.add_clause(&pending);
                            pending.clear();
                            finished_clauses += 1;
                        } else {
                            if var_of(lit) > cnf.variable_count() {
                                return Err(parse_error(
                                    lineno,
                                    format!("literal {} out of range", lit),
                                ));
                            }
                            pending.push(lit);
                        }
                    }
                }
            }
        }

        let mut cnf = cnf.ok_or_else(|| parse_error(0, "not a valid CNF file: no header line found"))?;
        if !pending.is_empty() {
            return Err(parse_error(0, "unexpected end of file inside a clause"));
        }
        if finished_clauses != expected_clauses {
            return Err(parse_error(
                0,
                format!(
                    "header declared {} clauses but {} were found",
                    expected_clauses, finished_clauses
                ),
            ));
        }
        if shows.is_empty() {
            // No explicit show declaration: every input variable is data.
            shows.extend(1..=cnf.variable_count());
        }
        for &var in &shows {
            if var < 1 || var > cnf.variable_count() {
                return Err(parse_error(0, format!("data variable {} out of range", var)));
            }
        }
        cnf.data_variables = shows;
        let data: Vec<i32> = cnf.data_variables.iter().copied().collect();
        for var in data {
            cnf.set_kind(var, VarKind::Data);
        }
        cnf.input_weights = weights;
        info!(
            "CNF representation with {} inputs and {} clauses constructed",
            cnf.variable_count(),
            cnf.maximum_clause_id()
        );
        Ok(cnf)
    }

    /// Reads a CNF from a DIMACS string. Convenience wrapper used by tests.
    pub fn from_dimacs_str(text: &str, process_comments: bool) -> Result<Cnf, PkcError> {
        Cnf::from_dimacs(text.as_bytes(), process_comments)
    }

    /// Reads a CNF from a DIMACS file.
    pub fn from_dimacs_path(path: &Path, process_comments: bool) -> Result<Cnf, PkcError> {
        let file = File::open(path)?;
        Cnf::from_dimacs(BufReader::new(file), process_comments)
    }

    /// Writes the current clausal state in DIMACS form: unit clauses for
    /// data-variable units, then the active clauses with skipped literals
    /// removed. With `show_vars` the data and Tseitin variables are
    /// declared up front so a projection-aware compiler can defer splits
    /// on the remaining variables.
    pub fn write_dimacs<W: Write>(&self, w: &mut W, show_vars: bool) -> io::Result<()> {
        let mut data_literals: Vec<i32> = Vec::new();
        let mut removed = 0usize;
        for &lit in &self.bcp_unit_literals {
            if self.is_data_variable(var_of(lit)) {
                data_literals.push(lit);
            } else {
                removed += 1;
            }
        }
        if show_vars {
            writeln!(w, "c t pmc")?;
            write!(w, "c p show")?;
            for var in &self.data_variables {
                write!(w, " {}", var)?;
            }
            for var in &self.tseitin_variables {
                write!(w, " {}", var)?;
            }
            writeln!(w, " 0")?;
        }
        writeln!(
            w,
            "p cnf {} {}",
            self.variable_count(),
            self.current_clause_count() - removed
        )?;
        for lit in data_literals {
            writeln!(w, "{} 0", lit)?;
        }
        for &cid in &self.active_clauses {
            if self.skip_clause(cid) {
                // Shouldn't arise after BCP; keep the clause count right.
                writeln!(w, "1 -1 0")?;
                continue;
            }
            for &lit in self.clause_literals(cid) {
                if !self.skip_literal(lit) {
                    write!(w, "{} ", lit)?;
                }
            }
            writeln!(w, "0")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use num_bigint::BigInt;

    fn rat(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_parse_basic() {
        let cnf = Cnf::from_dimacs_str("p cnf 3 2\n1 -2 0\n2 3 0\n", true).unwrap();
        assert_eq!(cnf.variable_count(), 3);
        assert_eq!(cnf.maximum_clause_id(), 2);
        assert_eq!(cnf.clause_literals(1), &[1, -2]);
        assert_eq!(cnf.clause_literals(2), &[2, 3]);
        // No show declaration: everything is data.
        assert_eq!(cnf.data_variables.len(), 3);
    }

    #[test]
    fn test_parse_show_and_weight() {
        let text = "c p show 1 2 0\nc p weight 1 0.3 0\nc p weight -1 0.7 0\np cnf 3 1\n1 2 3 0\n";
        let cnf = Cnf::from_dimacs_str(text, true).unwrap();
        assert_eq!(cnf.data_variables.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(cnf.input_weights.get(&1), Some(&rat(3, 10)));
        assert_eq!(cnf.input_weights.get(&-1), Some(&rat(7, 10)));
        assert_eq!(cnf.kind(1), VarKind::Data);
        assert_eq!(cnf.kind(3), VarKind::NonTseitin);
    }

    #[test]
    fn test_parse_comments_ignored_without_processing() {
        let text = "c p show 1 0\np cnf 2 1\n1 2 0\n";
        let cnf = Cnf::from_dimacs_str(text, false).unwrap();
        assert_eq!(cnf.data_variables.len(), 2);
    }

    #[test]
    fn test_parse_multiline_clause() {
        let cnf = Cnf::from_dimacs_str("p cnf 3 1\n1\n2\n3 0\n", true).unwrap();
        assert_eq!(cnf.clause_literals(1), &[1, 2, 3]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Cnf::from_dimacs_str("1 2 0\n", true).is_err());
        assert!(Cnf::from_dimacs_str("p cnf 2 1\n1 3 0\n", true).is_err());
        assert!(Cnf::from_dimacs_str("p cnf 2 2\n1 2 0\n", true).is_err());
        assert!(Cnf::from_dimacs_str("p cnf 2 1\n1 2\n", true).is_err());
        assert!(Cnf::from_dimacs_str("p cnf 2 1\n1 x 0\n", true).is_err());
    }

    #[test]
    fn test_write_round_trip() {
        let mut cnf = Cnf::from_dimacs_str("p cnf 3 2\n1 2 0\n-1 3 0\n", true).unwrap();
        let mut out = Vec::new();
        cnf.write_dimacs(&mut out, false).unwrap();
        let back = Cnf::from_dimacs_str(&String::from_utf8(out).unwrap(), true).unwrap();
        assert_eq!(back.maximum_clause_id(), 2);
        assert_eq!(back.clause_literals(1), cnf.clause_literals(1));

        // After BCP on a unit, the unit is only emitted for data variables.
        cnf.add_clause(&[2]);
        let mut out = Vec::new();
        cnf.write_dimacs(&mut out, false).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("p cnf 3 3"));
    }

    #[test]
    fn test_write_drops_projection_units() {
        let text = "c p show 1 0\np cnf 2 2\n1 2 0\n-2 0\n";
        let mut cnf = Cnf::from_dimacs_str(text, true).unwrap();
        cnf.bcp(false);
        let mut out = Vec::new();
        cnf.write_dimacs(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        // Unit -2 on a projection variable is dropped; clause (1 2) reduced to (1).
        assert!(text.contains("p cnf 2 1"));
        assert!(text.lines().any(|l| l == "1 0"));
    }

    #[test]
    fn test_write_show_vars_header() {
        let text = "c p show 1 0\np cnf 3 1\n1 2 3 0\n";
        let mut cnf = Cnf::from_dimacs_str(text, true).unwrap();
        cnf.tseitin_variables.insert(2);
        let mut out = Vec::new();
        cnf.write_dimacs(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("c t pmc"));
        assert!(text.contains("c p show 1 2 0"));
    }
}

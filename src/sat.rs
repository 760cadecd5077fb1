//! Satisfiability facade over the external SAT solver.
//!
//! The solver is used through a deliberately narrow contract: it receives
//! the live clauses (minus skipped literals) plus the current BCP units
//! over variables `1..=n` and answers SAT/UNSAT. No assumptions, no
//! incremental interface.

use log::debug;
use varisat::{ExtendFormula, Lit, Solver};

use crate::cnf::Cnf;

impl Cnf {
    /// Runs BCP, then hands the residual formula to the SAT solver.
    pub fn is_satisfiable(&mut self) -> bool {
        self.bcp(false);
        if self.has_conflict {
            return false;
        }
        let mut solver = Solver::new();
        let mut clause_count = 0usize;
        let mut buf: Vec<Lit> = Vec::new();
        for &lit in &self.bcp_unit_literals {
            solver.add_clause(&[Lit::from_dimacs(lit as isize)]);
            clause_count += 1;
        }
        for &cid in &self.active_clauses {
            if self.skip_clause(cid) {
                continue;
            }
            buf.clear();
            for &lit in self.clause_literals(cid) {
                if self.skip_literal(lit) {
                    continue;
                }
                buf.push(Lit::from_dimacs(lit as isize));
            }
            solver.add_clause(&buf);
            clause_count += 1;
        }
        let result = solver.solve().expect("SAT solver failed");
        debug!(
            "SAT solver on {} variables and {} clauses yields {}",
            self.variable_count(),
            clause_count,
            if result { "SAT" } else { "UNSAT" }
        );
        result
    }
}

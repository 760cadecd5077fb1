//! Resolution and bounded variable elimination.

use std::collections::BTreeSet;

use log::debug;

use crate::cnf::Cnf;
use crate::types::{var_of, VarKind};

impl Cnf {
    /// Resolves clauses `cid1` (containing `var`) and `cid2` (containing
    /// `-var`). Returns the new clause id, or `None` when the resolvent is
    /// a tautology.
    pub(crate) fn resolve(&mut self, var: i32, cid1: i32, cid2: i32) -> Option<i32> {
        let mut mlits: Vec<i32> = Vec::new();
        for &cid in &[cid1, cid2] {
            for &lit in self.clause_literals(cid) {
                if var_of(lit) == var || self.skip_literal(lit) {
                    continue;
                }
                mlits.push(lit);
            }
        }
        mlits.sort_by_key(|lit| lit.abs());
        let mut nlits: Vec<i32> = Vec::new();
        let mut last_lit = 0;
        for lit in mlits {
            if lit == last_lit {
                continue;
            }
            if lit == -last_lit {
                debug!(
                    "resolving clauses {} and {} (variable {}) yields tautology",
                    cid1, cid2, var
                );
                return None;
            }
            nlits.push(lit);
            last_lit = lit;
        }
        let cid = self.new_clause();
        for lit in nlits {
            self.add_literal(lit);
        }
        debug!(
            "resolving clauses {} and {} (variable {}) yields clause {}",
            cid1, cid2, var, cid
        );
        Some(cid)
    }

    /// Bounded variable elimination over the projection variables.
    ///
    /// Iteratively picks a non-data variable whose lower-degree phase has
    /// at most `max_degree` occurrences, replaces its clauses with all
    /// non-tautological resolvents, and retires the originals. An
    /// elimination that could add more than `max_degree^2 - 2*max_degree`
    /// clauses is skipped. A variable with a zero-degree phase makes the
    /// opposite literal pure, which is asserted. Returns the number of
    /// variables eliminated.
    pub fn bve(&mut self, preprocess: bool, max_degree: usize) -> usize {
        let max_added = (max_degree * max_degree) as i64 - 2 * max_degree as i64;
        let mut proj_variables: BTreeSet<i32> = BTreeSet::new();
        let mut degree_variables: Vec<BTreeSet<i32>> = vec![BTreeSet::new(); max_degree + 1];
        let mut eliminated_variables: BTreeSet<i32> = BTreeSet::new();

        let seed_clauses: Vec<i32> = self.active_clauses.iter().copied().collect();
        for cid in seed_clauses {
            let lits: Vec<i32> = self.clause_literals(cid).to_vec();
            for lit in lits {
                let var = var_of(lit);
                if self.skip_literal(lit)
                    || self.is_data_variable(var)
                    || !proj_variables.insert(var)
                {
                    continue;
                }
                let degree = self.occurrence_count(var).min(self.occurrence_count(-var));
                if degree <= max_degree {
                    degree_variables[degree].insert(var);
                }
            }
        }

        loop {
            // Find a variable contained in the fewest clauses for some phase.
            let mut var = 0;
            let mut lit = 0;
            let mut degree = 0;
            for d in 0..=max_degree {
                let mut dequeued: Vec<i32> = Vec::new();
                for &dvar in &degree_variables[d] {
                    dequeued.push(dvar);
                    let dpos = self.occurrence_count(dvar);
                    let dneg = self.occurrence_count(-dvar);
                    if !eliminated_variables.contains(&dvar) && (dpos == d || dneg == d) {
                        var = dvar;
                        lit = if dpos <= dneg { dvar } else { -dvar };
                        degree = d;
                        break;
                    }
                }
                // House cleaning: drop entries found or wrongly bucketed.
                for dvar in dequeued {
                    degree_variables[d].remove(&dvar);
                }
                if var != 0 {
                    break;
                }
            }
            if var == 0 {
                break;
            }

            let dpos = self.occurrence_count(var);
            let dneg = self.occurrence_count(-var);
            let deprecated_clause_count = dpos + dneg;
            let max_delta = (dpos * dneg) as i64 - deprecated_clause_count as i64;
            if max_delta > max_added {
                // Skip: might generate too many clauses.
                continue;
            }

            eliminated_variables.insert(var);
            if preprocess {
                self.set_kind(var, VarKind::Eliminated);
            }
            let pos_cids = self.occurrence_ids(lit);
            let neg_cids = self.occurrence_ids(-lit);

            // Variables that co-occurred with `var` get re-examined.
            let mut change_variables: BTreeSet<i32> = BTreeSet::new();
            for &cid in pos_cids.iter().chain(neg_cids.iter()) {
                for &clit in self.clause_literals(cid) {
                    let cvar = var_of(clit);
                    if cvar == var || self.skip_literal(clit) || self.is_data_variable(cvar) {
                        continue;
                    }
                    change_variables.insert(cvar);
                }
            }

            let mut new_clause_count = 0;
            for &cid1 in &pos_cids {
                for &cid2 in &neg_cids {
                    if self.resolve(var, cid1, cid2).is_some() {
                        new_clause_count += 1;
                    }
                }
            }
            self.deactivate_clauses(&pos_cids);
            self.deactivate_clauses(&neg_cids);

            for &ovar in &change_variables {
                let odegree = self.occurrence_count(ovar).min(self.occurrence_count(-ovar));
                if odegree <= max_degree {
                    degree_variables[odegree].insert(ovar);
                }
            }

            if degree == 0 && !self.bcp_unit_literals.contains(&-lit) {
                // Pure literal.
                self.assign_literal(-lit, true);
            }
            debug!(
                "BVE on variable {} deprecated {} clauses and added {} new ones",
                var, deprecated_clause_count, new_clause_count
            );
        }
        eliminated_variables.len()
    }
}

//! Tseitin variable detection and promotion.
//!
//! A projection variable is Tseitin when its defining clauses entail its
//! value from data (and already-classified Tseitin) variables. Detection
//! tests, within a throwaway context, whether those clauses become
//! unsatisfiable once the variable is universally quantified. Promotion
//! adds blocked clauses to force the property when one phase permits it.

use std::collections::BTreeSet;

use log::{debug, info};

use crate::cnf::{Cnf, UniqueQueue};
use crate::types::{var_of, VarKind};

/// Odometer step over per-clause index vectors.
fn increment_indices(lengths: &[usize], indices: &mut [usize]) -> bool {
    for i in 0..lengths.len() {
        if indices[i] + 1 < lengths[i] {
            indices[i] += 1;
            return true;
        }
        indices[i] = 0;
    }
    false
}

impl Cnf {
    /// Emits the blocked clauses covering `lit` and its defining clauses:
    /// for every tuple picking one other literal from each clause, the
    /// clause `{-lit, -l1, ..., -lk}` is added.
    fn blocked_clause_expand(&mut self, lit: i32, clause_list: &[i32]) {
        let mut clause_lengths: Vec<usize> = Vec::new();
        let mut clause_indices: Vec<usize> = Vec::new();
        for &cid in clause_list {
            // Move the literal itself and skipped literals to the end.
            let mut len = self.clause_length(cid);
            let mut lid = 0;
            while lid < len {
                let clit = self.literal(cid, lid);
                if clit == lit || self.skip_literal(clit) {
                    len -= 1;
                    self.swap_literals(cid, lid, len);
                } else {
                    lid += 1;
                }
            }
            clause_lengths.push(len);
            clause_indices.push(0);
        }
        let mut first_cid = 0;
        let mut last_cid = 0;
        loop {
            let ncid = self.new_clause();
            if first_cid == 0 {
                first_cid = ncid;
            }
            last_cid = ncid;
            self.add_literal(-lit);
            for (i, &cid) in clause_list.iter().enumerate() {
                let clit = self.literal(cid, clause_indices[i]);
                self.add_literal(-clit);
            }
            if !increment_indices(&clause_lengths, &mut clause_indices) {
                break;
            }
        }
        debug!(
            "added blocked clauses #{}..{} to promote variable {}",
            first_cid,
            last_cid,
            var_of(lit)
        );
    }

    /// Tests whether `var` is (or, with `promote`, can be made) a Tseitin
    /// variable. Returns the verdict together with the non-data variables
    /// that blocked clauses from participating, which become candidates
    /// once `var` is classified.
    fn tseitin_variable_test(&mut self, var: i32, promote: bool) -> (bool, BTreeSet<i32>) {
        // Clauses of var whose other literals are all data or Tseitin.
        let mut dt_var_clause_set: BTreeSet<i32> = BTreeSet::new();
        let mut dt_lit_clause_list: [Vec<i32>; 2] = [Vec::new(), Vec::new()];
        let mut dt_otherlit_set: [BTreeSet<i32>; 2] = [BTreeSet::new(), BTreeSet::new()];
        let mut fanout_vars: BTreeSet<i32> = BTreeSet::new();
        for phase in 0..2 {
            let lit = if phase == 0 { -var } else { var };
            for cid in self.occurrence_ids(lit) {
                if self.skip_clause(cid) {
                    continue;
                }
                let mut include = true;
                let mut other_lits: Vec<i32> = Vec::new();
                for &clit in self.clause_literals(cid) {
                    if self.skip_literal(clit) {
                        continue;
                    }
                    let cvar = var_of(clit);
                    if cvar == var {
                        continue;
                    }
                    if self.data_variables.contains(&cvar) || self.tseitin_variables.contains(&cvar)
                    {
                        other_lits.push(clit);
                    } else {
                        include = false;
                        fanout_vars.insert(cvar);
                    }
                }
                if include {
                    dt_var_clause_set.insert(cid);
                    dt_lit_clause_list[phase].push(cid);
                    dt_otherlit_set[phase].extend(other_lits);
                }
            }
        }
        let mut sat = true;
        if !dt_var_clause_set.is_empty() {
            self.new_context();
            self.push_active(dt_var_clause_set);
            self.uquantify_variable(var);
            sat = self.is_satisfiable();
            debug!(
                "Tseitin test gives {} for variable {}",
                if sat { "failure" } else { "success" },
                var
            );
            self.pop_context();
        }
        if !sat {
            return (true, fanout_vars);
        }
        if !promote {
            return (false, BTreeSet::new());
        }
        // See if the variable can be promoted.
        for phase in 0..2 {
            let lit = if phase == 0 { -var } else { var };
            // This phase must occur only in the collected clauses.
            if dt_lit_clause_list[phase].len() < self.occurrence_count(lit) {
                continue;
            }
            // All companion literals must form a pure set.
            let pure = dt_otherlit_set[phase]
                .iter()
                .all(|&olit| olit < 0 || !dt_otherlit_set[phase].contains(&-olit));
            if pure {
                self.blocked_clause_expand(lit, &dt_lit_clause_list[phase]);
                self.set_kind(var, VarKind::TseitinPromoted);
                debug!("promoted variable {} to Tseitin", var);
                return (true, fanout_vars);
            }
        }
        (false, BTreeSet::new())
    }

    /// Divides the non-data variables into Tseitin and projection
    /// variables, optionally promoting candidates by blocked-clause
    /// addition. Newly classified variables requeue their fanout.
    pub fn classify_variables(&mut self, promote: bool) {
        self.tseitin_variables.clear();
        let mut pvar_queue = UniqueQueue::new();
        let seed_clauses: Vec<i32> = self.active_clauses.iter().copied().collect();
        for cid in seed_clauses {
            if self.skip_clause(cid) {
                continue;
            }
            let lits: Vec<i32> = self.clause_literals(cid).to_vec();
            for lit in lits {
                if self.skip_literal(lit) {
                    continue;
                }
                let var = var_of(lit);
                if !self.data_variables.contains(&var) {
                    pvar_queue.push(var);
                }
            }
        }
        let mut tested = 0usize;
        while let Some(var) = pvar_queue.pop() {
            let (is_tseitin, fanout_vars) = self.tseitin_variable_test(var, promote);
            if is_tseitin {
                if self.kind(var) != VarKind::TseitinPromoted {
                    self.set_kind(var, VarKind::TseitinDetected);
                }
                self.tseitin_variables.insert(var);
            }
            for fvar in fanout_vars {
                if pvar_queue.push(fvar) {
                    debug!("added fanout variable {} for Tseitin variable {}", fvar, var);
                }
            }
            tested += 1;
        }
        info!(
            "variable analysis ran {} Tseitin tests, found {} Tseitin variables",
            tested,
            self.tseitin_variables.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_indices_odometer() {
        let lengths = [2, 3];
        let mut indices = [0, 0];
        let mut seen = vec![indices];
        while increment_indices(&lengths, &mut indices) {
            seen.push(indices);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[1], [1, 0]);
        assert_eq!(seen[2], [0, 1]);
    }

    #[test]
    fn test_detect_and_gate() {
        // t <-> (a & b), show a b: variable 3 is a Tseitin definition.
        let mut cnf = Cnf::new(3);
        cnf.data_variables.extend([1, 2]);
        cnf.add_clause(&[-3, 1]);
        cnf.add_clause(&[-3, 2]);
        cnf.add_clause(&[3, -1, -2]);
        cnf.classify_variables(false);
        assert!(cnf.tseitin_variables.contains(&3));
        assert_eq!(cnf.kind(3), VarKind::TseitinDetected);
    }

    #[test]
    fn test_detection_leaves_state_intact() {
        let mut cnf = Cnf::new(3);
        cnf.data_variables.extend([1, 2]);
        cnf.add_clause(&[-3, 1]);
        cnf.add_clause(&[-3, 2]);
        cnf.add_clause(&[3, -1, -2]);
        let active_before = cnf.active_clauses.clone();
        cnf.classify_variables(false);
        assert_eq!(cnf.active_clauses, active_before);
        assert!(!cnf.has_conflict());
    }

    #[test]
    fn test_no_detection_for_unconstrained_variable() {
        // (a | p): p is not determined by a.
        let mut cnf = Cnf::new(2);
        cnf.data_variables.insert(1);
        cnf.add_clause(&[1, 2]);
        cnf.classify_variables(false);
        assert!(cnf.tseitin_variables.is_empty());
    }

    #[test]
    fn test_promotion_empty_phase() {
        // (p | a) & (p | b): not Tseitin, but -p occurs nowhere, so the
        // expansion over the empty -p phase is the single unit clause {p}.
        let mut cnf = Cnf::new(3);
        cnf.data_variables.extend([1, 2]);
        cnf.add_clause(&[3, 1]);
        cnf.add_clause(&[3, 2]);
        let before = cnf.maximum_clause_id();
        cnf.classify_variables(true);
        assert!(cnf.tseitin_variables.contains(&3));
        assert_eq!(cnf.kind(3), VarKind::TseitinPromoted);
        assert_eq!(cnf.maximum_clause_id(), before + 1);
        assert_eq!(cnf.clause_literals(before + 1), &[3]);
    }

    #[test]
    fn test_promotion_cartesian_expansion() {
        // Phase -p has impure companions (both a and -a), so promotion
        // falls through to phase +p, whose companions {c, d} are pure.
        // The Cartesian expansion over (p|c) and (p|d) is {-p,-c,-d}.
        let mut cnf = Cnf::new(5);
        cnf.data_variables.extend([1, 2, 3, 4]);
        cnf.add_clause(&[-5, 1, 2]);
        cnf.add_clause(&[-5, -1]);
        cnf.add_clause(&[5, 3]);
        cnf.add_clause(&[5, 4]);
        let before = cnf.maximum_clause_id();
        cnf.classify_variables(true);
        assert!(cnf.tseitin_variables.contains(&5));
        assert_eq!(cnf.kind(5), VarKind::TseitinPromoted);
        assert_eq!(cnf.maximum_clause_id(), before + 1);
        assert_eq!(cnf.clause_literals(before + 1), &[-5, -3, -4]);
    }

    #[test]
    fn test_promotion_disabled_detection_only() {
        let mut cnf = Cnf::new(3);
        cnf.data_variables.extend([1, 2]);
        cnf.add_clause(&[3, 1]);
        cnf.add_clause(&[3, 2]);
        let before = cnf.maximum_clause_id();
        cnf.classify_variables(false);
        assert!(cnf.tseitin_variables.is_empty());
        assert_eq!(cnf.maximum_clause_id(), before);
    }
}

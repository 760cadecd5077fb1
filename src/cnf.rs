//! Mutable clausal database with unit propagation and context rollback.
//!
//! The [`Cnf`] manager owns all clause storage: literals live in a single
//! flat arena, clauses are contiguous slices of it, and every external
//! reference is a plain integer clause id. Clauses are never destroyed;
//! instead they are *deactivated*, and every mutation of the visible state
//! is journaled on an action stack so that [`Cnf::pop_context`] can restore
//! the state at the matching [`Cnf::new_context`] exactly.
//!
//! Operations are spread over several files, all as `impl Cnf` blocks:
//! DIMACS I/O in `dimacs.rs`, resolution and bounded variable elimination
//! in `bve.rs`, Tseitin classification in `tseitin.rs`, and the SAT facade
//! in `sat.rs`.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::{debug, trace};
use num_rational::BigRational;

use crate::types::{var_of, VarKind, CONFLICT, TAUTOLOGY};

/// Journaled mutation, undone in reverse order by [`Cnf::pop_context`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Action {
    /// Context frame marker; unwinding stops here.
    StartContext,
    /// Conflict flag was raised.
    Conflict,
    /// Clause was removed from the active set and the literal index.
    DeactivateClause(i32),
    /// Literal became unit through BCP.
    Bcp(i32),
    /// Literal was asserted externally.
    Assert(i32),
    /// BCP unit was upgraded to an external assertion.
    AssertFromBcp(i32),
    /// Variable became universally quantified.
    Uquantify(i32),
    /// Active clause set and literal index were swapped out.
    PushActive,
}

/// FIFO queue that never holds duplicates.
pub(crate) struct UniqueQueue {
    queue: VecDeque<i32>,
    members: HashSet<i32>,
}

impl UniqueQueue {
    pub fn new() -> Self {
        UniqueQueue {
            queue: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn from_iter(vals: impl IntoIterator<Item = i32>) -> Self {
        let mut q = UniqueQueue::new();
        for val in vals {
            q.push(val);
        }
        q
    }

    /// Enqueues `val` unless it is already pending. Returns whether it was new.
    pub fn push(&mut self, val: i32) -> bool {
        let new_val = self.members.insert(val);
        if new_val {
            self.queue.push_back(val);
        }
        new_val
    }

    pub fn pop(&mut self) -> Option<i32> {
        let val = self.queue.pop_front()?;
        self.members.remove(&val);
        Some(val)
    }
}

/// Clausal database for one compilation problem.
pub struct Cnf {
    /// Number of declared variables.
    pub(crate) nvar: i32,
    /// Kind of each variable, indexed by `var - 1`.
    pub(crate) kinds: Vec<VarKind>,
    /// `clause_offset[cid]` is the end of clause `cid` in the arena;
    /// entry 0 belongs to the reserved empty clause 0.
    pub(crate) clause_offset: Vec<usize>,
    /// All clause literals, concatenated.
    pub(crate) literal_sequence: Vec<i32>,
    /// Maps each literal to the active clauses containing it.
    pub(crate) literal_clauses: BTreeMap<i32, BTreeSet<i32>>,
    /// Clauses that are neither satisfied nor reduced to units.
    pub(crate) active_clauses: BTreeSet<i32>,
    /// Literals known true, asserted or derived.
    pub(crate) unit_literals: BTreeSet<i32>,
    /// Subset of `unit_literals` derived by BCP.
    pub(crate) bcp_unit_literals: BTreeSet<i32>,
    /// Variables whose literals behave as don't-cares.
    pub(crate) uquantified_variables: BTreeSet<i32>,
    pub(crate) has_conflict: bool,
    action_stack: Vec<Action>,
    /// Saved `(active_clauses, literal_clauses)` pairs for `PushActive` undo.
    active_stack: Vec<(BTreeSet<i32>, BTreeMap<i32, BTreeSet<i32>>)>,
    /// Declared data variables.
    pub data_variables: BTreeSet<i32>,
    /// Variables detected or promoted to be Tseitin.
    pub tseitin_variables: BTreeSet<i32>,
    /// Declared literal weights.
    pub input_weights: BTreeMap<i32, BigRational>,
}

impl Cnf {
    /// Creates an empty database over `nvar` variables.
    pub fn new(nvar: i32) -> Self {
        assert!(nvar >= 0, "negative variable count");
        let mut cnf = Cnf {
            nvar,
            kinds: vec![VarKind::Unused; nvar as usize],
            clause_offset: Vec::new(),
            literal_sequence: Vec::new(),
            literal_clauses: BTreeMap::new(),
            active_clauses: BTreeSet::new(),
            unit_literals: BTreeSet::new(),
            bcp_unit_literals: BTreeSet::new(),
            uquantified_variables: BTreeSet::new(),
            has_conflict: false,
            action_stack: Vec::new(),
            active_stack: Vec::new(),
            data_variables: BTreeSet::new(),
            tseitin_variables: BTreeSet::new(),
            input_weights: BTreeMap::new(),
        };
        // Reserve clause id 0.
        cnf.new_clause();
        cnf.new_context();
        cnf
    }

    pub fn variable_count(&self) -> i32 {
        self.nvar
    }

    /// Largest clause id allocated so far.
    pub fn maximum_clause_id(&self) -> i32 {
        self.clause_offset.len() as i32 - 1
    }

    /// Number of active (non-unit, unsatisfied) clauses.
    pub fn nonunit_clause_count(&self) -> usize {
        self.active_clauses.len()
    }

    /// Active clauses plus BCP-derived unit clauses.
    pub fn current_clause_count(&self) -> usize {
        self.active_clauses.len() + self.bcp_unit_literals.len()
    }

    pub fn clause_length(&self, cid: i32) -> usize {
        let lits = self.clause_literals(cid);
        lits.len()
    }

    /// The literals of clause `cid` as stored in the arena.
    pub fn clause_literals(&self, cid: i32) -> &[i32] {
        assert!(
            cid >= 1 && cid <= self.maximum_clause_id(),
            "invalid clause id {}",
            cid
        );
        let cid = cid as usize;
        &self.literal_sequence[self.clause_offset[cid - 1]..self.clause_offset[cid]]
    }

    /// Literal `lid` (0-indexed) of clause `cid`.
    pub fn literal(&self, cid: i32, lid: usize) -> i32 {
        self.clause_literals(cid)[lid]
    }

    pub(crate) fn swap_literals(&mut self, cid: i32, i: usize, j: usize) {
        let offset = self.clause_offset[cid as usize - 1];
        self.literal_sequence.swap(offset + i, offset + j);
    }

    /// Starts a new clause and returns its id. Literals are appended with
    /// [`Cnf::add_literal`].
    pub fn new_clause(&mut self) -> i32 {
        let cid = self.clause_offset.len() as i32;
        self.clause_offset.push(self.literal_sequence.len());
        if cid > 0 {
            self.active_clauses.insert(cid);
        }
        cid
    }

    /// Appends a literal to the clause most recently opened.
    pub fn add_literal(&mut self, lit: i32) {
        let var = var_of(lit);
        assert!(var >= 1 && var <= self.nvar, "literal {} out of range", lit);
        let cid = self.clause_offset.len() as i32 - 1;
        self.literal_sequence.push(lit);
        *self.clause_offset.last_mut().unwrap() += 1;
        self.literal_clauses.entry(lit).or_default().insert(cid);
        if self.kind(var) == VarKind::Unused {
            self.set_kind(var, VarKind::NonTseitin);
        }
    }

    /// Convenience: `new_clause` followed by `add_literal` for each literal.
    pub fn add_clause(&mut self, lits: &[i32]) -> i32 {
        let cid = self.new_clause();
        for &lit in lits {
            self.add_literal(lit);
        }
        cid
    }

    pub fn kind(&self, var: i32) -> VarKind {
        assert!(var >= 1 && var <= self.nvar, "variable {} out of range", var);
        self.kinds[var as usize - 1]
    }

    pub(crate) fn set_kind(&mut self, var: i32, kind: VarKind) {
        assert!(var >= 1 && var <= self.nvar, "variable {} out of range", var);
        self.kinds[var as usize - 1] = kind;
    }

    pub fn kind_count(&self, kind: VarKind) -> usize {
        self.kinds.iter().filter(|&&k| k == kind).count()
    }

    pub fn is_data_variable(&self, var: i32) -> bool {
        self.data_variables.contains(&var)
    }

    pub fn has_conflict(&self) -> bool {
        self.has_conflict
    }

    /// Active clause ids containing `lit`.
    pub(crate) fn occurrence_ids(&self, lit: i32) -> Vec<i32> {
        self.literal_clauses
            .get(&lit)
            .map(|cids| cids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn occurrence_count(&self, lit: i32) -> usize {
        self.literal_clauses.get(&lit).map_or(0, |cids| cids.len())
    }

    // ─── Context stack ───

    /// Pushes a frame marker; everything journaled afterwards is undone by
    /// the matching [`Cnf::pop_context`].
    pub fn new_context(&mut self) {
        self.action_stack.push(Action::StartContext);
    }

    /// Unwinds every action recorded since the matching frame marker.
    pub fn pop_context(&mut self) {
        loop {
            let action = self
                .action_stack
                .pop()
                .expect("pop_context without matching new_context");
            match action {
                Action::StartContext => return,
                Action::Conflict => self.has_conflict = false,
                Action::DeactivateClause(cid) => self.activate_clause(cid),
                Action::Bcp(lit) => {
                    self.bcp_unit_literals.remove(&lit);
                    self.unit_literals.remove(&lit);
                }
                Action::Assert(lit) => {
                    self.unit_literals.remove(&lit);
                }
                Action::AssertFromBcp(lit) => {
                    self.bcp_unit_literals.insert(lit);
                }
                Action::Uquantify(var) => {
                    self.uquantified_variables.remove(&var);
                }
                Action::PushActive => {
                    let (active, index) = self
                        .active_stack
                        .pop()
                        .expect("PushActive action without saved active set");
                    self.active_clauses = active;
                    self.literal_clauses = index;
                }
            }
        }
    }

    /// Makes `lit` a unit literal. With `bcp` the unit is journaled as
    /// BCP-derived and retracted on context pop; without it the literal is
    /// an external assertion, upgrading an existing BCP unit in place.
    pub fn assign_literal(&mut self, lit: i32, bcp: bool) {
        let var = var_of(lit);
        assert!(var >= 1 && var <= self.nvar, "can't assign literal {}", lit);
        let was_unit = self.unit_literals.contains(&lit);
        let was_bcp_unit = self.bcp_unit_literals.contains(&lit);
        if self.unit_literals.contains(&-lit) {
            self.trigger_conflict();
            return;
        }
        if bcp {
            if was_unit {
                log::error!("attempt to set literal {} by BCP that is already unit", lit);
            } else {
                self.unit_literals.insert(lit);
                self.bcp_unit_literals.insert(lit);
                self.action_stack.push(Action::Bcp(lit));
            }
        } else if was_unit && !was_bcp_unit {
            log::error!("attempt to assert literal {} that is already unit", lit);
        } else if was_bcp_unit {
            self.bcp_unit_literals.remove(&lit);
            self.action_stack.push(Action::AssertFromBcp(lit));
        } else {
            self.unit_literals.insert(lit);
            self.action_stack.push(Action::Assert(lit));
        }
    }

    /// Marks `var` universally quantified; its literals are skipped.
    pub fn uquantify_variable(&mut self, var: i32) {
        self.uquantified_variables.insert(var);
        self.action_stack.push(Action::Uquantify(var));
    }

    fn activate_clause(&mut self, cid: i32) {
        let lits: Vec<i32> = self.clause_literals(cid).to_vec();
        for lit in lits {
            self.literal_clauses.entry(lit).or_default().insert(cid);
        }
        self.active_clauses.insert(cid);
    }

    /// Removes `cid` from the clausal state (journaled).
    pub(crate) fn deactivate_clause(&mut self, cid: i32) {
        let lits: Vec<i32> = self.clause_literals(cid).to_vec();
        for lit in lits {
            if let Some(cids) = self.literal_clauses.get_mut(&lit) {
                cids.remove(&cid);
            }
        }
        self.active_clauses.remove(&cid);
        self.action_stack.push(Action::DeactivateClause(cid));
    }

    pub(crate) fn deactivate_clauses(&mut self, remove: &[i32]) {
        for &cid in remove {
            self.deactivate_clause(cid);
        }
    }

    /// Installs `nactive` as the active clause set, saving the current set
    /// and literal index for restoration on context pop. The index is
    /// rebuilt over the non-skipped literals of the new set.
    pub(crate) fn push_active(&mut self, nactive: BTreeSet<i32>) {
        let old_active = std::mem::replace(&mut self.active_clauses, nactive);
        let old_index = std::mem::take(&mut self.literal_clauses);
        self.active_stack.push((old_active, old_index));
        self.action_stack.push(Action::PushActive);
        let cids: Vec<i32> = self.active_clauses.iter().copied().collect();
        for cid in cids {
            let lits: Vec<i32> = self.clause_literals(cid).to_vec();
            for lit in lits {
                if !self.skip_literal(lit) {
                    self.literal_clauses.entry(lit).or_default().insert(cid);
                }
            }
        }
    }

    pub(crate) fn trigger_conflict(&mut self) {
        self.has_conflict = true;
        self.action_stack.push(Action::Conflict);
    }

    /// A clause is skipped (logically satisfied) iff one of its literals is
    /// unit.
    pub(crate) fn skip_clause(&self, cid: i32) -> bool {
        self.clause_literals(cid)
            .iter()
            .any(|lit| self.unit_literals.contains(lit))
    }

    /// A literal is skipped (logically gone) iff its negation is unit or
    /// its variable is universally quantified.
    pub(crate) fn skip_literal(&self, lit: i32) -> bool {
        self.unit_literals.contains(&-lit) || self.uquantified_variables.contains(&var_of(lit))
    }

    /// Classifies clause `cid` under the current assignment: [`TAUTOLOGY`]
    /// if satisfied, [`CONFLICT`] if every literal is skipped, the literal
    /// itself if exactly one remains, 0 otherwise.
    pub(crate) fn propagate_clause(&self, cid: i32) -> i32 {
        let mut result = CONFLICT;
        for &lit in self.clause_literals(cid) {
            if self.unit_literals.contains(&lit) {
                return TAUTOLOGY;
            }
            if self.skip_literal(lit) {
                continue;
            }
            result = if result == CONFLICT { lit } else { 0 };
        }
        result
    }

    /// Worklist-based boolean constraint propagation. Returns the number of
    /// units derived. In `preprocess` mode derived units mark their
    /// variable eliminated.
    pub fn bcp(&mut self, preprocess: bool) -> usize {
        let mut queue = UniqueQueue::from_iter(self.active_clauses.iter().copied());
        let mut count = 0;
        while !self.has_conflict {
            let Some(cid) = queue.pop() else { break };
            if !self.active_clauses.contains(&cid) {
                continue;
            }
            match self.propagate_clause(cid) {
                CONFLICT => self.trigger_conflict(),
                0 => {}
                TAUTOLOGY => self.deactivate_clause(cid),
                lit => {
                    trace!("bcp: clause {} forces literal {}", cid, lit);
                    if preprocess {
                        self.set_kind(var_of(lit), VarKind::Eliminated);
                    }
                    self.assign_literal(lit, true);
                    self.deactivate_clause(cid);
                    let satisfied: Vec<i32> = self
                        .occurrence_ids(lit)
                        .into_iter()
                        .filter(|ocid| self.active_clauses.contains(ocid))
                        .collect();
                    self.deactivate_clauses(&satisfied);
                    for ocid in self.occurrence_ids(-lit) {
                        if self.active_clauses.contains(&ocid) {
                            queue.push(ocid);
                        }
                    }
                    count += 1;
                }
            }
        }
        debug!("bcp derived {} units, conflict = {}", count, self.has_conflict);
        count
    }

    /// Succeeds iff the active clauses are pairwise variable-disjoint,
    /// returning their literals as a zero-separated stream (followed by the
    /// data-variable units as singleton clauses). An all-skipped clause
    /// yields the degenerate conflict stream `[0, 0]`.
    ///
    /// Assumes BCP and pure-literal elimination have run.
    pub fn check_simple_pkc(&self) -> Option<Vec<i32>> {
        let mut chunks = Vec::new();
        let mut vset: HashSet<i32> = HashSet::new();
        for &cid in &self.active_clauses {
            if self.skip_clause(cid) {
                continue;
            }
            let mut plen = 0;
            for &lit in self.clause_literals(cid) {
                if self.skip_literal(lit) {
                    continue;
                }
                if !vset.insert(var_of(lit)) {
                    return None;
                }
                chunks.push(lit);
                plen += 1;
            }
            chunks.push(0);
            if plen == 0 {
                // Contradiction: signal with the degenerate stream.
                return Some(vec![0, 0]);
            }
        }
        for &lit in &self.bcp_unit_literals {
            if !self.is_data_variable(var_of(lit)) {
                continue;
            }
            chunks.push(lit);
            chunks.push(0);
        }
        Some(chunks)
    }

    /// Chooses a splitting variable: the lowest-id variable occurring in
    /// both phases, else the lowest-id remaining variable.
    pub fn find_split(&self) -> i32 {
        let mut literals: BTreeSet<i32> = BTreeSet::new();
        for &cid in &self.active_clauses {
            if self.skip_clause(cid) {
                continue;
            }
            for &lit in self.clause_literals(cid) {
                if !self.skip_literal(lit) {
                    literals.insert(lit);
                }
            }
        }
        let vars: BTreeSet<i32> = literals.iter().map(|&lit| var_of(lit)).collect();
        for &var in &vars {
            if literals.contains(&var) && literals.contains(&-var) {
                return var;
            }
        }
        *vars
            .iter()
            .next()
            .expect("no literal available while looking for splitting variable")
    }
}

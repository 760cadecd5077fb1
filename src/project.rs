//! Top-level orchestration: preprocessing, initial compilation, and the
//! projecting traversal that rewrites the POG into its projected form.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use num_rational::BigRational;
use num_traits::{One, Zero};

use crate::cnf::Cnf;
use crate::compile::{Compiler, D4Version};
use crate::pog::{NodeType, Pog};
use crate::stats::{CompileStats, TraverseStats};
use crate::types::{var_of, PkcError, VarKind, CONFLICT, TAUTOLOGY};

/// Operating mode of a run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    /// Compile without trimming, then run the projecting traversal.
    Incremental,
    /// Compile with trimming, relying on Tseitin classification for
    /// mutual exclusivity.
    Tseitin,
    /// Compile with trimming, then recompile the clausified result once.
    Monolithic,
    /// Compile with trimming, deferring projection-variable splits to the
    /// external compiler.
    Deferred,
    /// Compile without projection and emit the POG as-is.
    Compile,
    /// Stop after preprocessing.
    Preprocess,
}

/// How aggressively to classify Tseitin variables during preprocessing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TseitinPolicy {
    None,
    Detect,
    Promote,
}

/// Run configuration. `Default` matches the standard driver settings.
#[derive(Debug, Clone)]
pub struct Options {
    pub mode: Mode,
    /// 0: none, 1: +BCP, 2: +pure literals, 3: +BVE(1), >=4: +BVE(n-2).
    pub preprocess_level: u32,
    pub tseitin: TseitinPolicy,
    /// 0: none, 1: +result reuse, 2: +variable analysis, 3: +builtin KC,
    /// 4: +counted subsumption.
    pub optlevel: u32,
    /// Largest clause count handled by the builtin compiler.
    pub bkc_limit: usize,
    pub keep_files: bool,
    pub d4_version: D4Version,
    pub d4_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mode: Mode::Incremental,
            preprocess_level: 4,
            tseitin: TseitinPolicy::Promote,
            optlevel: 4,
            bkc_limit: 70,
            keep_files: false,
            d4_version: D4Version::V2,
            d4_path: None,
        }
    }
}

/// Runs the preprocessing pipeline on a freshly loaded CNF: BCP, bounded
/// variable elimination, Tseitin classification, then a second BVE round
/// at higher preprocessing levels.
pub fn preprocess(cnf: &mut Cnf, opts: &Options) {
    let mut ucount = 0;
    let mut ecount = 0;
    if opts.preprocess_level >= 1 {
        ucount = cnf.bcp(true);
    }
    if opts.preprocess_level >= 2 {
        let max_degree = if opts.preprocess_level >= 3 { 1 } else { 0 };
        ecount = cnf.bve(true, max_degree);
    }
    info!(
        "initial BCP/BVE found {} unit literals and eliminated {} variables",
        ucount, ecount
    );
    if opts.tseitin != TseitinPolicy::None {
        cnf.classify_variables(opts.tseitin == TseitinPolicy::Promote);
    }
    if opts.preprocess_level >= 4 {
        let max_degree = (opts.preprocess_level - 2) as usize;
        let ecount = cnf.bve(true, max_degree);
        info!(
            "second BVE (max degree {}) eliminated {} variables",
            max_degree, ecount
        );
    }
    info!(
        "after preprocessing: {} data, {} Tseitin, {} other projection, {} eliminated variables",
        cnf.kind_count(VarKind::Data),
        cnf.kind_count(VarKind::TseitinDetected) + cnf.kind_count(VarKind::TseitinPromoted),
        cnf.kind_count(VarKind::NonTseitin),
        cnf.kind_count(VarKind::Eliminated)
    );
}

/// Orchestrates one projected-compilation run over a loaded CNF.
pub struct Projector {
    pog: Pog,
    compiler: Compiler,
    root_edge: i32,
    /// Memoized traversal results, keyed by input edge.
    result_cache: HashMap<i32, i32>,
    input_weights: BTreeMap<i32, BigRational>,
    mode: Mode,
    optlevel: u32,
    preprocess_level: u32,
    pub stats: TraverseStats,
}

impl Projector {
    /// Preprocesses `cnf` and performs the initial knowledge compilation
    /// according to the selected mode.
    pub fn new(cnf: Cnf, opts: &Options) -> Result<Self, PkcError> {
        Self::build(cnf, opts, None)
    }

    /// Loads the CNF from `path` and builds a projector; temporary files
    /// are named after the input file.
    pub fn from_path(path: &Path, opts: &Options) -> Result<Self, PkcError> {
        let cnf = Cnf::from_dimacs_path(path, opts.mode != Mode::Compile)?;
        info!(
            "CNF file loaded: {} declared variables, {} clauses, {} data variables",
            cnf.variable_count(),
            cnf.current_clause_count(),
            cnf.data_variables.len()
        );
        Self::build(cnf, opts, Some(path))
    }

    fn build(mut cnf: Cnf, opts: &Options, source: Option<&Path>) -> Result<Self, PkcError> {
        preprocess(&mut cnf, opts);
        let pog = Pog::new(
            cnf.variable_count(),
            cnf.data_variables.clone(),
            cnf.tseitin_variables.clone(),
        );
        let mut compiler = Compiler::new(
            opts.bkc_limit,
            opts.d4_version,
            opts.d4_path.clone(),
            opts.keep_files,
        );
        if let Some(path) = source {
            compiler.set_file_root(path);
        }
        let mut proj = Projector {
            pog,
            compiler,
            root_edge: TAUTOLOGY,
            result_cache: HashMap::new(),
            input_weights: std::mem::take(&mut cnf.input_weights),
            mode: opts.mode,
            optlevel: opts.optlevel,
            preprocess_level: opts.preprocess_level,
            stats: TraverseStats::default(),
        };
        if opts.mode != Mode::Preprocess {
            // In incremental mode the split variables stay in the graph;
            // the traversal removes them afterwards.
            let trim = matches!(opts.mode, Mode::Monolithic | Mode::Tseitin | Mode::Deferred);
            let defer = opts.mode == Mode::Deferred;
            proj.root_edge = proj
                .compiler
                .compile_cnf(&mut proj.pog, &mut cnf, trim, defer)?;
            info!(
                "initial POG created: {} nodes, {} edges, root edge {}",
                proj.pog.node_count(),
                proj.pog.edge_count(),
                proj.root_edge
            );
        }
        Ok(proj)
    }

    pub fn root_edge(&self) -> i32 {
        self.root_edge
    }

    pub fn pog(&self) -> &Pog {
        &self.pog
    }

    pub fn compile_stats(&self) -> &CompileStats {
        &self.compiler.stats
    }

    /// Second phase: rewrites the initial POG into its projected form.
    /// A no-op for the modes whose initial compilation already projects.
    pub fn projecting_compile(&mut self) -> Result<(), PkcError> {
        match self.mode {
            Mode::Monolithic => {
                if !self.pog.is_node(self.root_edge) {
                    debug!(
                        "first compilation yielded {}",
                        self.pog.edge_string(self.root_edge)
                    );
                    return Ok(());
                }
                // Tautology check at the root.
                if self.sums_to_tautology(&[self.root_edge]) {
                    info!("SAT test detected tautology at root");
                    self.root_edge = TAUTOLOGY;
                    return Ok(());
                }
                // Single recompile of the clausified POG to restore
                // mutual exclusivity among trimmed sums.
                let mut mcnf = self.compiler.clausify(&self.pog, &[self.root_edge]);
                let mut ucount = 0;
                let mut ecount = 0;
                if self.preprocess_level >= 1 {
                    ucount = mcnf.bcp(false);
                    if self.preprocess_level >= 2 {
                        ecount = mcnf.bve(false, (self.preprocess_level - 2) as usize);
                    }
                }
                debug!(
                    "recompile: {} unit literals, {} eliminated variables, {} non-unit clauses",
                    ucount,
                    ecount,
                    mcnf.nonunit_clause_count()
                );
                self.root_edge = self
                    .compiler
                    .compile_cnf(&mut self.pog, &mut mcnf, true, false)?;
            }
            Mode::Incremental => {
                self.root_edge = self.traverse(self.root_edge)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Writes the projected POG.
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.pog.write(self.root_edge, w)
    }

    /// Weighted or unweighted projected model count. Returns `None` when
    /// weighted counting is requested but no weights were declared.
    pub fn count(&self, weighted: bool) -> Result<Option<BigRational>, PkcError> {
        self.subgraph_count(weighted, self.root_edge)
    }

    /// Normalizes the declared weights into per-literal ring values whose
    /// phase sums are 1, accumulating the removed factors in a rescale
    /// multiplier. Unweighted counting uses weight 1 for every literal,
    /// so each variable contributes a factor 2 rescale and weight 1/2.
    fn normalized_weights(
        &self,
        weighted: bool,
    ) -> Result<Option<(BTreeMap<i32, BigRational>, BigRational)>, PkcError> {
        if weighted && self.input_weights.is_empty() {
            return Ok(None);
        }
        let one = BigRational::one();
        let mut rescale = BigRational::one();
        let mut weights: BTreeMap<i32, BigRational> = BTreeMap::new();
        for &var in &self.pog.data_variables {
            let (pwt, nwt) = if weighted {
                let pos = self.input_weights.get(&var).cloned();
                let neg = self.input_weights.get(&-var).cloned();
                if pos.is_none() {
                    log::error!("couldn't find weight for input {}", var);
                }
                match (pos, neg) {
                    (Some(p), Some(n)) => (p, n),
                    (Some(p), None) => {
                        let n = &one - &p;
                        (p, n)
                    }
                    (None, Some(n)) => {
                        let p = &one - &n;
                        (p, n)
                    }
                    (None, None) => (one.clone(), one.clone()),
                }
            } else {
                (one.clone(), one.clone())
            };
            let sum = &pwt + &nwt;
            if sum.is_one() {
                weights.insert(var, pwt);
                weights.insert(-var, nwt);
            } else {
                if sum.is_zero() {
                    return Err(PkcError::Arithmetic(format!(
                        "could not get reciprocal of summed weights for variable {}",
                        var
                    )));
                }
                let recip = sum.recip();
                rescale = rescale * &sum;
                weights.insert(var, &pwt * &recip);
                weights.insert(-var, &nwt * &recip);
            }
        }
        Ok(Some((weights, rescale)))
    }

    fn subgraph_count(
        &self,
        weighted: bool,
        root_edge: i32,
    ) -> Result<Option<BigRational>, PkcError> {
        let Some((weights, rescale)) = self.normalized_weights(weighted)? else {
            return Ok(None);
        };
        Ok(Some(rescale * self.pog.ring_evaluate(root_edge, &weights)))
    }

    /// Counted-subsumption test: do the two subgraphs have the same
    /// number of projected models?
    fn equal_counts(&self, root_edge1: i32, root_edge2: i32) -> bool {
        match (
            self.subgraph_count(false, root_edge1),
            self.subgraph_count(false, root_edge2),
        ) {
            (Ok(Some(c1)), Ok(Some(c2))) => c1 == c2,
            _ => false,
        }
    }

    /// Whether the disjunction of `root_literals` covers all assignments,
    /// tested by refuting the conjunction of their negations.
    fn sums_to_tautology(&mut self, root_literals: &[i32]) -> bool {
        let nroots: Vec<i32> = root_literals.iter().map(|&root| -root).collect();
        let mut tcnf = self.compiler.clausify(&self.pog, &nroots);
        self.stats.sat_calls += 1;
        !tcnf.is_satisfiable()
    }

    /// Projecting traversal: rewrites the subgraph at `edge` so that its
    /// models over the data variables are exactly the projections of the
    /// original models. Memoized per edge.
    fn traverse(&mut self, edge: i32) -> Result<i32, PkcError> {
        if !self.pog.is_node(edge) {
            let var = var_of(edge);
            if var == TAUTOLOGY || self.pog.is_data_variable(var) {
                return Ok(edge);
            }
            // Projected literal is satisfiable either way.
            return Ok(TAUTOLOGY);
        }
        if self.optlevel >= 1 {
            if let Some(&nedge) = self.result_cache.get(&edge) {
                self.stats.cache_reuse += 1;
                return Ok(nedge);
            }
        }
        if self.optlevel >= 2 {
            if self.pog.only_data_variables(edge) {
                self.stats.data_only_shortcut += 1;
                return Ok(edge);
            }
            if self.pog.only_projection_variables(edge) {
                self.stats.projection_only_shortcut += 1;
                return Ok(TAUTOLOGY);
            }
        }
        let nedge = if self.pog.is_sum(edge) {
            self.traverse_sum(edge)?
        } else {
            self.traverse_product(edge)?
        };
        self.result_cache.insert(edge, nedge);
        Ok(nedge)
    }

    fn traverse_product(&mut self, edge: i32) -> Result<i32, PkcError> {
        let args: Vec<i32> = self.pog.edge_args(edge).to_vec();
        let mut nargs = Vec::with_capacity(args.len());
        for cedge in args {
            nargs.push(self.traverse(cedge)?);
        }
        self.pog.start_node(NodeType::Product);
        for narg in nargs {
            self.pog.add_argument(narg);
        }
        let nedge = self.pog.finish_node();
        self.stats.visit_product += 1;
        debug!("traversal of product {} yielded edge {}", edge, nedge);
        Ok(nedge)
    }

    /// The crux: projecting a case split. Splits on data and Tseitin
    /// variables stay mutually exclusive; a split on another projection
    /// variable may leave overlapping branches, which are repaired by
    /// compiling their intersection and excluding it from one branch.
    fn traverse_sum(&mut self, edge: i32) -> Result<i32, PkcError> {
        let edge1 = self.pog.edge_arg(edge, 0);
        let edge2 = self.pog.edge_arg(edge, 1);
        let dvar = self.pog.get_decision_variable(edge);
        debug!(
            "traversing sum {} splitting on variable {} with children {} and {}",
            edge, dvar, edge1, edge2
        );
        let nedge1 = self.traverse(edge1)?;
        if nedge1 == TAUTOLOGY {
            self.stats.visit_subsumed_sum += 1;
            return Ok(nedge1);
        }
        let nedge2 = self.traverse(edge2)?;
        if nedge2 == TAUTOLOGY {
            self.stats.visit_subsumed_sum += 1;
            return Ok(nedge2);
        }
        if nedge1 == nedge2 {
            self.stats.visit_subsumed_sum += 1;
            return Ok(nedge1);
        }
        if self.sums_to_tautology(&[nedge1, nedge2]) {
            self.stats.visit_tautology_sum += 1;
            debug!("sum {}: children {} and {} cover everything", edge, nedge1, nedge2);
            return Ok(TAUTOLOGY);
        }
        if self.pog.is_data_variable(dvar) {
            // The split survives projection.
            self.stats.visit_data_sum += 1;
        } else if self.pog.is_tseitin_variable(dvar) {
            // Branches are provably mutually exclusive.
            self.stats.visit_mutex_sum += 1;
        } else {
            let mut xcnf = self.compiler.clausify(&self.pog, &[nedge1, nedge2]);
            self.stats.sat_calls += 1;
            if !xcnf.is_satisfiable() {
                self.stats.visit_mutex_sum += 1;
            } else {
                // Compile the intersection and project it.
                let uroot =
                    self.compiler
                        .compile_cnf(&mut self.pog, &mut xcnf, self.optlevel >= 2, false)?;
                if uroot == CONFLICT {
                    self.stats.visit_mutex_sum += 1;
                } else {
                    let xroot = self.traverse(uroot)?;
                    if xroot == nedge1 {
                        self.stats.visit_subsumed_sum += 1;
                        return Ok(nedge2);
                    }
                    if xroot == nedge2 {
                        self.stats.visit_subsumed_sum += 1;
                        return Ok(nedge1);
                    }
                    if self.optlevel >= 4 && self.equal_counts(xroot, nedge1) {
                        self.stats.visit_counted_sum += 1;
                        return Ok(nedge2);
                    }
                    if self.optlevel >= 4 && self.equal_counts(xroot, nedge2) {
                        self.stats.visit_counted_sum += 1;
                        return Ok(nedge1);
                    }
                    // Exclusion construction: remove the intersection
                    // from the first branch, then sum with the second.
                    self.pog.start_node(NodeType::Sum);
                    self.pog.add_argument(-nedge1);
                    self.pog.add_argument(xroot);
                    let mroot = self.pog.finish_node();
                    self.pog.start_node(NodeType::Sum);
                    self.pog.add_argument(-mroot);
                    self.pog.add_argument(nedge2);
                    let nedge = self.pog.finish_node();
                    self.stats.visit_excluding_sum += 1;
                    debug!("sum {}: exclusion construction yielded {}", edge, nedge);
                    return Ok(nedge);
                }
            }
        }
        self.pog.start_node(NodeType::Sum);
        self.pog.add_argument(nedge1);
        self.pog.add_argument(nedge2);
        Ok(self.pog.finish_node())
    }

    /// Logs a compact summary of the run.
    pub fn log_summary(&self) {
        info!(
            "POG: {} nodes, {} edges; builtin KC calls {}, external KC calls {}, SAT calls {}",
            self.pog.node_count(),
            self.pog.edge_count(),
            self.compiler.stats.builtin_kc_calls,
            self.compiler.stats.external_kc_calls,
            self.stats.sat_calls
        );
        info!(
            "traversals: {} product, {} sum ({} data, {} mutex, {} tautology, {} subsumed, {} counted, {} excluding), {} reused",
            self.stats.visit_product,
            self.stats.visit_sum_total(),
            self.stats.visit_data_sum,
            self.stats.visit_mutex_sum,
            self.stats.visit_tautology_sum,
            self.stats.visit_subsumed_sum,
            self.stats.visit_counted_sum,
            self.stats.visit_excluding_sum,
            self.stats.cache_reuse
        );
    }
}

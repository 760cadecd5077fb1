//! Knowledge compilation: clausifying POG subgraphs and compiling CNFs
//! into the POG, through the builtin recursive compiler or the external
//! D-DNNF compiler.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::cnf::Cnf;
use crate::files::TmpFiles;
use crate::pog::{NodeType, Pog};
use crate::stats::CompileStats;
use crate::types::{var_of, PkcError};

/// Invocation style of the external D-DNNF compiler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum D4Version {
    V1,
    V2,
}

pub struct Compiler {
    /// Problems with at most this many non-unit clauses use the builtin
    /// compiler; larger ones go to the external tool.
    bkc_limit: usize,
    d4_version: D4Version,
    d4_path: Option<PathBuf>,
    files: TmpFiles,
    pub stats: CompileStats,
}

impl Compiler {
    pub fn new(
        bkc_limit: usize,
        d4_version: D4Version,
        d4_path: Option<PathBuf>,
        keep_files: bool,
    ) -> Self {
        Compiler {
            bkc_limit,
            d4_version,
            d4_path,
            files: TmpFiles::new(keep_files),
            stats: CompileStats::default(),
        }
    }

    pub fn set_bkc_limit(&mut self, bkc_limit: usize) {
        self.bkc_limit = bkc_limit;
    }

    /// Names temporary files after the input formula.
    pub fn set_file_root(&mut self, source: &Path) {
        self.files.set_root(source);
    }

    /// Encodes the subgraphs rooted at `root_edges` as a Tseitin CNF over
    /// fresh variables: for each reached node an equivalence (one big
    /// clause plus one small clause per argument), and a unit clause per
    /// root literal. Leaf variables of the encoding become its data
    /// variables.
    pub fn clausify(&self, pog: &Pog, root_edges: &[i32]) -> Cnf {
        let node_remap = pog.get_subgraph(root_edges);
        let mut cnf = Cnf::new(pog.variable_count() + node_remap.len() as i32);
        let remapped = |oclit: i32| -> i32 {
            let ocvar = var_of(oclit);
            let ncvar = if pog.is_node(ocvar) {
                *node_remap
                    .get(&ocvar)
                    .unwrap_or_else(|| panic!("missing remap entry for node {}", ocvar))
            } else {
                ocvar
            };
            if oclit < 0 {
                -ncvar
            } else {
                ncvar
            }
        };
        for (&onid, &nnid) in &node_remap {
            let is_sum = pog.is_sum(onid);
            let args: Vec<i32> = pog.edge_args(onid).to_vec();
            // Big clause: the node implies (sum) or is implied by
            // (product) its arguments.
            cnf.new_clause();
            cnf.add_literal(if is_sum { -nnid } else { nnid });
            for &oclit in &args {
                let nclit = remapped(oclit);
                cnf.add_literal(if is_sum { nclit } else { -nclit });
                if !pog.is_node(oclit) {
                    cnf.data_variables.insert(var_of(oclit));
                }
            }
            // Small clauses: the converse implications, one per argument.
            for &oclit in &args {
                let nclit = remapped(oclit);
                cnf.new_clause();
                cnf.add_literal(if is_sum { nnid } else { -nnid });
                cnf.add_literal(if is_sum { -nclit } else { nclit });
            }
        }
        for &orid in root_edges {
            cnf.new_clause();
            cnf.add_literal(remapped(orid));
            if !pog.is_node(orid) {
                cnf.data_variables.insert(var_of(orid));
            }
        }
        debug!(
            "clausify of {} roots gave {} variables, {} clauses",
            root_edges.len(),
            cnf.variable_count(),
            cnf.maximum_clause_id()
        );
        cnf
    }

    /// Compiles `cnf` into the POG and returns the root edge. Small
    /// problems use the builtin compiler; larger ones are serialized and
    /// handed to the external D-DNNF compiler. With `trim`, literals of
    /// projection variables become tautologies. `defer` asks the external
    /// compiler to defer splits on projection variables (v2 only).
    pub fn compile_cnf(
        &mut self,
        pog: &mut Pog,
        cnf: &mut Cnf,
        trim: bool,
        defer: bool,
    ) -> Result<i32, PkcError> {
        debug!(
            "compile: {} clauses ({} non-unit), trim={}, defer={}",
            cnf.current_clause_count(),
            cnf.nonunit_clause_count(),
            trim,
            defer
        );
        if defer && self.d4_version == D4Version::V1 {
            return Err(PkcError::ExternalTool(
                "defer mode not supported with D4 v1".to_string(),
            ));
        }
        if cnf.nonunit_clause_count() <= self.bkc_limit {
            return Ok(self.builtin_kc(pog, cnf, trim, true));
        }
        let cnf_path = self.files.build_name("cnf", true);
        {
            let file = File::create(&cnf_path)?;
            let mut w = BufWriter::new(file);
            cnf.write_dimacs(&mut w, self.d4_version == D4Version::V2 && defer)?;
        }
        self.compile_file(pog, &cnf_path, &cnf.data_variables, trim)
    }

    /// Runs the external D-DNNF compiler on a CNF file and ingests its NNF
    /// output.
    fn compile_file(
        &mut self,
        pog: &mut Pog,
        cnf_path: &Path,
        data_variables: &BTreeSet<i32>,
        trim: bool,
    ) -> Result<i32, PkcError> {
        let nnf_path = self.files.build_name("nnf", false);
        let program = self.d4_program();
        let mut cmd = Command::new(&program);
        match self.d4_version {
            D4Version::V1 => {
                cmd.arg(cnf_path)
                    .arg("-dDNNF")
                    .arg(format!("-out={}", nnf_path.display()));
            }
            D4Version::V2 => {
                cmd.arg("-i")
                    .arg(cnf_path)
                    .args(["-m", "ddnnf-compiler", "--dump-ddnnf"])
                    .arg(&nnf_path);
            }
        }
        debug!("running '{:?}'", cmd);
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                PkcError::ExternalTool(format!("couldn't run '{}': {}", program.display(), e))
            })?;
        if !status.success() {
            return Err(PkcError::ExternalTool(format!(
                "'{}' exited with {}",
                program.display(),
                status
            )));
        }
        let nnf_file = File::open(&nnf_path).map_err(|_| {
            PkcError::ExternalTool(format!("couldn't open NNF file '{}'", nnf_path.display()))
        })?;
        let osize = pog.node_count();
        let root = pog.load_nnf(
            BufReader::new(nnf_file),
            if trim { Some(data_variables) } else { None },
        )?;
        self.stats.external_kc_calls += 1;
        info!(
            "imported NNF file '{}': root edge {}, added {} nodes",
            nnf_path.display(),
            root,
            pog.node_count() - osize
        );
        self.files.flush();
        Ok(root)
    }

    fn d4_program(&self) -> PathBuf {
        if let Some(path) = &self.d4_path {
            return path.clone();
        }
        if let Ok(path) = std::env::var("PKC_D4_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(match self.d4_version {
            D4Version::V1 => "d4",
            D4Version::V2 => "d4v2",
        })
    }

    /// Builtin recursive knowledge compiler, anticipating projection.
    /// When the active clauses are variable-disjoint, one `simple_kc`
    /// shot finishes the job; otherwise the formula is split on a
    /// variable, each phase is simplified by BCP and pure-literal
    /// elimination, and the branch results are summed. With `trim`, a
    /// projection-variable split leaves the branches unwrapped (the
    /// variable is existentially removed).
    fn builtin_kc(&mut self, pog: &mut Pog, cnf: &mut Cnf, trim: bool, top_level: bool) -> i32 {
        if top_level {
            self.stats.builtin_kc_calls += 1;
            debug!(
                "invoking builtin KC: {} clauses ({} non-unit)",
                cnf.current_clause_count(),
                cnf.nonunit_clause_count()
            );
        }
        if let Some(clause_chunks) = cnf.check_simple_pkc() {
            return pog.simple_kc(&clause_chunks);
        }
        let svar = cnf.find_split();
        let is_data = cnf.is_data_variable(svar);
        debug!("builtin KC splitting on variable {}", svar);
        let mut child = [0i32; 2];
        for (i, phase) in [-1i32, 1].into_iter().enumerate() {
            let slit = svar * phase;
            cnf.new_context();
            cnf.assign_literal(slit, false);
            cnf.bcp(false);
            cnf.bve(false, 0);
            let mut cedge = self.builtin_kc(pog, cnf, trim, false);
            if is_data || !trim {
                pog.start_node(NodeType::Product);
                pog.add_argument(slit);
                pog.add_argument(cedge);
                cedge = pog.finish_node();
            }
            child[i] = cedge;
            cnf.pop_context();
        }
        pog.start_node(NodeType::Sum);
        pog.add_argument(child[0]);
        pog.add_argument(child[1]);
        pog.finish_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::types::{CONFLICT, TAUTOLOGY};

    fn compiler() -> Compiler {
        Compiler::new(1000, D4Version::V2, None, false)
    }

    fn pog_all_data(nvar: i32) -> Pog {
        Pog::new(nvar, (1..=nvar).collect(), BTreeSet::new())
    }

    fn unweighted_count(pog: &Pog, root: i32) -> num_rational::BigRational {
        use num_bigint::BigInt;
        let mut weights = std::collections::BTreeMap::new();
        let mut scale = num_rational::BigRational::from_integer(BigInt::from(1));
        for &var in &pog.data_variables {
            let half = num_rational::BigRational::new(BigInt::from(1), BigInt::from(2));
            weights.insert(var, half.clone());
            weights.insert(-var, half);
            scale *= num_rational::BigRational::from_integer(BigInt::from(2));
        }
        scale * pog.ring_evaluate(root, &weights)
    }

    fn count_of(pog: &Pog, root: i32) -> i64 {
        let c = unweighted_count(pog, root);
        assert!(c.is_integer());
        i64::try_from(c.to_integer()).unwrap()
    }

    #[test]
    fn test_builtin_kc_empty_formula() {
        let mut cnf = Cnf::new(2);
        cnf.data_variables.extend([1, 2]);
        let mut pog = pog_all_data(2);
        let root = compiler().compile_cnf(&mut pog, &mut cnf, false, false).unwrap();
        assert_eq!(root, TAUTOLOGY);
    }

    #[test]
    fn test_builtin_kc_single_unit() {
        let mut cnf = Cnf::new(1);
        cnf.data_variables.insert(1);
        cnf.add_clause(&[-1]);
        cnf.bcp(false);
        let mut pog = pog_all_data(1);
        let root = compiler().compile_cnf(&mut pog, &mut cnf, false, false).unwrap();
        assert_eq!(root, -1);
    }

    #[test]
    fn test_builtin_kc_contradiction() {
        let mut cnf = Cnf::new(1);
        cnf.data_variables.insert(1);
        cnf.add_clause(&[1]);
        cnf.add_clause(&[-1]);
        cnf.bcp(false);
        // The conflict surfaces as the degenerate simple-PKC stream.
        let mut pog = pog_all_data(1);
        let chunks = cnf.check_simple_pkc();
        assert_eq!(chunks, Some(vec![0, 0]));
        assert_eq!(pog.simple_kc(&[0, 0]), CONFLICT);
    }

    #[test]
    fn test_builtin_kc_disjoint_clauses() {
        // (x1 | x2) & (x3 | x4): 9 models over 4 variables.
        let mut cnf = Cnf::from_dimacs_str("p cnf 4 2\n1 2 0\n3 4 0\n", true).unwrap();
        let mut pog = pog_all_data(4);
        let root = compiler().compile_cnf(&mut pog, &mut cnf, false, false).unwrap();
        assert_eq!(count_of(&pog, root), 9);
    }

    #[test]
    fn test_builtin_kc_split() {
        // (x1 | x2) & (-x1 | x3): 4 models (111, 101, 011, 010 over x1x2x3
        // plus ...), checked by count: assignments satisfying both = 4.
        let mut cnf = Cnf::from_dimacs_str("p cnf 3 2\n1 2 0\n-1 3 0\n", true).unwrap();
        let mut pog = pog_all_data(3);
        let root = compiler().compile_cnf(&mut pog, &mut cnf, false, false).unwrap();
        assert_eq!(count_of(&pog, root), 4);
    }

    #[test]
    fn test_builtin_kc_trim_projects_split_variable() {
        // (p | a) & (-p | b), show a b: compile with trim removes p from
        // the graph. The branches still overlap at (a=1, b=1), so the raw
        // sum over-counts by one; restoring mutual exclusivity is the
        // recompile/traversal step's job.
        let mut cnf = Cnf::from_dimacs_str("c p show 2 3 0\np cnf 3 2\n1 2 0\n-1 3 0\n", true).unwrap();
        let mut pog = Pog::new(3, cnf.data_variables.clone(), BTreeSet::new());
        let root = compiler().compile_cnf(&mut pog, &mut cnf, true, false).unwrap();
        let vars = pog.get_variables(root);
        assert!(!vars.contains(&1));
        assert_eq!(count_of(&pog, root), 4);
    }

    #[test]
    fn test_clausify_product() {
        let mut pog = pog_all_data(2);
        pog.start_node(NodeType::Product);
        pog.add_argument(1);
        pog.add_argument(-2);
        let n = pog.finish_node();
        let cnf = compiler().clausify(&pog, &[n]);
        // One node renumbered to 3, with variables 1 and 2 as data.
        assert_eq!(cnf.variable_count(), 3);
        assert_eq!(cnf.data_variables.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        // Big clause, two small clauses, one root unit.
        assert_eq!(cnf.maximum_clause_id(), 4);
        assert_eq!(cnf.clause_literals(1), &[3, -1, 2]);
        assert_eq!(cnf.clause_literals(2), &[-3, 1]);
        assert_eq!(cnf.clause_literals(3), &[-3, -2]);
        assert_eq!(cnf.clause_literals(4), &[3]);
    }

    #[test]
    fn test_clausify_sum_equisatisfiable() {
        let mut pog = pog_all_data(2);
        pog.start_node(NodeType::Sum);
        pog.add_argument(1);
        pog.add_argument(2);
        let n = pog.finish_node();
        let mut cnf = compiler().clausify(&pog, &[n]);
        assert!(cnf.is_satisfiable());
        // Forcing both inputs false contradicts the root assertion.
        cnf.new_context();
        cnf.assign_literal(-1, false);
        cnf.assign_literal(-2, false);
        assert!(!cnf.is_satisfiable());
        cnf.pop_context();
    }

    #[test]
    fn test_clausify_negated_root() {
        let mut pog = pog_all_data(2);
        pog.start_node(NodeType::Product);
        pog.add_argument(1);
        pog.add_argument(2);
        let n = pog.finish_node();
        let mut cnf = compiler().clausify(&pog, &[-n]);
        // not(x1 & x2) is satisfiable, e.g. x1 = false.
        assert!(cnf.is_satisfiable());
        cnf.new_context();
        cnf.assign_literal(1, false);
        cnf.assign_literal(2, false);
        assert!(!cnf.is_satisfiable());
        cnf.pop_context();
    }

    #[test]
    fn test_compile_counts_match_brute_force() {
        // Random-ish 3-CNF over 4 variables, verified by enumeration.
        let clauses: Vec<Vec<i32>> = vec![
            vec![1, -2, 3],
            vec![-1, 4],
            vec![2, 3, -4],
            vec![-3, -2],
        ];
        let mut expected = 0i64;
        for m in 0..16u32 {
            let assignment = |var: i32| m & (1 << (var - 1)) != 0;
            let ok = clauses.iter().all(|cl| {
                cl.iter()
                    .any(|&l| assignment(var_of(l)) == (l > 0))
            });
            if ok {
                expected += 1;
            }
        }
        let mut cnf = Cnf::new(4);
        cnf.data_variables.extend(1..=4);
        for cl in &clauses {
            cnf.add_clause(cl);
        }
        let mut pog = pog_all_data(4);
        let root = compiler().compile_cnf(&mut pog, &mut cnf, false, false).unwrap();
        assert_eq!(count_of(&pog, root), expected);
    }
}

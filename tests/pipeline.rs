//! End-to-end pipeline tests: load, preprocess, compile, project, count.
//!
//! Everything here runs through the builtin knowledge compiler (large
//! `bkc_limit`), so no external D-DNNF compiler is needed.

use std::collections::HashSet;

use num_bigint::BigInt;
use num_rational::BigRational;

use pkc_rs::cnf::Cnf;
use pkc_rs::project::{Mode, Options, Projector, TseitinPolicy};

fn rat(n: i64, d: i64) -> BigRational {
    BigRational::new(BigInt::from(n), BigInt::from(d))
}

fn options(mode: Mode) -> Options {
    Options {
        mode,
        bkc_limit: 1000,
        ..Options::default()
    }
}

fn run(text: &str, opts: &Options) -> Projector {
    let cnf = Cnf::from_dimacs_str(text, true).unwrap();
    let mut proj = Projector::new(cnf, opts).unwrap();
    proj.projecting_compile().unwrap();
    proj
}

fn unweighted(proj: &Projector) -> BigRational {
    proj.count(false).unwrap().unwrap()
}

/// Projected model count by brute enumeration, as ground truth.
fn brute_projected_count(nvar: u32, clauses: &[Vec<i32>], data: &[i32]) -> i64 {
    let mut projections: HashSet<u32> = HashSet::new();
    for m in 0..(1u32 << nvar) {
        let holds = |lit: i32| {
            let bit = m & (1 << (lit.unsigned_abs() - 1)) != 0;
            if lit > 0 {
                bit
            } else {
                !bit
            }
        };
        if clauses.iter().all(|cl| cl.iter().any(|&l| holds(l))) {
            let mut proj = 0u32;
            for (i, &var) in data.iter().enumerate() {
                if m & (1 << (var as u32 - 1)) != 0 {
                    proj |= 1 << i;
                }
            }
            projections.insert(proj);
        }
    }
    projections.len() as i64
}

#[test]
fn trivial_sat_projection() {
    // (x1 | x2) with only x1 shown: both values of x1 extend to a model.
    let text = "c p show 1 0\np cnf 2 1\n1 2 0\n";
    for mode in [Mode::Incremental, Mode::Monolithic, Mode::Tseitin] {
        let proj = run(text, &options(mode));
        assert_eq!(unweighted(&proj), rat(2, 1), "mode {:?}", mode);
    }
}

#[test]
fn trivial_sat_unit_weights() {
    let text = "c p show 1 0\nc p weight 1 1 0\nc p weight -1 1 0\np cnf 2 1\n1 2 0\n";
    let proj = run(text, &options(Mode::Incremental));
    assert_eq!(proj.count(true).unwrap(), Some(rat(2, 1)));
}

#[test]
fn tseitin_gate_projects_to_full_space() {
    // t <-> (a & b) as clauses, showing a and b: every (a, b) has exactly
    // one extension, so the projected count is 4.
    let text = "c p show 1 2 0\np cnf 3 3\n-3 1 0\n-3 2 0\n3 -1 -2 0\n";
    for tseitin in [TseitinPolicy::Detect, TseitinPolicy::Promote, TseitinPolicy::None] {
        let opts = Options {
            tseitin,
            ..options(Mode::Incremental)
        };
        let proj = run(text, &opts);
        assert_eq!(unweighted(&proj), rat(4, 1), "policy {:?}", tseitin);
    }
}

#[test]
fn disjoint_clauses_simple_kc() {
    // (x1 | x2) & (x3 | x4), all data: 3 * 3 models.
    let text = "p cnf 4 2\n1 2 0\n3 4 0\n";
    let proj = run(text, &options(Mode::Incremental));
    assert_eq!(unweighted(&proj), rat(9, 1));
}

#[test]
fn projection_collapse_to_true() {
    // (p | q) & (-p | r) with only r shown: projected formula is true.
    let text = "c p show 3 0\np cnf 3 2\n1 2 0\n-1 3 0\n";
    for mode in [Mode::Incremental, Mode::Monolithic] {
        let proj = run(text, &options(mode));
        assert_eq!(unweighted(&proj), rat(2, 1), "mode {:?}", mode);
    }
}

#[test]
fn mutex_recovery_by_exclusion() {
    // (p | a) & (-p | b), showing a and b: the split on projection
    // variable p leaves overlapping branches (a) and (b). Traversal must
    // detect the overlap and rebuild a mutually exclusive sum. Low
    // preprocessing keeps p alive so the exclusion path actually runs.
    let clauses = vec![vec![3, 1], vec![-3, 2]];
    let text = "c p show 1 2 0\np cnf 3 2\n3 1 0\n-3 2 0\n";
    let expected = brute_projected_count(3, &clauses, &[1, 2]);
    assert_eq!(expected, 3);
    for optlevel in [1, 2, 3, 4] {
        let opts = Options {
            preprocess_level: 1,
            tseitin: TseitinPolicy::None,
            optlevel,
            ..options(Mode::Incremental)
        };
        let proj = run(text, &opts);
        assert_eq!(unweighted(&proj), rat(expected, 1), "optlevel {}", optlevel);
    }
    // At full optimization the exclusion construction is the one that fires.
    let opts = Options {
        preprocess_level: 1,
        tseitin: TseitinPolicy::None,
        ..options(Mode::Incremental)
    };
    let proj = run(text, &opts);
    assert!(proj.stats.visit_excluding_sum >= 1);
}

#[test]
fn mutex_recovery_larger_overlap() {
    // Two projection variables chaining overlapping implications; ground
    // truth by enumeration over the data variables.
    let clauses = vec![
        vec![5, 1, 2],
        vec![-5, 3],
        vec![6, -1, 3],
        vec![-6, 4, 2],
    ];
    let text = "c p show 1 2 3 4 0\np cnf 6 4\n5 1 2 0\n-5 3 0\n6 -1 3 0\n-6 4 2 0\n";
    let expected = brute_projected_count(6, &clauses, &[1, 2, 3, 4]);
    for level in [1, 4] {
        let opts = Options {
            preprocess_level: level,
            tseitin: TseitinPolicy::None,
            ..options(Mode::Incremental)
        };
        let proj = run(text, &opts);
        assert_eq!(unweighted(&proj), rat(expected, 1), "preprocess {}", level);
    }
    let proj = run(text, &options(Mode::Monolithic));
    assert_eq!(unweighted(&proj), rat(expected, 1), "mode Monolithic");
}

#[test]
fn weighted_count_single_literal() {
    let text = "c p weight 1 0.3 0\nc p weight -1 0.7 0\np cnf 1 1\n1 0\n";
    let proj = run(text, &options(Mode::Incremental));
    assert_eq!(proj.count(true).unwrap(), Some(rat(3, 10)));
    assert_eq!(proj.count(false).unwrap(), Some(rat(1, 1)));
}

#[test]
fn weighted_count_completes_missing_phase() {
    // Only the positive weight is declared; the negative defaults to
    // 1 - w. Formula (x1 | x2), weights w(x1) = 1/4, w(x2) = 1/3:
    // weighted count = 1 - 3/4 * 2/3 = 1/2.
    let text = "c p weight 1 1/4 0\nc p weight 2 1/3 0\np cnf 2 1\n1 2 0\n";
    let proj = run(text, &options(Mode::Incremental));
    assert_eq!(proj.count(true).unwrap(), Some(rat(1, 2)));
}

#[test]
fn unsatisfiable_formula_counts_zero() {
    let text = "p cnf 1 2\n1 0\n-1 0\n";
    for mode in [Mode::Incremental, Mode::Monolithic] {
        let proj = run(text, &options(mode));
        assert_eq!(unweighted(&proj), rat(0, 1), "mode {:?}", mode);
    }
}

#[test]
fn compile_mode_counts_without_projection() {
    // Compile mode ignores show declarations (the driver loads without
    // comment processing) and counts over all variables.
    let text = "c p show 1 0\np cnf 2 1\n1 2 0\n";
    let cnf = Cnf::from_dimacs_str(text, false).unwrap();
    let mut proj = Projector::new(cnf, &options(Mode::Compile)).unwrap();
    proj.projecting_compile().unwrap();
    assert_eq!(unweighted(&proj), rat(3, 1));
}

#[test]
fn pog_output_format() {
    let text = "p cnf 4 2\n1 2 0\n3 4 0\n";
    let proj = run(text, &options(Mode::Incremental));
    let mut out = Vec::new();
    proj.write(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    let root = lines.next().unwrap();
    assert!(root.starts_with("r "));
    for line in lines {
        let mut parts = line.split_whitespace();
        let tag = parts.next().unwrap();
        assert!(tag == "p" || tag == "s", "unexpected line: {}", line);
        let nid: i32 = parts.next().unwrap().parse().unwrap();
        assert!(nid > 4);
        for edge in parts {
            let _: i32 = edge.parse().unwrap();
        }
    }
}

#[test]
fn pog_output_tautology_root() {
    let text = "c p show 3 0\np cnf 3 2\n1 2 0\n-1 3 0\n";
    let proj = run(text, &options(Mode::Incremental));
    let mut out = Vec::new();
    proj.write(&mut out).unwrap();
    // The projected formula is true: a zero-argument product node.
    assert_eq!(String::from_utf8(out).unwrap(), "p 4\nr 4\n");
}

#[test]
fn random_formulas_match_brute_force() {
    // Deterministic pseudo-random 3-CNF instances over 6 variables with
    // 3 data variables, cross-checked against enumeration in all modes.
    let mut state = 0x2545_f491u32;
    let mut next = move || {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    for round in 0..25 {
        let nvar = 6u32;
        let nclauses = 3 + next() % 5;
        let mut clauses: Vec<Vec<i32>> = Vec::new();
        for _ in 0..nclauses {
            let mut clause: Vec<i32> = Vec::new();
            for _ in 0..3 {
                let var = (next() % nvar + 1) as i32;
                let lit = if next() % 2 == 0 { var } else { -var };
                if !clause.contains(&lit) && !clause.contains(&-lit) {
                    clause.push(lit);
                }
            }
            if !clause.is_empty() {
                clauses.push(clause);
            }
        }
        let data = [1, 2, 3];
        let expected = brute_projected_count(nvar, &clauses, &data);

        let mut text = String::from("c p show 1 2 3 0\n");
        text.push_str(&format!("p cnf {} {}\n", nvar, clauses.len()));
        for cl in &clauses {
            for lit in cl {
                text.push_str(&format!("{} ", lit));
            }
            text.push_str("0\n");
        }
        for mode in [Mode::Incremental, Mode::Monolithic] {
            let proj = run(&text, &options(mode));
            assert_eq!(
                unweighted(&proj),
                rat(expected, 1),
                "round {} mode {:?} formula:\n{}",
                round,
                mode,
                text
            );
        }
        for policy in [TseitinPolicy::None, TseitinPolicy::Detect] {
            let opts = Options {
                tseitin: policy,
                preprocess_level: 1,
                ..options(Mode::Incremental)
            };
            let proj = run(&text, &opts);
            assert_eq!(
                unweighted(&proj),
                rat(expected, 1),
                "round {} policy {:?} formula:\n{}",
                round,
                policy,
                text
            );
        }
    }
}

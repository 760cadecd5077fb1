//! # pkc-rs: Projected Knowledge Compilation in Rust
//!
//! **`pkc-rs`** compiles a propositional CNF formula into a **Partitioned
//! Operation Graph (POG)**, a hash-consed DAG of product and sum nodes
//! whose models, restricted to a declared set of *data variables*,
//! correspond exactly to the projections of the formula's models. The
//! graph is then evaluated over the rational ring to produce exact
//! weighted and unweighted projected model counts.
//!
//! ## Pipeline
//!
//! 1. A [`Cnf`][crate::cnf::Cnf] clausal database is loaded from DIMACS
//!    (with `c p show` / `c p weight` extensions) and preprocessed: unit
//!    propagation, bounded variable elimination, and Tseitin-variable
//!    detection/promotion.
//! 2. The [`Compiler`][crate::compile::Compiler] turns the CNF into an
//!    initial POG, either with its builtin recursive compiler or by
//!    invoking an external D-DNNF compiler (`d4`).
//! 3. The [`Projector`][crate::project::Projector] rewrites the initial
//!    graph into a projected one, clausifying subgraphs and issuing
//!    recursive compilation and SAT queries as needed.
//! 4. [`Pog::ring_evaluate`][crate::pog::Pog::ring_evaluate] computes the
//!    exact count.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use pkc_rs::cnf::Cnf;
//! use pkc_rs::project::{Options, Projector};
//!
//! let text = "c p show 1 2 0\np cnf 3 2\n1 3 0\n-3 2 0\n";
//! let cnf = Cnf::from_dimacs_str(text, true).unwrap();
//! let mut proj = Projector::new(cnf, &Options::default()).unwrap();
//! proj.projecting_compile().unwrap();
//! let count = proj.count(false).unwrap().unwrap();
//! println!("projected count = {}", count);
//! ```
//!
//! ## Design
//!
//! Both managers are **manager-centric**: the [`Cnf`][crate::cnf::Cnf]
//! and the [`Pog`][crate::pog::Pog] own every byte of their storage and
//! hand out plain integer ids (clause ids and signed edges), so there
//! are no dangling references and the engines cross module boundaries
//! freely. The CNF journals every mutation for exact context rollback;
//! the POG is append-only and hash-consed.

pub mod bve;
pub mod cnf;
pub mod compile;
pub mod count;
pub mod dimacs;
pub mod files;
pub mod nnf;
pub mod pog;
pub mod project;
pub mod sat;
pub mod stats;
pub mod tseitin;
pub mod types;
pub mod utils;

pub use cnf::Cnf;
pub use compile::{Compiler, D4Version};
pub use pog::{NodeType, Pog};
pub use project::{Mode, Options, Projector, TseitinPolicy};
pub use types::{PkcError, CONFLICT, TAUTOLOGY};

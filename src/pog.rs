//! Partitioned Operation Graph: a hash-consed DAG of product and sum nodes.
//!
//! The [`Pog`] manager owns all node storage. Node arguments live in one
//! flat arena; a node is a typed slice of it. Every external reference is
//! a signed integer *edge*: the magnitude addresses an input variable
//! (`1..=nvar`), a POG node (`nvar+1..`), or the reserved constants, and
//! the sign selects negation. Nodes are append-only and unique: committing
//! a node whose `(type, sorted arguments)` already exists returns the
//! existing edge.
//!
//! Nodes are created through a three-step builder:
//!
//! ```text
//! pog.start_node(NodeType::Product);
//! pog.add_argument(e1);
//! pog.add_argument(e2);
//! let edge = pog.finish_node();
//! ```
//!
//! [`Pog::add_argument`] performs constant folding on the fly (neutral
//! constants vanish, dominating constants collapse the node, complementary
//! sum arguments collapse to [`TAUTOLOGY`]) and splices the arguments of a
//! positive product into an enclosing product.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};

use log::debug;

use crate::types::{var_of, CONFLICT, MAX_VARIABLE, TAUTOLOGY};
use crate::utils::{edge_code, pairing2};

/// Operation performed by a POG node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeType {
    Product,
    Sum,
}

/// Hash salts distinguishing the two operators in the unique table.
const PRODUCT_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const SUM_SALT: u64 = 0x2545_f491_4f6c_dd1d;

struct Node {
    /// Offset of the argument slice in the arena.
    offset: usize,
    degree: usize,
    ntype: NodeType,
    /// Every variable reachable from this node is a data variable.
    data_only: bool,
    /// Every variable reachable from this node is a projection variable.
    projection_only: bool,
}

/// Manager for one operation graph. Lives for the full run; nodes are
/// never deleted.
pub struct Pog {
    nvar: i32,
    /// Concatenation of all node arguments.
    arguments: Vec<i32>,
    nodes: Vec<Node>,
    /// Maps an argument-signature hash to the node edges carrying it.
    /// Buckets keep insertion order and are probed linearly.
    unique_table: HashMap<u64, Vec<i32>>,
    /// Whether a node is under construction (between `start_node` and
    /// `finish_node`).
    building: bool,
    pub data_variables: BTreeSet<i32>,
    pub tseitin_variables: BTreeSet<i32>,
}

impl Pog {
    pub fn new(nvar: i32, data_variables: BTreeSet<i32>, tseitin_variables: BTreeSet<i32>) -> Self {
        Pog {
            nvar,
            arguments: Vec::new(),
            nodes: Vec::new(),
            unique_table: HashMap::new(),
            building: false,
            data_variables,
            tseitin_variables,
        }
    }

    pub fn variable_count(&self) -> i32 {
        self.nvar
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.arguments.len()
    }

    /// Whether `edge` addresses a POG node (not a variable or constant).
    pub fn is_node(&self, edge: i32) -> bool {
        let var = var_of(edge);
        var > self.nvar && var != TAUTOLOGY
    }

    fn node_index(&self, edge: i32) -> Option<usize> {
        if !self.is_node(edge) {
            return None;
        }
        let idx = (var_of(edge) - self.nvar - 1) as usize;
        assert!(idx < self.nodes.len(), "unknown POG node for edge {}", edge);
        Some(idx)
    }

    pub fn degree(&self, edge: i32) -> usize {
        self.node_index(edge).map_or(0, |idx| self.nodes[idx].degree)
    }

    pub fn node_type(&self, edge: i32) -> Option<NodeType> {
        self.node_index(edge).map(|idx| self.nodes[idx].ntype)
    }

    pub fn is_sum(&self, edge: i32) -> bool {
        self.node_type(edge) == Some(NodeType::Sum)
    }

    /// Arguments of the node addressed by `edge` (empty for leaves).
    pub fn edge_args(&self, edge: i32) -> &[i32] {
        match self.node_index(edge) {
            Some(idx) => {
                let node = &self.nodes[idx];
                &self.arguments[node.offset..node.offset + node.degree]
            }
            None => &[],
        }
    }

    pub fn edge_arg(&self, edge: i32, index: usize) -> i32 {
        self.edge_args(edge)[index]
    }

    pub fn is_data_variable(&self, var: i32) -> bool {
        self.data_variables.contains(&var)
    }

    pub fn is_tseitin_variable(&self, var: i32) -> bool {
        self.tseitin_variables.contains(&var)
    }

    /// Whether everything reachable from `edge` is over data variables.
    pub fn only_data_variables(&self, edge: i32) -> bool {
        match self.node_index(edge) {
            Some(idx) => self.nodes[idx].data_only,
            None => self.data_variables.contains(&var_of(edge)),
        }
    }

    /// Whether everything reachable from `edge` is over projection
    /// variables.
    pub fn only_projection_variables(&self, edge: i32) -> bool {
        match self.node_index(edge) {
            Some(idx) => self.nodes[idx].projection_only,
            None => !self.data_variables.contains(&var_of(edge)),
        }
    }

    // ─── Node construction ───

    /// Opens a prototype node. May be retracted by `finish_node`.
    pub fn start_node(&mut self, ntype: NodeType) {
        assert!(!self.building, "start_node while a node is under construction");
        self.building = true;
        self.nodes.push(Node {
            offset: self.arguments.len(),
            degree: 0,
            ntype,
            data_only: true,
            projection_only: true,
        });
    }

    /// Adds an argument edge to the node under construction, folding
    /// constants and splicing nested products.
    pub fn add_argument(&mut self, edge: i32) {
        assert!(self.building, "add_argument without start_node");
        let nidx = self.nodes.len() - 1;
        let ntype = self.nodes[nidx].ntype;
        let offset = self.nodes[nidx].offset;
        if self.nodes[nidx].degree == 1 {
            let cedge = self.arguments[offset];
            // An absorbing constant swallows everything after it.
            if (ntype == NodeType::Product && cedge == CONFLICT)
                || (ntype == NodeType::Sum && cedge == TAUTOLOGY)
            {
                return;
            }
            // Sum of complementary arguments collapses to tautology.
            if ntype == NodeType::Sum && cedge == -edge {
                self.arguments[offset] = TAUTOLOGY;
                return;
            }
        }
        // Neutral constants vanish.
        if (ntype == NodeType::Product && edge == TAUTOLOGY)
            || (ntype == NodeType::Sum && edge == CONFLICT)
        {
            return;
        }
        // Dominating constants become the sole argument.
        if (ntype == NodeType::Sum && edge == TAUTOLOGY)
            || (ntype == NodeType::Product && edge == CONFLICT)
        {
            self.arguments.truncate(offset);
            self.arguments.push(edge);
            self.nodes[nidx].degree = 1;
            return;
        }
        let data_only = self.only_data_variables(edge);
        let projection_only = self.only_projection_variables(edge);
        self.nodes[nidx].data_only &= data_only;
        self.nodes[nidx].projection_only &= projection_only;
        // Associativity: splice a positive product into a product.
        if ntype == NodeType::Product && edge > 0 && self.node_type(edge) == Some(NodeType::Product)
        {
            let child_args: Vec<i32> = self.edge_args(edge).to_vec();
            self.nodes[nidx].degree += child_args.len();
            self.arguments.extend_from_slice(&child_args);
        } else {
            self.arguments.push(edge);
            self.nodes[nidx].degree += 1;
        }
    }

    /// Commits the node under construction, returning its edge. Nullary
    /// nodes yield the identity element, unary nodes yield their argument,
    /// and a structural duplicate yields the existing edge; in all three
    /// cases the prototype is retracted.
    pub fn finish_node(&mut self) -> i32 {
        assert!(self.building, "finish_node without start_node");
        self.building = false;
        let nidx = self.nodes.len() - 1;
        let ntype = self.nodes[nidx].ntype;
        let offset = self.nodes[nidx].offset;
        let degree = self.nodes[nidx].degree;
        let mut retract = true;
        let edge;
        if degree == 0 {
            edge = match ntype {
                NodeType::Sum => CONFLICT,
                NodeType::Product => TAUTOLOGY,
            };
        } else if degree == 1 {
            edge = self.arguments[offset];
        } else {
            self.arguments[offset..offset + degree].sort_by_key(|lit| lit.abs());
            let nedge = self.nvar + 1 + nidx as i32;
            assert!(nedge <= MAX_VARIABLE, "POG node id overflow");
            let h = self.node_hash(nidx);
            let mut found = None;
            if let Some(bucket) = self.unique_table.get(&h) {
                for &oedge in bucket {
                    if self.node_equal(nidx, oedge) {
                        found = Some(oedge);
                        break;
                    }
                }
            }
            match found {
                Some(oedge) => edge = oedge,
                None => {
                    self.unique_table.entry(h).or_default().push(nedge);
                    retract = false;
                    edge = nedge;
                    debug!("added POG node {}", self.edge_string(edge));
                }
            }
        }
        if retract {
            self.arguments.truncate(offset);
            self.nodes.pop();
        }
        edge
    }

    /// Signature of the prototype node: operator salt folded with each
    /// argument through the pairing function. Deterministic across runs.
    fn node_hash(&self, nidx: usize) -> u64 {
        let node = &self.nodes[nidx];
        let salt = match node.ntype {
            NodeType::Product => PRODUCT_SALT,
            NodeType::Sum => SUM_SALT,
        };
        let mut h = salt;
        for &arg in &self.arguments[node.offset..node.offset + node.degree] {
            h = pairing2(h, edge_code(arg));
        }
        h
    }

    /// Structural equality between the prototype at `nidx` and the stored
    /// node addressed by `oedge`.
    fn node_equal(&self, nidx: usize, oedge: i32) -> bool {
        let oidx = match self.node_index(oedge) {
            Some(oidx) => oidx,
            None => return false,
        };
        if oidx == nidx {
            return true;
        }
        let a = &self.nodes[nidx];
        let b = &self.nodes[oidx];
        a.ntype == b.ntype
            && a.degree == b.degree
            && self.arguments[a.offset..a.offset + a.degree]
                == self.arguments[b.offset..b.offset + b.degree]
    }

    // ─── Structure queries ───

    /// Decision variable of a binary sum: the variable appearing with
    /// opposite polarities in (the arguments of) the two children.
    ///
    /// # Panics
    ///
    /// Panics if `edge` is not a sum with such a variable.
    pub fn get_decision_variable(&self, edge: i32) -> i32 {
        assert!(self.is_sum(edge), "edge {} is not a sum", edge);
        let edge1 = self.edge_arg(edge, 0);
        let edge2 = self.edge_arg(edge, 1);
        let lits1: Vec<i32> = if self.is_node(edge1) {
            self.edge_args(edge1).to_vec()
        } else {
            vec![edge1]
        };
        let lits2: Vec<i32> = if self.is_node(edge2) {
            self.edge_args(edge2).to_vec()
        } else {
            vec![edge2]
        };
        for &lit1 in &lits1 {
            for &lit2 in &lits2 {
                if lit1 == -lit2 {
                    return var_of(lit1);
                }
            }
        }
        panic!(
            "couldn't get decision variable for edge {}: {} vs {}",
            edge,
            self.edge_string(edge1),
            self.edge_string(edge2)
        );
    }

    /// Collects the node variables reachable from `edge` into `visited`.
    pub fn visit(&self, edge: i32, visited: &mut BTreeSet<i32>) {
        if !self.is_node(edge) {
            return;
        }
        let var = var_of(edge);
        if !visited.insert(var) {
            return;
        }
        for &arg in self.edge_args(edge) {
            self.visit(arg, visited);
        }
    }

    /// Input variables reachable from `root`.
    pub fn get_variables(&self, root: i32) -> BTreeSet<i32> {
        let mut vset = BTreeSet::new();
        if !self.is_node(root) {
            vset.insert(var_of(root));
            return vset;
        }
        let mut visited = BTreeSet::new();
        self.visit(root, &mut visited);
        for &id in &visited {
            for &arg in self.edge_args(id) {
                let cvar = var_of(arg);
                if !self.is_node(cvar) {
                    vset.insert(cvar);
                }
            }
        }
        vset
    }

    /// Densely renumbers the nodes reachable from `root_edges`, starting
    /// at `nvar + 1`. Ascending old ids, so children precede parents.
    pub fn get_subgraph(&self, root_edges: &[i32]) -> BTreeMap<i32, i32> {
        let mut visited = BTreeSet::new();
        for &redge in root_edges {
            self.visit(redge, &mut visited);
        }
        let mut node_remap = BTreeMap::new();
        let mut next_id = self.nvar + 1;
        for oid in visited {
            node_remap.insert(oid, next_id);
            next_id += 1;
        }
        node_remap
    }

    /// Writes the subgraph rooted at `root_edge` in the textual POG
    /// format: `r <edge>`, then one `p`/`s` line per node. A constant root
    /// is expressed as a zero-argument product node; a bare literal root
    /// short-circuits to a single `r` line.
    pub fn write<W: Write>(&self, root_edge: i32, w: &mut W) -> io::Result<()> {
        if !self.is_node(root_edge) {
            if var_of(root_edge) == TAUTOLOGY {
                let nrvar = self.nvar + 1;
                writeln!(w, "p {}", nrvar)?;
                writeln!(w, "r {}", if root_edge > 0 { nrvar } else { -nrvar })?;
            } else {
                writeln!(w, "r {}", root_edge)?;
            }
            return Ok(());
        }
        let node_remap = self.get_subgraph(&[root_edge]);
        let nrvar = node_remap[&var_of(root_edge)];
        writeln!(w, "r {}", if root_edge > 0 { nrvar } else { -nrvar })?;
        for (&oid, &nid) in &node_remap {
            write!(w, "{} {}", if self.is_sum(oid) { 's' } else { 'p' }, nid)?;
            for &oedge in self.edge_args(oid) {
                let nedge = if self.is_node(oedge) {
                    let nv = node_remap[&var_of(oedge)];
                    if oedge > 0 {
                        nv
                    } else {
                        -nv
                    }
                } else {
                    oedge
                };
                write!(w, " {}", nedge)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    // ─── Simple knowledge compilation ───

    /// Builds a conjunction of disjunctions from a zero-separated stream
    /// of variable-disjoint clauses.
    pub fn simple_kc(&mut self, clause_chunks: &[i32]) -> i32 {
        let mut arguments: Vec<i32> = Vec::new();
        let mut clause: Vec<i32> = Vec::new();
        for &lit in clause_chunks {
            if lit == 0 {
                arguments.push(self.build_disjunction(&clause));
                clause.clear();
            } else {
                clause.push(lit);
            }
        }
        if arguments.is_empty() {
            return TAUTOLOGY;
        }
        if arguments.len() == 1 {
            return arguments[0];
        }
        self.start_node(NodeType::Product);
        for alit in arguments {
            self.add_argument(alit);
        }
        self.finish_node()
    }

    /// Disjunction of literals via De Morgan: the negated product of the
    /// negated literals.
    fn build_disjunction(&mut self, args: &[i32]) -> i32 {
        match args {
            [] => CONFLICT,
            [lit] => *lit,
            _ => {
                self.start_node(NodeType::Product);
                for &clit in args {
                    self.add_argument(-clit);
                }
                -self.finish_node()
            }
        }
    }

    /// Human-readable rendering of an edge, for diagnostics.
    pub fn edge_string(&self, edge: i32) -> String {
        if edge == TAUTOLOGY {
            return "TAUT".to_string();
        }
        if edge == CONFLICT {
            return "CONFLICT".to_string();
        }
        if !self.is_node(edge) {
            return format!("{}V{}", if edge < 0 { "-" } else { "" }, var_of(edge));
        }
        let args: Vec<String> = self.edge_args(edge).iter().map(|a| a.to_string()).collect();
        format!(
            "{}{}_{}({})",
            if edge < 0 { "-" } else { "" },
            if self.is_sum(edge) { "SUM" } else { "PRODUCT" },
            var_of(edge),
            args.join(", ")
        )
    }
}

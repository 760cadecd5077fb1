//! Reading the external D-DNNF compiler's NNF output into the POG.
//!
//! The textual format is line-oriented:
//!
//! ```text
//! o <id> 0                      # or node
//! a <id> 0                      # and node
//! t <id> 0                      # true node
//! f <id> 0                      # false node
//! <parent> <child> [lit...] 0   # edge, optionally labelled by literals
//! ```
//!
//! An edge carrying literals is expressed as an intermediate conjunction
//! of the literals and the child. The root is the parentless `o` node
//! with a single argument.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::BufRead;

use log::debug;

use crate::pog::{NodeType, Pog};
use crate::types::{var_of, PkcError, CONFLICT, TAUTOLOGY};

/// External node ids are offset to keep them distinct from literals.
const NODE_START: i32 = 500_000_000;
/// Synthesized conjunction nodes for labelled edges start here.
const XNODE_START: i32 = 1_000_000_001;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum NnfType {
    True,
    False,
    And,
    Or,
}

struct NnfNode {
    ntype: NnfType,
    /// Mixed list of literals and (offset) node ids.
    args: Vec<i32>,
}

/// Graph representation derived from an NNF file.
struct Nnf {
    nodes: BTreeMap<i32, NnfNode>,
    root_id: i32,
}

fn parse_error(line: usize, msg: impl Into<String>) -> PkcError {
    PkcError::Parse {
        line,
        msg: msg.into(),
    }
}

impl Nnf {
    fn parse<R: BufRead>(reader: R) -> Result<Nnf, PkcError> {
        let mut nodes: BTreeMap<i32, NnfNode> = BTreeMap::new();
        let mut node_with_parent: HashSet<i32> = HashSet::new();
        let mut xcount = 0;
        let mut node_count = 0usize;
        let mut edge_count = 0usize;
        for (lineno0, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = lineno0 + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(&first) = tokens.first() else { continue };
            let ntype = match first {
                "t" => Some(NnfType::True),
                "f" => Some(NnfType::False),
                "a" => Some(NnfType::And),
                "o" => Some(NnfType::Or),
                _ => None,
            };
            if let Some(ntype) = ntype {
                let nums: Vec<i32> = tokens[1..]
                    .iter()
                    .map(|t| t.parse())
                    .collect::<Result<_, _>>()
                    .map_err(|_| parse_error(lineno, "couldn't parse numbers"))?;
                if nums.len() != 2 {
                    return Err(parse_error(
                        lineno,
                        format!("expected 2 numbers, found {}", nums.len()),
                    ));
                }
                if nums[1] != 0 {
                    return Err(parse_error(lineno, "line not zero-terminated"));
                }
                let nid = NODE_START + nums[0];
                nodes.insert(nid, NnfNode { ntype, args: Vec::new() });
                node_count += 1;
            } else if first == "c" {
                continue;
            } else {
                let nums: Vec<i32> = tokens
                    .iter()
                    .map(|t| t.parse())
                    .collect::<Result<_, _>>()
                    .map_err(|_| parse_error(lineno, "couldn't parse numbers"))?;
                if nums.len() < 3 {
                    return Err(parse_error(
                        lineno,
                        format!("expected at least 3 numbers, found {}", nums.len()),
                    ));
                }
                if *nums.last().unwrap() != 0 {
                    return Err(parse_error(lineno, "line not zero-terminated"));
                }
                let pnid = NODE_START + nums[0];
                if !nodes.contains_key(&pnid) {
                    return Err(parse_error(lineno, format!("invalid NNF node id {}", nums[0])));
                }
                let mut cnid = NODE_START + nums[1];
                if !nodes.contains_key(&cnid) {
                    return Err(parse_error(lineno, format!("invalid NNF node id {}", nums[1])));
                }
                let lits = &nums[2..nums.len() - 1];
                if !lits.is_empty() {
                    // Conjoin the edge literals with the child.
                    let xid = XNODE_START + xcount;
                    xcount += 1;
                    let mut args = lits.to_vec();
                    args.push(cnid);
                    nodes.insert(xid, NnfNode { ntype: NnfType::And, args });
                    cnid = xid;
                }
                nodes.get_mut(&pnid).unwrap().args.push(cnid);
                node_with_parent.insert(cnid);
                edge_count += 1;
            }
        }
        let mut root_id = 0;
        for (&nid, node) in &nodes {
            if node.ntype == NnfType::Or
                && node.args.len() == 1
                && root_id == 0
                && !node_with_parent.contains(&nid)
            {
                root_id = nid;
            }
        }
        if root_id == 0 {
            return Err(parse_error(0, "failed to find root node in NNF file"));
        }
        debug!(
            "read NNF file with {} nodes and {} edges",
            node_count, edge_count
        );
        Ok(Nnf { nodes, root_id })
    }

    /// Topologically orders the nodes reachable from the root, root last.
    fn topo_order(&self) -> Vec<i32> {
        let mut ids = Vec::new();
        let mut visited = HashSet::new();
        self.visit(self.root_id, &mut ids, &mut visited);
        ids
    }

    fn visit(&self, nid: i32, ids: &mut Vec<i32>, visited: &mut HashSet<i32>) {
        if nid < NODE_START || !visited.insert(nid) {
            return;
        }
        let node = self
            .nodes
            .get(&nid)
            .unwrap_or_else(|| panic!("visit: invalid NNF node id {}", nid));
        for &arg in &node.args {
            self.visit(arg, ids, visited);
        }
        ids.push(nid);
    }
}

impl Pog {
    /// Reads an NNF stream and integrates it into the graph, returning the
    /// root edge. When `data_variables` is given, projection-variable
    /// leaves are replaced by [`TAUTOLOGY`] (projection by trimming at
    /// import time).
    pub fn load_nnf<R: BufRead>(
        &mut self,
        reader: R,
        data_variables: Option<&std::collections::BTreeSet<i32>>,
    ) -> Result<i32, PkcError> {
        let nnf = Nnf::parse(reader)?;
        let mut nnid2edge: HashMap<i32, i32> = HashMap::new();
        let mut edge = 0;
        for nnid in nnf.topo_order() {
            let node = &nnf.nodes[&nnid];
            edge = match node.ntype {
                NnfType::True => TAUTOLOGY,
                NnfType::False => CONFLICT,
                NnfType::And | NnfType::Or => {
                    self.start_node(if node.ntype == NnfType::And {
                        NodeType::Product
                    } else {
                        NodeType::Sum
                    });
                    for &nnf_arg in &node.args {
                        let pog_arg = if nnf_arg >= NODE_START {
                            *nnid2edge
                                .get(&nnf_arg)
                                .unwrap_or_else(|| panic!("unmapped NNF node {}", nnf_arg))
                        } else if let Some(dvars) = data_variables {
                            if dvars.contains(&var_of(nnf_arg)) {
                                nnf_arg
                            } else {
                                TAUTOLOGY
                            }
                        } else {
                            nnf_arg
                        };
                        self.add_argument(pog_arg);
                    }
                    self.finish_node()
                }
            };
            nnid2edge.insert(nnid, edge);
            debug!("NNF node {} --> POG edge {}", nnid - NODE_START, edge);
        }
        // The root is visited last.
        Ok(edge)
    }
}

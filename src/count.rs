//! Ring evaluation: weighted and unweighted model counting over the POG.

use std::collections::BTreeMap;

use log::error;
use num_rational::BigRational;
use num_traits::{One, Zero};

use crate::pog::Pog;
use crate::types::{var_of, CONFLICT, TAUTOLOGY};

impl Pog {
    /// Evaluates the subgraph rooted at `root_edge` over the rational
    /// ring. `weights` must map both literals of every data variable that
    /// can be reached. Products multiply, sums add, `TAUTOLOGY` is 1 and
    /// `CONFLICT` is 0; each node value `v` also defines `1 - v` for its
    /// negation. A missing weight is reported and yields 0.
    pub fn ring_evaluate(
        &self,
        root_edge: i32,
        weights: &BTreeMap<i32, BigRational>,
    ) -> BigRational {
        let mut evals: BTreeMap<i32, BigRational> = BTreeMap::new();
        let mut visited = std::collections::BTreeSet::new();
        self.visit(root_edge, &mut visited);
        // Ascending node ids: children are evaluated before parents.
        for &id in &visited {
            let sum = self.is_sum(id);
            let mut val = if sum {
                BigRational::zero()
            } else {
                BigRational::one()
            };
            for &cedge in self.edge_args(id) {
                let wt = if self.is_node(cedge) {
                    evals.get(&cedge)
                } else {
                    weights.get(&cedge)
                };
                let Some(wt) = wt else {
                    let cvar = var_of(cedge);
                    if !self.is_node(cedge) && !self.is_data_variable(cvar) {
                        error!(
                            "encountered projection variable {} as child of node {}",
                            cvar, id
                        );
                    } else {
                        error!("couldn't find weight for edge {}", cedge);
                    }
                    return BigRational::zero();
                };
                val = if sum { val + wt } else { val * wt };
            }
            evals.insert(-id, BigRational::one() - &val);
            evals.insert(id, val);
        }
        if root_edge == TAUTOLOGY {
            BigRational::one()
        } else if root_edge == CONFLICT {
            BigRational::zero()
        } else if self.is_node(root_edge) {
            match evals.get(&root_edge) {
                Some(val) => val.clone(),
                None => {
                    error!("couldn't find value for root edge {}", root_edge);
                    BigRational::zero()
                }
            }
        } else {
            match weights.get(&root_edge) {
                Some(val) => val.clone(),
                None => {
                    error!("couldn't find weight for root edge {}", root_edge);
                    BigRational::zero()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use num_bigint::BigInt;

    use crate::pog::NodeType;

    fn rat(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    fn uniform_weights(nvar: i32) -> BTreeMap<i32, BigRational> {
        let mut weights = BTreeMap::new();
        for var in 1..=nvar {
            weights.insert(var, rat(1, 2));
            weights.insert(-var, rat(1, 2));
        }
        weights
    }

    fn pog(nvar: i32) -> Pog {
        Pog::new(nvar, (1..=nvar).collect(), BTreeSet::new())
    }

    fn product(p: &mut Pog, args: &[i32]) -> i32 {
        p.start_node(NodeType::Product);
        for &a in args {
            p.add_argument(a);
        }
        p.finish_node()
    }

    fn sum(p: &mut Pog, args: &[i32]) -> i32 {
        p.start_node(NodeType::Sum);
        for &a in args {
            p.add_argument(a);
        }
        p.finish_node()
    }

    #[test]
    fn test_constants_and_literals() {
        let p = pog(2);
        let w = uniform_weights(2);
        assert_eq!(p.ring_evaluate(TAUTOLOGY, &w), rat(1, 1));
        assert_eq!(p.ring_evaluate(CONFLICT, &w), rat(0, 1));
        assert_eq!(p.ring_evaluate(1, &w), rat(1, 2));
        assert_eq!(p.ring_evaluate(-2, &w), rat(1, 2));
    }

    #[test]
    fn test_product_multiplies_sum_adds() {
        let mut p = pog(2);
        let c = product(&mut p, &[1, 2]);
        let w = uniform_weights(2);
        assert_eq!(p.ring_evaluate(c, &w), rat(1, 4));
        let a = product(&mut p, &[1, -2]);
        let s = sum(&mut p, &[c, a]);
        assert_eq!(p.ring_evaluate(s, &w), rat(1, 2));
    }

    #[test]
    fn test_negated_node_value() {
        let mut p = pog(2);
        let c = product(&mut p, &[1, 2]);
        let w = uniform_weights(2);
        // 1 - 1/4, looked up through the registered negation.
        assert_eq!(p.ring_evaluate(-c, &w), rat(3, 4));
    }

    #[test]
    fn test_shared_subgraph() {
        // (x1 & x2) used twice through negation: or(-n, -n) folds, so
        // build or(-n, x1) instead and check the arithmetic.
        let mut p = pog(2);
        let n = product(&mut p, &[1, 2]);
        let s = sum(&mut p, &[-n, 1]);
        let w = uniform_weights(2);
        // 3/4 + 1/2
        assert_eq!(p.ring_evaluate(s, &w), rat(5, 4));
    }

    #[test]
    fn test_weighted_literal() {
        let mut p = pog(1);
        let mut w = BTreeMap::new();
        w.insert(1, rat(3, 10));
        w.insert(-1, rat(7, 10));
        assert_eq!(p.ring_evaluate(1, &w), rat(3, 10));
        let pos = product(&mut p, &[1]);
        let neg = product(&mut p, &[-1]);
        let s = sum(&mut p, &[pos, neg]);
        assert_eq!(p.ring_evaluate(s, &w), rat(1, 1));
    }

    #[test]
    fn test_missing_weight_yields_zero() {
        let mut p = pog(2);
        let c = product(&mut p, &[1, 2]);
        let mut w = BTreeMap::new();
        w.insert(1, rat(1, 2));
        // No weight for 2.
        assert_eq!(p.ring_evaluate(c, &w), rat(0, 1));
    }
}

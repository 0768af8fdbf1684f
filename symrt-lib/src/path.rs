// MIT License
//
// Copyright (c) 2019 Alasdair Armstrong
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation
// files (the "Software"), to deal in the Software without
// restriction, including without limitation the rights to use, copy,
// modify, merge, publish, distribute, sublicense, and/or sell copies
// of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Branch handling. Every time the instrumented program executes a
//! conditional branch it reports the condition together with the
//! direction it went. We ask the solver whether the other direction is
//! reachable under the path constraints collected so far, which gives
//! us a new input when it is, and then commit the direction actually
//! taken.

use crate::error::Error;
use crate::log;
use crate::runtime::Runtime;
use crate::smt::{Ast, Model, SmtResult, Witness};

/// What we learned about the side of a branch that was not taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Alternative {
    /// The condition simplified to a constant, so there was no choice.
    Forced,
    /// The other side cannot be reached along the current path.
    Infeasible,
    /// The solver gave up, e.g. because of a timeout.
    Unknown,
    /// An input that takes the other side.
    Diverging(Witness),
}

#[derive(Debug)]
pub struct Branch<'ctx> {
    /// The constraint added to the path, i.e. the condition or its
    /// negation depending on which side was taken.
    pub asserted: Ast<'ctx>,
    pub alternative: Alternative,
}

impl<'ctx> Runtime<'ctx> {
    pub fn push_path_constraint(&mut self, constraint: &Ast<'ctx>, taken: bool) -> Result<Branch<'ctx>, Error> {
        let constraint = constraint.simplify();

        // If simplification reduced the constraint to a constant
        // there is nothing to solve and nothing to add to the path.
        match constraint.as_bool() {
            Some(true) => {
                if !taken {
                    return Err(Error::ImpossibleBranch { taken });
                }
                log!(log::BRANCH, "Branch condition is always true");
                return Ok(Branch { asserted: constraint, alternative: Alternative::Forced });
            }
            Some(false) => {
                if taken {
                    return Err(Error::ImpossibleBranch { taken });
                }
                log!(log::BRANCH, "Branch condition is always false");
                return Ok(Branch { asserted: constraint.mk_not().simplify(), alternative: Alternative::Forced });
            }
            None => (),
        }

        let not_constraint = constraint.mk_not().simplify();

        let alternative = {
            let mut scope = self.solver.scope();
            scope.assert(if taken { &not_constraint } else { &constraint });
            if_logging!(log::SOLVER, {
                eprintln!("[log]: Trying to solve:\n{}", *scope);
            });

            match scope.check_sat() {
                SmtResult::Sat => {
                    let witness = Model::new(&scope).witness()?;
                    log!(log::BRANCH, &format!("Found diverging input:\n{}", witness));
                    Alternative::Diverging(witness)
                }
                SmtResult::Unsat => {
                    log!(log::BRANCH, "Can't find a diverging input at this point");
                    Alternative::Infeasible
                }
                SmtResult::Unknown => {
                    log!(log::BRANCH, "Solver returned unknown while looking for a diverging input");
                    Alternative::Unknown
                }
            }
        };

        // The path is only extended when it stays satisfiable, so an
        // error here leaves the solver as it was.
        let asserted = if taken { constraint } else { not_constraint };
        if self.solver.check_sat_with(&asserted) == SmtResult::Unsat {
            return Err(Error::InfeasiblePath(asserted.to_string()));
        }
        self.solver.assert(&asserted);

        Ok(Branch { asserted, alternative })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::smt::Context;

    fn context() -> Context {
        Context::new(RuntimeConfig::default().z3_config())
    }

    fn symbolic_byte<'ctx>(rt: &mut Runtime<'ctx>, name: &str, value: u32) -> Ast<'ctx> {
        rt.build_variable(name, value, 8).unwrap();
        rt.get_return_expression().unwrap()
    }

    #[test]
    fn constant_conditions_are_forced() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let t = rt.build_bool(true);
        let branch = rt.push_path_constraint(&t, true).unwrap();
        assert_eq!(branch.alternative, Alternative::Forced);
        assert_eq!(branch.asserted.as_bool(), Some(true));

        let one = rt.build_integer(1, 8).unwrap();
        let two = rt.build_integer(2, 8).unwrap();
        let branch = rt.push_path_constraint(&rt.build_equal(&one, &two), false).unwrap();
        assert_eq!(branch.alternative, Alternative::Forced);
        assert_eq!(branch.asserted.as_bool(), Some(true));
        // Neither touched the solver
        assert_eq!(rt.solver().num_assertions(), 0)
    }

    #[test]
    fn impossible_branches() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let t = rt.build_bool(true);
        let f = rt.build_bool(false);
        assert!(matches!(rt.push_path_constraint(&t, false), Err(Error::ImpossibleBranch { taken: false })));
        assert!(matches!(rt.push_path_constraint(&f, true), Err(Error::ImpossibleBranch { taken: true })))
    }

    #[test]
    fn finds_diverging_input() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let x = symbolic_byte(&mut rt, "x", 5);
        let cond = rt.build_unsigned_less_than(&x, &rt.build_integer(10, 8).unwrap());
        let branch = rt.push_path_constraint(&cond, true).unwrap();
        match branch.alternative {
            Alternative::Diverging(witness) => {
                let v = witness.get("x").and_then(|v| v.as_u64()).unwrap();
                assert!(v >= 10)
            }
            other => panic!("Expected a diverging input, got {:?}", other),
        }
        assert_eq!(branch.asserted, cond.simplify());
        assert_eq!(rt.solver().num_scopes(), 0);
        assert_eq!(rt.solver().num_assertions(), 1)
    }

    #[test]
    fn not_taken_asserts_negation() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let x = symbolic_byte(&mut rt, "x", 200);
        let cond = rt.build_unsigned_less_than(&x, &rt.build_integer(10, 8).unwrap());
        let branch = rt.push_path_constraint(&cond, false).unwrap();
        match branch.alternative {
            Alternative::Diverging(witness) => assert!(witness.get("x").and_then(|v| v.as_u64()).unwrap() < 10),
            other => panic!("Expected a diverging input, got {:?}", other),
        }
        // x = 3 is now excluded from the path
        let three = rt.build_integer(3, 8).unwrap();
        assert_eq!(rt.solver_mut().check_sat_with(&x.mk_eq(&three)), SmtResult::Unsat);
    }

    #[test]
    fn infeasible_alternative() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let x = symbolic_byte(&mut rt, "x", 5);
        let ten = rt.build_integer(10, 8).unwrap();
        let twenty = rt.build_integer(20, 8).unwrap();
        rt.push_path_constraint(&rt.build_unsigned_less_than(&x, &ten), true).unwrap();
        // x < 10 already implies x < 20
        let branch = rt.push_path_constraint(&rt.build_unsigned_less_than(&x, &twenty), true).unwrap();
        assert_eq!(branch.alternative, Alternative::Infeasible);
        assert_eq!(rt.solver().num_assertions(), 2)
    }

    #[test]
    fn solver_timeout_gives_unknown() {
        let config = RuntimeConfig::parse("[solver]\ntimeout = 1").unwrap();
        let ctx = Context::new(config.z3_config());
        let mut rt = Runtime::new(&ctx);

        rt.build_variable("x", 3, 64).unwrap();
        let x = rt.get_return_expression().unwrap();
        rt.build_variable("y", 5, 64).unwrap();
        let y = rt.get_return_expression().unwrap();

        // Only the two 32-bit prime factors satisfy x * y == c, so the
        // solver would have to factor c
        let one = rt.build_integer(1, 64).unwrap();
        let limit = rt.build_integer(1 << 32, 64).unwrap();
        for v in [&x, &y].iter() {
            let lower = rt.build_unsigned_greater_than(v, &one);
            let upper = rt.build_unsigned_less_than(v, &limit);
            rt.solver_mut().assert(&lower);
            rt.solver_mut().assert(&upper)
        }
        let c = rt.build_integer(4_294_967_291 * 4_294_967_279, 64).unwrap();
        let cond = rt.build_equal(&rt.build_mul(&x, &y), &c);

        let branch = rt.push_path_constraint(&cond, false).unwrap();
        assert_eq!(branch.alternative, Alternative::Unknown);
        assert_eq!(branch.asserted, cond.simplify().mk_not().simplify());
        assert_eq!(rt.solver().num_scopes(), 0);
        assert_eq!(rt.solver().num_assertions(), 5)
    }

    #[test]
    fn infeasible_path_is_reported() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let x = symbolic_byte(&mut rt, "x", 5);
        let ten = rt.build_integer(10, 8).unwrap();
        rt.push_path_constraint(&rt.build_unsigned_less_than(&x, &ten), true).unwrap();
        let result = rt.push_path_constraint(&rt.build_unsigned_greater_equal(&x, &ten), true);
        assert!(matches!(result, Err(Error::InfeasiblePath(_))));
        assert_eq!(rt.solver().num_scopes(), 0);

        // The contradicting constraint was not added, so the path can
        // still be extended
        assert_eq!(rt.solver().num_assertions(), 1);
        assert_eq!(rt.solver_mut().check_sat(), SmtResult::Sat);
        let five = rt.build_integer(5, 8).unwrap();
        let branch = rt.push_path_constraint(&rt.build_equal(&x, &five), true).unwrap();
        assert!(matches!(branch.alternative, Alternative::Diverging(_)));
        assert_eq!(rt.solver().num_assertions(), 2)
    }
}

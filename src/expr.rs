//! Arithmetic and relational expression evaluator for dependent-type
//! widths, repeat counts, conditions and constraints.
//!
//! Stateless beyond the [`Env`] it is handed — safe to build fresh per
//! field, per spec.md §4.B.

use indexmap::IndexMap;

use crate::error::EvalError;

/// A named-integer environment, in binding order. Order only matters for
/// debugging/`Debug` output; lookups are by name.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: IndexMap<String, i64>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: i64) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.vars.get(name).copied()
    }

    /// A fresh copy for per-entry isolation (dictionary value decoding
    /// must not see bindings made by sibling entries, spec.md §4.E Hashmap).
    pub fn fork(&self) -> Self {
        self.clone()
    }
}

/// Arithmetic/relational expression node, as produced by the external
/// TL-B parser (see [`crate::ast::AstExpr`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(i64),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates this expression against `env`. Integer division truncates
    /// toward zero. Comparisons yield `0`/`1`. Unknown variables and
    /// division by zero are hard errors, never silently zero.
    pub fn eval(&self, env: &Env) -> Result<i64, EvalError> {
        Ok(match self {
            Expr::Lit(n) => *n,
            Expr::Var(name) => env
                .get(name)
                .ok_or_else(|| EvalError::UnknownVariable(name.clone()))?,
            Expr::Add(a, b) => a.eval(env)?.wrapping_add(b.eval(env)?),
            Expr::Sub(a, b) => a.eval(env)?.wrapping_sub(b.eval(env)?),
            Expr::Mul(a, b) => a.eval(env)?.wrapping_mul(b.eval(env)?),
            Expr::Div(a, b) => {
                let (a, b) = (a.eval(env)?, b.eval(env)?);
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a / b
            }
            Expr::Eq(a, b) => (a.eval(env)? == b.eval(env)?) as i64,
            Expr::Ne(a, b) => (a.eval(env)? != b.eval(env)?) as i64,
            Expr::Lt(a, b) => (a.eval(env)? < b.eval(env)?) as i64,
            Expr::Le(a, b) => (a.eval(env)? <= b.eval(env)?) as i64,
            Expr::Gt(a, b) => (a.eval(env)? > b.eval(env)?) as i64,
            Expr::Ge(a, b) => (a.eval(env)? >= b.eval(env)?) as i64,
        })
    }

    /// Evaluates a constraint expression: `0` means fail, anything else
    /// (including non-comparison arithmetic results) means pass.
    pub fn eval_truthy(&self, env: &Env) -> Result<bool, EvalError> {
        Ok(self.eval(env)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(pairs: &[(&str, i64)]) -> Env {
        let mut env = Env::new();
        for (name, value) in pairs {
            env.bind(*name, *value);
        }
        env
    }

    #[test]
    fn literal() {
        assert_eq!(Expr::Lit(42).eval(&Env::new()).unwrap(), 42);
    }

    #[test]
    fn variable_lookup() {
        let env = env_with(&[("n", 5)]);
        assert_eq!(Expr::Var("n".into()).eval(&env).unwrap(), 5);
    }

    #[test]
    fn unknown_variable_errors() {
        let err = Expr::Var("missing".into()).eval(&Env::new()).unwrap_err();
        assert_eq!(err, EvalError::UnknownVariable("missing".into()));
    }

    #[test]
    fn division_truncates_toward_zero() {
        let expr = Expr::Div(Box::new(Expr::Lit(-7)), Box::new(Expr::Lit(2)));
        assert_eq!(expr.eval(&Env::new()).unwrap(), -3);
    }

    #[test]
    fn division_by_zero_errors() {
        let expr = Expr::Div(Box::new(Expr::Lit(1)), Box::new(Expr::Lit(0)));
        assert_eq!(expr.eval(&Env::new()).unwrap_err(), EvalError::DivisionByZero);
    }

    #[test]
    fn comparisons_return_zero_or_one() {
        let expr = Expr::Eq(Box::new(Expr::Lit(3)), Box::new(Expr::Lit(3)));
        assert_eq!(expr.eval(&Env::new()).unwrap(), 1);
        let expr = Expr::Lt(Box::new(Expr::Lit(3)), Box::new(Expr::Lit(3)));
        assert_eq!(expr.eval(&Env::new()).unwrap(), 0);
    }

    #[test]
    fn constraint_example_n_plus_m_eq_10() {
        let env = env_with(&[("n", 3), ("m", 7)]);
        let expr = Expr::Eq(
            Box::new(Expr::Add(
                Box::new(Expr::Var("n".into())),
                Box::new(Expr::Var("m".into())),
            )),
            Box::new(Expr::Lit(10)),
        );
        assert!(expr.eval_truthy(&env).unwrap());

        let env = env_with(&[("n", 3), ("m", 8)]);
        assert!(!expr.eval_truthy(&env).unwrap());
    }

    #[test]
    fn fork_isolates_bindings() {
        let mut env = Env::new();
        env.bind("x", 1);
        let mut forked = env.fork();
        forked.bind("y", 2);
        assert_eq!(env.get("y"), None);
        assert_eq!(forked.get("x"), Some(1));
    }
}

//! Bracket abstraction.
//!
//! `[x]e` builds an expression without `x` that, applied to `x`, behaves like `e`. The rules
//! are Turner's, choosing at every application the combinator that keeps the most structure:
//!
//! ```text
//! [x]x           = I
//! [x](f x)       = f                  if x not in f
//! [x](f a)       = B' f p q           if only a mentions x and [x]a = B p q
//!                = B f [x]a           if only a mentions x
//!                = C' p q a           if only f mentions x and [x]f = B p q
//!                = C [x]f a           if only f mentions x
//!                = S' p q [x]a        if both mention x and [x]f = B p q
//!                = S [x]f [x]a        if both mention x
//! ```
//!
//! A subterm that does not mention `x` is reused as is, so every node shared through `Rc`
//! stays shared. `abstract_var` reports "not free" with `None`; `bracket` turns that into
//! `K e`.

use std::rc::Rc;

use super::{
    combinator::Combinator,
    program::{CExpr, CExprPtr},
};
use crate::{app, comb};

/// `[x]e`, or `None` if `x` does not occur in `e`.
pub fn abstract_var(x: &str, e: &CExprPtr) -> Option<CExprPtr> {
    match &**e {
        CExpr::Var(y) if y == x => Some(comb!(I)),
        CExpr::App(f, a) => match (abstract_var(x, f), abstract_var(x, a)) {
            (None, None) => None,
            (None, Some(abs_a)) => Some(if a.is_var(x) {
                Rc::clone(f)
            } else if let Some((p, q)) = as_b(&abs_a) {
                app!(comb!(B_), Rc::clone(f), p, q)
            } else {
                app!(comb!(B), Rc::clone(f), abs_a)
            }),
            (Some(abs_f), None) => Some(if let Some((p, q)) = as_b(&abs_f) {
                app!(comb!(C_), p, q, Rc::clone(a))
            } else {
                app!(comb!(C), abs_f, Rc::clone(a))
            }),
            (Some(abs_f), Some(abs_a)) => Some(if let Some((p, q)) = as_b(&abs_f) {
                app!(comb!(S_), p, q, abs_a)
            } else {
                app!(comb!(S), abs_f, abs_a)
            }),
        },
        _ => None,
    }
}

/// `[x]e`, using `K e` when `x` does not occur in `e`.
pub fn bracket(x: &str, e: CExprPtr) -> CExprPtr {
    match abstract_var(x, &e) {
        Some(abs) => abs,
        None => app!(comb!(K), e),
    }
}

/// Abstract several variables, the last one innermost: `[x1]([x2](.. e))`.
pub fn bracket_all(xs: &[String], e: CExprPtr) -> CExprPtr {
    xs.iter().rev().fold(e, |e, x| bracket(x, e))
}

/// Split `B p q` into `(p, q)`.
fn as_b(e: &CExprPtr) -> Option<(CExprPtr, CExprPtr)> {
    if let CExpr::App(bp, q) = &**e {
        if let CExpr::App(b, p) = &**bp {
            if **b == CExpr::Comb(Combinator::B) {
                return Some((Rc::clone(p), Rc::clone(q)));
            }
        }
    }
    None
}

/// The first variable left in `e`, if any.
pub fn find_var(e: &CExpr) -> Option<&str> {
    match e {
        CExpr::Var(x) => Some(x),
        CExpr::App(f, a) => find_var(f).or_else(|| find_var(a)),
        _ => None,
    }
}

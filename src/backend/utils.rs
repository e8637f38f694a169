//! Convenience macros for building combinator expressions. Spelling out
//! `Rc::new(CExpr::App(Rc::new(CExpr::App(..)), ..))` by hand quickly gets unreadable.

/// Apply a function to one or more arguments, left associative.
///
/// `app!(f, a, b)` is `((f @ a) @ b)`.
#[macro_export]
macro_rules! app {
    ($f:expr, $a:expr) => {
        std::rc::Rc::new($crate::backend::program::CExpr::App($f, $a))
    };
    ($f:expr, $a:expr, $($rest:expr),+) => {
        $crate::app!($crate::app!($f, $a), $($rest),+)
    };
}

/// A combinator leaf named by its variant, e.g. `comb!(K)`.
#[macro_export]
macro_rules! comb {
    ($c:ident) => {
        std::rc::Rc::new($crate::backend::program::CExpr::Comb(
            $crate::backend::combinator::Combinator::$c,
        ))
    };
}

/// A shared primitive leaf, e.g. `prim!(Unpack)`.
#[macro_export]
macro_rules! prim {
    ($p:ident) => {
        std::rc::Rc::new($crate::backend::program::CExpr::Prim(
            $crate::backend::primitive::Primitive::$p,
        ))
    };
}

#[cfg(test)]
mod tests {
    use crate::backend::{combinator::Combinator, program::CExpr};
    use std::rc::Rc;

    #[test]
    fn test_app_is_left_associative() {
        let e = app!(comb!(S), comb!(K), comb!(K), prim!(Neg));
        assert_eq!(e.to_string(), "(((S @ K) @ K) @ neg)");
        let (head, args) = e.spine();
        assert_eq!(head, &CExpr::Comb(Combinator::S));
        assert_eq!(args, 3);
        let shared = comb!(I);
        let twice = app!(Rc::clone(&shared), shared);
        if let CExpr::App(f, a) = &*twice {
            assert!(Rc::ptr_eq(f, a));
        }
    }
}

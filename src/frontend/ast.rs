//! The desugared intermediate program handed to the back end.
//!
//! A module is a list of data declarations and top-level bindings. Expressions are a plain
//! lambda calculus with literals, primitives, constructors, non-recursive and recursive let
//! and a case that dispatches on constructor tags.

use std::fmt;

use crate::backend::{combinator::Combinator, primitive::Primitive};

pub type Name = String;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Char(char),
    Double(f64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Char(c) => write!(f, "{:?}", c),
            Literal::Double(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Locally bound variable.
    Var(Name),
    /// Reference to a top-level definition.
    Global(Name),
    Lit(Literal),
    Prim(Primitive),
    Comb(Combinator),
    Con { tag: u32, arity: u32 },
    App(Box<Expr>, Box<Expr>),
    Lam(Name, Box<Expr>),
    Let(Name, Box<Expr>, Box<Expr>),
    LetRec(Vec<(Name, Expr)>, Box<Expr>),
    Case {
        scrut: Box<Expr>,
        /// Field count of every constructor of the scrutinee's type, indexed by tag.
        arities: Vec<u32>,
        alts: Vec<Alt>,
        default: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alt {
    pub tag: u32,
    pub binders: Vec<Name>,
    pub body: Expr,
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn global(name: &str) -> Self {
        Expr::Global(name.to_string())
    }

    pub fn int(n: i64) -> Self {
        Expr::Lit(Literal::Int(n))
    }

    pub fn app(f: Expr, a: Expr) -> Self {
        Expr::App(Box::new(f), Box::new(a))
    }

    /// Apply `f` to all `args` from left to right.
    pub fn apply(f: Expr, args: impl IntoIterator<Item = Expr>) -> Self {
        args.into_iter().fold(f, Expr::app)
    }

    pub fn lam(x: &str, body: Expr) -> Self {
        Expr::Lam(x.to_string(), Box::new(body))
    }

    /// Nest one lambda per parameter around `body`.
    pub fn lams(params: &[Name], body: Expr) -> Self {
        params
            .iter()
            .rev()
            .fold(body, |body, x| Expr::Lam(x.clone(), Box::new(body)))
    }

    pub fn let_(x: &str, rhs: Expr, body: Expr) -> Self {
        Expr::Let(x.to_string(), Box::new(rhs), Box::new(body))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(x) => write!(f, "{}", x),
            Expr::Global(x) => write!(f, "{}", x),
            Expr::Lit(l) => write!(f, "{}", l),
            Expr::Prim(p) => write!(f, "#{}", p),
            Expr::Comb(c) => write!(f, "#{}", c),
            Expr::Con { tag, arity } => write!(f, "Con{}/{}", tag, arity),
            Expr::App(fun, arg) => write!(f, "({} @ {})", fun, arg),
            Expr::Lam(x, body) => write!(f, "(\\{} -> {})", x, body),
            Expr::Let(x, rhs, body) => write!(f, "(let {} = {} in {})", x, rhs, body),
            Expr::LetRec(binds, body) => {
                write!(f, "(letrec ")?;
                for (i, (x, rhs)) in binds.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} = {}", x, rhs)?;
                }
                write!(f, " in {})", body)
            }
            Expr::Case {
                scrut,
                alts,
                default,
                ..
            } => {
                write!(f, "(case {} of {{", scrut)?;
                for alt in alts {
                    write!(f, " {}", alt.tag)?;
                    for b in &alt.binders {
                        write!(f, " {}", b)?;
                    }
                    write!(f, " -> {};", alt.body)?;
                }
                if let Some(d) = default {
                    write!(f, " _ -> {};", d)?;
                }
                write!(f, " }})")
            }
        }
    }
}

/// `data Name = Con1 k1 | Con2 k2 ...`. Constructor tags are their positions.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDecl {
    pub name: String,
    pub constructors: Vec<(String, u32)>,
}

impl DataDecl {
    pub fn arities(&self) -> Vec<u32> {
        self.constructors.iter().map(|(_, k)| *k).collect()
    }
}

/// A top-level definition `name params = body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: Name,
    pub params: Vec<Name>,
    pub body: Expr,
}

impl Binding {
    pub fn new(name: &str, params: &[&str], body: Expr) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub datatypes: Vec<DataDecl>,
    pub defs: Vec<Binding>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.defs.iter().find(|b| b.name == name)
    }
}

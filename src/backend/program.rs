//! Combinator expressions, the output of the translator.
//!
//! Sharing is expressed through `Rc` identity: a subexpression used at several places is one
//! `CExprPtr` cloned into each parent. Every consumer (serializer, graph builder, visualizer)
//! treats two pointers to the same allocation as one node.

use std::{fmt, rc::Rc};

use super::{combinator::Combinator, primitive::Primitive};
use crate::frontend::ast::Literal;

pub type CExprPtr = Rc<CExpr>;

/// The definition evaluation starts from.
pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    App(CExprPtr, CExprPtr),
    Comb(Combinator),
    Prim(Primitive),
    /// Reference to a top-level definition by name.
    Global(String),
    Lit(Literal),
    /// A variable that has not been abstracted yet. Never part of a finished definition.
    Var(String),
}

impl CExpr {
    /// Head of the application spine and the number of arguments applied to it.
    pub fn spine(&self) -> (&CExpr, usize) {
        let mut head = self;
        let mut args = 0;
        while let CExpr::App(f, _) = head {
            head = f;
            args += 1;
        }
        (head, args)
    }

    pub fn is_var(&self, x: &str) -> bool {
        matches!(self, CExpr::Var(y) if y == x)
    }
}

impl fmt::Display for CExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CExpr::App(fun, arg) => write!(f, "({} @ {})", fun, arg),
            CExpr::Comb(c) => write!(f, "{}", c),
            CExpr::Prim(p) => write!(f, "{}", p),
            CExpr::Global(name) => write!(f, "{}", name),
            CExpr::Lit(l) => write!(f, "{}", l),
            CExpr::Var(x) => write!(f, "Id:{}", x),
        }
    }
}

/// A compiled top-level definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    /// Arguments the body needs before its spine can fire.
    pub arity: usize,
    pub body: CExprPtr,
}

/// The compiled form of one module.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub module: String,
    pub defs: Vec<Definition>,
    /// Name of the definition evaluation starts from.
    pub entry: Option<String>,
}

impl Program {
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name == name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for def in self.defs.iter() {
            writeln!(f, "{}/{} = {}", def.name, def.arity, def.body)?;
        }
        Ok(())
    }
}

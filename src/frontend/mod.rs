//! The frontend module reads the textual form of the desugared intermediate program.
//!
//! # Lexer
//! Firstly the lexer is responsible for converting the input string into a queue of tokens which
//! are defined in the token module.
//! ### Example
//! ```rust
//! use turner::frontend::lexer::Lexer;
//! let tokens_or_err = Lexer::new("def main = #+ 1 2").tokenize();
//! ```
//!
//! # Parser
//! The parser consumes the token stream, resolves local and top-level names and turns it into a
//! `frontend::ast::Module`.
//! ### Example
//! ```rust
//! use turner::frontend::{lexer::Lexer, parser::Parser};
//! let tokens = Lexer::new("def main = #+ 1 2").tokenize().unwrap();
//! let module = Parser::new(tokens).parse("Main").unwrap();
//! assert_eq!(module.defs.len(), 1);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod position;
pub mod token;

use crate::error::FrontendError;

/// Tokenize and parse `source` into a module called `name`.
pub fn parse_module(name: &str, source: &str) -> Result<ast::Module, FrontendError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse(name)
}

//! Error types for every stage of the pipeline.
//!
//! Each stage owns its own enum so callers can tell a malformed definitions
//! file apart from a program that divided by zero. `Error` wraps all of them
//! for the driver functions and the binary.

use std::io;

use thiserror::Error;

use crate::frontend::position::Position;

#[derive(Debug, Error, PartialEq)]
pub enum FrontendError {
    #[error("Syntax error at {pos}: {msg}")]
    SyntaxError { pos: Position, msg: String },
    #[error("Parse error at {pos}: {msg}")]
    ParseError { pos: Position, msg: String },
}

/// Violations of the contract between the front end and the translator.
/// None of these should be reachable from a well-formed program.
#[derive(Debug, Error, PartialEq)]
pub enum TranslateError {
    #[error("unresolved free variable `{var}` in definition `{def}`")]
    FreeVariable { def: String, var: String },
    #[error("reference to unknown global `{name}` in definition `{def}`")]
    UnknownGlobal { def: String, name: String },
    #[error("case alternative with tag {tag} on a type with {constructors} constructors")]
    UnknownTag { tag: u32, constructors: usize },
    #[error("case alternative for tag {tag} binds {found} fields, constructor has {expected}")]
    BinderMismatch { tag: u32, expected: u32, found: usize },
    #[error("duplicate case alternative for tag {0}")]
    DuplicateAlternative(u32),
    #[error("duplicate top-level definition `{0}`")]
    DuplicateDefinition(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("definitions file truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("not a definitions file (bad magic)")]
    BadMagic,
    #[error("format version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u16, expected: u16 },
    #[error("unknown record tag {tag:#04x} at byte {offset}")]
    UnknownRecord { tag: u8, offset: usize },
    #[error("unknown combinator code {code:#04x} at byte {offset}")]
    UnknownCombinator { code: u8, offset: usize },
    #[error("record {record} refers to invalid {kind} {target}")]
    BadReference { record: usize, kind: &'static str, target: u64 },
    #[error("malformed definitions file: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("primitive `{0}` is not known to this runtime")]
    UnresolvedPrimitive(String),
    #[error("definitions file has no entry point")]
    MissingEntry,
    #[error("definition `{0}` is an alias of itself")]
    SelfAlias(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Conditions that stop the reduction machine. `Exit` is the terminal state
/// reached through `IO.exit` and is reported as an outcome, not a failure.
#[derive(Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("heap exhausted ({cells} cells) after garbage collection")]
    OutOfMemory { cells: usize },
    #[error("evaluation stack exhausted (limit {limit})")]
    StackOverflow { limit: usize },
    #[error("pattern match failure: constructor tag {tag} with {alternatives} alternatives")]
    PatternMatchFailure { tag: u32, alternatives: u32 },
    #[error("pattern match failure: no alternative")]
    NoMatch,
    #[error("attempt to apply a non-function: {0}")]
    NotAFunction(String),
    #[error("`{prim}` expected {expected}, found {found}")]
    TypeMismatch {
        prim: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("error: {0}")]
    UserError(String),
    #[error("foreign call `{prim}` failed: {msg}")]
    Foreign { prim: &'static str, msg: String },
    #[error("not an IO action: {0}")]
    NotAnAction(String),
    #[error("malformed graph: {0}")]
    Malformed(String),
    #[error("program exited with status {0}")]
    Exit(i32),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

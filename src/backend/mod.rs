//! This module contains all modules needed for the backend of the compiler.
//!
//! The backend features three stages:
//! 1. Translating the intermediate program into combinators. Local functions are lifted to
//! the top level by the `Lifter`, then every remaining bound variable is removed by bracket
//! abstraction (`abstractor`). The `Compiler` drives both and annotates the arity of every
//! definition.
//! 2. Persisting the result. The `wire` module turns a compiled program into a compact image
//! that the `loader` instantiates in the heap again, possibly in another process. The `cache`
//! keeps images of unchanged modules between compiler runs.
//! 3. Evaluating the program in a virtual machine. The `ReductionMachine` reduces the graph
//! in place following the rules of the combinators and primitives, performs I/O through the
//! `foreign` world and collects garbage in its `heap`.

pub mod abstractor;
pub mod cache;
pub mod combinator;
pub mod compiler;
pub mod foreign;
pub mod heap;
pub mod lift;
pub mod loader;
pub mod primitive;
pub mod program;
pub mod reduction;
pub mod utils;
pub mod value;
pub mod wire;

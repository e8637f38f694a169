//! A combinator back end for a lazy functional language.
//!
//! The crate reads a desugared intermediate program (`frontend`), translates it into a
//! sharing-preserving combinator graph, persists the graph in a compact definitions file
//! and evaluates it with a graph reduction machine (`backend`).
//!
//! ### Example
//! ```rust
//! use turner::{backend::{reduction::Outcome, value::Value}, run_source, Config};
//! let outcome = run_source("Main", "def main = #+ 1 (#* 6 7)", &Config::default()).unwrap();
//! assert_eq!(outcome, Outcome::Value(Value::Int(43)));
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod visualize;

use tracing::debug;

use backend::{
    cache::CacheStore,
    compiler::Compiler,
    foreign::World,
    reduction::{Outcome, ReductionMachine},
    wire::Image,
};
pub use config::Config;
pub use error::Error;

/// Compile `source` as module `name`, going through the cache configured in `config`.
pub fn compile_image(name: &str, source: &str, config: &Config) -> Result<Image, Error> {
    let mut cache = match &config.cache_dir {
        Some(dir) => CacheStore::open(dir)?,
        None => CacheStore::in_memory(),
    };
    Compiler::new().compile_source(name, source, &mut cache)
}

/// Load `image` into a fresh machine connected to `world` and run its entry point.
pub fn run_image_with(image: &Image, config: &Config, world: World) -> Result<Outcome, Error> {
    config.validate()?;
    let mut machine = ReductionMachine::new(config, world);
    machine.world_mut().set_args(config.args.clone());
    let entry = machine.load_image(image)?;
    debug!(
        records = image.records.len(),
        live = machine.heap().live(),
        "image loaded"
    );
    Ok(machine.run(entry)?)
}

/// Run `image` against the standard streams of the process.
pub fn run_image(image: &Image, config: &Config) -> Result<Outcome, Error> {
    run_image_with(image, config, World::stdio(config.args.clone()))
}

/// Compile and run `source` against the standard streams of the process.
pub fn run_source(name: &str, source: &str, config: &Config) -> Result<Outcome, Error> {
    let image = compile_image(name, source, config)?;
    run_image(&image, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::value::Value;

    const HELLO: &str = include_str!("../demos/hello.core");
    const FIB: &str = include_str!("../demos/fib.core");
    const SIEVE: &str = include_str!("../demos/sieve.core");

    fn run_captured(src: &str, input: &str, config: &Config) -> (Outcome, String) {
        let image = compile_image("Demo", src, config).unwrap();
        let bytes = image.encode();
        let image = Image::decode(&bytes).unwrap();
        let (world, out, _) = World::captured(input);
        let outcome = run_image_with(&image, config, world).unwrap();
        (outcome, out.text())
    }

    #[test]
    fn test_hello() {
        let config = Config::default().with_args(vec!["world".to_string()]);
        let (outcome, out) = run_captured(HELLO, "", &config);
        assert_eq!(outcome, Outcome::Value(Value::con(0)));
        assert_eq!(out, "Hello, world!\n");
    }

    #[test]
    fn test_fib() {
        let (outcome, _) = run_captured(FIB, "", &Config::default());
        assert_eq!(outcome, Outcome::Value(Value::Int(6765)));
    }

    #[test]
    fn test_sieve_under_collection_pressure() {
        let expected = Value::list([2, 3, 5, 7, 11, 13, 17, 19, 23, 29].map(Value::Int));
        let (outcome, _) = run_captured(SIEVE, "", &Config::default());
        assert_eq!(outcome, Outcome::Value(expected.clone()));
        let config = Config::default().with_heap_cells(4096).with_gc_stress(true);
        let (outcome, _) = run_captured(SIEVE, "", &config);
        assert_eq!(outcome, Outcome::Value(expected));
    }

    #[test]
    fn test_cache_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_cache_dir(dir.path());
        let first = compile_image("Fib", FIB, &config).unwrap();
        assert!(dir.path().join("Fib.tcache").exists());
        assert_eq!(compile_image("Fib", FIB, &config).unwrap(), first);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let image = compile_image("Fib", FIB, &Config::default()).unwrap();
        let (world, _, _) = World::captured("");
        assert!(matches!(
            run_image_with(&image, &Config::default().with_heap_cells(1), world),
            Err(Error::Config(_))
        ));
    }
}

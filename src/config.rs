//! Tunables of the reduction machine and the module cache.

use std::path::PathBuf;

use crate::{backend::heap::RESERVE, error::Error};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Capacity of the node arena. The heap never grows past it.
    pub heap_cells: usize,
    /// Entries of the explicit evaluation stack.
    pub stack_limit: usize,
    /// How deeply strict evaluations (primitive arguments, case scrutinees, I/O) may nest.
    pub depth_limit: usize,
    /// Collect at every safe point instead of only when the heap runs low.
    pub gc_stress: bool,
    pub cache_dir: Option<PathBuf>,
    /// Arguments handed to the program through `IO.getArgs`.
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_cells: 1 << 20,
            stack_limit: 1 << 20,
            depth_limit: 10_000,
            gc_stress: false,
            cache_dir: None,
            args: Vec::new(),
        }
    }
}

impl Config {
    pub fn with_heap_cells(mut self, cells: usize) -> Self {
        self.heap_cells = cells;
        self
    }

    pub fn with_stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    pub fn with_depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn with_gc_stress(mut self, stress: bool) -> Self {
        self.gc_stress = stress;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.heap_cells < 2 * RESERVE {
            return Err(Error::Config(format!(
                "heap of {} cells is smaller than the minimum of {}",
                self.heap_cells,
                2 * RESERVE
            )));
        }
        if self.heap_cells > u32::MAX as usize {
            return Err(Error::Config(format!(
                "heap of {} cells exceeds the addressable {}",
                self.heap_cells,
                u32::MAX
            )));
        }
        if self.stack_limit == 0 || self.depth_limit == 0 {
            return Err(Error::Config(
                "stack and depth limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().with_heap_cells(100).validate().is_err());
        assert!(Config::default()
            .with_heap_cells(2 * RESERVE)
            .validate()
            .is_ok());
        assert!(Config::default().with_depth_limit(0).validate().is_err());
        let config = Config::default()
            .with_gc_stress(true)
            .with_args(vec!["a".to_string()])
            .with_cache_dir("/tmp/x");
        assert!(config.gc_stress);
        assert_eq!(config.args, vec!["a"]);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/x")));
    }
}

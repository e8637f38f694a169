//! The node arena and its mark and sweep collector.
//!
//! Nodes are addressed by `NodeId`, an index into a vector of fixed capacity, so cyclic
//! graphs are plain index cycles and an update in place is visible through every handle.
//! Free slots are threaded into a list through `Node::Free`.
//!
//! Allocation never collects. The reduction machine calls `collect` itself at safe points,
//! between complete reduction steps, with the full set of roots.

use std::{fmt, rc::Rc};

use tracing::debug;

use super::{combinator::Combinator, primitive::Primitive};
use crate::error::RuntimeError;

/// Cells kept free so that a reduction step started at a safe point can always complete.
pub const RESERVE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Char(char),
    Double(f64),
    Ptr(u64),
    /// The unread rest of a string literal, from byte `at` on.
    Str { text: Rc<str>, at: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    App(NodeId, NodeId),
    Comb(Combinator),
    Prim(Primitive),
    /// Forwarding pointer left behind by an update.
    Ind(NodeId),
    Lit(Lit),
    Free(Option<NodeId>),
}

impl Node {
    pub fn int(n: i64) -> Self {
        Node::Lit(Lit::Int(n))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub collections: usize,
    pub reclaimed: usize,
    pub peak_live: usize,
}

pub struct Heap {
    nodes: Vec<Node>,
    capacity: usize,
    free: Option<NodeId>,
    free_count: usize,
    stats: HeapStats,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            capacity: capacity.min(u32::MAX as usize),
            free: None,
            free_count: 0,
            stats: HeapStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_cells(&self) -> usize {
        self.capacity - self.nodes.len() + self.free_count
    }

    pub fn live(&self) -> usize {
        self.capacity - self.free_cells()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// True once the free cells drop below the reserve.
    pub fn needs_collection(&self) -> bool {
        self.free_cells() < RESERVE
    }

    pub fn alloc(&mut self, node: Node) -> Result<NodeId, RuntimeError> {
        let id = if let Some(id) = self.free {
            self.free = match self.nodes[id.index()] {
                Node::Free(next) => next,
                _ => {
                    return Err(RuntimeError::Malformed(format!(
                        "free list points at live node {}",
                        id
                    )))
                }
            };
            self.free_count -= 1;
            self.nodes[id.index()] = node;
            id
        } else if self.nodes.len() < self.capacity {
            self.nodes.push(node);
            NodeId((self.nodes.len() - 1) as u32)
        } else {
            return Err(RuntimeError::OutOfMemory {
                cells: self.capacity,
            });
        };
        let live = self.live();
        if live > self.stats.peak_live {
            self.stats.peak_live = live;
        }
        Ok(id)
    }

    pub fn app(&mut self, f: NodeId, a: NodeId) -> Result<NodeId, RuntimeError> {
        self.alloc(Node::App(f, a))
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Overwrite a node in place. Every holder of `id` sees the new contents.
    pub fn set(&mut self, id: NodeId, node: Node) {
        self.nodes[id.index()] = node;
    }

    /// Follow indirections. A chain that loops back on itself stops at the repeated node.
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        let mut steps = 0;
        while let Node::Ind(next) = self.nodes[id.index()] {
            if next == id || steps > self.nodes.len() {
                break;
            }
            id = next;
            steps += 1;
        }
        id
    }

    /// Mark everything reachable from `roots` and return all other cells to the free list.
    /// Returns the number of cells reclaimed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = NodeId>) -> usize {
        let mut marks = vec![false; self.nodes.len()];
        let mut work: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = work.pop() {
            if marks[id.index()] {
                continue;
            }
            marks[id.index()] = true;
            match self.nodes[id.index()] {
                Node::App(f, a) => {
                    // Applications skip the indirections they point through.
                    let (f2, a2) = (self.resolve(f), self.resolve(a));
                    if (f2, a2) != (f, a) {
                        self.nodes[id.index()] = Node::App(f2, a2);
                    }
                    work.push(f2);
                    work.push(a2);
                }
                Node::Ind(target) => work.push(target),
                _ => (),
            }
        }

        let mut reclaimed = 0;
        let mut free = None;
        let mut free_count = 0;
        for (i, marked) in marks.iter().enumerate().rev() {
            if *marked {
                continue;
            }
            if !matches!(self.nodes[i], Node::Free(_)) {
                reclaimed += 1;
            }
            self.nodes[i] = Node::Free(free);
            free = Some(NodeId(i as u32));
            free_count += 1;
        }
        self.free = free;
        self.free_count = free_count;
        self.stats.collections += 1;
        self.stats.reclaimed += reclaimed;
        debug!(
            live = self.live(),
            reclaimed,
            capacity = self.capacity,
            "garbage collection"
        );
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let mut heap = Heap::new(3);
        let a = heap.alloc(Node::int(1)).unwrap();
        let b = heap.alloc(Node::int(2)).unwrap();
        let c = heap.app(a, b).unwrap();
        assert_eq!(heap.get(c), &Node::App(a, b));
        assert_eq!(
            heap.alloc(Node::int(3)),
            Err(RuntimeError::OutOfMemory { cells: 3 })
        );
        assert_eq!(heap.free_cells(), 0);
        assert!(heap.needs_collection());
    }

    #[test]
    fn test_collect_reclaims_unreachable() {
        let mut heap = Heap::new(10);
        let one = heap.alloc(Node::int(1)).unwrap();
        let garbage = heap.alloc(Node::int(2)).unwrap();
        let neg = heap.alloc(Node::Prim(Primitive::Neg)).unwrap();
        let root = heap.app(neg, one).unwrap();
        heap.alloc(Node::App(garbage, garbage)).unwrap();
        assert_eq!(heap.live(), 5);

        assert_eq!(heap.collect([root]), 2);
        assert_eq!(heap.live(), 3);
        assert_eq!(heap.get(root), &Node::App(neg, one));
        // Freed cells are reused before the arena grows.
        let reused = heap.alloc(Node::int(7)).unwrap();
        assert!(reused == garbage || reused.0 == 4);
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.stats().reclaimed, 2);
        assert_eq!(heap.stats().peak_live, 5);
    }

    #[test]
    fn test_collect_shortcuts_indirections() {
        let mut heap = Heap::new(10);
        let value = heap.alloc(Node::int(42)).unwrap();
        let ind = heap.alloc(Node::Ind(value)).unwrap();
        let f = heap.alloc(Node::Prim(Primitive::Neg)).unwrap();
        let root = heap.app(f, ind).unwrap();
        heap.collect([root]);
        assert_eq!(heap.get(root), &Node::App(f, value));
        assert!(matches!(heap.get(ind), Node::Free(_)));
    }

    #[test]
    fn test_cycles_survive() {
        let mut heap = Heap::new(10);
        let y = heap.alloc(Node::Comb(Combinator::I)).unwrap();
        let cyclic = heap.app(y, y).unwrap();
        heap.set(cyclic, Node::App(y, cyclic));
        let looping = heap.alloc(Node::Ind(NodeId(2))).unwrap();
        assert_eq!(heap.resolve(looping), looping);
        assert_eq!(heap.collect([cyclic]), 1);
        assert_eq!(heap.get(cyclic), &Node::App(y, cyclic));
        assert_eq!(heap.collect([cyclic]), 0);
    }
}

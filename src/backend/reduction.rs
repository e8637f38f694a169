//! This module contains the graph reduction machine that evaluates a loaded program.
//!
//! The machine unwinds the spine of the current expression on an explicit stack until it
//! reaches a combinator or primitive. Once enough arguments are on the stack the rule fires
//! and the root of the redex is overwritten with the result (or an indirection to it), so
//! every other reference to the redex sees the reduced value and a shared expression is
//! reduced at most once.
//!
//! A rule whose strict argument is not evaluated yet does not fire. The current spine is
//! suspended in place, the argument is unwound above it, and once the argument is in weak
//! head normal form the rule is looked at again. Suspended spines are counted against the
//! depth limit, so deep non-tail recursion ends in `StackOverflow` instead of exhausting the
//! native stack. The I/O driver and `normalize` keep their pending work on the same stack.
//!
//! The stack is the root set of the collector together with the pinned definitions, and the
//! collector only runs at the top of an unwinding step, never in the middle of a rule.

use std::collections::BTreeMap;

use tracing::{info, trace};

use super::{
    combinator::{Combinator, CONS, FALSE, NIL, TRUE, UNIT},
    foreign::{World, STDERR, STDIN, STDOUT},
    heap::{Heap, HeapStats, Lit, Node, NodeId, RESERVE},
    loader::{self, Loaded},
    primitive::{PrimTable, Primitive},
    program::Program,
    value::Value,
    wire::Image,
};
use crate::{
    config::Config,
    error::{LoadError, RuntimeError},
};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The normal form of a pure entry point, or the result of an I/O action.
    Value(Value),
    /// The program called `IO.exit`.
    Exit(i32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Combinator and primitive rules fired.
    pub steps: usize,
    pub ticks: usize,
    /// Ticks per label.
    pub tick_labels: BTreeMap<i64, usize>,
    pub heap: HeapStats,
}

impl Stats {
    pub fn ticks_for(&self, label: i64) -> usize {
        self.tick_labels.get(&label).copied().unwrap_or(0)
    }
}

/// What unwinding does after looking at the top of the stack.
enum Step {
    Continue,
    /// Evaluate this node first, then look at the same spine again.
    Force(NodeId),
    /// The spine is in weak head normal form.
    Done,
}

/// The reduction machine is a virtual machine evaluating a program graph until a value in
/// weak head normal form (or full normal form, see `normalize`) is reached.
pub struct ReductionMachine {
    heap: Heap,
    stack: Vec<NodeId>,
    /// Bases of the suspended spines, innermost last.
    frames: Vec<usize>,
    /// Definition nodes, live for the whole run.
    pinned: Vec<NodeId>,
    globals: Vec<(String, NodeId)>,
    depth: usize,
    stack_limit: usize,
    depth_limit: usize,
    gc_stress: bool,
    world: World,
    stats: Stats,
}

impl ReductionMachine {
    pub fn new(config: &Config, world: World) -> Self {
        Self {
            heap: Heap::new(config.heap_cells),
            stack: Vec::new(),
            frames: Vec::new(),
            pinned: Vec::new(),
            globals: Vec::new(),
            depth: 0,
            stack_limit: config.stack_limit,
            depth_limit: config.depth_limit,
            gc_stress: config.gc_stress,
            world,
            stats: Stats::default(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn stats(&self) -> Stats {
        Stats {
            heap: self.heap.stats(),
            ..self.stats.clone()
        }
    }

    /// Node of a loaded definition.
    pub fn global(&self, name: &str) -> Option<NodeId> {
        self.globals.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    fn pin(&mut self, loaded: Loaded) -> Result<NodeId, LoadError> {
        self.pinned.extend(loaded.defs.iter().map(|(_, id)| *id));
        self.globals.extend(loaded.defs);
        loaded.entry.ok_or(LoadError::MissingEntry)
    }

    /// Load a decoded definitions file and return its entry point.
    pub fn load_image(&mut self, image: &Image) -> Result<NodeId, LoadError> {
        let loaded = loader::load(image, &mut self.heap, &PrimTable)?;
        self.pin(loaded)
    }

    /// Build a compiled program directly and return its entry point.
    pub fn load_program(&mut self, program: &Program) -> Result<NodeId, LoadError> {
        let loaded = loader::build(program, &mut self.heap)?;
        self.pin(loaded)
    }

    //-------
    // HELPER
    //-------

    fn push(&mut self, node: NodeId) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.stack_limit {
            return Err(RuntimeError::StackOverflow {
                limit: self.stack_limit,
            });
        }
        self.stack.push(node);
        Ok(())
    }

    /// Enter a nested strict evaluation.
    fn enter(&mut self) -> Result<(), RuntimeError> {
        if self.depth >= self.depth_limit {
            return Err(RuntimeError::StackOverflow {
                limit: self.depth_limit,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn collect(&mut self) {
        self.heap
            .collect(self.stack.iter().chain(self.pinned.iter()).copied());
    }

    /// Collect if the heap runs low. Only called where every live node is reachable from
    /// the stack or the pinned definitions.
    fn safe_point(&mut self) -> Result<(), RuntimeError> {
        self.reserve(RESERVE)
    }

    /// Make sure `cells` cells can be allocated without collecting.
    fn reserve(&mut self, cells: usize) -> Result<(), RuntimeError> {
        if self.gc_stress || self.heap.free_cells() < cells.max(RESERVE) {
            self.collect();
            if self.heap.free_cells() < cells.max(RESERVE) {
                return Err(RuntimeError::OutOfMemory {
                    cells: self.heap.capacity(),
                });
            }
        }
        Ok(())
    }

    fn alloc(&mut self, node: Node) -> Result<NodeId, RuntimeError> {
        self.heap.alloc(node)
    }

    /// Argument `i` (counting from 1) of the head at stack position `top`.
    fn arg(&self, top: usize, i: usize) -> Result<NodeId, RuntimeError> {
        match self.heap.get(self.stack[top - i]) {
            Node::App(_, a) => Ok(*a),
            other => Err(RuntimeError::Malformed(format!(
                "spine entry is not an application: {:?}",
                other
            ))),
        }
    }

    /// Head and arguments of the application spine of `node`.
    fn spine(&self, node: NodeId) -> (NodeId, Vec<NodeId>) {
        let mut head = self.heap.resolve(node);
        let mut args = Vec::new();
        while let Node::App(f, a) = self.heap.get(head) {
            args.push(*a);
            head = self.heap.resolve(*f);
        }
        args.reverse();
        (head, args)
    }

    /// Overwrite `redex` with an indirection to `target`.
    fn update_ind(&mut self, redex: NodeId, target: NodeId) -> Result<(), RuntimeError> {
        let target = self.heap.resolve(target);
        if target == redex {
            return Err(RuntimeError::Malformed("<<loop>>".to_string()));
        }
        self.heap.set(redex, Node::Ind(target));
        Ok(())
    }

    fn describe(&self, node: NodeId) -> String {
        let (head, args) = self.spine(node);
        let head = match self.heap.get(head) {
            Node::Comb(c) => c.to_string(),
            Node::Prim(p) => p.to_string(),
            Node::Lit(Lit::Int(n)) => n.to_string(),
            Node::Lit(Lit::Char(c)) => format!("{:?}", c),
            Node::Lit(Lit::Double(x)) => format!("{:?}", x),
            Node::Lit(Lit::Ptr(p)) => format!("<ptr {:#x}>", p),
            Node::Lit(Lit::Str { text, at }) => format!("{:?}", &text[*at..]),
            Node::App(..) | Node::Ind(_) | Node::Free(_) => "<node>".to_string(),
        };
        match args.len() {
            0 => head,
            n => format!("{} applied to {} arguments", head, n),
        }
    }

    fn is_action(&self, node: NodeId) -> bool {
        let (head, _) = self.spine(node);
        match self.heap.get(head) {
            Node::Comb(c) => c.is_io(),
            Node::Prim(p) => p.is_io(),
            _ => false,
        }
    }

    fn int_value(&self, prim: Primitive, node: NodeId) -> Result<i64, RuntimeError> {
        let v = self.heap.resolve(node);
        match self.heap.get(v) {
            Node::Lit(Lit::Int(n)) => Ok(*n),
            _ => Err(self.mismatch(prim, "an integer", v)),
        }
    }

    fn char_value(&self, prim: Primitive, node: NodeId) -> Result<char, RuntimeError> {
        let v = self.heap.resolve(node);
        match self.heap.get(v) {
            Node::Lit(Lit::Char(c)) => Ok(*c),
            _ => Err(self.mismatch(prim, "a character", v)),
        }
    }

    fn double_value(&self, prim: Primitive, node: NodeId) -> Result<f64, RuntimeError> {
        let v = self.heap.resolve(node);
        match self.heap.get(v) {
            Node::Lit(Lit::Double(x)) => Ok(*x),
            _ => Err(self.mismatch(prim, "a double", v)),
        }
    }

    fn ptr_value(&self, prim: Primitive, node: NodeId) -> Result<u64, RuntimeError> {
        let v = self.heap.resolve(node);
        match self.heap.get(v) {
            Node::Lit(Lit::Ptr(p)) => Ok(*p),
            _ => Err(self.mismatch(prim, "a pointer", v)),
        }
    }

    fn expect_int(&mut self, prim: Primitive, node: NodeId) -> Result<i64, RuntimeError> {
        let v = self.whnf(node)?;
        self.int_value(prim, v)
    }

    fn expect_char(&mut self, prim: Primitive, node: NodeId) -> Result<char, RuntimeError> {
        let v = self.whnf(node)?;
        self.char_value(prim, v)
    }

    fn expect_ptr(&mut self, prim: Primitive, node: NodeId) -> Result<u64, RuntimeError> {
        let v = self.whnf(node)?;
        self.ptr_value(prim, v)
    }

    fn expect_string(&mut self, prim: Primitive, node: NodeId) -> Result<String, RuntimeError> {
        let value = self.normalize(node)?;
        value.as_string().ok_or_else(|| RuntimeError::TypeMismatch {
            prim: prim.name(),
            expected: "a string",
            found: value.to_string(),
        })
    }

    fn mismatch(&self, prim: Primitive, expected: &'static str, found: NodeId) -> RuntimeError {
        RuntimeError::TypeMismatch {
            prim: prim.name(),
            expected,
            found: self.describe(found),
        }
    }

    /// `fromUTF8 "s"`, unpacked lazily.
    fn string_node(&mut self, s: String) -> Result<Node, RuntimeError> {
        let text = self.alloc(Node::Lit(Lit::Str {
            text: s.into(),
            at: 0,
        }))?;
        let unpack = self.alloc(Node::Prim(Primitive::Unpack))?;
        Ok(Node::App(unpack, text))
    }

    fn bool_node(b: bool) -> Node {
        Node::Comb(if b { TRUE } else { FALSE })
    }

    /// Whether unwinding `node` would stop without firing a rule.
    fn is_whnf(&self, node: NodeId) -> bool {
        let mut head = self.heap.resolve(node);
        let mut args = 0;
        while let Node::App(f, _) = self.heap.get(head) {
            args += 1;
            head = self.heap.resolve(*f);
            if args > self.stack_limit {
                // Unwinding will report the overflow.
                return false;
            }
        }
        match self.heap.get(head) {
            Node::Comb(c) => c.arity().map_or(true, |n| args < n),
            Node::Prim(p) => p.is_io() || args < p.arity(),
            Node::Lit(_) => args == 0,
            Node::App(..) | Node::Ind(_) | Node::Free(_) => false,
        }
    }

    //----------
    // REDUCTION
    //----------

    /// Reduce `node` to weak head normal form and return the node holding the result.
    pub fn whnf(&mut self, node: NodeId) -> Result<NodeId, RuntimeError> {
        let (depth, frames, base) = (self.depth, self.frames.len(), self.stack.len());
        let result = self
            .enter()
            .and_then(|_| self.push(node))
            .and_then(|_| self.unwind(base));
        self.stack.truncate(base);
        self.frames.truncate(frames);
        self.depth = depth;
        result
    }

    fn unwind(&mut self, mut base: usize) -> Result<NodeId, RuntimeError> {
        let outer = self.frames.len();
        loop {
            self.safe_point()?;
            match self.step(base)? {
                Step::Continue => {}
                Step::Force(arg) => {
                    self.enter()?;
                    self.frames.push(base);
                    base = self.stack.len();
                    self.push(arg)?;
                }
                Step::Done if self.frames.len() == outer => return Ok(self.stack[base]),
                Step::Done => {
                    self.stack.truncate(base);
                    if let Some(suspended) = self.frames.pop() {
                        base = suspended;
                    }
                    self.depth -= 1;
                }
            }
        }
    }

    /// Look at the top of the stack, whose spine starts at `base`.
    fn step(&mut self, base: usize) -> Result<Step, RuntimeError> {
        let top = self.stack.len() - 1;
        let available = top - base;
        match self.heap.get(self.stack[top]).clone() {
            Node::App(f, _) => self.push(f)?,
            Node::Ind(target) => {
                if target == self.stack[top] {
                    return Err(RuntimeError::Malformed("<<loop>>".to_string()));
                }
                self.stack[top] = target;
            }
            Node::Comb(c) => match c.arity() {
                Some(n) if available >= n => {
                    if let Some(arg) = self.fire(c, top)? {
                        return Ok(Step::Force(arg));
                    }
                    self.stats.steps += 1;
                    self.stack.truncate(top - n + 1);
                }
                _ => return Ok(Step::Done),
            },
            Node::Prim(p) => {
                let n = p.arity();
                if p.is_io() || available < n {
                    return Ok(Step::Done);
                }
                if let Some(arg) = self.fire_prim(p, top)? {
                    return Ok(Step::Force(arg));
                }
                self.stats.steps += 1;
                self.stack.truncate(top - n + 1);
            }
            Node::Lit(_) if available == 0 => return Ok(Step::Done),
            Node::Lit(_) => return Err(RuntimeError::NotAFunction(self.describe(self.stack[top]))),
            Node::Free(_) => {
                return Err(RuntimeError::Malformed(format!(
                    "reference to unallocated node {}",
                    self.stack[top]
                )))
            }
        }
        Ok(Step::Continue)
    }

    /// Fire combinator `c` whose head is at stack position `top`. Returns the argument to
    /// evaluate first if the rule is strict in it.
    fn fire(&mut self, c: Combinator, top: usize) -> Result<Option<NodeId>, RuntimeError> {
        use Combinator::*;
        if let Case(n) = c {
            return self.fire_case(n as usize, top);
        }
        let n = c.arity().unwrap_or(0);
        let redex = self.stack[top - n];
        let mut a = [NodeId(0); 4];
        for (i, slot) in a.iter_mut().enumerate().take(n) {
            *slot = self.arg(top, i + 1)?;
        }
        let node = match c {
            I | K | A => {
                self.update_ind(redex, if c == A { a[1] } else { a[0] })?;
                return Ok(None);
            }
            Y => Node::App(a[0], redex),
            S => {
                let fx = self.heap.app(a[0], a[2])?;
                let gx = self.heap.app(a[1], a[2])?;
                Node::App(fx, gx)
            }
            B => Node::App(a[0], self.heap.app(a[1], a[2])?),
            C => Node::App(self.heap.app(a[0], a[2])?, a[1]),
            S_ => {
                let fx = self.heap.app(a[1], a[3])?;
                let cfx = self.heap.app(a[0], fx)?;
                let gx = self.heap.app(a[2], a[3])?;
                Node::App(cfx, gx)
            }
            B_ => {
                let gx = self.heap.app(a[2], a[3])?;
                Node::App(a[0], self.heap.app(a[1], gx)?)
            }
            C_ => {
                let fx = self.heap.app(a[1], a[3])?;
                Node::App(self.heap.app(a[0], fx)?, a[2])
            }
            Case(_) | Con { .. } | Bind | Then | Return => {
                return Err(RuntimeError::Malformed(format!("{} can not fire", c)))
            }
        };
        self.heap.set(redex, node);
        Ok(None)
    }

    /// `Case n s a0 .. a(n-1)`: once `s` is evaluated, apply the alternative of its tag to
    /// its fields.
    fn fire_case(&mut self, n: usize, top: usize) -> Result<Option<NodeId>, RuntimeError> {
        let scrut = self.arg(top, 1)?;
        if !self.is_whnf(scrut) {
            return Ok(Some(scrut));
        }
        let scrut = self.heap.resolve(scrut);
        let (head, fields) = self.spine(scrut);
        let (tag, arity) = match self.heap.get(head) {
            Node::Comb(Combinator::Con { tag, arity }) if fields.len() == *arity as usize => {
                (*tag, *arity as usize)
            }
            _ => {
                return Err(RuntimeError::TypeMismatch {
                    prim: "case",
                    expected: "a saturated constructor",
                    found: self.describe(scrut),
                })
            }
        };
        if tag as usize >= n {
            return Err(RuntimeError::PatternMatchFailure {
                tag,
                alternatives: n as u32,
            });
        }
        self.reserve(arity)?;
        // The collection above may have shortcut indirections, read everything again.
        let (_, fields) = self.spine(self.arg(top, 1)?);
        let redex = self.stack[top - (n + 1)];
        let alt = self.arg(top, tag as usize + 2)?;
        match fields.split_last() {
            None => self.update_ind(redex, alt)?,
            Some((last, init)) => {
                let mut f = alt;
                for field in init {
                    f = self.heap.app(f, *field)?;
                }
                self.heap.set(redex, Node::App(f, *last));
            }
        }
        Ok(None)
    }

    /// Fire primitive `p` whose head is at stack position `top`. The leading `p.forced()`
    /// arguments have to be in weak head normal form first, the first one that is not is
    /// returned instead.
    fn fire_prim(&mut self, p: Primitive, top: usize) -> Result<Option<NodeId>, RuntimeError> {
        use Primitive::*;
        for i in 1..=p.forced() {
            let arg = self.arg(top, i)?;
            if !self.is_whnf(arg) {
                return Ok(Some(arg));
            }
        }
        let n = p.arity();
        let redex = self.stack[top - n];
        let node = match p {
            Add | Sub | Mul | Quot | Rem => {
                let x = self.int_value(p, self.arg(top, 1)?)?;
                let y = self.int_value(p, self.arg(top, 2)?)?;
                Node::int(match p {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    Mul => x.wrapping_mul(y),
                    Quot if y == 0 => return Err(RuntimeError::DivisionByZero),
                    Quot => x.wrapping_div(y),
                    _ if y == 0 => return Err(RuntimeError::DivisionByZero),
                    _ => x.wrapping_rem(y),
                })
            }
            Neg => Node::int(self.int_value(p, self.arg(top, 1)?)?.wrapping_neg()),
            Eq | Ne | Lt | Le | Gt | Ge => {
                let x = self.int_value(p, self.arg(top, 1)?)?;
                let y = self.int_value(p, self.arg(top, 2)?)?;
                Self::bool_node(match p {
                    Eq => x == y,
                    Ne => x != y,
                    Lt => x < y,
                    Le => x <= y,
                    Gt => x > y,
                    _ => x >= y,
                })
            }
            Ord => Node::int(self.char_value(p, self.arg(top, 1)?)? as i64),
            Chr => {
                let n = self.int_value(p, self.arg(top, 1)?)?;
                let c = u32::try_from(n).ok().and_then(char::from_u32).ok_or(
                    RuntimeError::TypeMismatch {
                        prim: p.name(),
                        expected: "a Unicode scalar value",
                        found: n.to_string(),
                    },
                )?;
                Node::Lit(Lit::Char(c))
            }
            FAdd | FSub | FMul | FDiv | FEq | FLt | FLe => {
                let x = self.double_value(p, self.arg(top, 1)?)?;
                let y = self.double_value(p, self.arg(top, 2)?)?;
                match p {
                    FAdd => Node::Lit(Lit::Double(x + y)),
                    FSub => Node::Lit(Lit::Double(x - y)),
                    FMul => Node::Lit(Lit::Double(x * y)),
                    FDiv => Node::Lit(Lit::Double(x / y)),
                    FEq => Self::bool_node(x == y),
                    FLt => Self::bool_node(x < y),
                    _ => Self::bool_node(x <= y),
                }
            }
            IToF => Node::Lit(Lit::Double(self.int_value(p, self.arg(top, 1)?)? as f64)),
            FToI => Node::int(self.double_value(p, self.arg(top, 1)?)? as i64),
            IShow => {
                let n = self.int_value(p, self.arg(top, 1)?)?;
                self.string_node(n.to_string())?
            }
            FShow => {
                let x = self.double_value(p, self.arg(top, 1)?)?;
                self.string_node(format!("{:?}", x))?
            }
            Seq => {
                self.update_ind(redex, self.arg(top, 2)?)?;
                return Ok(None);
            }
            Tick => {
                let label = self.int_value(p, self.arg(top, 1)?)?;
                self.stats.ticks += 1;
                *self.stats.tick_labels.entry(label).or_insert(0) += 1;
                trace!(label, count = self.stats.tick_labels[&label], "tick");
                self.update_ind(redex, self.arg(top, 2)?)?;
                return Ok(None);
            }
            Error => {
                let msg = self.normalize(self.arg(top, 1)?)?;
                return Err(RuntimeError::UserError(
                    msg.as_string().unwrap_or_else(|| msg.to_string()),
                ));
            }
            NoMatch => return Err(RuntimeError::NoMatch),
            Unpack => {
                self.unpack(top)?;
                return Ok(None);
            }
            PNull => Node::Lit(Lit::Ptr(0)),
            PAdd => {
                let ptr = self.ptr_value(p, self.arg(top, 1)?)?;
                let offset = self.int_value(p, self.arg(top, 2)?)?;
                Node::Lit(Lit::Ptr(ptr.wrapping_add(offset as u64)))
            }
            PEq => {
                let x = self.ptr_value(p, self.arg(top, 1)?)?;
                let y = self.ptr_value(p, self.arg(top, 2)?)?;
                Self::bool_node(x == y)
            }
            PerformIO => {
                let result = self.run_io(self.arg(top, 1)?)?;
                self.update_ind(redex, result)?;
                return Ok(None);
            }
            Stdin => Node::int(STDIN),
            Stdout => Node::int(STDOUT),
            Stderr => Node::int(STDERR),
            HGetChar | HPutChar | HFlush | OpenFile | HClose | GetArgs | Exit | Malloc | Free
            | Peek | Poke => {
                return Err(RuntimeError::Malformed(format!(
                    "action {} reduced outside the I/O driver",
                    p
                )))
            }
        };
        self.heap.set(redex, node);
        Ok(None)
    }

    /// `fromUTF8 s` becomes `Cons c (fromUTF8 s')` or `Nil`.
    fn unpack(&mut self, top: usize) -> Result<(), RuntimeError> {
        let s = self.heap.resolve(self.arg(top, 1)?);
        let (text, at) = match self.heap.get(s) {
            Node::Lit(Lit::Str { text, at }) => (text.clone(), *at),
            _ => return Err(self.mismatch(Primitive::Unpack, "a string literal", s)),
        };
        let redex = self.stack[top - 1];
        let node = match text[at..].chars().next() {
            None => Node::Comb(NIL),
            Some(c) => {
                let head = self.alloc(Node::Lit(Lit::Char(c)))?;
                let rest = self.alloc(Node::Lit(Lit::Str {
                    text,
                    at: at + c.len_utf8(),
                }))?;
                let rest = self.heap.app(self.stack[top], rest)?;
                let cons = self.alloc(Node::Comb(CONS))?;
                Node::App(self.heap.app(cons, head)?, rest)
            }
        };
        self.heap.set(redex, node);
        Ok(())
    }

    //-----
    // I/O
    //-----

    /// Run an I/O action and return the node of its result.
    pub fn run_io(&mut self, action: NodeId) -> Result<NodeId, RuntimeError> {
        let (depth, base) = (self.depth, self.stack.len());
        let result = self
            .enter()
            .and_then(|_| self.push(action))
            .and_then(|_| self.io_loop());
        self.stack.truncate(base);
        self.depth = depth;
        result
    }

    /// The current action is on top of the stack. The right operands of the enclosing `>>=`
    /// and `>>` sit below it, innermost last, so neither side of a chain nests.
    fn io_loop(&mut self) -> Result<NodeId, RuntimeError> {
        // One entry per pending right operand, `true` for `>>=`.
        let mut binds: Vec<bool> = Vec::new();
        loop {
            self.safe_point()?;
            let top = self.stack.len() - 1;
            let action = self.whnf(self.stack[top])?;
            self.stack[top] = action;
            let (head, args) = self.spine(action);
            let result = match self.heap.get(head).clone() {
                Node::Comb(Combinator::Return) if args.len() == 1 => args[0],
                Node::Comb(c @ (Combinator::Bind | Combinator::Then)) if args.len() == 2 => {
                    self.stack[top] = args[1];
                    binds.push(c == Combinator::Bind);
                    self.push(args[0])?;
                    continue;
                }
                Node::Prim(p) if p.is_io() && args.len() == p.arity() => self.execute(p, top)?,
                _ => return Err(RuntimeError::NotAnAction(self.describe(action))),
            };
            match binds.pop() {
                None => return Ok(result),
                Some(bind) => {
                    self.stack.pop();
                    if bind {
                        let top = self.stack.len() - 1;
                        self.stack[top] = self.heap.app(self.stack[top], result)?;
                    }
                }
            }
        }
    }

    /// Argument `i` of the action at stack position `top`.
    fn io_arg(&self, top: usize, i: usize) -> NodeId {
        self.spine(self.stack[top]).1[i]
    }

    fn execute(&mut self, p: Primitive, top: usize) -> Result<NodeId, RuntimeError> {
        use Primitive::*;
        let node = match p {
            HGetChar => {
                let h = self.expect_int(p, self.io_arg(top, 0))?;
                Node::int(self.world.get_char(h)?)
            }
            HPutChar => {
                let h = self.expect_int(p, self.io_arg(top, 0))?;
                let c = self.expect_char(p, self.io_arg(top, 1))?;
                self.world.put_char(h, c)?;
                Node::Comb(UNIT)
            }
            HFlush => {
                let h = self.expect_int(p, self.io_arg(top, 0))?;
                self.world.flush(h)?;
                Node::Comb(UNIT)
            }
            OpenFile => {
                let path = self.expect_string(p, self.io_arg(top, 0))?;
                let mode = self.expect_int(p, self.io_arg(top, 1))?;
                Node::int(self.world.open(&path, mode)?)
            }
            HClose => {
                let h = self.expect_int(p, self.io_arg(top, 0))?;
                self.world.close(h)?;
                Node::Comb(UNIT)
            }
            GetArgs => return self.args_list(),
            Exit => {
                let code = self.expect_int(p, self.io_arg(top, 0))?;
                self.world.flush_all()?;
                return Err(RuntimeError::Exit(code as i32));
            }
            Malloc => {
                let words = self.expect_int(p, self.io_arg(top, 0))?;
                Node::Lit(Lit::Ptr(self.world.malloc(words)?))
            }
            Free => {
                let ptr = self.expect_ptr(p, self.io_arg(top, 0))?;
                self.world.free(ptr)?;
                Node::Comb(UNIT)
            }
            Peek => {
                let ptr = self.expect_ptr(p, self.io_arg(top, 0))?;
                Node::int(self.world.peek(ptr)?)
            }
            Poke => {
                let ptr = self.expect_ptr(p, self.io_arg(top, 0))?;
                let value = self.expect_int(p, self.io_arg(top, 1))?;
                self.world.poke(ptr, value)?;
                Node::Comb(UNIT)
            }
            _ => return Err(RuntimeError::NotAnAction(p.to_string())),
        };
        self.safe_point()?;
        self.alloc(node)
    }

    /// The program arguments as a list of lazily unpacked strings.
    fn args_list(&mut self) -> Result<NodeId, RuntimeError> {
        let args = self.world.args().to_vec();
        self.reserve(4 * args.len() + 3)?;
        let unpack = self.alloc(Node::Prim(Primitive::Unpack))?;
        let cons = self.alloc(Node::Comb(CONS))?;
        let mut list = self.alloc(Node::Comb(NIL))?;
        for arg in args.into_iter().rev() {
            let text = self.alloc(Node::Lit(Lit::Str {
                text: arg.into(),
                at: 0,
            }))?;
            let s = self.heap.app(unpack, text)?;
            let cell = self.heap.app(cons, s)?;
            list = self.heap.app(cell, list)?;
        }
        Ok(list)
    }

    //--------
    // RESULTS
    //--------

    /// Evaluate `node` completely.
    pub fn normalize(&mut self, node: NodeId) -> Result<Value, RuntimeError> {
        let (depth, base) = (self.depth, self.stack.len());
        let result = self
            .enter()
            .and_then(|_| self.push(node))
            .and_then(|_| self.normalize_from(base));
        self.stack.truncate(base);
        self.depth = depth;
        result
    }

    /// Fields still to be evaluated wait on the stack above `base`, the next one on top.
    fn normalize_from(&mut self, base: usize) -> Result<Value, RuntimeError> {
        // Constructors with some fields still to come, innermost last.
        let mut open: Vec<(u32, usize, Vec<Value>)> = Vec::new();
        'fields: while self.stack.len() > base {
            let top = self.stack.len() - 1;
            let v = self.whnf(self.stack[top])?;
            self.stack.pop();
            let (head, args) = self.spine(v);
            let mut value = match self.heap.get(head).clone() {
                Node::Comb(Combinator::Con { tag, arity }) if args.len() == arity as usize => {
                    if arity == 0 {
                        Value::con(tag)
                    } else {
                        for field in args.iter().rev() {
                            self.push(*field)?;
                        }
                        open.push((tag, args.len(), Vec::with_capacity(args.len())));
                        continue;
                    }
                }
                Node::Lit(lit) if args.is_empty() => match lit {
                    Lit::Int(n) => Value::Int(n),
                    Lit::Char(c) => Value::Char(c),
                    Lit::Double(x) => Value::Double(x),
                    Lit::Ptr(p) => Value::Ptr(p),
                    Lit::Str { text, at } => Value::Str(text[at..].to_string()),
                },
                _ => Value::Function(self.describe(v)),
            };
            while let Some((tag, arity, mut fields)) = open.pop() {
                fields.push(value);
                if fields.len() < arity {
                    open.push((tag, arity, fields));
                    continue 'fields;
                }
                value = Value::Con { tag, fields };
            }
            return Ok(value);
        }
        Err(RuntimeError::Malformed(
            "normal form requested for an empty stack".to_string(),
        ))
    }

    /// Evaluate the entry point: run it if it is an I/O action, otherwise normalize it.
    pub fn run(&mut self, entry: NodeId) -> Result<Outcome, RuntimeError> {
        let result = self.evaluate(entry);
        let flushed = self.world.flush_all();
        let stats = self.stats();
        info!(
            steps = stats.steps,
            ticks = stats.ticks,
            collections = stats.heap.collections,
            peak_live = stats.heap.peak_live,
            "evaluation finished"
        );
        match result {
            Ok(value) => flushed.map(|_| Outcome::Value(value)),
            Err(RuntimeError::Exit(code)) => Ok(Outcome::Exit(code)),
            Err(e) => Err(e),
        }
    }

    fn evaluate(&mut self, entry: NodeId) -> Result<Value, RuntimeError> {
        let v = self.whnf(entry)?;
        if self.is_action(v) {
            let result = self.run_io(v)?;
            self.normalize(result)
        } else {
            self.normalize(entry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compiler::Compiler;
    use crate::frontend::parse_module;

    fn compile(src: &str) -> Program {
        Compiler::new()
            .compile_module(&parse_module("M", src).unwrap())
            .unwrap()
    }

    fn machine(config: &Config, src: &str) -> (ReductionMachine, NodeId) {
        let (world, _, _) = World::captured("");
        let mut machine = ReductionMachine::new(config, world);
        let entry = machine.load_program(&compile(src)).unwrap();
        (machine, entry)
    }

    fn eval(src: &str) -> Result<Value, RuntimeError> {
        let (mut m, entry) = machine(&Config::default(), src);
        match m.run(entry)? {
            Outcome::Value(v) => Ok(v),
            Outcome::Exit(code) => Err(RuntimeError::Exit(code)),
        }
    }

    const LIST: &str = "data L = N | C 2\n";

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("def main = #+ 1 (#* 6 7)"), Ok(Value::Int(43)));
        assert_eq!(eval("def main = #quot 7 2"), Ok(Value::Int(3)));
        assert_eq!(eval("def main = #rem (-7) 2"), Ok(Value::Int(-1)));
        assert_eq!(eval("def main = #quot 1 0"), Err(RuntimeError::DivisionByZero));
        assert_eq!(eval("def main = #< 1 2"), Ok(Value::bool(true)));
        assert_eq!(eval("def main = #f* 1.5 2.0"), Ok(Value::Double(3.0)));
        assert_eq!(eval("def main = #ord (#chr 955)"), Ok(Value::Int(955)));
        assert_eq!(eval("def main = #ishow (-12)"), Ok(Value::string("-12")));
        assert_eq!(eval("def main = #ftoi (#itof 3)"), Ok(Value::Int(3)));
        assert!(matches!(
            eval("def main = #+ 1 'c'"),
            Err(RuntimeError::TypeMismatch { prim: "+", .. })
        ));
        assert!(matches!(
            eval("def main = 1 2"),
            Err(RuntimeError::NotAFunction(_))
        ));
    }

    #[test]
    fn test_functions_and_data() {
        let src = format!(
            "{}def map f xs = case xs of {{ N -> N; C y ys -> C (f y) (map f ys) }}\n\
             def main = map (\\x -> #* x x) (C 1 (C 2 (C 3 N)))",
            LIST
        );
        assert_eq!(
            eval(&src),
            Ok(Value::list([Value::Int(1), Value::Int(4), Value::Int(9)]))
        );
        let src = format!(
            "{}def hd xs = case xs of {{ C y ys -> y }}\ndef main = hd N",
            LIST
        );
        assert_eq!(eval(&src), Err(RuntimeError::NoMatch));
        assert_eq!(eval("def main = \"héllo\""), Ok(Value::string("héllo")));
        assert_eq!(
            eval("def main = #error \"boom\""),
            Err(RuntimeError::UserError("boom".to_string()))
        );
    }

    #[test]
    fn test_recursion() {
        let src = "data B = F | T\n\
                   data L = N | C 2\n\
                   def sum n = letrec go i acc = case #> i n of { F -> go (#+ i 1) (#+ acc i); T -> acc } in go 1 0\n\
                   def take n xs = case #== n 0 of { T -> N; F -> case xs of { N -> N; C y ys -> C y (take (#- n 1) ys) } }\n\
                   def ones = letrec xs = C 1 xs in xs\n\
                   def main = C (sum 100) (take 3 ones)";
        assert_eq!(
            eval(src),
            Ok(Value::Con {
                tag: 1,
                fields: vec![
                    Value::Int(5050),
                    Value::list([Value::Int(1), Value::Int(1), Value::Int(1)])
                ]
            })
        );
    }

    #[test]
    fn test_shared_expression_is_reduced_once() {
        let (mut m, entry) = machine(
            &Config::default(),
            "def main = let y = #tick 1 (#* 6 7) in #+ y y",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int(84))));
        assert_eq!(m.stats().ticks_for(1), 1);
        // A constant definition is shared between its uses as well.
        let (mut m, entry) = machine(
            &Config::default(),
            "def c = #tick 2 (#+ 1 1)\ndef main = #+ c (#+ c c)",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int(6))));
        assert_eq!(m.stats().ticks_for(2), 1);
    }

    #[test]
    fn test_arity_discipline() {
        // seq forces only its first argument.
        assert!(eval("def main = #seq 1 (#error \"x\")").is_err());
        let (mut m, entry) = machine(
            &Config::default(),
            "def main = #seq (#tick 1 0) (#seq (#tick 2 0) 5)",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int(5))));
        assert_eq!(m.stats().ticks_for(1), 1);
        assert_eq!(m.stats().ticks_for(2), 1);
        // Both operands of an arithmetic primitive are forced exactly once.
        let (mut m, entry) = machine(
            &Config::default(),
            "def main = #+ (#tick 1 2) (#tick 2 3)",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int(5))));
        assert_eq!((m.stats().ticks_for(1), m.stats().ticks_for(2)), (1, 1));
        // K ignores its second argument entirely.
        let (mut m, entry) = machine(
            &Config::default(),
            "def k x y = x\ndef main = k 1 (#tick 3 (#error \"never\"))",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int(1))));
        assert_eq!(m.stats().ticks_for(3), 0);
        // A primitive with one argument too many fires first and applies the result.
        assert_eq!(
            eval("def id x = x\ndef main = (#seq 0 id) 7"),
            Ok(Value::Int(7))
        );
    }

    #[test]
    fn test_partial_application_is_a_value() {
        assert_eq!(
            eval("def main = #+ 1"),
            Ok(Value::Function("+ applied to 1 arguments".to_string()))
        );
    }

    #[test]
    fn test_io() {
        let (world, out, _) = World::captured("ab");
        let mut m = ReductionMachine::new(&Config::default(), world);
        let entry = m
            .load_program(&compile(
                "def main = #IO.>>= (#IO.hGetChar #IO.stdin) (\\c -> \
                 #IO.>> (#IO.hPutChar #IO.stdout (#chr c)) \
                 (#IO.>> (#IO.hPutChar #IO.stdout '!') (#IO.return c)))",
            ))
            .unwrap();
        assert_eq!(m.run(entry), Ok(Outcome::Value(Value::Int('a' as i64))));
        assert_eq!(out.text(), "a!");
    }

    #[test]
    fn test_exit_and_args() {
        let (world, out, _) = World::captured("");
        let mut m = ReductionMachine::new(&Config::default(), world);
        m.world_mut().set_args(vec!["x".to_string(), "yz".to_string()]);
        let entry = m.load_program(&compile("def main = #IO.getArgs")).unwrap();
        assert_eq!(
            m.run(entry),
            Ok(Outcome::Value(Value::list([
                Value::string("x"),
                Value::string("yz")
            ])))
        );
        assert_eq!(out.text(), "");

        let (mut m, entry) = machine(
            &Config::default(),
            "def main = #IO.>> (#IO.exit 3) (#IO.exit 4)",
        );
        assert_eq!(m.run(entry), Ok(Outcome::Exit(3)));
    }

    #[test]
    fn test_memory_actions() {
        assert_eq!(
            eval(
                "def main = #IO.>>= (#IO.malloc 2) (\\p -> \
                 #IO.>> (#IO.poke (#p+ p 1) 9) (#IO.peek (#p+ p 1)))"
            ),
            Ok(Value::Int(9))
        );
        assert_eq!(
            eval("def main = #p== #pnull #pnull"),
            Ok(Value::bool(true))
        );
        assert_eq!(
            eval("def main = #IO.performIO (#IO.return 5)"),
            Ok(Value::Int(5))
        );
    }

    #[test]
    fn test_limits() {
        let deep = "def loop n = #+ 1 (loop n)\ndef main = loop 0";
        let (mut m, entry) = machine(&Config::default().with_depth_limit(50), deep);
        assert_eq!(
            m.run(entry),
            Err(RuntimeError::StackOverflow { limit: 50 })
        );
        let (mut m, entry) = machine(&Config::default().with_heap_cells(200), "data L = N | C 2\ndef from n = C n (from (#+ n 1))\ndef len xs = case xs of { N -> 0; C y ys -> #+ 1 (len ys) }\ndef main = len (from 0)");
        assert!(matches!(
            m.run(entry),
            Err(RuntimeError::OutOfMemory { .. }) | Err(RuntimeError::StackOverflow { .. })
        ));
    }

    const COUNTING: &str = "data B = F | T\n\
                            data L = N | C 2\n\
                            def from n = C n (from (#+ n 1))\n\
                            def take n xs = case #== n 0 of { T -> N; F -> case xs of { N -> N; C y ys -> C y (take (#- n 1) ys) } }\n\
                            def len xs = case xs of { N -> 0; C y ys -> #+ 1 (len ys) }\n";

    #[test]
    fn test_deep_recursion() {
        // Strict arguments are evaluated above the suspended spine, not on the native stack.
        let src = format!("{}def main = len (take 5000 (from 1))", COUNTING);
        assert_eq!(eval(&src), Ok(Value::Int(5000)));
        let src = format!("{}def main = len (take 20000 (from 1))", COUNTING);
        assert_eq!(
            eval(&src),
            Err(RuntimeError::StackOverflow {
                limit: Config::default().depth_limit
            })
        );
    }

    #[test]
    fn test_long_results() {
        let src = format!("{}def main = take 100000 (from 1)", COUNTING);
        let xs = eval(&src).unwrap();
        let items = xs.as_list().unwrap();
        assert_eq!(items.len(), 100_000);
        assert_eq!(items[99_999], &Value::Int(100_000));
        drop(xs);
    }

    #[test]
    fn test_long_action_chains() {
        // Each step binds the result of all the steps before it.
        let src = "data B = F | T\n\
                   def count n = case #== n 0 of { T -> #IO.return 0; F -> #IO.>>= (count (#- n 1)) (\\x -> #seq x (#IO.return (#+ x 1))) }\n\
                   def main = count 20000";
        assert_eq!(eval(src), Ok(Value::Int(20000)));
    }

    #[test]
    fn test_collection_is_transparent() {
        let src = "data B = F | T\n\
                   data L = N | C 2\n\
                   def from n = C n (from (#+ n 1))\n\
                   def take n xs = case xs of { N -> N; C y ys -> case #== n 0 of { F -> C y (take (#- n 1) ys); T -> N } }\n\
                   def sum acc xs = case xs of { N -> acc; C y ys -> #seq acc (sum (#+ acc y) ys) }\n\
                   def main = sum 0 (take 200 (from 1))";
        let (mut big, entry) = machine(&Config::default(), src);
        assert_eq!(big.run(entry), Ok(Outcome::Value(Value::Int(20100))));
        assert_eq!(big.stats().heap.collections, 0);
        let (mut small, entry) = machine(
            &Config::default().with_heap_cells(4096).with_gc_stress(true),
            src,
        );
        assert_eq!(small.run(entry), Ok(Outcome::Value(Value::Int(20100))));
        assert!(small.stats().heap.collections > 0);
    }
}

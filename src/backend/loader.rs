//! Instantiating definitions in the heap, either from a definitions file or directly from a
//! compiled program.
//!
//! Each definition gets exactly one node. Every reference to the definition points at that
//! node, which is finally overwritten with an indirection to the definition's body, so a
//! constant is evaluated at most once no matter how often it is used.

use std::{collections::HashMap, rc::Rc};

use super::{
    heap::{Heap, Lit, Node, NodeId},
    primitive::Resolver,
    program::{CExpr, CExprPtr, Program},
    wire::{Image, Record},
};
use crate::{
    error::{FormatError, LoadError},
    frontend::ast::Literal,
};

/// The definitions of a loaded program.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub entry: Option<NodeId>,
    pub defs: Vec<(String, NodeId)>,
}

impl Loaded {
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.defs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }
}

fn bad_reference(record: usize, kind: &'static str, target: u64) -> LoadError {
    LoadError::Format(FormatError::BadReference {
        record,
        kind,
        target,
    })
}

fn literal(lit: &Literal) -> Node {
    Node::Lit(match lit {
        Literal::Int(n) => Lit::Int(*n),
        Literal::Char(c) => Lit::Char(*c),
        Literal::Double(x) => Lit::Double(*x),
        Literal::Str(s) => Lit::Str {
            text: Rc::from(s.as_str()),
            at: 0,
        },
    })
}

/// Allocate one placeholder per definition. They are patched once the bodies exist.
fn alloc_definitions(heap: &mut Heap, count: usize) -> Result<Vec<NodeId>, LoadError> {
    (0..count)
        .map(|_| heap.alloc(Node::Free(None)).map_err(LoadError::from))
        .collect()
}

/// Point every definition node at its body and reject definitions that only alias
/// themselves.
fn patch_definitions(
    heap: &mut Heap,
    names: &[&str],
    nodes: &[NodeId],
    roots: &[NodeId],
) -> Result<(), LoadError> {
    for (&node, &root) in nodes.iter().zip(roots) {
        heap.set(node, Node::Ind(root));
    }
    for (name, &node) in names.iter().zip(nodes) {
        let target = heap.resolve(node);
        if matches!(heap.get(target), Node::Ind(_)) {
            return Err(LoadError::SelfAlias(name.to_string()));
        }
    }
    Ok(())
}

/// Load a decoded image, resolving its primitive table through `resolver`.
pub fn load(image: &Image, heap: &mut Heap, resolver: &dyn Resolver) -> Result<Loaded, LoadError> {
    let prims = image
        .prims
        .iter()
        .map(|name| {
            resolver
                .resolve(name)
                .ok_or_else(|| LoadError::UnresolvedPrimitive(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let def_nodes = alloc_definitions(heap, image.defs.len())?;
    let mut nodes: Vec<NodeId> = Vec::with_capacity(image.records.len());
    for (i, record) in image.records.iter().enumerate() {
        let node = match record {
            Record::App { fun, arg } => {
                let fun = *nodes
                    .get(*fun as usize)
                    .ok_or_else(|| bad_reference(i, "record", *fun as u64))?;
                let arg = *nodes
                    .get(*arg as usize)
                    .ok_or_else(|| bad_reference(i, "record", *arg as u64))?;
                Node::App(fun, arg)
            }
            Record::Comb(c) => Node::Comb(*c),
            Record::Int(n) => Node::Lit(Lit::Int(*n)),
            Record::Char(c) => Node::Lit(Lit::Char(*c)),
            Record::Double(x) => Node::Lit(Lit::Double(*x)),
            Record::Str(s) => literal(&Literal::Str(s.clone())),
            Record::Prim(p) => Node::Prim(
                *prims
                    .get(*p as usize)
                    .ok_or_else(|| bad_reference(i, "primitive", *p as u64))?,
            ),
            Record::Global(d) => {
                // The record stands for the definition node itself.
                let def = *def_nodes
                    .get(*d as usize)
                    .ok_or_else(|| bad_reference(i, "definition", *d as u64))?;
                nodes.push(def);
                continue;
            }
        };
        nodes.push(heap.alloc(node)?);
    }

    let roots = image
        .defs
        .iter()
        .enumerate()
        .map(|(i, def)| {
            nodes
                .get(def.root as usize)
                .copied()
                .ok_or_else(|| bad_reference(i, "definition root", def.root as u64))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let names: Vec<&str> = image.defs.iter().map(|d| d.name.as_str()).collect();
    patch_definitions(heap, &names, &def_nodes, &roots)?;

    let entry = match image.entry {
        Some(e) => Some(
            *def_nodes
                .get(e as usize)
                .ok_or_else(|| bad_reference(image.records.len(), "entry", e as u64))?,
        ),
        None => None,
    };
    Ok(Loaded {
        entry,
        defs: names
            .into_iter()
            .map(str::to_string)
            .zip(def_nodes)
            .collect(),
    })
}

/// Decode a definitions file and load it.
pub fn load_bytes(
    bytes: &[u8],
    heap: &mut Heap,
    resolver: &dyn Resolver,
) -> Result<Loaded, LoadError> {
    let image = Image::decode(bytes)?;
    load(&image, heap, resolver)
}

struct Builder<'p> {
    heap: &'p mut Heap,
    program: &'p Program,
    def_nodes: Vec<NodeId>,
    built: HashMap<*const CExpr, NodeId>,
}

impl<'p> Builder<'p> {
    fn build(&mut self, e: &CExprPtr) -> Result<NodeId, LoadError> {
        let key = Rc::as_ptr(e);
        if let Some(&id) = self.built.get(&key) {
            return Ok(id);
        }
        let node = match &**e {
            CExpr::App(f, a) => {
                let f = self.build(f)?;
                let a = self.build(a)?;
                Node::App(f, a)
            }
            CExpr::Comb(c) => Node::Comb(*c),
            CExpr::Prim(p) => Node::Prim(*p),
            CExpr::Lit(lit) => literal(lit),
            CExpr::Global(name) => {
                let index = self.program.index_of(name).ok_or_else(|| {
                    FormatError::Malformed(format!("reference to unknown definition `{}`", name))
                })?;
                return Ok(self.def_nodes[index]);
            }
            CExpr::Var(x) => {
                return Err(FormatError::Malformed(format!(
                    "variable `{}` left in a compiled definition",
                    x
                ))
                .into())
            }
        };
        let id = self.heap.alloc(node)?;
        self.built.insert(key, id);
        Ok(id)
    }
}

/// Build the graph of `program` directly, without going through the wire format.
pub fn build(program: &Program, heap: &mut Heap) -> Result<Loaded, LoadError> {
    let def_nodes = alloc_definitions(heap, program.defs.len())?;
    let mut builder = Builder {
        heap: &mut *heap,
        program,
        def_nodes,
        built: HashMap::new(),
    };
    let roots = program
        .defs
        .iter()
        .map(|def| builder.build(&def.body))
        .collect::<Result<Vec<_>, _>>()?;
    let def_nodes = builder.def_nodes;
    let names: Vec<&str> = program.defs.iter().map(|d| d.name.as_str()).collect();
    patch_definitions(heap, &names, &def_nodes, &roots)?;

    let entry = program
        .entry
        .as_deref()
        .and_then(|name| program.index_of(name))
        .map(|i| def_nodes[i]);
    Ok(Loaded {
        entry,
        defs: names
            .into_iter()
            .map(str::to_string)
            .zip(def_nodes)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        compiler::Compiler,
        foreign::World,
        primitive::{PrimTable, Primitive},
        reduction::{Outcome, ReductionMachine},
        value::Value,
        wire::DefEntry,
    };
    use crate::{config::Config, frontend::parse_module};

    fn program(src: &str) -> Program {
        Compiler::new()
            .compile_module(&parse_module("M", src).unwrap())
            .unwrap()
    }

    #[test]
    fn test_load_shares_definitions() {
        let image = Image::from_program(&program("def c = #* 6 7\ndef main = #+ c c")).unwrap();
        let mut heap = Heap::new(100);
        let loaded = load(&image, &mut heap, &PrimTable).unwrap();
        let c = loaded.get("c").unwrap();
        let main = loaded.get("main").unwrap();
        assert_eq!(loaded.entry, Some(main));
        // main is `+ c c`, both arguments are the single node of `c`.
        let body = heap.resolve(main);
        match heap.get(body) {
            Node::App(f, a) => {
                assert_eq!(*a, c);
                assert!(matches!(heap.get(*f), Node::App(_, x) if *x == c));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(heap.get(c), Node::Ind(_)));
    }

    #[test]
    fn test_load_and_build_agree() {
        let p = program("def f x = #+ x 1\ndef main = f (f 1)");
        let mut loaded_heap = Heap::new(100);
        let mut built_heap = Heap::new(100);
        let loaded = load_bytes(
            &Image::from_program(&p).unwrap().encode(),
            &mut loaded_heap,
            &PrimTable,
        )
        .unwrap();
        let built = build(&p, &mut built_heap).unwrap();
        assert_eq!(loaded_heap.live(), built_heap.live());
        assert_eq!(
            loaded.defs.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            built.defs.iter().map(|(n, _)| n).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_loaded_and_built_programs_behave_alike() {
        let p = program(
            "def c = #tick 1 (#* 6 7)\n\
             def f x = #+ x c\n\
             def main = f (f c)",
        );
        let image = Image::decode(&Image::from_program(&p).unwrap().encode()).unwrap();
        let run = |from_image: bool| {
            let (world, _, _) = World::captured("");
            let mut machine = ReductionMachine::new(&Config::default(), world);
            let entry = if from_image {
                machine.load_image(&image)
            } else {
                machine.load_program(&p)
            }
            .unwrap();
            let outcome = machine.run(entry).unwrap();
            (outcome, machine.stats().ticks_for(1))
        };
        let expected = (Outcome::Value(Value::Int(126)), 1);
        assert_eq!(run(true), expected);
        assert_eq!(run(false), expected);
    }

    struct NoIo;

    impl Resolver for NoIo {
        fn resolve(&self, name: &str) -> Option<Primitive> {
            Primitive::from_name(name).filter(|p| !p.is_io())
        }
    }

    #[test]
    fn test_load_errors() {
        let p = program("def main = #IO.hPutChar #IO.stdout 'x'");
        let image = Image::from_program(&p).unwrap();
        let mut heap = Heap::new(100);
        assert_eq!(
            load(&image, &mut heap, &NoIo).unwrap_err(),
            LoadError::UnresolvedPrimitive("IO.hPutChar".to_string())
        );

        let aliases = Image {
            records: vec![Record::Global(1), Record::Global(0)],
            defs: vec![
                DefEntry {
                    name: "a".to_string(),
                    arity: 0,
                    root: 0,
                },
                DefEntry {
                    name: "b".to_string(),
                    arity: 0,
                    root: 1,
                },
            ],
            prims: vec![],
            entry: None,
        };
        assert_eq!(
            load(&aliases, &mut heap, &PrimTable).unwrap_err(),
            LoadError::SelfAlias("a".to_string())
        );

        assert!(matches!(
            load_bytes(b"TRNR", &mut heap, &PrimTable),
            Err(LoadError::Format(FormatError::Truncated { .. }))
        ));
        let mut tiny = Heap::new(2);
        assert!(matches!(
            load(&image, &mut tiny, &PrimTable),
            Err(LoadError::Runtime(_))
        ));
    }
}

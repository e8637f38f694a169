//! Rendering of compiled programs as Graphviz graphs.
//!
//! Every definition becomes a box pointing at its body. Shared subexpressions are drawn once
//! with one edge per use, and references to other definitions point at their box, so the
//! picture shows the graph the reduction machine starts from.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    process::{Command, Stdio},
    rc::Rc,
};

use crate::backend::program::{CExpr, CExprPtr, Program};
use graph::{Edge, Graph, Node};

pub mod graph;

pub struct Visualizer {
    /// Counter used for giving each node a unique name.
    node_counter: u32,
    /// Graph that will be filled.
    pub graph: Graph,
    drawn: HashMap<*const CExpr, String>,
    definitions: HashMap<String, String>,
}

impl Visualizer {
    const NODE_NAME_PREFIX: &'static str = "node";

    pub fn new(graph_name: &str) -> Self {
        Self {
            node_counter: 1,
            graph: Graph::new(graph_name),
            drawn: HashMap::new(),
            definitions: HashMap::new(),
        }
    }

    pub fn visualize_program(&mut self, program: &Program) {
        for def in &program.defs {
            let label = format!("{} / {}", def.name, def.arity);
            let name = self.add_node(Node::new("", Some(&label)).with_shape("box"));
            self.definitions.insert(def.name.clone(), name);
        }
        for def in &program.defs {
            let body = self.visualize_expr(&def.body);
            if let Some(name) = self.definitions.get(&def.name) {
                let edge = Edge::new(name, &body);
                self.graph.add_edge(edge);
            }
        }
    }

    /// Draw `e` unless it was drawn before and return the name of its node.
    fn visualize_expr(&mut self, e: &CExprPtr) -> String {
        let key = Rc::as_ptr(e);
        if let Some(name) = self.drawn.get(&key) {
            return name.clone();
        }
        let name = match &**e {
            CExpr::App(f, a) => {
                let name = self.add_node(Node::new("", Some("@")).with_shape("circle"));
                let f = self.visualize_expr(f);
                let a = self.visualize_expr(a);
                self.graph.add_edge(Edge::new(&name, &f).with_label("f"));
                self.graph.add_edge(Edge::new(&name, &a).with_label("x"));
                name
            }
            CExpr::Global(g) => match self.definitions.get(g) {
                Some(name) => name.clone(),
                None => self.add_node(Node::new("", Some(g)).with_shape("box")),
            },
            CExpr::Comb(c) => self.add_node(Node::new("", Some(&c.to_string()))),
            CExpr::Prim(p) => self.add_node(Node::new("", Some(p.name())).with_shape("diamond")),
            CExpr::Lit(l) => self.add_node(Node::new("", Some(&l.to_string())).with_shape("plain")),
            CExpr::Var(x) => self.add_node(Node::new("", Some(x))),
        };
        self.drawn.insert(key, name.clone());
        name
    }

    fn add_node(&mut self, node: Node) -> String {
        let name = format!("{}{}", Visualizer::NODE_NAME_PREFIX, self.node_counter);
        self.node_counter += 1;
        self.graph.add_node(node.renamed(&name));
        name
    }

    pub fn to_dot(&self) -> String {
        self.graph.to_string()
    }

    pub fn write_to_dot(&self, outfile: &str) -> io::Result<()> {
        fs::write(outfile, self.to_dot())
    }

    /// Render the graph with the `dot` executable.
    pub fn write_to_pdf(&self, outfile: &str) -> io::Result<()> {
        let mut dot = Command::new("dot")
            .stdin(Stdio::piped())
            .arg("-Tpdf")
            .arg("-o")
            .arg(outfile)
            .spawn()?;
        if let Some(mut stdin) = dot.stdin.take() {
            stdin.write_all(self.to_dot().as_bytes())?;
        }
        let status = dot.wait()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("dot exited with {}", status),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compiler::Compiler;
    use crate::frontend::parse_module;

    fn visualize(src: &str) -> Visualizer {
        let program = Compiler::new()
            .compile_module(&parse_module("M", src).unwrap())
            .unwrap();
        let mut vis = Visualizer::new("g");
        vis.visualize_program(&program);
        vis
    }

    #[test]
    fn test_shared_nodes_are_drawn_once() {
        let vis = visualize("def c = #* 6 7\ndef main = #+ c c");
        let dot = vis.to_dot();
        assert!(dot.starts_with("digraph g {"));
        assert!(dot.contains("label=\"c / 0\" shape=box"));
        assert!(dot.contains("label=\"main / 0\" shape=box"));
        // `c` is referenced twice but drawn once.
        assert_eq!(dot.matches("label=\"c / 0\"").count(), 1);
        assert_eq!(dot.matches("label=\"*\"").count(), 1);
    }

    #[test]
    fn test_write_to_dot() {
        let vis = visualize("def main = #+ 1 2");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.dot");
        vis.write_to_dot(path.to_str().unwrap()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), vis.to_dot());
        assert_eq!(vis.graph.node_count(), 6);
    }
}

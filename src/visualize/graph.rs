//! Structs and functions concerned with generating directed graphs in the DOT language of
//! Graphviz.

use std::fmt::{self, Display};

pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new(name: &str) -> Self {
        Graph {
            name: name.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn as_dot<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "{}", self)
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "digraph {} {{", &self.name)?;
        for node in self.nodes.iter() {
            writeln!(f, "\t{}", node)?;
        }
        for edge in self.edges.iter() {
            writeln!(f, "\t{}", edge)?;
        }
        write!(f, "}}")
    }
}

/// Quote `s` for use inside a DOT string.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

pub struct Node {
    id: String,
    label: Option<String>,
    shape: Option<&'static str>,
}

impl Node {
    pub fn new(id: &str, label: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            label: label.map(str::to_string),
            shape: None,
        }
    }

    pub fn renamed(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_shape(mut self, shape: &'static str) -> Self {
        self.shape = Some(shape);
        self
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.label, self.shape) {
            (Some(l), Some(s)) => write!(f, "{} [ label=\"{}\" shape={} ];", self.id, escape(l), s),
            (Some(l), None) => write!(f, "{} [ label=\"{}\" ];", self.id, escape(l)),
            (None, Some(s)) => write!(f, "{} [ shape={} ];", self.id, s),
            (None, None) => write!(f, "{};", self.id),
        }
    }
}

pub struct Edge {
    from: String,
    to: String,
    label: Option<&'static str>,
}

impl Edge {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.label {
            Some(l) => write!(f, "{} -> {} [ label=\"{}\" ];", self.from, self.to, l),
            None => write!(f, "{} -> {};", self.from, self.to),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Edge, Graph, Node};

    #[test]
    fn test_empty_graph() {
        let empty_graph = Graph::new("empty");
        let mut buf = String::new();
        empty_graph.as_dot(&mut buf).unwrap();

        assert_eq!(buf, "digraph empty {\n}");
    }

    #[test]
    fn test_graph() {
        let mut graph = Graph::new("g");
        let mut buf = String::new();
        graph.add_node(Node::new("node1", Some("@")).with_shape("point"));
        graph.add_node(Node::new("node2", Some("\"s\"")));
        graph.add_node(Node::new("node3", None));
        graph.add_edge(Edge::new("node1", "node2").with_label("f"));
        graph.add_edge(Edge::new("node1", "node3"));
        graph.as_dot(&mut buf).unwrap();
        assert_eq!(
            buf,
            "digraph g {\n\tnode1 [ label=\"@\" shape=point ];\n\tnode2 [ label=\"\\\"s\\\"\" ];\
            \n\tnode3;\n\tnode1 -> node2 [ label=\"f\" ];\n\tnode1 -> node3;\n}"
        );
        assert_eq!((graph.node_count(), graph.edge_count()), (3, 2));
    }
}

//! Arena storage for expression nodes.
//!
//! The original compiler mutates expression nodes in place so that a
//! subtree inserted by linking is physically the same object as the one
//! referenced later by a separate path; that aliasing is what turns the
//! parsed tree into a DAG. Rust ownership makes that awkward with real
//! pointers, so nodes live in a single arena and are addressed by a stable
//! `NodeId`. Two operands carrying the same `NodeId` are the DAG-sharing
//! edge the rest of the compiler (linker, macro expander, type checker,
//! tree compiler) all rely on.

use std::fmt;

/// Index of a node inside a `NodeArena`. Stable for the node's lifetime;
/// never reused even if the node is later rewritten in place.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One operand of an expression node: either a raw atom token or a link to
/// another node in the same arena.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Atom(String),
    Node(NodeId),
}

/// An expression node: `(operator, operand_0, .., operand_{k-1})`.
///
/// `op` is rewritten in place by the linker (`let:` becomes `do`/`dov`) and
/// `operands` is rewritten in place by both the linker (name substitution)
/// and the macro expander (parameter substitution) -- this in-place mutation
/// at a stable `NodeId` is what models the original's pointer mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub op: String,
    pub operands: Vec<Operand>,
}

impl Node {
    pub fn new(op: impl Into<String>, operands: Vec<Operand>) -> Self {
        Node {
            op: op.into(),
            operands,
        }
    }
}

/// Owns every expression node created while compiling one unit.
///
/// Unlike the macro table and constant table, node identity is scoped to a
/// single `template:` (and the macro body it was copied from); the arena
/// itself is cheap to create per top-level expression, but nothing prevents
/// reusing one arena for a whole file, which is what the driver does.
#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_node_id_is_dag_sharing() {
        let mut arena = NodeArena::new();
        let leaf = arena.alloc(Node::new("const", vec![Operand::Atom("1".into())]));
        let parent = arena.alloc(Node::new(
            "add",
            vec![Operand::Node(leaf), Operand::Node(leaf)],
        ));
        match &arena.get(parent).operands[..] {
            [Operand::Node(a), Operand::Node(b)] => assert_eq!(a, b),
            _ => panic!("expected two node operands"),
        }
    }

    #[test]
    fn mutation_in_place_is_visible_through_existing_refs() {
        let mut arena = NodeArena::new();
        let inner = arena.alloc(Node::new("do", vec![]));
        let outer = arena.alloc(Node::new("wrap", vec![Operand::Node(inner)]));
        arena.get_mut(inner).op = "dov".into();
        match arena.get(outer).operands[0] {
            Operand::Node(id) => assert_eq!(arena.get(id).op, "dov"),
            _ => panic!("expected node operand"),
        }
    }
}

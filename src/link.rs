//! The declaration linker (spec section 4.3).
//!
//! Eliminates `let:` scopes and named references before macro expansion:
//! by the time anything is expanded, no user name survives anywhere in the
//! tree, which is what gives macro expansion hygiene without gensym.

use std::collections::HashMap;

use log::debug;

use crate::arena::{NodeArena, NodeId, Operand};
use crate::atom::{self, AtomKind};
use crate::catalog::OpcodeDesc;
use crate::error::{CompileError, Result};
use crate::types::{Ty, TypeChecker};

type Env = HashMap<String, NodeId>;

pub struct Linker<'a> {
    arena: &'a mut NodeArena,
    opcode: &'a OpcodeDesc,
}

impl<'a> Linker<'a> {
    pub fn new(arena: &'a mut NodeArena, opcode: &'a OpcodeDesc) -> Self {
        Linker { arena, opcode }
    }

    pub fn link(&mut self, root: NodeId) -> Result<NodeId> {
        self.link_node(root, &Env::new())
    }

    fn link_node(&mut self, id: NodeId, env: &Env) -> Result<NodeId> {
        let op = self.arena.get(id).op.clone();
        if op == "let:" {
            self.link_let(id, env)?;
            return Ok(id);
        }

        let operands = self.arena.get(id).operands.clone();
        let mut new_operands = Vec::with_capacity(operands.len());
        for operand in operands {
            new_operands.push(self.link_operand(operand, env)?);
        }
        self.arena.get_mut(id).operands = new_operands;
        Ok(id)
    }

    fn link_operand(&mut self, operand: Operand, env: &Env) -> Result<Operand> {
        match operand {
            Operand::Node(child) => {
                self.link_node(child, env)?;
                Ok(Operand::Node(child))
            }
            Operand::Atom(text) => match atom::classify(&text) {
                AtomKind::NamedRef(name) => match env.get(name) {
                    Some(&target) => Ok(Operand::Node(target)),
                    None => Err(CompileError::UnboundName(name.to_string())),
                },
                // Numeric `$N` and write-refs `\$N` are left alone.
                _ => Ok(Operand::Atom(text)),
            },
        }
    }

    /// A `let:` node's operands are `(name, definition)` pairs followed by
    /// one or more body expressions. We rewrite the node in place: its head
    /// becomes `do`/`dov`, and its operands become `discard`-wrapped copies
    /// of each definition followed by the (linked) bodies.
    fn link_let(&mut self, id: NodeId, env: &Env) -> Result<()> {
        let operands = self.arena.get(id).operands.clone();
        let (decl_operands, body_operands) = split_decls_and_bodies(self.arena, &operands)?;

        let mut local_env = env.clone();
        let mut discards = Vec::new();
        for decl in decl_operands {
            let (name, def_id) = self.decl_pair(decl)?;
            self.link_node(def_id, &local_env)?;
            let ty = {
                let mut checker = TypeChecker::new(self.arena, self.opcode);
                checker.type_of(def_id)?
            };
            if !matches!(ty, Ty::Reg | Ty::Num | Ty::Any) {
                return Err(CompileError::TypeMismatch {
                    operator: "let:".to_string(),
                    position: 0,
                    expected: "reg or num".to_string(),
                    found: ty.to_string(),
                });
            }
            local_env.insert(name, def_id);
            let discard =
                self.arena
                    .alloc(crate::arena::Node::new("discard", vec![Operand::Node(def_id)]));
            discards.push(Operand::Node(discard));
        }

        let mut bodies = Vec::with_capacity(body_operands.len());
        for body in body_operands {
            let body_id = self.operand_as_node(body)?;
            self.link_node(body_id, &local_env)?;
            bodies.push(Operand::Node(body_id));
        }

        let last_ty = if let Some(Operand::Node(last)) = bodies.last() {
            let mut checker = TypeChecker::new(self.arena, self.opcode);
            checker.type_of(*last)?
        } else {
            Ty::Void
        };

        let new_op = if last_ty == Ty::Void { "dov" } else { "do" };
        debug!("let: -> {} ({} decls)", new_op, discards.len());

        let mut new_operands = discards;
        new_operands.extend(bodies);
        let node = self.arena.get_mut(id);
        node.op = new_op.to_string();
        node.operands = new_operands;
        Ok(())
    }

    fn decl_pair(&self, operand: Operand) -> Result<(String, NodeId)> {
        let node_id = self.operand_as_node(operand)?;
        let node = self.arena.get(node_id).clone();
        // A decl pair is parsed by the reader as a 2-element list
        // `($name definition)`; we model it as a synthetic node whose op is
        // the name atom and whose sole operand is the definition.
        let name_text = node.op.clone();
        let name = match atom::classify(&name_text) {
            AtomKind::NamedRef(n) => n.to_string(),
            _ => return Err(CompileError::UnboundName(name_text)),
        };
        let def = node
            .operands
            .into_iter()
            .next()
            .ok_or_else(|| CompileError::UnboundName(name_text.clone()))?;
        let def_id = self.operand_as_node(def)?;
        Ok((name, def_id))
    }

    fn operand_as_node(&self, operand: Operand) -> Result<NodeId> {
        match operand {
            Operand::Node(id) => Ok(id),
            Operand::Atom(_) => Err(CompileError::ReadError(
                "expected an expression, found a bare atom".to_string(),
            )),
        }
    }
}

/// The `lower` pass always produces a `let:` node whose first operand is a
/// synthetic `decls` container node (its own operands are the individual
/// `(name definition)` pairs) and whose remaining operands are the bodies.
/// This unwraps that container into the flat list of pair-operands `link_let`
/// iterates.
fn split_decls_and_bodies(arena: &NodeArena, operands: &[Operand]) -> Result<(Vec<Operand>, Vec<Operand>)> {
    let (first, rest) = operands.split_first().ok_or_else(|| {
        CompileError::ReadError("`let:` needs a declaration list".to_string())
    })?;
    let decls_id = match first {
        Operand::Node(id) => *id,
        Operand::Atom(_) => {
            return Err(CompileError::ReadError(
                "`let:` declarations must be a list".to_string(),
            ))
        }
    };
    let decl_operands = arena.get(decls_id).operands.clone();
    Ok((decl_operands, rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Node;
    use crate::catalog::{Direction, OperandDesc};

    fn opcode() -> OpcodeDesc {
        OpcodeDesc {
            name: "load".into(),
            operands: vec![
                OperandDesc {
                    direction: Direction::Write,
                    type_tag: "pargs".into(),
                },
                OperandDesc {
                    direction: Direction::Read,
                    type_tag: "pargs".into(),
                },
            ],
        }
    }

    /// Builds `(let: ((decl_name decl_def)) body)` directly in the arena,
    /// bypassing the reader, mirroring the shape `split_decls_and_bodies`
    /// expects: a single decls-list operand followed by body operands.
    fn build_let(
        arena: &mut NodeArena,
        decls: Vec<(&str, NodeId)>,
        bodies: Vec<NodeId>,
    ) -> NodeId {
        let pairs: Vec<Operand> = decls
            .into_iter()
            .map(|(name, def)| {
                Operand::Node(arena.alloc(Node::new(name, vec![Operand::Node(def)])))
            })
            .collect();
        let decls_list = arena.alloc(Node::new("decls", pairs));
        let mut operands = vec![Operand::Node(decls_list)];
        operands.extend(bodies.into_iter().map(Operand::Node));
        arena.alloc(Node::new("let:", operands))
    }

    #[test]
    fn scenario_1_shared_definition_is_reused() {
        let mut arena = NodeArena::new();
        let copy_op = arena.alloc(Node::new("copy", vec![Operand::Atom("$1".into())]));
        let load_sz = arena.alloc(Node::new("8", vec![]));
        let load = arena.alloc(Node::new(
            "load",
            vec![Operand::Atom("$foo".into()), Operand::Node(load_sz)],
        ));
        let let_node = build_let(&mut arena, vec![("$foo", copy_op)], vec![load]);

        let opcode = opcode();
        let mut linker = Linker::new(&mut arena, &opcode);
        linker.link(let_node).unwrap();

        let linked_load = arena.get(let_node).operands.last().unwrap();
        let load_id = match linked_load {
            Operand::Node(id) => *id,
            _ => panic!("expected node"),
        };
        match arena.get(load_id).operands[0] {
            Operand::Node(id) => assert_eq!(id, copy_op),
            _ => panic!("expected $foo to resolve to the copy node"),
        }
    }

    #[test]
    fn let_head_rewritten_to_do_or_dov() {
        let mut arena = NodeArena::new();
        let def = arena.alloc(Node::new("copy", vec![Operand::Atom("$1".into())]));
        let body = arena.alloc(Node::new("store", vec![Operand::Atom("$foo".into())]));
        let let_node = build_let(&mut arena, vec![("$foo", def)], vec![body]);
        let opcode = opcode();
        let mut linker = Linker::new(&mut arena, &opcode);
        linker.link(let_node).unwrap();
        assert_eq!(arena.get(let_node).op, "dov");
    }

    #[test]
    fn unbound_name_is_an_error() {
        let mut arena = NodeArena::new();
        let body = arena.alloc(Node::new("copy", vec![Operand::Atom("$missing".into())]));
        let opcode = opcode();
        let mut linker = Linker::new(&mut arena, &opcode);
        assert!(linker.link(body).is_err());
    }
}

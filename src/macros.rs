//! The macro expander (spec section 4.4).
//!
//! Expansion walks depth-first, substituting `,name` placeholders with the
//! linked argument subtrees, and memoizes by source-node identity within a
//! single expansion so that a sub-list referenced more than once in the
//! macro body is copied once and shared in the instance -- preserving
//! whatever DAG shape the macro's author wrote.

use std::collections::HashMap;

use log::debug;

use crate::arena::{Node, NodeArena, NodeId, Operand};
use crate::atom::{self, AtomKind};
use crate::catalog::OpcodeDesc;
use crate::error::{CompileError, Result};
use crate::link::Linker;

#[derive(Clone, Debug)]
pub struct Macro {
    pub params: Vec<String>,
    pub body: NodeId,
}

#[derive(Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Registers a macro: the body is linked first (section 4.4: "body is
    /// linked ... then any nested macro calls inside the body are expanded
    /// immediately against the currently-registered macro set"), so a
    /// `let:` scope inside a macro body is resolved into a DAG -- its head
    /// rewritten to `do`/`dov`, its names replaced by direct node
    /// references -- exactly as it would be for an ordinary template body.
    /// Linking runs against an opcode-less stub: a macro body is written
    /// without knowing which opcode it will eventually be substituted into,
    /// so it must not reference a particular `$N` operand position (any
    /// such reference is rejected as out of range, since the stub has no
    /// operands).
    ///
    /// The macro being registered is not yet visible to its own body, so a
    /// macro cannot call itself, directly or indirectly -- a recursive
    /// reference surfaces as `UnknownMacro`.
    pub fn register(
        &mut self,
        name: String,
        params: Vec<String>,
        body: NodeId,
        arena: &mut NodeArena,
    ) -> Result<()> {
        if self.macros.contains_key(&name) {
            return Err(CompileError::RedefinedMacro(name));
        }
        let stub_opcode = OpcodeDesc::default();
        Linker::new(arena, &stub_opcode).link(body)?;
        expand_tree(self, arena, body)?;
        debug!("registered macro ^{} ({} params)", name, params.len());
        self.macros.insert(name, Macro { params, body });
        Ok(())
    }
}

/// Expands every macro invocation reachable from `root`, recursing into
/// children first.
pub fn expand_tree(macros: &MacroTable, arena: &mut NodeArena, root: NodeId) -> Result<()> {
    let operands = arena.get(root).operands.clone();
    let mut new_operands = Vec::with_capacity(operands.len());
    for operand in operands {
        new_operands.push(match operand {
            Operand::Node(child) => {
                expand_tree(macros, arena, child)?;
                Operand::Node(child)
            }
            atom => atom,
        });
    }
    arena.get_mut(root).operands = new_operands;

    let op = arena.get(root).op.clone();
    if let AtomKind::MacroName(name) = atom::classify(&op) {
        let instance = expand_call(macros, arena, name, root)?;
        let expanded = arena.get(instance).clone();
        *arena.get_mut(root) = expanded;
    }
    Ok(())
}

fn expand_call(
    macros: &MacroTable,
    arena: &mut NodeArena,
    name: &str,
    call_site: NodeId,
) -> Result<NodeId> {
    let mac = macros
        .get(name)
        .ok_or_else(|| CompileError::UnknownMacro(name.to_string()))?
        .clone();

    let args = arena.get(call_site).operands.clone();
    if args.len() != mac.params.len() {
        return Err(CompileError::MacroArity {
            name: name.to_string(),
            expected: mac.params.len(),
            got: args.len(),
        });
    }
    let mut bindings = HashMap::new();
    for (param, arg) in mac.params.iter().zip(args.into_iter()) {
        bindings.insert(param.clone(), arg);
    }

    let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
    instantiate(arena, mac.body, &bindings, &mut memo)
}

/// Copies `source` (and everything it reaches) into a fresh instance,
/// substituting `,name` placeholders from `bindings`. `memo` maps a source
/// node id, within this one expansion, to the instance node id already
/// produced for it -- a sub-list the macro author referenced twice shares
/// one copy in the instance, same as it shared one copy in the body.
fn instantiate(
    arena: &mut NodeArena,
    source: NodeId,
    bindings: &HashMap<String, Operand>,
    memo: &mut HashMap<NodeId, NodeId>,
) -> Result<NodeId> {
    if let Some(&existing) = memo.get(&source) {
        return Ok(existing);
    }
    let node = arena.get(source).clone();
    let mut new_operands = Vec::with_capacity(node.operands.len());
    for operand in node.operands {
        new_operands.push(instantiate_operand(arena, operand, bindings, memo)?);
    }
    let new_id = arena.alloc(Node::new(node.op, new_operands));
    memo.insert(source, new_id);
    Ok(new_id)
}

fn instantiate_operand(
    arena: &mut NodeArena,
    operand: Operand,
    bindings: &HashMap<String, Operand>,
    memo: &mut HashMap<NodeId, NodeId>,
) -> Result<Operand> {
    match operand {
        Operand::Node(id) => Ok(Operand::Node(instantiate(arena, id, bindings, memo)?)),
        Operand::Atom(text) => match atom::classify(&text) {
            AtomKind::MacroParam(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::UnmatchedMacroParam(name.to_string())),
            _ => Ok(Operand::Atom(text)),
        },
    }
}

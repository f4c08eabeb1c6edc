//! The tree compiler (spec section 4.6).
//!
//! Flattens a validated DAG into `template[]`/`desc[]`, using a per-compile
//! memo from node identity to emitted index so each node emits exactly
//! once. Emission is strictly post-order: every operand a node refers to by
//! `l:` is fully emitted (and therefore occupies a lower index) before the
//! node's own `n`/`s` slots are written, which is what gives the `l < p`
//! invariant for free rather than needing a separate pass to check it.
//!
//! `n`/`.` slots are textual (operator and bareword names are only
//! "textually prefixed," per spec section 3 -- resolving them to numeric
//! enum values is the emitter's job, out of scope here), so the template is
//! modeled as `Vec<TemplateValue>` rather than a raw integer array; the
//! abstract shape (one value plus one descriptor character per slot) is
//! unchanged.
//!
//! A node's trailing literal children (numbers, barewords, macro calls --
//! what section 4.6 calls "parameters") fall out of the same per-child walk
//! as its real operands: each child is classified once and emitted as
//! exactly one `l`/`i`/`.`/`c` slot, so the `s` slot always equals the
//! number of children actually present. The `f` descriptor character is
//! spec section 3's own "reserved" entry -- nothing in section 4.6 describes
//! a value for it, so this compiler never emits one; inventing filler slots
//! for it would desynchronize `s` from the slots a reader actually finds.

use std::collections::HashMap;

use crate::arena::{NodeArena, NodeId, Node, Operand};
use crate::atom::{self, AtomKind};
use crate::catalog::{OpcodeCatalog, OpcodeDesc, OperatorCatalog};
use crate::error::{CompileError, Result};

/// Operators whose `inc`/`dec` family exposes a doubled operand vector: a
/// reference to `$0` or `$1` is always accepted regardless of the opcode's
/// real operand count (spec section 4.6, flagged as an ad-hoc exception in
/// the Design Notes -- deliberately not generalized here).
const DOUBLED_OPERAND_OPCODES: &[&str] = &["inc_i", "dec_i", "inc_u", "dec_u"];

/// Operators that designate one operand position as a size (spec section
/// 4.6). We resolve that position as the node's last operand; see
/// `DESIGN.md` for why (the spec leaves the exact position an open
/// question).
const SIZE_PARAM_OPERATORS: &[&str] = &[
    "load", "load_num", "store", "store_num", "call", "const", "cast",
];

/// Operators whose value operand is diverted into the constant table rather
/// than compiled as a child node (spec section 4.6).
const LARGE_CONST_OPERATORS: &[&str] = &["const_ptr", "const_large"];

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Int(i64),
    Name(String),
}

/// An insertion-ordered, textually-deduplicated table of large/pointer
/// constant values, shared across the whole compilation unit (spec section
/// 3, "Constant table as process-global state" in the Design Notes: a
/// single owned structure threaded through the compiler, not ambient
/// global state).
#[derive(Default)]
pub struct ConstantTable {
    values: Vec<String>,
    index: HashMap<String, usize>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable index for `value`, inserting it if this is the
    /// first time it has been seen.
    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(&idx) = self.index.get(value) {
            return idx;
        }
        let idx = self.values.len();
        self.values.push(value.to_string());
        self.index.insert(value.to_string(), idx);
        idx
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

pub struct CompiledTemplate {
    pub template: Vec<TemplateValue>,
    pub desc: String,
    pub root: usize,
}

pub struct Compiler<'a> {
    arena: &'a NodeArena,
    opcode: &'a OpcodeDesc,
    operators: &'a OperatorCatalog,
    prefix: &'a str,
    constants: &'a mut ConstantTable,
    template: Vec<TemplateValue>,
    desc: String,
    memo: HashMap<NodeId, usize>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        arena: &'a NodeArena,
        opcode: &'a OpcodeDesc,
        operators: &'a OperatorCatalog,
        prefix: &'a str,
        constants: &'a mut ConstantTable,
    ) -> Self {
        Compiler {
            arena,
            opcode,
            operators,
            prefix,
            constants,
            template: Vec::new(),
            desc: String::new(),
            memo: HashMap::new(),
        }
    }

    pub fn compile(mut self, root: NodeId) -> Result<CompiledTemplate> {
        let root_idx = self.emit(root)?;
        Ok(CompiledTemplate {
            template: self.template,
            desc: self.desc,
            root: root_idx,
        })
    }

    fn push(&mut self, ch: char, value: TemplateValue) -> usize {
        let idx = self.template.len();
        self.template.push(value);
        self.desc.push(ch);
        idx
    }

    fn emit(&mut self, id: NodeId) -> Result<usize> {
        if let Some(&idx) = self.memo.get(&id) {
            return Ok(idx);
        }
        let node = self.arena.get(id).clone();

        if LARGE_CONST_OPERATORS.contains(&node.op.as_str()) {
            let idx = self.emit_large_const(&node)?;
            self.memo.insert(id, idx);
            return Ok(idx);
        }

        self.check_operator_known(&node.op)?;
        self.check_size_param(&node)?;

        enum Slot {
            Link(usize),
            OperandIndex(u32),
            Literal(String),
        }

        let mut slots = Vec::with_capacity(node.operands.len());
        for operand in &node.operands {
            let slot = match operand {
                Operand::Node(child) => {
                    if let Some(text) = self.macro_call_text(*child) {
                        Slot::Literal(text)
                    } else {
                        let child_idx = self.emit(*child)?;
                        Slot::Link(child_idx)
                    }
                }
                Operand::Atom(text) => match atom::classify(text) {
                    AtomKind::WriteOperandRef(n) => {
                        self.validate_operand_ref(n, true)?;
                        Slot::OperandIndex(n)
                    }
                    AtomKind::OperandRef(n) => {
                        self.validate_operand_ref(n, false)?;
                        Slot::OperandIndex(n)
                    }
                    AtomKind::Number(n) => Slot::Literal(n.to_string()),
                    AtomKind::Bareword(bw) => Slot::Literal(atom::upper(self.prefix, bw)),
                    other => {
                        return Err(CompileError::ReadError(format!(
                            "unexpected atom in compiled position: {:?}",
                            other
                        )))
                    }
                },
            };
            slots.push(slot);
        }

        let node_index = self.push(
            'n',
            TemplateValue::Name(atom::upper(self.prefix, &node.op)),
        );
        self.push('s', TemplateValue::Int(slots.len() as i64));
        for slot in slots {
            match slot {
                Slot::Link(idx) => {
                    self.push('l', TemplateValue::Int(idx as i64));
                }
                Slot::OperandIndex(n) => {
                    self.push('i', TemplateValue::Int(n as i64));
                }
                Slot::Literal(text) => {
                    self.push('.', TemplateValue::Name(text));
                }
            }
        }
        self.memo.insert(id, node_index);
        Ok(node_index)
    }

    /// A macro-call parameter node, e.g. `(&sz_of pargs)`, is never
    /// compiled as a shared node: it is inlined textually as `.: "name(p1,
    /// p2, ...)"` wherever it appears (spec section 4.6, step 2).
    fn macro_call_text(&self, id: NodeId) -> Option<String> {
        let node = self.arena.get(id);
        match atom::classify(&node.op) {
            AtomKind::MacroCallParam(name) => {
                let params: Vec<String> = node
                    .operands
                    .iter()
                    .map(|op| match op {
                        Operand::Atom(text) => text.clone(),
                        Operand::Node(_) => "<expr>".to_string(),
                    })
                    .collect();
                Some(format!("{}({})", name, params.join(", ")))
            }
            _ => None,
        }
    }

    fn check_operator_known(&self, op: &str) -> Result<()> {
        if self.operators.get(op).is_none() {
            return Err(CompileError::UnknownOperator(op.to_string()));
        }
        Ok(())
    }

    fn validate_operand_ref(&self, n: u32, is_write_sigil: bool) -> Result<()> {
        if DOUBLED_OPERAND_OPCODES.contains(&self.opcode.name.as_str()) && (n == 0 || n == 1) {
            return Ok(());
        }
        let operand_desc = self.opcode.operands.get(n as usize).ok_or_else(|| {
            CompileError::OperandRefOutOfRange(n.to_string(), self.opcode.name.clone())
        })?;
        match (is_write_sigil, operand_desc.direction.is_write()) {
            (true, false) => Err(CompileError::WriteRefForbidden {
                opcode: self.opcode.name.clone(),
                position: n as usize,
            }),
            (false, true) => Err(CompileError::WriteRefMissing {
                opcode: self.opcode.name.clone(),
                position: n as usize,
            }),
            _ => Ok(()),
        }
    }

    /// Validates the size-designated operand position (spec section 4.6):
    /// it must be a macro call, a numeric literal, or a `_sz` bareword. We
    /// take the last operand as the size position, but only when it is a
    /// literal atom or a macro call -- a plain nested expression in that
    /// position (e.g. `load` over a bare `addr` sub-tree, with no trailing
    /// size operand at all) is not a size parameter to validate, just an
    /// ordinary operand.
    fn check_size_param(&self, node: &Node) -> Result<()> {
        if !SIZE_PARAM_OPERATORS.contains(&node.op.as_str()) {
            return Ok(());
        }
        let last = match node.operands.last() {
            Some(o) => o,
            None => return Ok(()),
        };
        let bad = match last {
            // A nested expression in the last position is an ordinary
            // operand, not a size parameter to validate.
            Operand::Node(_) => false,
            Operand::Atom(text) => match atom::classify(text) {
                AtomKind::Number(_) => false,
                AtomKind::Bareword(bw) => !atom::is_size_bareword(bw),
                _ => false,
            },
        };
        if bad {
            return Err(CompileError::SizeParamBad {
                operator: node.op.clone(),
                position: node.operands.len() - 1,
            });
        }
        Ok(())
    }

    fn emit_large_const(&mut self, node: &Node) -> Result<usize> {
        let value_text = match node.operands.first() {
            Some(Operand::Atom(text)) => text.clone(),
            _ => {
                return Err(CompileError::ReadError(format!(
                    "{} expects a literal value operand",
                    node.op
                )))
            }
        };
        let const_idx = self.constants.intern(&value_text);

        let node_index = self.push(
            'n',
            TemplateValue::Name(atom::upper(self.prefix, &node.op)),
        );
        self.push('s', TemplateValue::Int(node.operands.len() as i64));
        self.push('c', TemplateValue::Int(const_idx as i64));
        if let Some(size_operand) = node.operands.get(1) {
            if let Operand::Atom(text) = size_operand {
                self.push('.', TemplateValue::Name(text.clone()));
            }
        }
        Ok(node_index)
    }
}

/// Looks up the expected output type of an opcode's `template:` per spec
/// section 4.7: `void` when destructive or when the opcode has no write
/// operand, otherwise the mapped type of the write operand.
pub fn expected_output_type(opcode: &OpcodeDesc, destructive: bool) -> crate::types::Ty {
    if destructive {
        return crate::types::Ty::Void;
    }
    match opcode.write_operand_index() {
        Some(idx) => opcode.operands[idx].mapped_type(),
        None => crate::types::Ty::Void,
    }
}

/// Builds the per-opcode operand environment used when linking a
/// `template:` body: one `$N` per operand with its mapped type recorded for
/// the type checker (spec section 4.7). The environment itself is just the
/// opcode descriptor; this helper only documents the relationship.
pub fn operand_environment<'a>(catalog: &'a OpcodeCatalog, name: &str) -> Option<&'a OpcodeDesc> {
    catalog.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Node, NodeArena};
    use crate::catalog::{Direction, OperandDesc, OperatorDesc};

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

    fn operators() -> OperatorCatalog {
        let mut cat = OperatorCatalog::new();
        cat.insert(OperatorDesc {
            name: "load".into(),
            operand_count: 1,
            param_count: 0,
            variadic: false,
        });
        cat.insert(OperatorDesc {
            name: "addr".into(),
            operand_count: 2,
            param_count: 0,
            variadic: false,
        });
        cat
    }

    #[test]
    fn emits_children_before_parents() {
        let mut arena = NodeArena::new();
        let addr = arena.alloc(Node::new(
            "addr",
            vec![
                Operand::Atom("pargs_sz".into()),
                Operand::Atom("$1".into()),
            ],
        ));
        let load = arena.alloc(Node::new("load", vec![Operand::Node(addr)]));

        let opcode = opcode();
        let operators = operators();
        let mut constants = ConstantTable::new();
        let compiler = Compiler::new(&arena, &opcode, &operators, "MVM_JIT_", &mut constants);
        let compiled = compiler.compile(load).unwrap();

        assert_eq!(compiled.desc.chars().nth(compiled.root), Some('n'));
        // every `l` slot must reference a strictly earlier index
        for (pos, ch) in compiled.desc.chars().enumerate() {
            if ch == 'l' {
                if let TemplateValue::Int(target) = compiled.template[pos] {
                    assert!((target as usize) < pos);
                }
            }
        }
        // an `n` is always immediately followed by its operand count `s`
        let chars: Vec<char> = compiled.desc.chars().collect();
        for (pos, ch) in chars.iter().enumerate() {
            if *ch == 'n' {
                assert_eq!(chars[pos + 1], 's');
            }
        }
    }

    #[test]
    fn write_ref_without_sigil_is_rejected() {
        let mut arena = NodeArena::new();
        let store = arena.alloc(Node::new("load", vec![Operand::Atom("$0".into())]));
        let opcode = opcode();
        let mut operators = operators();
        operators.insert(OperatorDesc {
            name: "load".into(),
            operand_count: 1,
            param_count: 0,
            variadic: false,
        });
        let mut constants = ConstantTable::new();
        let compiler = Compiler::new(&arena, &opcode, &operators, "MVM_JIT_", &mut constants);
        assert!(compiler.compile(store).is_err());
    }

    #[test]
    fn constant_table_dedups_by_text() {
        let mut constants = ConstantTable::new();
        let a = constants.intern("1000000");
        let b = constants.intern("2000000");
        let c = constants.intern("1000000");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(constants.values(), &["1000000".to_string(), "2000000".to_string()]);
    }
}

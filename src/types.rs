//! The expression type checker (spec section 4.5).
//!
//! The type domain is a small tagged variant, per the Design Notes: "do not
//! model it as subtyping." `Any` (written `?` in the spec) resolves against
//! a concrete peer via `join`.

use std::collections::HashMap;
use std::fmt;

use crate::arena::{NodeArena, NodeId, Operand};
use crate::atom::{self, AtomKind};
use crate::error::{CompileError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    Reg,
    Num,
    Flag,
    Void,
    Any,
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Ty::Reg => "reg",
            Ty::Num => "num",
            Ty::Flag => "flag",
            Ty::Void => "void",
            Ty::Any => "?",
        };
        write!(f, "{}", s)
    }
}

impl Ty {
    /// `?` accepts any `reg`/`num` peer and yields the concrete type;
    /// otherwise two types are equivalent only if identical.
    pub fn equivalent(self, other: Ty) -> bool {
        if self == other {
            return true;
        }
        let is_reg_or_num = |t: Ty| matches!(t, Ty::Reg | Ty::Num);
        (self == Ty::Any && is_reg_or_num(other)) || (other == Ty::Any && is_reg_or_num(self))
    }

    /// Resolve a polymorphic result against a concrete peer: a concrete
    /// `reg`/`num` dominates `?`.
    pub fn join(self, other: Ty) -> Ty {
        match (self, other) {
            (Ty::Any, x) | (x, Ty::Any) => x,
            (a, _) => a,
        }
    }
}

/// Fixed result type table (spec section 4.5).
fn fixed_result_type(operator: &str) -> Option<Ty> {
    const VOID: &[&str] = &[
        "store", "store_num", "discard", "dov", "ifv", "when", "branch", "mark", "callv", "guard",
    ];
    const FLAG: &[&str] = &[
        "lt", "le", "eq", "ne", "ge", "gt", "nz", "zr", "all", "any",
    ];
    const NUM: &[&str] = &["const_num", "load_num", "calln"];
    const POLY: &[&str] = &["if", "copy", "do", "add", "sub", "mul"];

    if VOID.contains(&operator) {
        Some(Ty::Void)
    } else if FLAG.contains(&operator) {
        Some(Ty::Flag)
    } else if NUM.contains(&operator) {
        Some(Ty::Num)
    } else if POLY.contains(&operator) {
        Some(Ty::Any)
    } else if operator == "arglist" || operator == "carg" {
        None // handled specially: "return themselves"
    } else {
        Some(Ty::Reg)
    }
}

/// Expected operand types per operator (spec section 4.5). Returns the
/// table entry list; the caller expands it to `operand_count` entries using
/// the repeat rule.
fn expected_operand_types(operator: &str) -> Option<Vec<Ty>> {
    match operator {
        "when" => Some(vec![Ty::Flag, Ty::Void]),
        "if" | "ifv" => Some(vec![Ty::Flag, Ty::Any, Ty::Any]),
        "call" | "calln" | "callv" => Some(vec![Ty::Reg, Ty::Any]),
        "store" | "store_num" => Some(vec![Ty::Reg, Ty::Any]),
        "guard" => Some(vec![Ty::Void]),
        "lt" | "le" | "eq" | "ne" | "ge" | "gt" => Some(vec![Ty::Any, Ty::Any]),
        "nz" | "zr" => Some(vec![Ty::Any]),
        "add" | "sub" | "mul" => Some(vec![Ty::Any, Ty::Any]),
        "copy" => Some(vec![Ty::Any]),
        "discard" => Some(vec![Ty::Any]),
        "mark" => Some(vec![]),
        "branch" => Some(vec![Ty::Flag]),
        _ => None,
    }
}

/// Expand a (possibly short) declared-types list to exactly `n` entries
/// using the repeat rule from section 4.5: fewer entries than operands means
/// the last repeats, except when exactly two are given, in which case the
/// first repeats for every operand but the last.
fn expand_types(declared: &[Ty], n: usize) -> Vec<Ty> {
    if declared.is_empty() || n == 0 {
        return vec![Ty::Reg; n];
    }
    if declared.len() >= n {
        return declared[..n].to_vec();
    }
    if declared.len() == 2 && n > 1 {
        let mut out = vec![declared[0]; n - 1];
        out.push(declared[1]);
        return out;
    }
    let mut out = declared.to_vec();
    let last = *out.last().unwrap();
    out.resize(n, last);
    out
}

pub fn operand_expected_types(operator: &str, operand_count: usize) -> Vec<Ty> {
    match expected_operand_types(operator) {
        Some(declared) => expand_types(&declared, operand_count),
        None => vec![Ty::Reg; operand_count],
    }
}

/// Assigns a type to every node reachable from `root`, memoizing by node id
/// since the DAG can share subtrees. `env` maps the opcode's operand
/// positions (from `$N`/`\$N`) to expression types via the opcode catalog.
pub struct TypeChecker<'a> {
    arena: &'a NodeArena,
    opcode: &'a crate::catalog::OpcodeDesc,
    memo: HashMap<NodeId, Ty>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(arena: &'a NodeArena, opcode: &'a crate::catalog::OpcodeDesc) -> Self {
        TypeChecker {
            arena,
            opcode,
            memo: HashMap::new(),
        }
    }

    pub fn type_of_atom(&self, text: &str) -> Result<Ty> {
        match atom::classify(text) {
            AtomKind::WriteOperandRef(_) => Ok(Ty::Reg),
            AtomKind::OperandRef(n) => {
                let desc = self.opcode.operands.get(n as usize).ok_or_else(|| {
                    CompileError::OperandRefOutOfRange(n.to_string(), self.opcode.name.clone())
                })?;
                Ok(desc.mapped_type())
            }
            _ => Ok(Ty::Reg),
        }
    }

    pub fn type_of_operand(&mut self, operand: &Operand) -> Result<Ty> {
        match operand {
            Operand::Atom(text) => self.type_of_atom(text),
            Operand::Node(id) => self.type_of(*id),
        }
    }

    pub fn type_of(&mut self, id: NodeId) -> Result<Ty> {
        if let Some(ty) = self.memo.get(&id) {
            return Ok(*ty);
        }
        let node = self.arena.get(id);
        let op = node.op.clone();
        let operand_types: Vec<Ty> = node
            .operands
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .iter()
            .map(|o| self.type_of_operand(o))
            .collect::<Result<_>>()?;

        let ty = self.resolve(&op, &operand_types)?;
        self.memo.insert(id, ty);
        Ok(ty)
    }

    fn resolve(&self, op: &str, operand_types: &[Ty]) -> Result<Ty> {
        if op == "arglist" || op == "carg" {
            return Ok(Ty::Reg);
        }
        let fixed = fixed_result_type(op);
        let ty = match fixed {
            Some(Ty::Any) => self.resolve_poly(op, operand_types)?,
            Some(t) => t,
            None => Ty::Reg,
        };

        let expected = operand_expected_types(op, operand_types.len());
        for (i, (&found, &want)) in operand_types.iter().zip(expected.iter()).enumerate() {
            if !found.equivalent(want) {
                return Err(CompileError::TypeMismatch {
                    operator: op.to_string(),
                    position: i,
                    expected: want.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(ty)
    }

    fn resolve_poly(&self, op: &str, operand_types: &[Ty]) -> Result<Ty> {
        match op {
            "if" | "ifv" => {
                if operand_types.is_empty() {
                    return Ok(Ty::Any);
                }
                let flag = operand_types[0];
                if !flag.equivalent(Ty::Flag) {
                    return Err(CompileError::TypeMismatch {
                        operator: op.to_string(),
                        position: 0,
                        expected: Ty::Flag.to_string(),
                        found: flag.to_string(),
                    });
                }
                if operand_types.len() < 3 {
                    return Ok(Ty::Any);
                }
                let (a, b) = (operand_types[1], operand_types[2]);
                if !a.equivalent(b) {
                    return Err(CompileError::TypeMismatch {
                        operator: op.to_string(),
                        position: 2,
                        expected: a.to_string(),
                        found: b.to_string(),
                    });
                }
                Ok(a.join(b))
            }
            "do" => Ok(operand_types.last().copied().unwrap_or(Ty::Any)),
            "copy" => Ok(operand_types.first().copied().unwrap_or(Ty::Any)),
            _ => {
                let first = match operand_types.first() {
                    Some(t) => *t,
                    None => return Ok(Ty::Any),
                };
                for (i, &t) in operand_types.iter().enumerate().skip(1) {
                    if !t.equivalent(first) {
                        return Err(CompileError::TypeMismatch {
                            operator: op.to_string(),
                            position: i,
                            expected: first.to_string(),
                            found: t.to_string(),
                        });
                    }
                }
                Ok(first)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Node, NodeArena};
    use crate::catalog::{Direction, OpcodeDesc, OperandDesc};

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

    #[test]
    fn join_lets_concrete_type_dominate_any() {
        assert_eq!(Ty::Any.join(Ty::Num), Ty::Num);
        assert_eq!(Ty::Reg.join(Ty::Any), Ty::Reg);
    }

    #[test]
    fn if_requires_flag_condition_and_matching_branches() {
        let mut arena = NodeArena::new();
        let cond = arena.alloc(Node::new("eq", vec![]));
        let a = arena.alloc(Node::new("load_num", vec![]));
        let b = arena.alloc(Node::new("const_num", vec![]));
        let if_node = arena.alloc(Node::new(
            "if",
            vec![
                crate::arena::Operand::Node(cond),
                crate::arena::Operand::Node(a),
                crate::arena::Operand::Node(b),
            ],
        ));
        let opcode = opcode();
        let mut checker = TypeChecker::new(&arena, &opcode);
        assert_eq!(checker.type_of(if_node).unwrap(), Ty::Num);
    }

    #[test]
    fn mismatched_if_branches_are_rejected() {
        let mut arena = NodeArena::new();
        let cond = arena.alloc(Node::new("eq", vec![]));
        let a = arena.alloc(Node::new("load_num", vec![]));
        let b = arena.alloc(Node::new("copy", vec![])); // `?`, but downstream uses force reg
        let b_typed = arena.alloc(Node::new(
            "when",
            vec![
                crate::arena::Operand::Node(cond),
                crate::arena::Operand::Node(b),
            ],
        ));
        let if_node = arena.alloc(Node::new(
            "if",
            vec![
                crate::arena::Operand::Node(cond),
                crate::arena::Operand::Node(a),
                crate::arena::Operand::Node(b_typed),
            ],
        ));
        let opcode = opcode();
        let mut checker = TypeChecker::new(&arena, &opcode);
        assert!(checker.type_of(if_node).is_err());
    }
}

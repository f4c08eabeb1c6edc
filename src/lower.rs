//! Lowers raw reader output (`reader::SExpr`) into arena-backed expression
//! nodes (spec section 3's "Expression node"). This is a separate step from
//! reading because the reader only knows about nested lists of strings; it
//! is the driver (via this module) that decides a given list is an
//! expression tree to be linked/expanded/type-checked/compiled, as opposed
//! to, say, the parameter list of a `macro:` form.

use crate::arena::{Node, NodeArena, NodeId, Operand};
use crate::error::{CompileError, Result};
use crate::reader::SExpr;

/// Lowers one expression tree. `expr` must be a list; a bare atom at this
/// position (there is no operator-less expression in this language) is a
/// read error.
pub fn lower(arena: &mut NodeArena, expr: &SExpr) -> Result<NodeId> {
    let items = expr
        .as_list()
        .ok_or_else(|| CompileError::ReadError("expected an expression list".to_string()))?;
    let (head, rest) = items
        .split_first()
        .ok_or_else(|| CompileError::ReadError("empty expression".to_string()))?;
    let op = head
        .as_atom()
        .ok_or_else(|| CompileError::ReadError("expression head must be an atom".to_string()))?
        .to_string();

    if op == "let:" {
        return lower_let(arena, rest);
    }

    let mut operands = Vec::with_capacity(rest.len());
    for item in rest {
        operands.push(lower_operand(arena, item)?);
    }
    Ok(arena.alloc(Node::new(op, operands)))
}

fn lower_operand(arena: &mut NodeArena, expr: &SExpr) -> Result<Operand> {
    match expr {
        SExpr::Atom(text) => Ok(Operand::Atom(text.clone())),
        SExpr::List(_) => Ok(Operand::Node(lower(arena, expr)?)),
    }
}

/// `(let: ((name def) ...) body...)` lowers to a `let:` node whose first
/// operand is a synthetic `decls` node, each of whose operands is a
/// synthetic node named after the declared `$name` carrying the (lowered)
/// definition as its sole operand. `link::Linker` consumes exactly this
/// shape.
fn lower_let(arena: &mut NodeArena, rest: &[SExpr]) -> Result<NodeId> {
    let (decls_expr, bodies) = rest
        .split_first()
        .ok_or_else(|| CompileError::ReadError("`let:` needs a declaration list".to_string()))?;
    let decl_items = decls_expr
        .as_list()
        .ok_or_else(|| CompileError::ReadError("`let:` declarations must be a list".to_string()))?;

    let mut pairs = Vec::with_capacity(decl_items.len());
    for decl in decl_items {
        let pair = decl.as_list().ok_or_else(|| {
            CompileError::ReadError("`let:` declaration must be `(name definition)`".to_string())
        })?;
        if pair.len() != 2 {
            return Err(CompileError::ReadError(
                "`let:` declaration must be `(name definition)`".to_string(),
            ));
        }
        let name = pair[0].as_atom().ok_or_else(|| {
            CompileError::ReadError("`let:` declaration name must be an atom".to_string())
        })?;
        let def_id = lower(arena, &pair[1])?;
        let pair_node = arena.alloc(Node::new(name, vec![Operand::Node(def_id)]));
        pairs.push(Operand::Node(pair_node));
    }
    let decls_node = arena.alloc(Node::new("decls", pairs));

    let mut operands = vec![Operand::Node(decls_node)];
    for body in bodies {
        operands.push(Operand::Node(lower(arena, body)?));
    }
    if operands.len() == 1 {
        return Err(CompileError::ReadError(
            "`let:` needs at least one body expression".to_string(),
        ));
    }
    Ok(arena.alloc(Node::new("let:", operands)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;

    #[test]
    fn lowers_plain_expression() {
        let forms = read_all("(add $1 (const 1 1))").unwrap();
        let mut arena = NodeArena::new();
        let id = lower(&mut arena, &forms[0]).unwrap();
        assert_eq!(arena.get(id).op, "add");
        assert_eq!(arena.get(id).operands.len(), 2);
    }

    #[test]
    fn lowers_let_into_decls_shape() {
        let forms = read_all("(let: (($foo (copy $1))) (load $foo 8))").unwrap();
        let mut arena = NodeArena::new();
        let id = lower(&mut arena, &forms[0]).unwrap();
        let node = arena.get(id);
        assert_eq!(node.op, "let:");
        assert_eq!(node.operands.len(), 2); // decls + one body
        match node.operands[0] {
            Operand::Node(decls_id) => {
                let decls = arena.get(decls_id);
                assert_eq!(decls.op, "decls");
                assert_eq!(decls.operands.len(), 1);
            }
            _ => panic!("expected decls node"),
        }
    }
}

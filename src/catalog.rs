//! Opcode and expression-operator catalogs (spec section 4.2, section 6).
//!
//! These are read-only tables supplied by external collaborators -- in the
//! real system, generated from the on-disk opcode and expression-operator
//! description files, which are explicitly out of scope here (spec section
//! 1). We only specify the abstract shape we consume: a name keyed map of
//! small descriptor structs, loadable from a JSON fixture via `serde` for
//! testing and for standalone use of this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Ty;

/// Operand direction, as declared by the opcode catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    ReadWrite,
}

impl Direction {
    pub fn is_write(self) -> bool {
        matches!(self, Direction::Write | Direction::ReadWrite)
    }
}

/// One operand descriptor of an opcode: direction plus the type tag used by
/// the physical catalog (`num32`, `num64`, `` `1 ``, or a register type).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandDesc {
    pub direction: Direction,
    pub type_tag: String,
}

impl OperandDesc {
    /// Type mapping from opcode operand type-tags to expression types
    /// (spec section 4.2): `num32`/`num64` -> `num`, `` `1 `` -> `?`, else `reg`.
    pub fn mapped_type(&self) -> Ty {
        match self.type_tag.as_str() {
            "num32" | "num64" => Ty::Num,
            "`1" => Ty::Any,
            _ => Ty::Reg,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpcodeDesc {
    pub name: String,
    pub operands: Vec<OperandDesc>,
}

impl OpcodeDesc {
    pub fn write_operand_index(&self) -> Option<usize> {
        self.operands.iter().position(|o| o.direction.is_write())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpcodeCatalog {
    opcodes: HashMap<String, OpcodeDesc>,
    /// Preserves catalog order for section 6's "one row per opcode in
    /// catalog order" requirement on `template_info`.
    order: Vec<String>,
}

impl OpcodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, desc: OpcodeDesc) {
        if !self.opcodes.contains_key(&desc.name) {
            self.order.push(desc.name.clone());
        }
        self.opcodes.insert(desc.name.clone(), desc);
    }

    pub fn get(&self, name: &str) -> Option<&OpcodeDesc> {
        self.opcodes.get(name)
    }

    pub fn names_in_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let opcodes: Vec<OpcodeDesc> = serde_json::from_str(text)?;
        let mut catalog = OpcodeCatalog::new();
        for desc in opcodes {
            catalog.insert(desc);
        }
        Ok(catalog)
    }
}

/// The operator catalog's variadic sentinel is, in the original, a negative
/// operand count; per the Design Notes this is modeled here as an explicit
/// flag instead of re-deriving it from a signed count every time it's
/// consulted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorDesc {
    pub name: String,
    pub operand_count: usize,
    pub param_count: usize,
    #[serde(default)]
    pub variadic: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperatorCatalog {
    operators: HashMap<String, OperatorDesc>,
}

impl OperatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, desc: OperatorDesc) {
        self.operators.insert(desc.name.clone(), desc);
    }

    pub fn get(&self, name: &str) -> Option<&OperatorDesc> {
        self.operators.get(name)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let operators: Vec<OperatorDesc> = serde_json::from_str(text)?;
        let mut catalog = OperatorCatalog::new();
        for desc in operators {
            catalog.insert(desc);
        }
        Ok(catalog)
    }
}

//! Builds the emitter-facing output (spec section 6, "Output"). This spec
//! fixes the values, not the textual layout; we fix a JSON layout here
//! purely so the library and its binary have something concrete to hand to
//! the (out of scope) C-header emitter in the meantime.

use serde::Serialize;

use crate::catalog::OpcodeCatalog;
use crate::compile::{ConstantTable, TemplateValue};
use crate::driver::FileUnit;

#[derive(Serialize)]
pub struct TemplateInfo {
    pub offset: usize,
    pub descriptor: String,
    pub length: usize,
    pub root: usize,
    pub flags: u32,
}

const FLAG_DESTRUCTIVE: u32 = 1;

#[derive(Serialize)]
pub struct CompiledOutput {
    pub templates: Vec<TemplateValue>,
    pub template_info: Vec<Option<TemplateInfo>>,
    pub constants: Vec<String>,
}

/// Lays `template_info` out in catalog order (spec section 6), with `None`
/// for opcodes that received no template.
pub fn build_output(opcodes: &OpcodeCatalog, unit: &FileUnit, constants: &ConstantTable) -> CompiledOutput {
    let template_info = opcodes
        .names_in_order()
        .map(|name| {
            unit.records.get(name).map(|record| TemplateInfo {
                offset: record.offset,
                descriptor: record.descriptor.clone(),
                length: record.length,
                root: record.root,
                flags: if record.destructive {
                    FLAG_DESTRUCTIVE
                } else {
                    0
                },
            })
        })
        .collect();

    CompiledOutput {
        templates: unit.templates.clone(),
        template_info,
        constants: constants.values().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Direction, OpcodeDesc, OperandDesc, OperatorCatalog, OperatorDesc};
    use crate::driver::CompileUnit;
    use std::path::Path;

    #[test]
    fn opcodes_without_templates_are_none() {
        let mut opcodes = OpcodeCatalog::new();
        opcodes.insert(OpcodeDesc {
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
        });
        opcodes.insert(OpcodeDesc {
            name: "store".into(),
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
        });
        let mut operators = OperatorCatalog::new();
        operators.insert(OperatorDesc {
            name: "copy".into(),
            operand_count: 1,
            param_count: 0,
            variadic: false,
        });

        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let file_unit = unit
            .compile_source("(template: load (copy $1))", Path::new("<test>"))
            .unwrap();
        let output = build_output(&opcodes, &file_unit, &unit.constants);
        assert_eq!(output.template_info.len(), 2);
        assert!(output.template_info[0].is_some());
        assert!(output.template_info[1].is_none());
    }
}

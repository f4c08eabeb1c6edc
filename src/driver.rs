//! The file driver (spec section 4.7).
//!
//! Processes top-level forms in order, accumulates per-opcode compiled
//! templates, and resolves `include:` by recursively parsing the named
//! file with the current macro map. Concurrency model (spec section 5):
//! strictly single-threaded and batch, one file handle open at a time,
//! closed on every exit path including errors (Rust's `File`/`String`
//! reads already guarantee this via RAII, so there is no explicit `close`
//! call to write).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::arena::NodeArena;
use crate::atom;
use crate::catalog::{OpcodeCatalog, OperatorCatalog};
use crate::compile::{self, CompiledTemplate, Compiler, ConstantTable, TemplateValue};
use crate::error::{CompileError, Result};
use crate::link::Linker;
use crate::lower::lower;
use crate::macros::{self, MacroTable};
use crate::reader::{read_all, SExpr};
use crate::types::TypeChecker;

/// One opcode's compiled template record (spec section 3, "Per-opcode
/// compiled record").
#[derive(Clone, Debug)]
pub struct OpcodeRecord {
    pub offset: usize,
    pub descriptor: String,
    pub length: usize,
    pub root: usize,
    pub destructive: bool,
}

/// Everything produced by compiling one top-level file, before being merged
/// into a parent driver run (spec section 4.7, `include:`). A plain file
/// with no includes produces this directly as its final `CompileUnit`.
#[derive(Default, Debug)]
pub struct FileUnit {
    pub templates: Vec<TemplateValue>,
    pub desc: String,
    pub records: HashMap<String, OpcodeRecord>,
}

impl FileUnit {
    fn merge_include(&mut self, included: FileUnit) -> Result<()> {
        let base_offset = self.templates.len();
        for (name, mut record) in included.records {
            if self.records.contains_key(&name) {
                return Err(CompileError::RedefinedOpcode(name));
            }
            record.offset += base_offset;
            self.records.insert(name, record);
        }
        self.templates.extend(included.templates);
        self.desc.push_str(&included.desc);
        Ok(())
    }
}

/// Process-wide compilation state, threaded explicitly through every
/// top-level form and every included file (spec section 5: "No shared
/// mutable state beyond process-local compilation state").
pub struct CompileUnit<'a> {
    pub opcodes: &'a OpcodeCatalog,
    pub operators: &'a OperatorCatalog,
    pub prefix: String,
    pub macros: MacroTable,
    pub constants: ConstantTable,
    arena: NodeArena,
    seen_includes: HashSet<PathBuf>,
    include_stack: Vec<PathBuf>,
    allow_include: bool,
}

impl<'a> CompileUnit<'a> {
    pub fn new(opcodes: &'a OpcodeCatalog, operators: &'a OperatorCatalog, prefix: &str) -> Self {
        CompileUnit {
            opcodes,
            operators,
            prefix: prefix.to_string(),
            macros: MacroTable::new(),
            constants: ConstantTable::new(),
            arena: NodeArena::new(),
            seen_includes: HashSet::new(),
            include_stack: Vec::new(),
            allow_include: true,
        }
    }

    /// Disables `include:` (spec section 6's `include` config flag): any
    /// `include:` form encountered afterward is rejected rather than
    /// resolved.
    pub fn set_allow_include(&mut self, allow: bool) {
        self.allow_include = allow;
    }

    /// Compiles `path` as the top-level file of the compilation unit.
    pub fn compile_file(&mut self, path: &Path) -> Result<FileUnit> {
        let source = fs::read_to_string(path)
            .map_err(|e| CompileError::IncludeMissing(path.to_path_buf(), e))?;
        self.compile_source(&source, path)
    }

    pub fn compile_source(&mut self, source: &str, path: &Path) -> Result<FileUnit> {
        let forms = read_all(source)?;
        let mut unit = FileUnit::default();
        for form in &forms {
            self.process_form(form, path, &mut unit)?;
        }
        Ok(unit)
    }

    fn process_form(&mut self, form: &SExpr, current_path: &Path, unit: &mut FileUnit) -> Result<()> {
        let items = form
            .as_list()
            .ok_or_else(|| CompileError::ReadError("top-level form must be a list".to_string()))?;
        let (head, rest) = items
            .split_first()
            .ok_or_else(|| CompileError::ReadError("empty top-level form".to_string()))?;
        let keyword = head
            .as_atom()
            .ok_or_else(|| CompileError::ReadError("top-level form head must be an atom".to_string()))?;

        match keyword {
            "macro:" => self.process_macro(rest),
            "template:" => self.process_template(rest, unit),
            "include:" => self.process_include(rest, current_path, unit),
            other => Err(CompileError::UnknownKeyword(other.to_string())),
        }
    }

    fn process_macro(&mut self, rest: &[SExpr]) -> Result<()> {
        if rest.len() != 3 {
            return Err(CompileError::ReadError(
                "`macro:` needs a name, a parameter list, and a body".to_string(),
            ));
        }
        let name = rest[0]
            .as_atom()
            .ok_or_else(|| CompileError::ReadError("macro name must be an atom".to_string()))?
            .to_string();
        let param_items = rest[1]
            .as_list()
            .ok_or_else(|| CompileError::ReadError("macro parameters must be a list".to_string()))?;
        let mut params = Vec::with_capacity(param_items.len());
        for p in param_items {
            let text = p
                .as_atom()
                .ok_or_else(|| CompileError::ReadError("macro parameter must be an atom".to_string()))?;
            let stripped = text.strip_prefix(',').ok_or_else(|| {
                CompileError::ReadError(format!("macro parameter `{}` must start with `,`", text))
            })?;
            params.push(stripped.to_string());
        }
        let body_id = lower(&mut self.arena, &rest[2])?;
        info!("registering macro ^{}", name);
        self.macros
            .register(name, params, body_id, &mut self.arena)
    }

    fn process_template(&mut self, rest: &[SExpr], unit: &mut FileUnit) -> Result<()> {
        if rest.len() != 2 {
            return Err(CompileError::ReadError(
                "`template:` needs an opcode name and a body".to_string(),
            ));
        }
        let raw_name = rest[0]
            .as_atom()
            .ok_or_else(|| CompileError::ReadError("opcode name must be an atom".to_string()))?;
        let (name, destructive) = match raw_name.strip_suffix('!') {
            Some(base) => (base.to_string(), true),
            None => (raw_name.to_string(), false),
        };

        if unit.records.contains_key(&name) {
            return Err(CompileError::RedefinedOpcode(name));
        }
        let opcode = self
            .opcodes
            .get(&name)
            .ok_or_else(|| CompileError::UnknownOpcode(name.clone()))?
            .clone();

        if destructive && opcode.write_operand_index().is_none() {
            return Err(CompileError::DestructiveWithoutWrite(name));
        }

        let root = lower(&mut self.arena, &rest[1])?;

        let mut linker = Linker::new(&mut self.arena, &opcode);
        linker.link(root)?;
        debug!("linked template body for `{}`", name);

        macros::expand_tree(&self.macros, &mut self.arena, root)?;
        debug!("expanded macros for `{}`", name);

        let actual_ty = {
            let mut checker = TypeChecker::new(&self.arena, &opcode);
            checker.type_of(root)?
        };
        let expected_ty = compile::expected_output_type(&opcode, destructive);
        if !actual_ty.equivalent(expected_ty) {
            return Err(CompileError::TypeMismatch {
                operator: name.clone(),
                position: 0,
                expected: expected_ty.to_string(),
                found: actual_ty.to_string(),
            });
        }

        let compiler = Compiler::new(
            &self.arena,
            &opcode,
            self.operators,
            &self.prefix,
            &mut self.constants,
        );
        let compiled: CompiledTemplate = compiler.compile(root)?;

        let offset = unit.templates.len();
        unit.desc.push_str(&compiled.desc);
        let record = OpcodeRecord {
            offset,
            descriptor: compiled.desc,
            length: compiled.template.len(),
            root: compiled.root,
            destructive,
        };
        unit.templates.extend(compiled.template);
        unit.records.insert(name, record);
        Ok(())
    }

    fn process_include(
        &mut self,
        rest: &[SExpr],
        current_path: &Path,
        unit: &mut FileUnit,
    ) -> Result<()> {
        if !self.allow_include {
            return Err(CompileError::IncludeDisabled);
        }
        if rest.len() != 1 {
            return Err(CompileError::ReadError(
                "`include:` needs exactly one path".to_string(),
            ));
        }
        let raw = rest[0]
            .as_atom()
            .ok_or_else(|| CompileError::ReadError("include path must be a string".to_string()))?;
        let path_text = raw.trim_matches('"');
        let resolved = resolve_include_path(current_path, path_text);
        let canonical = fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());

        if self.include_stack.contains(&canonical) {
            return Err(CompileError::IncludeCycle(resolved));
        }
        if self.seen_includes.contains(&canonical) {
            warn!("duplicate include of `{}` ignored", resolved.display());
            return Ok(());
        }

        self.include_stack.push(canonical.clone());
        self.seen_includes.insert(canonical.clone());
        let included_source = fs::read_to_string(&resolved)
            .map_err(|e| CompileError::IncludeMissing(resolved.clone(), e))?;
        let included_unit = self.compile_source(&included_source, &resolved);
        self.include_stack.pop();
        let included_unit = included_unit?;

        info!("included `{}`", resolved.display());
        unit.merge_include(included_unit)
    }
}

fn resolve_include_path(current_path: &Path, included: &str) -> PathBuf {
    match current_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(included),
        _ => PathBuf::from(included),
    }
}

/// Trims the prefix-aware enum constant formatting used when rendering an
/// opcode name in diagnostics; kept here rather than `atom` since it is
/// purely a driver-facing convenience, not a compiler-internal rule.
pub fn display_opcode_constant(prefix: &str, name: &str) -> String {
    atom::upper(prefix, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Direction, OpcodeDesc, OperandDesc, OperatorCatalog, OperatorDesc};

    fn catalogs() -> (OpcodeCatalog, OperatorCatalog) {
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
        for (name, operand_count, param_count) in [
            ("copy", 1, 0),
            ("load", 1, 0),
            ("store", 2, 0),
            ("add", 2, 0),
            ("const", 2, 0),
            ("discard", 1, 0),
            ("do", 0, 0),
            ("dov", 0, 0),
        ] {
            operators.insert(OperatorDesc {
                name: name.into(),
                operand_count,
                param_count,
                variadic: false,
            });
        }
        (opcodes, operators)
    }

    #[test]
    fn compiles_a_simple_template() {
        let (opcodes, operators) = catalogs();
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let unit_result = unit
            .compile_source("(template: load (copy $1))", Path::new("<test>"))
            .unwrap();
        assert!(unit_result.records.contains_key("load"));
        let record = &unit_result.records["load"];
        assert_eq!(record.offset, 0);
        assert!(record.descriptor.starts_with('n'));
    }

    #[test]
    fn redefined_opcode_is_rejected() {
        let (opcodes, operators) = catalogs();
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let src = "(template: load (copy $1))\n(template: load (copy $1))";
        assert!(unit.compile_source(src, Path::new("<test>")).is_err());
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let (opcodes, operators) = catalogs();
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let src = "(template: nonexistent (copy $1))";
        assert!(unit.compile_source(src, Path::new("<test>")).is_err());
    }

    #[test]
    fn unknown_top_level_keyword_is_fatal() {
        let (opcodes, operators) = catalogs();
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let src = "(weird: 1 2 3)";
        assert!(unit.compile_source(src, Path::new("<test>")).is_err());
    }

    #[test]
    fn destructive_opcode_without_write_operand_is_rejected() {
        let mut opcodes = OpcodeCatalog::new();
        opcodes.insert(OpcodeDesc {
            name: "guard_op".into(),
            operands: vec![OperandDesc {
                direction: Direction::Read,
                type_tag: "pargs".into(),
            }],
        });
        let mut operators = OperatorCatalog::new();
        operators.insert(OperatorDesc {
            name: "copy".into(),
            operand_count: 1,
            param_count: 0,
            variadic: false,
        });
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let src = "(template: guard_op! (copy $0))";
        assert!(unit.compile_source(src, Path::new("<test>")).is_err());
    }

    #[test]
    fn mutually_including_files_are_reported_as_a_cycle_not_a_duplicate() {
        let (opcodes, operators) = catalogs();
        let dir = std::env::temp_dir().join(format!(
            "exprtc-cycle-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.expr");
        let b = dir.join("b.expr");
        fs::write(&a, "(include: \"b.expr\")\n(template: load (copy $1))").unwrap();
        fs::write(&b, "(include: \"a.expr\")").unwrap();

        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let err = unit.compile_file(&a).unwrap_err();
        assert!(matches!(err, CompileError::IncludeCycle(_)));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn repeated_include_of_an_already_finished_file_is_a_harmless_duplicate() {
        let (opcodes, operators) = catalogs();
        let dir = std::env::temp_dir().join(format!(
            "exprtc-dup-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let shared = dir.join("shared.expr");
        let a = dir.join("a.expr");
        fs::write(&shared, "(template: load (copy $1))").unwrap();
        fs::write(
            &a,
            "(include: \"shared.expr\")\n(include: \"shared.expr\")\n(template: store (copy \\$0))",
        )
        .unwrap();

        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let result = unit.compile_file(&a).unwrap();
        assert!(result.records.contains_key("load"));
        assert!(result.records.contains_key("store"));

        let _ = fs::remove_dir_all(&dir);
    }
}

//! Diagnostics. Every error is fatal: the driver reports the first one and
//! terminates (spec section 7, "There is no local recovery").

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("malformed s-expression: {0}")]
    ReadError(String),

    #[error("unknown top-level keyword `{0}`")]
    UnknownKeyword(String),

    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    #[error("opcode `{0}` already has a template")]
    RedefinedOpcode(String),

    #[error("macro `{0}` already defined")]
    RedefinedMacro(String),

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("unknown macro `{0}`")]
    UnknownMacro(String),

    #[error("macro `{name}` called with {got} argument(s), expected {expected}")]
    MacroArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("unbound name `${0}`")]
    UnboundName(String),

    #[error("macro parameter `,{0}` has no matching argument")]
    UnmatchedMacroParam(String),

    #[error("operand reference `${0}` out of range for opcode `{1}`")]
    OperandRefOutOfRange(String, String),

    #[error("operand `${position}` of opcode `{opcode}` is a write operand and needs a `\\$` reference")]
    WriteRefMissing { opcode: String, position: usize },

    #[error("operand `${position}` of opcode `{opcode}` is not a write operand, `\\$` is forbidden")]
    WriteRefForbidden { opcode: String, position: usize },

    #[error("operator `{operator}` operand {position}: size parameter must be a macro call, a number, or a `_sz` bareword")]
    SizeParamBad { operator: String, position: usize },

    #[error("type mismatch in `{operator}` at operand {position}: expected {expected}, found {found}")]
    TypeMismatch {
        operator: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("destructive opcode `{0}` has no write operand")]
    DestructiveWithoutWrite(String),

    #[error("could not open included file `{0}`: {1}")]
    IncludeMissing(PathBuf, std::io::Error),

    #[error("cyclic include detected at `{0}`")]
    IncludeCycle(PathBuf),

    #[error("`include:` is disabled by configuration")]
    IncludeDisabled,
}

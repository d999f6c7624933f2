//! Custom error type for everything that can abort compilation of a module.
//!
//! Every variant carries enough position information to point the user at the
//! offending section, function, or byte offset. Offsets are absolute offsets
//! into the module buffer. No error is retried; none is swallowed.

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Reading the module buffer from disk failed.
    Io { path: PathBuf, message: String },
    /// A read required more bytes than remained in the (sub-)buffer.
    ReadShort { offset: usize, wanted: usize },
    /// A LEB128 integer ran over its maximum number of groups (5 for u32,
    /// 10 for u64). The cap is strict: trailing all-zero groups also fail.
    LebOverflow { offset: usize },
    /// The module does not start with `\0asm`.
    BadMagic,
    /// The module version is not 1.
    BadVersion { found: u32 },
    /// A known section id appeared after a section it must precede.
    BadSectionOrder { id: u8, previous: u8, offset: usize },
    /// A section body was shorter or longer than its declared size, or its
    /// contents were inconsistent with another section (e.g. datacount).
    BadSectionFraming { id: u8, offset: usize, message: String },
    /// A non-custom section id outside the known range.
    UnknownSection { id: u8, offset: usize },
    /// A length-prefixed name was not valid UTF-8.
    BadName { offset: usize },
    /// An index referenced an entry outside its index space.
    IndexOutOfRange { space: &'static str, index: u32, limit: u32, offset: usize },
    /// The operand stack did not satisfy an instruction's signature.
    TypeMismatch { function: u32, offset: usize, message: String },
    /// A branch targeted a label deeper than the current label stack.
    LabelOutOfRange { function: u32, offset: usize, depth: u32, frames: u32 },
    /// An opcode outside the supported MVP subset.
    UnsupportedProposal { function: u32, offset: usize, opcode: u32 },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CompileError::*;
        match self {
            Io { path, message } =>
                write!(f, "{}: {}", path.display(), message),
            ReadShort { offset, wanted } =>
                write!(f, "unexpected end of data at offset {:#x}: {} more byte(s) required", offset, wanted),
            LebOverflow { offset } =>
                write!(f, "LEB128 integer at offset {:#x} exceeds its maximum length", offset),
            BadMagic =>
                write!(f, "not a WebAssembly module (missing \\0asm magic bytes)"),
            BadVersion { found } =>
                write!(f, "unsupported WebAssembly version {} (only version 1 is supported)", found),
            BadSectionOrder { id, previous, offset } =>
                write!(f, "section id {} at offset {:#x} may not follow section id {}", id, offset, previous),
            BadSectionFraming { id, offset, message } =>
                write!(f, "malformed section id {} at offset {:#x}: {}", id, offset, message),
            UnknownSection { id, offset } =>
                write!(f, "unknown section id {} at offset {:#x}", id, offset),
            BadName { offset } =>
                write!(f, "name at offset {:#x} is not valid UTF-8", offset),
            IndexOutOfRange { space, index, limit, offset } =>
                write!(f, "{} index {} at offset {:#x} out of range (limit {})", space, index, offset, limit),
            TypeMismatch { function, offset, message } =>
                write!(f, "type error in function {} at offset {:#x}: {}", function, offset, message),
            LabelOutOfRange { function, offset, depth, frames } =>
                write!(f, "branch depth {} in function {} at offset {:#x} exceeds the {} open block(s)", depth, function, offset, frames),
            UnsupportedProposal { function, offset, opcode } =>
                write!(f, "opcode {:#04x} in function {} at offset {:#x} is outside the supported MVP subset", opcode, function, offset),
        }
    }
}

impl std::error::Error for CompileError {}

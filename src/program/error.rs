use std::fmt;

use crate::foundation::error::TexPipeError;

/// Syntax or semantic error in DSL source, anchored at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset of the offending token in the source text.
    pub offset: usize,
    /// Human-readable description.
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for TexPipeError {
    fn from(e: ParseError) -> Self {
        TexPipeError::compile(e.to_string())
    }
}

/// Failure to decode bytecode. Shared by the VM, the static scanners and the disassembler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// An operand ran past the end of the executable range.
    #[error("bytecode truncated at byte {at}")]
    Truncated {
        /// Offset of the read that failed.
        at: usize,
    },
    /// The opcode byte is not part of the instruction set.
    #[error("unknown opcode {op} at byte {at}")]
    UnknownOpcode {
        /// Raw opcode value.
        op: u8,
        /// Offset of the opcode byte.
        at: usize,
    },
    /// The `SrcRef` kind byte is neither `TexId` nor `Sub`.
    #[error("unknown source kind {kind} at byte {at}")]
    UnknownSrcKind {
        /// Raw kind value.
        kind: u8,
        /// Offset of the kind byte.
        at: usize,
    },
}

/// Failure while baking a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// An operand, or the final `End`, lies past the end of the executable range.
    #[error("bytecode truncated at byte {at}")]
    TruncatedBytecode {
        /// Offset of the read that failed.
        at: usize,
    },
    /// The opcode byte is not part of the instruction set.
    #[error("unknown opcode {op} at byte {at}")]
    UnknownOpcode {
        /// Raw opcode value.
        op: u8,
        /// Offset of the opcode byte.
        at: usize,
    },
    /// A `SrcRef` kind byte is neither `TexId` nor `Sub`.
    #[error("unknown source kind {kind} at byte {at}")]
    UnknownSrcKind {
        /// Raw kind value.
        kind: u8,
        /// Offset of the kind byte.
        at: usize,
    },
    /// The provider had no usable texture for this id.
    #[error("texture {id} is missing or has an invalid view")]
    MissingTexture {
        /// Raw texture id.
        id: u32,
    },
    /// An operation that modifies an image ran before any base image exists.
    #[error("{op} at byte {at} needs a base image")]
    MissingBase {
        /// Mnemonic of the operation.
        op: &'static str,
        /// Offset of the instruction.
        at: usize,
    },
    /// An operand value the VM cannot execute (for example a zero size).
    #[error("invalid operand at byte {at}: {message}")]
    InvalidOperand {
        /// Offset of the instruction.
        at: usize,
        /// What was wrong.
        message: String,
    },
    /// A `Sub` source points outside the program buffer.
    #[error("sub-program {offset}+{len} lies outside the {code_len}-byte program")]
    SubRangeOutOfBounds {
        /// Start of the referenced range.
        offset: u32,
        /// Length of the referenced range.
        len: u32,
        /// Size of the whole program.
        code_len: usize,
    },
    /// A `Sub` source refers to a range that is already executing.
    #[error("sub-program {offset}+{len} refers to itself")]
    RecursiveSubProgram {
        /// Start of the referenced range.
        offset: u32,
        /// Length of the referenced range.
        len: u32,
    },
    /// Sub-programs nest deeper than the VM allows.
    #[error("sub-programs nested deeper than {limit} levels")]
    SubProgramTooDeep {
        /// Depth limit that was hit.
        limit: usize,
    },
    /// An operation would produce an image larger than the VM allows.
    #[error("image {width}x{height} exceeds the pixel limit")]
    ImageTooLarge {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
}

impl From<DecodeError> for VmError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Truncated { at } => VmError::TruncatedBytecode { at },
            DecodeError::UnknownOpcode { op, at } => VmError::UnknownOpcode { op, at },
            DecodeError::UnknownSrcKind { kind, at } => VmError::UnknownSrcKind { kind, at },
        }
    }
}

impl From<VmError> for TexPipeError {
    fn from(e: VmError) -> Self {
        TexPipeError::bake(e.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/program/error.rs"]
mod tests;

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::foundation::error::{TexPipeError, TexPipeResult};
use crate::foundation::math::Fnv1a64;
use crate::program::bytecode::{CodeWriter, MAX_U24, Op, SRC_KIND_TEX};
use crate::program::deps::{self, AnimSpec};

/// Linked bytecode together with its content hash. This is the cache key of a pipeline.
///
/// Equality compares the hash first and then the bytes, so two programs are equal exactly when
/// their bytecode is identical.
#[derive(Debug, Clone)]
pub struct HashedProgram {
    hash: u64,
    code: Vec<u8>,
}

impl HashedProgram {
    pub(crate) fn new(code: Vec<u8>) -> Self {
        Self {
            hash: Fnv1a64::hash_bytes(&code),
            code,
        }
    }

    /// The trivial pipeline that shows raw texture `id` unchanged.
    pub fn for_texture(id: u32) -> TexPipeResult<Self> {
        if id > MAX_U24 {
            return Err(TexPipeError::input(format!(
                "texture id {id} does not fit in 24 bits"
            )));
        }
        let mut w = CodeWriter::default();
        w.op(Op::BaseTex);
        w.u8(SRC_KIND_TEX);
        w.u24(id);
        w.op(Op::End);
        Ok(Self::new(w.into_bytes()))
    }

    /// FNV-1a hash of the bytecode.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The bytecode.
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    /// Raw texture ids the program reads, in first-use order.
    pub fn dependencies(&self) -> SmallVec<[u32; 8]> {
        deps::dependencies(&self.code)
    }

    /// Animation opcodes found in the program.
    pub fn animation_specs(&self) -> Vec<AnimSpec> {
        deps::animation_specs(&self.code)
    }
}

impl PartialEq for HashedProgram {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.code == other.code
    }
}

impl Eq for HashedProgram {}

impl Hash for HashedProgram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for HashedProgram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HashedProgram {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.code.cmp(&other.code))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/hashed.rs"]
mod tests;

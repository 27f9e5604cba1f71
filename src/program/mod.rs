//! Texture DSL to bytecode to pixels.

pub(crate) mod ast;
pub(crate) mod bytecode;
pub(crate) mod compile;
pub(crate) mod deps;
pub(crate) mod error;
pub(crate) mod lexer;
pub(crate) mod parser;
pub(crate) mod raster;
pub(crate) mod vm;

use smallvec::SmallVec;

use crate::foundation::error::{TexPipeError, TexPipeResult};
use crate::pipeline::hashed::HashedProgram;
use crate::program::bytecode::{MAX_CODE_BYTES, MAX_U24, write_u24};
use crate::program::compile::{Patch, compile_source};
use crate::program::deps::AnimSpec;
use crate::program::raster::Image;
use crate::program::vm::TextureView;

/// A compiled texture pipeline.
///
/// Freshly compiled programs refer to textures by name. [`TextureProgram::link`] resolves
/// those names to raw texture ids; baking or hashing an unlinked program is a
/// [`TexPipeError::Link`] error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureProgram {
    code: Vec<u8>,
    patches: Vec<Patch>,
    linked: bool,
}

impl TextureProgram {
    /// Compile DSL source such as `stone |> overlay(tex(moss) |> opacity(128))`.
    pub fn compile(src: &str) -> TexPipeResult<Self> {
        let compiled = compile_source(src)?;
        let linked = compiled.patches.is_empty();
        Ok(Self {
            code: compiled.code,
            patches: compiled.patches,
            linked,
        })
    }

    /// Wrap raw bytecode, for example a program previously obtained from [`Self::bytes`].
    ///
    /// The bytecode is checked structurally; the result has no names left to link.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> TexPipeResult<Self> {
        let code = bytes.into();
        if code.is_empty() {
            return Err(TexPipeError::input("bytecode is empty"));
        }
        if code.len() > MAX_CODE_BYTES {
            return Err(TexPipeError::input(format!(
                "bytecode is {} bytes, limit is {MAX_CODE_BYTES}",
                code.len()
            )));
        }
        deps::tex_id_sites(&code)?;
        Ok(Self {
            code,
            patches: Vec::new(),
            linked: true,
        })
    }

    /// Resolve every texture name to a raw id and write the ids into the bytecode.
    ///
    /// Nothing is written unless all names resolve. Patch sites are kept, so a program can be
    /// linked again against a different resolver; a failed attempt leaves it unlinked.
    pub fn link(&mut self, mut resolver: impl FnMut(&str) -> Option<u32>) -> TexPipeResult<()> {
        let mut ids = Vec::with_capacity(self.patches.len());
        for p in &self.patches {
            let id = match resolver(&p.name) {
                Some(id) if id <= MAX_U24 => id,
                Some(id) => {
                    self.linked = false;
                    return Err(TexPipeError::link(format!(
                        "texture '{}' resolved to id {id}, which does not fit in 24 bits",
                        p.name
                    )));
                }
                None => {
                    self.linked = false;
                    return Err(TexPipeError::link(format!(
                        "unresolved texture name '{}'",
                        p.name
                    )));
                }
            };
            ids.push(id);
        }
        for (p, id) in self.patches.iter().zip(ids) {
            write_u24(&mut self.code, p.offset, id);
        }
        self.linked = true;
        Ok(())
    }

    /// Whether every texture name has been resolved.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Name references recorded at compile time.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Distinct texture names, in source order, that still need linking.
    pub fn unresolved_names(&self) -> Vec<&str> {
        if self.linked {
            return Vec::new();
        }
        let mut out: Vec<&str> = Vec::new();
        for p in &self.patches {
            if !out.contains(&p.name.as_str()) {
                out.push(&p.name);
            }
        }
        out
    }

    fn ensure_linked(&self) -> TexPipeResult<()> {
        if self.linked {
            return Ok(());
        }
        Err(TexPipeError::link(format!(
            "program has unresolved texture names: {}",
            self.unresolved_names().join(", ")
        )))
    }

    /// Run the program against `provider` at `time_seconds`.
    pub fn bake<'p>(
        &self,
        provider: impl FnMut(u32) -> Option<TextureView<'p>>,
        time_seconds: f64,
    ) -> TexPipeResult<Image> {
        self.ensure_linked()?;
        Ok(vm::run(&self.code, provider, time_seconds)?)
    }

    /// Content-hashed copy used as a pipeline cache key.
    pub fn hashed(&self) -> TexPipeResult<HashedProgram> {
        self.ensure_linked()?;
        Ok(HashedProgram::new(self.code.clone()))
    }

    /// Raw bytecode, sub-program arena included.
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    /// Raw texture ids the program reads.
    pub fn dependencies(&self) -> SmallVec<[u32; 8]> {
        deps::dependencies(&self.code)
    }

    /// Animation parameters of every `anim` in the program.
    pub fn animation_specs(&self) -> Vec<AnimSpec> {
        deps::animation_specs(&self.code)
    }

    /// Replace each texture id `i` by `remap[i]`. Fails without modifying anything when an
    /// id has no entry.
    pub fn remap_tex_ids(&mut self, remap: &[u32]) -> TexPipeResult<()> {
        self.ensure_linked()?;
        deps::remap_tex_ids(&mut self.code, remap)
    }

    /// Readable listing of the bytecode. Unlinked ids are annotated with their names.
    pub fn disassemble(&self) -> String {
        let patches: &[Patch] = if self.linked { &[] } else { &self.patches };
        bytecode::disassemble(&self.code, patches)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/program/mod.rs"]
mod tests;

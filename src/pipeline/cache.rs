use std::collections::HashMap;

use smallvec::SmallVec;

use crate::atlas::gpu::{CommandRecorder, DescriptorOut};
use crate::atlas::texture_atlas::{AtlasId, OVERFLOW_ID, TextureAtlas};
use crate::foundation::error::TexPipeResult;
use crate::foundation::math::argb_to_rgba8;
use crate::pipeline::anim::AnimatedPipelineState;
use crate::pipeline::hashed::HashedProgram;
use crate::program::raster::Image;
use crate::program::vm::{self, TextureView};

/// Shown when a pipeline cannot be baked and has no dependency to fall back on.
const PLACEHOLDER_ARGB: u32 = 0xFFFF_00FF;

/// Read-only view returned by [`PipelineCache::host_texture`].
pub type HostTextureView<'a> = TextureView<'a>;

/// A raw or baked texture kept on the host, in ARGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTexture {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// `width * height` ARGB pixels, row-major.
    pub pixels: Vec<u32>,
}

impl StoredTexture {
    /// Wrap `pixels`. Nothing is checked until the texture is read.
    pub fn new(width: u16, height: u16, pixels: Vec<u32>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    fn solid(argb: u32) -> Self {
        Self::new(1, 1, vec![argb])
    }

    /// `None` when a side is zero or wider than `u16::MAX`, or the pixel count is off.
    fn from_image(img: Image) -> Option<Self> {
        let width = u16::try_from(img.width).ok().filter(|&w| w > 0)?;
        let height = u16::try_from(img.height).ok().filter(|&h| h > 0)?;
        if img.pixels.len() != usize::from(width) * usize::from(height) {
            return None;
        }
        Some(Self::new(width, height, img.pixels))
    }

    fn view(&self) -> Option<TextureView<'_>> {
        let (w, h) = (usize::from(self.width), usize::from(self.height));
        if w == 0 || h == 0 || self.pixels.len() < w * h {
            return None;
        }
        Some(TextureView {
            width: u32::from(self.width),
            height: u32::from(self.height),
            pixels: &self.pixels,
        })
    }
}

/// Maps pipeline programs to atlas ids and keeps their baked pixels current.
///
/// Raw textures are owned here. Whenever one changes, every program that reads it is
/// rebaked on the next [`PipelineCache::flush_new_pipelines`] and its pixels handed to the
/// atlas. Animated programs are rebaked when their visible frame changes.
pub struct PipelineCache {
    atlas: TextureAtlas,
    programs: HashMap<HashedProgram, AtlasId>,
    raw: HashMap<u32, StoredTexture>,
    baked: HashMap<AtlasId, StoredTexture>,
    dependents: HashMap<u32, SmallVec<[HashedProgram; 8]>>,
    animated: HashMap<HashedProgram, AnimatedPipelineState>,
    changed_textures: Vec<u32>,
    changed_programs: Vec<HashedProgram>,
    anim_time: f64,
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("atlas", &self.atlas)
            .field("programs", &self.programs.len())
            .field("raw", &self.raw.len())
            .field("animated", &self.animated.len())
            .field("anim_time", &self.anim_time)
            .finish_non_exhaustive()
    }
}

impl PipelineCache {
    /// Take ownership of `atlas`. Ids registered on it beforehand stay untouched.
    pub fn new(atlas: TextureAtlas) -> Self {
        Self {
            atlas,
            programs: HashMap::new(),
            raw: HashMap::new(),
            baked: HashMap::new(),
            dependents: HashMap::new(),
            animated: HashMap::new(),
            changed_textures: Vec::new(),
            changed_programs: Vec::new(),
            anim_time: 0.0,
        }
    }

    /// Atlas id of `program`, registering it on first sight.
    ///
    /// A new program is baked on the next [`Self::flush_new_pipelines`]. When the atlas has no
    /// id left, [`OVERFLOW_ID`] is returned and nothing is cached, so a later call retries.
    pub fn get_by_pipeline(&mut self, program: &HashedProgram) -> AtlasId {
        if let Some(&id) = self.programs.get(program) {
            return id;
        }
        let id = self.atlas.register_texture();
        if id == OVERFLOW_ID {
            tracing::warn!(hash = program.hash(), "no atlas id left for pipeline");
            return id;
        }

        for tex in program.dependencies() {
            self.dependents
                .entry(tex)
                .or_default()
                .push(program.clone());
        }
        if let Some(state) = AnimatedPipelineState::from_specs(program.animation_specs()) {
            self.animated.insert(program.clone(), state);
        }
        self.programs.insert(program.clone(), id);
        self.changed_programs.push(program.clone());
        id
    }

    /// Atlas id of `program` if it is cached.
    pub fn cached_id(&self, program: &HashedProgram) -> Option<AtlasId> {
        self.programs.get(program).copied()
    }

    /// Drop `program` and release its atlas id. Unknown programs are ignored.
    pub fn free_by_pipeline(&mut self, program: &HashedProgram) -> TexPipeResult<()> {
        let Some(id) = self.programs.remove(program) else {
            return Ok(());
        };
        for tex in program.dependencies() {
            debug_assert!(
                self.dependents.contains_key(&tex),
                "texture {tex} has no dependents"
            );
            let Some(list) = self.dependents.get_mut(&tex) else {
                continue;
            };
            let pos = list.iter().position(|p| p == program);
            debug_assert!(pos.is_some(), "pipeline missing from dependents of {tex}");
            if let Some(pos) = pos {
                list.remove(pos);
            }
            if list.is_empty() {
                self.dependents.remove(&tex);
            }
        }
        self.animated.remove(program);
        self.changed_programs.retain(|p| p != program);
        self.baked.remove(&id);
        self.atlas.remove_texture(id)
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether no program is cached.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Replace raw texture `tex_id`. Programs reading it are rebaked on the next flush.
    pub fn update_texture(&mut self, tex_id: u32, texture: StoredTexture) {
        self.raw.insert(tex_id, texture);
        self.changed_textures.push(tex_id);
    }

    /// Forget raw texture `tex_id`. Programs reading it fall back on the next flush.
    pub fn free_texture(&mut self, tex_id: u32) {
        self.raw.remove(&tex_id);
        self.changed_textures.push(tex_id);
    }

    /// Host pixels for `id`: a raw texture with that id, else the baked copy of the atlas
    /// entry with that id.
    pub fn host_texture(&self, id: u32) -> Option<HostTextureView<'_>> {
        self.raw
            .get(&id)
            .and_then(StoredTexture::view)
            .or_else(|| self.baked.get(&id).and_then(StoredTexture::view))
    }

    /// Rebake every new program and every program whose inputs changed since the last call,
    /// and hand the pixels to the atlas. Returns the atlas ids that were rebaked.
    #[tracing::instrument(skip_all)]
    pub fn flush_new_pipelines(&mut self) -> Vec<AtlasId> {
        let mut textures = std::mem::take(&mut self.changed_textures);
        textures.sort_unstable();
        textures.dedup();

        let mut programs: Vec<HashedProgram> = textures
            .iter()
            .filter_map(|tex| self.dependents.get(tex))
            .flatten()
            .cloned()
            .collect();
        programs.append(&mut self.changed_programs);
        programs.sort();
        programs.dedup();

        let mut rebaked = Vec::with_capacity(programs.len());
        for program in &programs {
            let Some(&id) = self.programs.get(program) else {
                continue;
            };
            let texture = self.generate(program);
            let (w, h) = (u32::from(texture.width), u32::from(texture.height));
            let rgba = argb_to_rgba8(&texture.pixels);
            if let Err(e) = self.atlas.set_texture_data(id, w, h, &rgba, w * 4) {
                tracing::warn!(id, error = %e, "pipeline upload rejected");
            }
            self.baked.insert(id, texture);
            rebaked.push(id);
        }

        tracing::debug!(
            textures = textures.len(),
            pipelines = rebaked.len(),
            "pipelines regenerated"
        );
        rebaked
    }

    fn generate(&self, program: &HashedProgram) -> StoredTexture {
        let provider = |tex: u32| self.raw.get(&tex).and_then(StoredTexture::view);
        match vm::run(program.bytes(), provider, self.anim_time) {
            Ok(img) => {
                let (width, height) = (img.width, img.height);
                if let Some(texture) = StoredTexture::from_image(img) {
                    return texture;
                }
                tracing::warn!(
                    hash = program.hash(),
                    width,
                    height,
                    "baked pipeline has an unusable size"
                );
            }
            Err(e) => {
                tracing::warn!(hash = program.hash(), error = %e, "pipeline bake failed");
            }
        }
        self.fallback(program)
    }

    fn fallback(&self, program: &HashedProgram) -> StoredTexture {
        program
            .dependencies()
            .first()
            .and_then(|tex| self.raw.get(tex))
            .cloned()
            .unwrap_or_else(|| StoredTexture::solid(PLACEHOLDER_ARGB))
    }

    /// Advance animated programs to `time_seconds`.
    ///
    /// Programs whose visible frame changed (and every smooth animation) are marked for
    /// rebake. Later bakes run at this time. Returns whether anything was marked.
    pub fn update_animated_pipelines(&mut self, time_seconds: f64) -> bool {
        self.anim_time = time_seconds;
        let raw = &self.raw;
        let sheet_size =
            |tex: u32| raw.get(&tex).map(|t| (u32::from(t.width), u32::from(t.height)));

        let mut any = false;
        for (program, state) in &mut self.animated {
            if state.advance(time_seconds, sheet_size) {
                self.changed_programs.push(program.clone());
                any = true;
            }
        }
        any
    }

    /// Current atlas side in texels.
    pub fn atlas_side(&self) -> u32 {
        self.atlas.atlas_side()
    }

    /// Current atlas layer count.
    pub fn atlas_layers(&self) -> u32 {
        self.atlas.atlas_layers()
    }

    /// Layer ceiling of the atlas.
    pub fn max_layers(&self) -> u32 {
        self.atlas.max_layers()
    }

    /// Size of the atlas id table.
    pub fn max_texture_id(&self) -> u32 {
        self.atlas.max_texture_id()
    }

    /// See [`TextureAtlas::reserved_overflow_id`].
    pub fn reserved_overflow_id(&self) -> AtlasId {
        self.atlas.reserved_overflow_id()
    }

    /// See [`TextureAtlas::reserved_layer_id`].
    pub fn reserved_layer_id(&self, layer: u32) -> AtlasId {
        self.atlas.reserved_layer_id(layer)
    }

    /// See [`TextureAtlas::request_layer_count`].
    pub fn request_layer_count(&mut self, layers: u32) {
        self.atlas.request_layer_count(layers);
    }

    /// See [`TextureAtlas::flush_uploads_and_barriers`].
    pub fn flush_uploads_and_barriers(&mut self, rec: &mut dyn CommandRecorder) -> DescriptorOut {
        self.atlas.flush_uploads_and_barriers(rec)
    }

    /// See [`TextureAtlas::notify_gpu_finished`].
    pub fn notify_gpu_finished(&mut self) {
        self.atlas.notify_gpu_finished();
    }

    /// The underlying atlas.
    pub fn atlas(&self) -> &TextureAtlas {
        &self.atlas
    }

    /// Mutable access to the underlying atlas, e.g. for raw textures placed directly.
    pub fn atlas_mut(&mut self) -> &mut TextureAtlas {
        &mut self.atlas
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/cache.rs"]
mod tests;

//! Texture atlas allocator.
//!
//! Textures are registered for a stable id, fed RGBA8 pixels, and placed into a square 2D array
//! image by [`TextureAtlas::flush_uploads_and_barriers`]. The atlas grows by layers first and by
//! side second. A full repack builds a second image across several flushes and swaps it in once
//! the GPU has consumed every upload into it.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use crate::atlas::gpu::{
    BufferHandle, CommandRecorder, DescriptorOut, GpuCommand, GpuDevice, ImageHandle, ImageLayout,
};
use crate::atlas::packer::{Fit, MaxRectsBin, Rect};
use crate::atlas::staging::{SharedStaging, SharedStagingBuffer};
use crate::foundation::config::{ALLOWED_ATLAS_SIDES, AtlasConfig, ENTRY_BYTES};
use crate::foundation::error::{TexPipeError, TexPipeResult};

/// Index into the descriptor table.
pub type AtlasId = u32;

/// Returned by [`TextureAtlas::register_texture`] when the id space is exhausted. Its entry is
/// always invalid.
pub const OVERFLOW_ID: AtlasId = 0;

/// Sentinel id that every atlas call ignores.
pub const INVALID_TEXTURE_ID: AtlasId = u32::MAX;

/// [`Entry::flags`] bit: the entry points at uploaded texels.
pub const ENTRY_VALID: u32 = 1;
/// [`Entry::flags`] bit: data is set but not uploaded yet.
pub const ENTRY_DIAG_PENDING: u32 = 2;
/// [`Entry::flags`] bit: the last data set was rejected as too large.
pub const ENTRY_DIAG_TOO_LARGE: u32 = 4;

pub(crate) const ENTRY_SIZE: usize = ENTRY_BYTES as usize;

/// One descriptor record, laid out for a std430 storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Entry {
    /// `(u_min, v_min, u_max, v_max)`, half-texel inset over the padded rectangle.
    pub uv_min_max: [f32; 4],
    /// Array layer.
    pub layer: u32,
    /// `ENTRY_*` bits.
    pub flags: u32,
    /// Keeps the record 16-byte aligned.
    pub pad: [u32; 2],
}

impl Entry {
    fn invalid(pending: bool, too_large: bool) -> Self {
        let mut flags = 0;
        if pending {
            flags |= ENTRY_DIAG_PENDING;
        }
        if too_large {
            flags |= ENTRY_DIAG_TOO_LARGE;
        }
        Self {
            flags,
            ..Self::default()
        }
    }

    /// Whether [`ENTRY_VALID`] is set.
    pub fn is_valid(&self) -> bool {
        self.flags & ENTRY_VALID != 0
    }

    /// Little-endian GPU representation.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        for (i, v) in self.uv_min_max.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[16..20].copy_from_slice(&self.layer.to_le_bytes());
        out[20..24].copy_from_slice(&self.flags.to_le_bytes());
        out[24..28].copy_from_slice(&self.pad[0].to_le_bytes());
        out[28..32].copy_from_slice(&self.pad[1].to_le_bytes());
        out
    }

    /// Inverse of [`Entry::to_bytes`].
    pub fn from_bytes(b: &[u8; ENTRY_SIZE]) -> Self {
        let word = |at: usize| [b[at], b[at + 1], b[at + 2], b[at + 3]];
        Self {
            uv_min_max: [
                f32::from_le_bytes(word(0)),
                f32::from_le_bytes(word(4)),
                f32::from_le_bytes(word(8)),
                f32::from_le_bytes(word(12)),
            ],
            layer: u32::from_le_bytes(word(16)),
            flags: u32::from_le_bytes(word(20)),
            pad: [u32::from_le_bytes(word(24)), u32::from_le_bytes(word(28))],
        }
    }
}

/// Lifecycle state of a registered id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureState {
    /// Registered, no data.
    #[default]
    Registered,
    /// Data set, waiting for a flush to place and upload it.
    PendingUpload,
    /// Uploaded; the entry is valid.
    Valid,
    /// The last data set exceeded `max_texture_size`.
    NotLoadedTooLarge,
    /// Released; the id is back in the free pool.
    Removed,
}

/// Resource pressure and repack progress notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtlasEvent {
    /// An upload did not fit in the staging buffer and was deferred.
    StagingOverflow,
    /// A texture could not be placed even after growing; it stays pending.
    AtlasOutOfSpace,
    /// The device failed to create a grown or repacked image.
    GpuOutOfMemory,
    /// A full repack began filling its target image.
    RepackStarted,
    /// The repacked image replaced the live one.
    RepackFinished,
}

impl AtlasEvent {
    fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Capacity policy for [`TextureAtlas::request_full_repack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepackMode {
    /// Smallest side, then fewest layers, that holds every texture.
    Tightest,
    /// Current side and layer count.
    KeepCurrentCapacity,
    /// Current capacity, then more layers, then a larger side.
    AllowGrow,
}

/// Where a repack stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepackPhase {
    /// No repack requested or running.
    Idle,
    /// Requested; starts on the next flush.
    Requested,
    /// Uploads into the target image are still queued.
    Draining,
    /// Everything is recorded; waiting for `notify_gpu_finished`.
    WaitingGpu,
    /// The next flush swaps the target in.
    SwapReady,
}

/// Padded rectangle occupied by a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Left edge, padding included.
    pub x: u32,
    /// Top edge, padding included.
    pub y: u32,
    /// Width plus twice the padding.
    pub padded_width: u32,
    /// Height plus twice the padding.
    pub padded_height: u32,
    /// Array layer.
    pub layer: u32,
}

impl Placement {
    fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.padded_width, self.padded_height)
    }
}

#[derive(Debug, Clone, Copy)]
struct AtlasImage {
    handle: ImageHandle,
    side: u32,
    layers: u32,
    layout: ImageLayout,
}

fn transition(rec: &mut dyn CommandRecorder, img: &mut AtlasImage, new: ImageLayout) {
    if img.layout == new {
        return;
    }
    rec.record(GpuCommand::ImageBarrier {
        image: img.handle,
        old: img.layout,
        new,
        layer_count: img.layers,
    });
    img.layout = new;
}

#[derive(Debug, Clone, Default)]
struct Slot {
    in_use: bool,
    state: TextureState,
    has_cpu_data: bool,
    too_large: bool,
    w: u32,
    h: u32,
    // Tightly packed RGBA8.
    pixels: Vec<u8>,
    place: Option<Placement>,
    was_valid: bool,
    generation: u64,
}

/// FIFO of ids with de-duplication. Removal is lazy: the id stays in the deque and is skipped on
/// drain.
#[derive(Debug, Default)]
struct PendingQueue {
    queue: VecDeque<AtlasId>,
    queued: Vec<bool>,
}

impl PendingQueue {
    fn new(ids: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: vec![false; ids],
        }
    }

    fn push(&mut self, id: AtlasId) {
        if let Some(q) = self.queued.get_mut(id as usize)
            && !*q
        {
            *q = true;
            self.queue.push_back(id);
        }
    }

    fn remove(&mut self, id: AtlasId) {
        if let Some(q) = self.queued.get_mut(id as usize) {
            *q = false;
        }
    }

    fn contains(&self, id: AtlasId) -> bool {
        self.queued.get(id as usize).copied().unwrap_or(false)
    }

    fn drain(&mut self) -> Vec<AtlasId> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(id) = self.queue.pop_front() {
            if let Some(q) = self.queued.get_mut(id as usize)
                && *q
            {
                *q = false;
                out.push(id);
            }
        }
        out
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug)]
struct ActiveRepack {
    image: AtlasImage,
    plan: HashMap<AtlasId, Placement>,
    pending: PendingQueue,
    waiting_gpu: bool,
    swap_ready: bool,
}

/// Copy `pixels` (tight `w x h` RGBA8) into a `(w+2p) x (h+2p)` buffer, replicating edge texels
/// into the border.
fn pad_edges(pixels: &[u8], w: u32, h: u32, p: u32) -> Vec<u8> {
    let (w, h, p) = (w as usize, h as usize, p as usize);
    let wp = w + 2 * p;
    let hp = h + 2 * p;
    let mut out = vec![0u8; wp * hp * 4];
    for y in 0..hp {
        let sy = y.saturating_sub(p).min(h - 1);
        let src_row = &pixels[sy * w * 4..(sy + 1) * w * 4];
        let dst_row = &mut out[y * wp * 4..(y + 1) * wp * 4];
        for x in 0..wp {
            let sx = x.saturating_sub(p).min(w - 1);
            dst_row[x * 4..x * 4 + 4].copy_from_slice(&src_row[sx * 4..sx * 4 + 4]);
        }
    }
    out
}

fn next_side(side: u32) -> Option<u32> {
    ALLOWED_ATLAS_SIDES.iter().copied().find(|&s| s > side)
}

/// GPU texture atlas with a descriptor table indexed by [`AtlasId`].
///
/// Ids `0..=max_layers` are reserved: [`OVERFLOW_ID`] and one whole-layer entry per layer. Calls
/// naming a reserved id or [`INVALID_TEXTURE_ID`] do nothing.
///
/// Resource pressure never surfaces as an error. It is reported through the event callback and
/// the affected work is retried on a later flush.
pub struct TextureAtlas {
    cfg: AtlasConfig,
    device: Box<dyn GpuDevice>,
    staging: SharedStaging,
    alignment: u64,
    atlas: AtlasImage,
    entries_buffer: BufferHandle,
    entries: Vec<Entry>,
    entries_dirty: bool,
    slots: Vec<Slot>,
    free_ids: Vec<AtlasId>,
    next_id: AtlasId,
    pending: PendingQueue,
    packers: Vec<MaxRectsBin>,
    deferred_images: Vec<ImageHandle>,
    pending_layer_grow: u32,
    event_mask: u32,
    on_event: Option<Box<dyn FnMut(AtlasEvent)>>,
    repack_request: Option<RepackMode>,
    repack: Option<ActiveRepack>,
}

impl std::fmt::Debug for TextureAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureAtlas")
            .field("side", &self.atlas.side)
            .field("layers", &self.atlas.layers)
            .field("next_id", &self.next_id)
            .field("repack", &self.repack_phase())
            .finish_non_exhaustive()
    }
}

impl TextureAtlas {
    /// Create the atlas image (one layer at `initial_side`) and the descriptor buffer.
    ///
    /// Without `staging`, a private buffer of `cfg.staging_bytes` is created. A supplied buffer
    /// must be able to hold the whole descriptor table.
    pub fn new(
        cfg: AtlasConfig,
        mut device: Box<dyn GpuDevice>,
        staging: Option<SharedStaging>,
    ) -> TexPipeResult<Self> {
        cfg.validate()?;
        let staging = match staging {
            Some(s) => s,
            None => SharedStagingBuffer::shared(cfg.staging_bytes)?,
        };
        let staging_size = staging.borrow().size();
        if cfg.entries_bytes() > staging_size {
            return Err(TexPipeError::config(format!(
                "staging buffer ({staging_size} bytes) cannot hold the descriptor table ({} bytes)",
                cfg.entries_bytes()
            )));
        }
        let alignment = device.copy_offset_alignment().max(4);

        let entries_buffer = device
            .create_buffer(cfg.entries_bytes())
            .map_err(|e| anyhow::Error::new(e).context("creating atlas entries buffer"))?;
        let handle = match device.create_image(cfg.initial_side, 1) {
            Ok(h) => h,
            Err(e) => {
                device.destroy_buffer(entries_buffer);
                return Err(anyhow::Error::new(e).context("creating atlas image").into());
            }
        };

        let ids = cfg.max_texture_id as usize;
        let mut entries = vec![Entry::invalid(false, false); ids];
        for layer in 0..cfg.max_layers {
            entries[1 + layer as usize] = Entry {
                uv_min_max: [0.0, 0.0, 1.0, 1.0],
                layer,
                flags: ENTRY_VALID,
                pad: [0; 2],
            };
        }

        let mut atlas = Self {
            cfg,
            device,
            staging,
            alignment,
            atlas: AtlasImage {
                handle,
                side: cfg.initial_side,
                layers: 1,
                layout: ImageLayout::Undefined,
            },
            entries_buffer,
            entries,
            entries_dirty: true,
            slots: vec![Slot::default(); ids],
            free_ids: Vec::new(),
            next_id: cfg.reserved_count(),
            pending: PendingQueue::new(ids),
            packers: Vec::new(),
            deferred_images: Vec::new(),
            pending_layer_grow: 0,
            event_mask: 0,
            on_event: None,
            repack_request: None,
            repack: None,
        };
        atlas.rebuild_packers();
        Ok(atlas)
    }

    /// Builder form of [`TextureAtlas::set_event_callback`].
    pub fn with_event_callback(mut self, cb: impl FnMut(AtlasEvent) + 'static) -> Self {
        self.set_event_callback(cb);
        self
    }

    /// Install the callback that receives [`AtlasEvent`]s.
    pub fn set_event_callback(&mut self, cb: impl FnMut(AtlasEvent) + 'static) {
        self.on_event = Some(Box::new(cb));
    }

    fn is_reserved(&self, id: AtlasId) -> bool {
        id < self.cfg.reserved_count()
    }

    fn is_ignored(&self, id: AtlasId) -> bool {
        id == INVALID_TEXTURE_ID || self.is_reserved(id)
    }

    fn check_registered(&self, id: AtlasId) -> TexPipeResult<()> {
        if id >= self.cfg.max_texture_id {
            return Err(TexPipeError::input(format!(
                "texture id {id} out of range (max_texture_id {})",
                self.cfg.max_texture_id
            )));
        }
        if !self.slots[id as usize].in_use {
            return Err(TexPipeError::input(format!(
                "texture id {id} is not registered"
            )));
        }
        Ok(())
    }

    /// Reserve an id. Returns [`OVERFLOW_ID`] when every id is taken.
    pub fn register_texture(&mut self) -> AtlasId {
        let reserved = self.cfg.reserved_count();
        let id = loop {
            match self.free_ids.pop() {
                Some(id) if id < reserved => continue,
                Some(id) => break id,
                None if self.next_id < self.cfg.max_texture_id => {
                    self.next_id += 1;
                    break self.next_id - 1;
                }
                None => return OVERFLOW_ID,
            }
        };
        self.slots[id as usize] = Slot {
            in_use: true,
            state: TextureState::Registered,
            generation: 1,
            ..Slot::default()
        };
        self.set_entry_invalid(id, false, false);
        id
    }

    /// Set the RGBA8 contents of `id`. `row_pitch` is in bytes; `0` means `w * 4`.
    ///
    /// The pixels are copied. A size change releases the current placement; otherwise the
    /// texture keeps its rectangle and is re-uploaded in place.
    pub fn set_texture_data(
        &mut self,
        id: AtlasId,
        w: u32,
        h: u32,
        pixels: &[u8],
        row_pitch: u32,
    ) -> TexPipeResult<()> {
        if self.is_ignored(id) {
            return Ok(());
        }
        self.check_registered(id)?;
        if w == 0 || h == 0 {
            return Err(TexPipeError::input(format!(
                "texture size must be non-zero (got {w}x{h})"
            )));
        }
        let max = self.cfg.max_texture_size;
        if w > max || h > max {
            self.mark_too_large(id);
            return Err(TexPipeError::input(format!(
                "texture {id} is {w}x{h}, larger than max_texture_size {max}"
            )));
        }
        // A padded rect wider than the largest side never fits any atlas.
        let largest = ALLOWED_ATLAS_SIDES[ALLOWED_ATLAS_SIDES.len() - 1];
        let pad = self.cfg.padding_px;
        if w + 2 * pad > largest || h + 2 * pad > largest {
            self.mark_too_large(id);
            return Err(TexPipeError::input(format!(
                "texture {id} is {w}x{h}, too large for a {largest} atlas with {pad} px padding"
            )));
        }
        let row_bytes = w as usize * 4;
        let pitch = if row_pitch == 0 {
            row_bytes
        } else {
            row_pitch as usize
        };
        if pitch < row_bytes {
            return Err(TexPipeError::input(format!(
                "row pitch {pitch} is smaller than width * 4 ({row_bytes})"
            )));
        }
        let needed = pitch * (h as usize - 1) + row_bytes;
        if pixels.len() < needed {
            return Err(TexPipeError::input(format!(
                "pixel buffer holds {} bytes, {needed} needed",
                pixels.len()
            )));
        }
        let mut tight = Vec::with_capacity(row_bytes * h as usize);
        for row in pixels.chunks(pitch).take(h as usize) {
            tight.extend_from_slice(&row[..row_bytes]);
        }

        let slot = &self.slots[id as usize];
        let size_changed = slot.has_cpu_data && (slot.w != w || slot.h != h);
        if size_changed {
            self.free_placement(id);
            self.set_entry_invalid(id, true, false);
            if let Some(r) = &mut self.repack {
                r.plan.remove(&id);
                r.pending.remove(id);
            }
        }

        let slot = &mut self.slots[id as usize];
        slot.w = w;
        slot.h = h;
        slot.pixels = tight;
        slot.has_cpu_data = true;
        slot.too_large = false;
        slot.state = TextureState::PendingUpload;
        slot.generation += 1;
        if slot.place.is_none() {
            self.set_entry_invalid(id, true, false);
        }

        self.pending.push(id);
        if let Some(r) = &mut self.repack
            && r.plan.contains_key(&id)
        {
            r.pending.push(id);
        }
        Ok(())
    }

    /// Drop the data of `id` and release its placement. The id stays registered.
    pub fn clear_texture_data(&mut self, id: AtlasId) -> TexPipeResult<()> {
        if self.is_ignored(id) {
            return Ok(());
        }
        self.check_registered(id)?;
        self.free_placement(id);
        let slot = &mut self.slots[id as usize];
        slot.pixels = Vec::new();
        slot.has_cpu_data = false;
        slot.state = TextureState::Registered;
        self.pending.remove(id);
        if let Some(r) = &mut self.repack {
            r.pending.remove(id);
        }
        self.set_entry_invalid(id, false, false);
        Ok(())
    }

    /// Release `id`. It may be handed out again by [`TextureAtlas::register_texture`].
    pub fn remove_texture(&mut self, id: AtlasId) -> TexPipeResult<()> {
        if self.is_ignored(id) {
            return Ok(());
        }
        self.clear_texture_data(id)?;
        let slot = &mut self.slots[id as usize];
        slot.in_use = false;
        slot.too_large = false;
        slot.state = TextureState::Removed;
        self.free_ids.push(id);
        Ok(())
    }

    /// Ask for a full repack. It starts on the next flush.
    pub fn request_full_repack(&mut self, mode: RepackMode) {
        self.repack_request = Some(mode);
    }

    /// Grow to `layers` (capped at `max_layers`) on the next flush.
    pub fn request_layer_count(&mut self, layers: u32) {
        let target = layers.min(self.cfg.max_layers);
        self.pending_layer_grow = self.pending_layer_grow.max(target);
    }

    /// Record every pending placement, upload, growth and descriptor update into `rec`.
    ///
    /// The returned descriptor is only valid for the commands recorded by this call. The caller
    /// submits them and calls [`TextureAtlas::notify_gpu_finished`] once they complete.
    #[tracing::instrument(skip_all)]
    pub fn flush_uploads_and_barriers(&mut self, rec: &mut dyn CommandRecorder) -> DescriptorOut {
        self.event_mask = 0;
        if self.repack.as_ref().is_some_and(|r| r.swap_ready) {
            self.swap_to_repacked();
        }
        if self.repack.is_none()
            && let Some(mode) = self.repack_request
        {
            self.start_repack(mode);
        }
        self.process_pending_layer_grow(rec);

        let pending_now = self.pending.drain();
        let repack_pending = self
            .repack
            .as_mut()
            .map(|r| r.pending.drain())
            .unwrap_or_default();

        let mut out_of_space = false;
        for &id in &pending_now {
            let slot = &self.slots[id as usize];
            if !slot.in_use || !slot.has_cpu_data || slot.place.is_some() {
                continue;
            }
            let (wp, hp) = self.padded_size(id);
            if !self.place_with_grow(id, wp, hp, rec) {
                out_of_space = true;
                self.pending.push(id);
            }
        }
        if out_of_space {
            self.emit(AtlasEvent::AtlasOutOfSpace);
        }

        let mut uploads = 0usize;
        for &id in &pending_now {
            let slot = &self.slots[id as usize];
            if !slot.in_use || !slot.has_cpu_data {
                continue;
            }
            let Some(place) = slot.place else {
                continue;
            };
            if !self.upload(id, place, false, rec) {
                self.pending.push(id);
                continue;
            }
            let slot = &mut self.slots[id as usize];
            slot.state = TextureState::Valid;
            slot.was_valid = true;
            self.set_entry_valid(id);
            uploads += 1;
        }

        let mut repack_writes = false;
        for id in repack_pending {
            let Some(place) = self.repack.as_ref().and_then(|r| r.plan.get(&id).copied()) else {
                continue;
            };
            let slot = &self.slots[id as usize];
            if !slot.in_use || !slot.has_cpu_data {
                continue;
            }
            if self.upload(id, place, true, rec) {
                repack_writes = true;
            } else if let Some(r) = &mut self.repack {
                r.pending.push(id);
            }
        }

        if self.entries_dirty {
            self.upload_entries(rec);
        }

        transition(rec, &mut self.atlas, ImageLayout::ShaderReadOnly);
        if let Some(r) = &mut self.repack {
            if repack_writes {
                transition(rec, &mut r.image, ImageLayout::ShaderReadOnly);
            }
            if r.pending.is_empty() {
                r.waiting_gpu = true;
            }
        }

        tracing::debug!(uploads, pending = !self.pending.is_empty(), "atlas flushed");
        self.descriptor()
    }

    /// Release resources retired by earlier flushes and rewind the staging buffer.
    ///
    /// Call only after the GPU finished every command recorded since the previous call.
    pub fn notify_gpu_finished(&mut self) {
        for image in std::mem::take(&mut self.deferred_images) {
            self.device.destroy_image(image);
        }
        self.staging.borrow_mut().reset();
        self.event_mask = 0;
        if let Some(r) = &mut self.repack
            && r.waiting_gpu
            && r.pending.is_empty()
        {
            r.waiting_gpu = false;
            r.swap_ready = true;
        }
    }

    fn descriptor(&self) -> DescriptorOut {
        DescriptorOut {
            atlas_image: self.atlas.handle,
            entries_buffer: self.entries_buffer,
            atlas_side: self.atlas.side,
            atlas_layers: self.atlas.layers,
            image_layout: self.atlas.layout,
        }
    }

    fn emit(&mut self, event: AtlasEvent) {
        if self.event_mask & event.bit() != 0 {
            return;
        }
        self.event_mask |= event.bit();
        match event {
            AtlasEvent::StagingOverflow
            | AtlasEvent::AtlasOutOfSpace
            | AtlasEvent::GpuOutOfMemory => tracing::warn!(?event, "atlas event"),
            AtlasEvent::RepackStarted | AtlasEvent::RepackFinished => {
                tracing::debug!(?event, "atlas event")
            }
        }
        if let Some(cb) = &mut self.on_event {
            cb(event);
        }
    }

    fn padded_size(&self, id: AtlasId) -> (u32, u32) {
        let slot = &self.slots[id as usize];
        let p = 2 * self.cfg.padding_px;
        (slot.w + p, slot.h + p)
    }

    fn set_entry_invalid(&mut self, id: AtlasId, pending: bool, too_large: bool) {
        self.entries[id as usize] = Entry::invalid(pending, too_large);
        self.entries_dirty = true;
    }

    fn set_entry_valid(&mut self, id: AtlasId) {
        let Some(p) = self.slots[id as usize].place else {
            self.set_entry_invalid(id, true, false);
            return;
        };
        let s = self.atlas.side as f32;
        let (x, y) = (p.x as f32, p.y as f32);
        let (wp, hp) = (p.padded_width as f32, p.padded_height as f32);
        self.entries[id as usize] = Entry {
            uv_min_max: [
                (x + 0.5) / s,
                (y + 0.5) / s,
                (x + wp - 0.5) / s,
                (y + hp - 0.5) / s,
            ],
            layer: p.layer,
            flags: ENTRY_VALID,
            pad: [0; 2],
        };
        self.entries_dirty = true;
    }

    fn free_placement(&mut self, id: AtlasId) {
        let slot = &mut self.slots[id as usize];
        slot.was_valid = false;
        if let Some(p) = slot.place.take()
            && let Some(bin) = self.packers.get_mut(p.layer as usize)
        {
            bin.free(p.rect());
        }
    }

    fn mark_too_large(&mut self, id: AtlasId) {
        self.free_placement(id);
        let slot = &mut self.slots[id as usize];
        slot.pixels = Vec::new();
        slot.has_cpu_data = false;
        slot.too_large = true;
        slot.state = TextureState::NotLoadedTooLarge;
        self.pending.remove(id);
        if let Some(r) = &mut self.repack {
            r.pending.remove(id);
        }
        self.set_entry_invalid(id, false, true);
    }

    fn rebuild_packers(&mut self) {
        let side = self.atlas.side;
        self.packers = (0..self.atlas.layers)
            .map(|_| MaxRectsBin::new(side, side))
            .collect();
        for slot in &self.slots {
            if !slot.in_use {
                continue;
            }
            if let Some(p) = slot.place
                && let Some(bin) = self.packers.get_mut(p.layer as usize)
            {
                bin.occupy(p.rect());
            }
        }
    }

    fn place_in_existing_layers(&mut self, id: AtlasId, wp: u32, hp: u32) -> bool {
        for (layer, bin) in self.packers.iter_mut().enumerate() {
            if let Some(r) = bin.insert(wp, hp, Fit::BestArea) {
                self.slots[id as usize].place = Some(Placement {
                    x: r.x,
                    y: r.y,
                    padded_width: wp,
                    padded_height: hp,
                    layer: layer as u32,
                });
                return true;
            }
        }
        false
    }

    /// Existing layers, then more layers, then a larger side.
    fn place_with_grow(
        &mut self,
        id: AtlasId,
        wp: u32,
        hp: u32,
        rec: &mut dyn CommandRecorder,
    ) -> bool {
        if self.place_in_existing_layers(id, wp, hp) {
            return true;
        }
        // Extra layers cannot help a rectangle wider or taller than the current side.
        if wp <= self.atlas.side && hp <= self.atlas.side {
            while self.atlas.layers < self.cfg.max_layers {
                if !self.grow(self.atlas.side, self.atlas.layers + 1, rec) {
                    return false;
                }
                if self.place_in_existing_layers(id, wp, hp) {
                    return true;
                }
            }
        }
        while let Some(side) = next_side(self.atlas.side) {
            if !self.grow(side, self.atlas.layers, rec) {
                return false;
            }
            if self.place_in_existing_layers(id, wp, hp) {
                return true;
            }
        }
        false
    }

    fn process_pending_layer_grow(&mut self, rec: &mut dyn CommandRecorder) {
        if self.pending_layer_grow == 0 {
            return;
        }
        if self.pending_layer_grow <= self.atlas.layers
            || self.grow(self.atlas.side, self.pending_layer_grow, rec)
        {
            self.pending_layer_grow = 0;
        }
    }

    /// Replace the live image with a larger one holding a copy of its contents.
    fn grow(&mut self, side: u32, layers: u32, rec: &mut dyn CommandRecorder) -> bool {
        let handle = match self.device.create_image(side, layers) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(side, layers, error = %e, "atlas growth failed");
                self.emit(AtlasEvent::GpuOutOfMemory);
                return false;
            }
        };
        let mut grown = AtlasImage {
            handle,
            side,
            layers,
            layout: ImageLayout::Undefined,
        };
        transition(rec, &mut self.atlas, ImageLayout::TransferSrc);
        transition(rec, &mut grown, ImageLayout::TransferDst);
        rec.record(GpuCommand::CopyImage {
            src: self.atlas.handle,
            dst: grown.handle,
            extent: self.atlas.side,
            layer_count: self.atlas.layers.min(layers),
        });
        transition(rec, &mut grown, ImageLayout::ShaderReadOnly);
        transition(rec, &mut self.atlas, ImageLayout::ShaderReadOnly);

        let old = std::mem::replace(&mut self.atlas, grown);
        self.deferred_images.push(old.handle);
        tracing::debug!(
            from_side = old.side,
            from_layers = old.layers,
            side,
            layers,
            "atlas grown"
        );

        // Normalized coordinates depend on the side.
        for id in 0..self.cfg.max_texture_id {
            let slot = &self.slots[id as usize];
            let shown = slot.state == TextureState::Valid
                || (slot.state == TextureState::PendingUpload && slot.was_valid);
            if slot.in_use && slot.place.is_some() && shown {
                self.set_entry_valid(id);
            }
        }
        self.entries_dirty = true;
        self.rebuild_packers();
        true
    }

    /// Stage one padded texture and record its copy into the live or the repack image.
    fn upload(
        &mut self,
        id: AtlasId,
        place: Placement,
        into_repack: bool,
        rec: &mut dyn CommandRecorder,
    ) -> bool {
        let bytes = u64::from(place.padded_width) * u64::from(place.padded_height) * 4;
        let allocated = self.staging.borrow_mut().allocate(bytes, self.alignment);
        let Some(offset) = allocated else {
            self.emit(AtlasEvent::StagingOverflow);
            return false;
        };
        let slot = &self.slots[id as usize];
        let padded = pad_edges(&slot.pixels, slot.w, slot.h, self.cfg.padding_px);
        self.staging.borrow_mut().write(offset, &padded);

        let image = if into_repack {
            match &mut self.repack {
                Some(r) => &mut r.image,
                None => return false,
            }
        } else {
            &mut self.atlas
        };
        transition(rec, image, ImageLayout::TransferDst);
        rec.record(GpuCommand::CopyBufferToImage {
            staging_offset: offset,
            dst: image.handle,
            layer: place.layer,
            x: place.x,
            y: place.y,
            width: place.padded_width,
            height: place.padded_height,
        });
        true
    }

    fn upload_entries(&mut self, rec: &mut dyn CommandRecorder) {
        let bytes = self.cfg.entries_bytes();
        let allocated = self.staging.borrow_mut().allocate(bytes, self.alignment);
        let Some(offset) = allocated else {
            self.emit(AtlasEvent::StagingOverflow);
            return;
        };
        let mut table = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for e in &self.entries {
            table.extend_from_slice(&e.to_bytes());
        }
        self.staging.borrow_mut().write(offset, &table);
        rec.record(GpuCommand::CopyBuffer {
            staging_offset: offset,
            dst: self.entries_buffer,
            bytes,
        });
        rec.record(GpuCommand::BufferBarrier {
            buffer: self.entries_buffer,
        });
        self.entries_dirty = false;
    }

    fn trial_pack(
        &self,
        side: u32,
        layers: u32,
        ids: &[AtlasId],
    ) -> Option<HashMap<AtlasId, Placement>> {
        let mut bins: Vec<MaxRectsBin> = (0..layers).map(|_| MaxRectsBin::new(side, side)).collect();
        let mut plan = HashMap::with_capacity(ids.len());
        for &id in ids {
            let (wp, hp) = self.padded_size(id);
            let placed = bins.iter_mut().enumerate().find_map(|(layer, bin)| {
                bin.insert(wp, hp, Fit::BestShortSide).map(|r| Placement {
                    x: r.x,
                    y: r.y,
                    padded_width: wp,
                    padded_height: hp,
                    layer: layer as u32,
                })
            })?;
            plan.insert(id, placed);
        }
        Some(plan)
    }

    fn smallest_fit(
        &self,
        sides: impl Iterator<Item = u32>,
        ids: &[AtlasId],
    ) -> Option<(u32, u32, HashMap<AtlasId, Placement>)> {
        for side in sides {
            for layers in 1..=self.cfg.max_layers {
                if let Some(plan) = self.trial_pack(side, layers, ids) {
                    return Some((side, layers, plan));
                }
            }
        }
        None
    }

    fn start_repack(&mut self, mode: RepackMode) {
        let mut ids: Vec<AtlasId> = (0..self.cfg.max_texture_id)
            .filter(|&id| {
                let s = &self.slots[id as usize];
                s.in_use && s.has_cpu_data && !s.too_large
            })
            .collect();
        if ids.is_empty() {
            self.repack_request = None;
            return;
        }
        ids.sort_by_key(|&id| {
            let (wp, hp) = self.padded_size(id);
            Reverse(u64::from(wp) * u64::from(hp))
        });

        let (side, layers) = (self.atlas.side, self.atlas.layers);
        let found = match mode {
            RepackMode::KeepCurrentCapacity => self
                .trial_pack(side, layers, &ids)
                .map(|plan| (side, layers, plan)),
            RepackMode::Tightest => self.smallest_fit(ALLOWED_ATLAS_SIDES.into_iter(), &ids),
            RepackMode::AllowGrow => (layers..=self.cfg.max_layers.max(layers))
                .find_map(|l| self.trial_pack(side, l, &ids).map(|plan| (side, l, plan)))
                .or_else(|| {
                    self.smallest_fit(
                        ALLOWED_ATLAS_SIDES.into_iter().filter(|&s| s > side),
                        &ids,
                    )
                }),
        };
        let Some((side, layers, plan)) = found else {
            self.repack_request = None;
            self.emit(AtlasEvent::AtlasOutOfSpace);
            return;
        };

        // On failure the request stays, so the next flush tries again.
        let handle = match self.device.create_image(side, layers) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(side, layers, error = %e, "repack target allocation failed");
                self.emit(AtlasEvent::GpuOutOfMemory);
                return;
            }
        };
        let mut pending = PendingQueue::new(self.cfg.max_texture_id as usize);
        for &id in &ids {
            pending.push(id);
        }
        tracing::debug!(?mode, side, layers, textures = ids.len(), "repack started");
        self.repack = Some(ActiveRepack {
            image: AtlasImage {
                handle,
                side,
                layers,
                layout: ImageLayout::Undefined,
            },
            plan,
            pending,
            waiting_gpu: false,
            swap_ready: false,
        });
        self.repack_request = None;
        self.emit(AtlasEvent::RepackStarted);
    }

    fn swap_to_repacked(&mut self) {
        let Some(repack) = self.repack.take() else {
            return;
        };
        let old = std::mem::replace(&mut self.atlas, repack.image);
        self.deferred_images.push(old.handle);

        for id in 0..self.cfg.max_texture_id {
            let slot = &mut self.slots[id as usize];
            if !slot.in_use {
                continue;
            }
            let loaded = slot.has_cpu_data && !slot.too_large;
            match repack.plan.get(&id) {
                Some(&p) if loaded => {
                    slot.place = Some(p);
                    slot.state = TextureState::Valid;
                    slot.was_valid = true;
                    self.set_entry_valid(id);
                }
                _ if loaded => {
                    slot.place = None;
                    slot.was_valid = false;
                    slot.state = TextureState::PendingUpload;
                    self.pending.push(id);
                    self.set_entry_invalid(id, true, false);
                }
                _ => {
                    slot.place = None;
                    slot.was_valid = false;
                    let too_large = slot.too_large;
                    self.set_entry_invalid(id, false, too_large);
                }
            }
        }
        self.entries_dirty = true;
        self.rebuild_packers();
        tracing::debug!(
            side = self.atlas.side,
            layers = self.atlas.layers,
            "repack finished"
        );
        self.emit(AtlasEvent::RepackFinished);
    }

    /// Current side of the live image.
    pub fn atlas_side(&self) -> u32 {
        self.atlas.side
    }

    /// Current layer count of the live image.
    pub fn atlas_layers(&self) -> u32 {
        self.atlas.layers
    }

    /// Layer ceiling from the config.
    pub fn max_layers(&self) -> u32 {
        self.cfg.max_layers
    }

    /// Size of the descriptor table.
    pub fn max_texture_id(&self) -> u32 {
        self.cfg.max_texture_id
    }

    /// Always [`OVERFLOW_ID`].
    pub fn reserved_overflow_id(&self) -> AtlasId {
        OVERFLOW_ID
    }

    /// Id of the whole-layer entry for `layer`.
    pub fn reserved_layer_id(&self, layer: u32) -> AtlasId {
        1 + layer
    }

    /// State of a registered or removed id. `None` for reserved, out-of-range or never
    /// registered ids.
    pub fn state(&self, id: AtlasId) -> Option<TextureState> {
        if self.is_ignored(id) {
            return None;
        }
        let slot = self.slots.get(id as usize)?;
        (slot.generation > 0).then_some(slot.state)
    }

    /// Bumped on every data change of `id`; 0 for unknown ids.
    pub fn generation(&self, id: AtlasId) -> u64 {
        self.slots.get(id as usize).map_or(0, |s| s.generation)
    }

    /// CPU copy of the descriptor entry for `id`.
    pub fn entry(&self, id: AtlasId) -> Option<Entry> {
        self.entries.get(id as usize).copied()
    }

    /// Current placement of `id` in the live image.
    pub fn placement(&self, id: AtlasId) -> Option<Placement> {
        self.slots.get(id as usize).and_then(|s| s.place)
    }

    /// The validated configuration.
    pub fn config(&self) -> &AtlasConfig {
        &self.cfg
    }

    /// Handle to the staging buffer, for sharing with another atlas or replaying copies.
    pub fn staging(&self) -> SharedStaging {
        self.staging.clone()
    }

    /// Whether `id` is waiting for a flush.
    pub fn is_pending(&self, id: AtlasId) -> bool {
        self.pending.contains(id)
    }

    /// Progress of the full repack state machine.
    pub fn repack_phase(&self) -> RepackPhase {
        match &self.repack {
            Some(r) if r.swap_ready => RepackPhase::SwapReady,
            Some(r) if r.waiting_gpu => RepackPhase::WaitingGpu,
            Some(_) => RepackPhase::Draining,
            None if self.repack_request.is_some() => RepackPhase::Requested,
            None => RepackPhase::Idle,
        }
    }
}

impl Drop for TextureAtlas {
    fn drop(&mut self) {
        for image in std::mem::take(&mut self.deferred_images) {
            self.device.destroy_image(image);
        }
        if let Some(r) = self.repack.take() {
            self.device.destroy_image(r.image.handle);
        }
        self.device.destroy_image(self.atlas.handle);
        self.device.destroy_buffer(self.entries_buffer);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/atlas/texture_atlas.rs"]
mod tests;

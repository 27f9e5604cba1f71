//! In-memory GPU used by tests and the CLI.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::atlas::gpu::{
    BufferHandle, CommandList, GpuCommand, GpuDevice, GpuError, ImageHandle, ImageLayout,
};
use crate::atlas::staging::SharedStagingBuffer;
use crate::atlas::texture_atlas::{ENTRY_SIZE, Entry};

#[derive(Debug)]
struct HeadlessImage {
    side: u32,
    layers: u32,
    layout: ImageLayout,
    // Allocated on first write; an untouched layer reads as transparent black.
    texels: Vec<Option<Vec<u8>>>,
}

impl HeadlessImage {
    fn layer_mut(&mut self, layer: u32) -> &mut Vec<u8> {
        let side = self.side as usize;
        self.texels[layer as usize].get_or_insert_with(|| vec![0; side * side * 4])
    }

    fn bytes(&self) -> u64 {
        u64::from(self.side) * u64::from(self.side) * u64::from(self.layers) * 4
    }
}

#[derive(Debug, Default)]
struct HeadlessInner {
    alignment: u64,
    memory_limit: Option<u64>,
    memory_used: u64,
    next_handle: u32,
    images: HashMap<u32, HeadlessImage>,
    buffers: HashMap<u32, Vec<u8>>,
}

/// CPU-backed [`GpuDevice`] that replays a [`CommandList`] against host memory.
///
/// Clones share the same resources, so one clone can be boxed into a
/// [`crate::TextureAtlas`] while another submits work and reads results back.
#[derive(Debug, Clone)]
pub struct HeadlessDevice {
    inner: Rc<RefCell<HeadlessInner>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::with_alignment(4)
    }
}

impl HeadlessDevice {
    /// Device with a 4-byte copy alignment and no memory limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device reporting `alignment` as its copy-offset alignment.
    pub fn with_alignment(alignment: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HeadlessInner {
                alignment: alignment.max(1),
                ..HeadlessInner::default()
            })),
        }
    }

    /// Device whose image allocations fail once `bytes` would be exceeded.
    pub fn with_memory_limit(bytes: u64) -> Self {
        let dev = Self::default();
        dev.inner.borrow_mut().memory_limit = Some(bytes);
        dev
    }

    /// Change the memory limit of an existing device. `None` removes it.
    pub fn set_memory_limit(&self, bytes: Option<u64>) {
        self.inner.borrow_mut().memory_limit = bytes;
    }

    /// Number of images currently alive.
    pub fn live_image_count(&self) -> usize {
        self.inner.borrow().images.len()
    }

    /// Current layout of `image`, if it exists.
    pub fn image_layout(&self, image: ImageHandle) -> Option<ImageLayout> {
        self.inner.borrow().images.get(&image.0).map(|i| i.layout)
    }

    /// `(side, layers)` of `image`, if it exists.
    pub fn image_extent(&self, image: ImageHandle) -> Option<(u32, u32)> {
        self.inner
            .borrow()
            .images
            .get(&image.0)
            .map(|i| (i.side, i.layers))
    }

    /// Read one RGBA8 texel.
    pub fn read_texel(&self, image: ImageHandle, layer: u32, x: u32, y: u32) -> Option<[u8; 4]> {
        let inner = self.inner.borrow();
        let img = inner.images.get(&image.0)?;
        if layer >= img.layers || x >= img.side || y >= img.side {
            return None;
        }
        let Some(data) = &img.texels[layer as usize] else {
            return Some([0; 4]);
        };
        let at = ((y * img.side + x) * 4) as usize;
        Some([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    /// Decode the descriptor table held in `buffer`.
    pub fn read_entries(&self, buffer: BufferHandle) -> Option<Vec<Entry>> {
        let inner = self.inner.borrow();
        let data = inner.buffers.get(&buffer.0)?;
        Some(
            data.chunks_exact(ENTRY_SIZE)
                .filter_map(|c| c.try_into().ok().map(Entry::from_bytes))
                .collect(),
        )
    }

    /// Execute every command in `list`, reading staged bytes from `staging`.
    ///
    /// Copies require their images to be in the matching transfer layout; a mismatch is reported
    /// as [`GpuError::Validation`] and stops execution.
    pub fn submit(&self, list: &CommandList, staging: &SharedStagingBuffer) -> Result<(), GpuError> {
        let mut inner = self.inner.borrow_mut();
        for cmd in list.commands() {
            inner.execute(cmd, staging)?;
        }
        Ok(())
    }

    fn alloc_handle(inner: &mut HeadlessInner) -> u32 {
        inner.next_handle += 1;
        inner.next_handle
    }
}

fn invalid(msg: impl Into<String>) -> GpuError {
    GpuError::Validation(msg.into())
}

impl HeadlessInner {
    fn image(&mut self, h: ImageHandle) -> Result<&mut HeadlessImage, GpuError> {
        self.images
            .get_mut(&h.0)
            .ok_or_else(|| invalid(format!("unknown image {}", h.0)))
    }

    fn expect_layout(&mut self, h: ImageHandle, want: ImageLayout) -> Result<(), GpuError> {
        let got = self.image(h)?.layout;
        if got != want {
            return Err(invalid(format!(
                "image {} is in {got:?}, expected {want:?}",
                h.0
            )));
        }
        Ok(())
    }

    fn execute(&mut self, cmd: &GpuCommand, staging: &SharedStagingBuffer) -> Result<(), GpuError> {
        match *cmd {
            GpuCommand::ImageBarrier {
                image, old, new, ..
            } => {
                let img = self.image(image)?;
                if old != ImageLayout::Undefined && old != img.layout {
                    return Err(invalid(format!(
                        "barrier on image {} expects {old:?} but image is in {:?}",
                        image.0, img.layout
                    )));
                }
                img.layout = new;
            }
            GpuCommand::CopyImage {
                src,
                dst,
                extent,
                layer_count,
            } => {
                self.expect_layout(src, ImageLayout::TransferSrc)?;
                self.expect_layout(dst, ImageLayout::TransferDst)?;
                let (src_side, src_layers) = {
                    let s = self.image(src)?;
                    (s.side, s.layers)
                };
                let (dst_side, dst_layers) = {
                    let d = self.image(dst)?;
                    (d.side, d.layers)
                };
                if extent > src_side.min(dst_side) || layer_count > src_layers.min(dst_layers) {
                    return Err(invalid("image copy out of bounds"));
                }
                let row = extent as usize * 4;
                for layer in 0..layer_count {
                    let Some(src_data) = self.image(src)?.texels[layer as usize].clone() else {
                        continue;
                    };
                    let dst_img = self.image(dst)?;
                    let dst_data = dst_img.layer_mut(layer);
                    for y in 0..extent as usize {
                        let s = y * src_side as usize * 4;
                        let d = y * dst_side as usize * 4;
                        dst_data[d..d + row].copy_from_slice(&src_data[s..s + row]);
                    }
                }
            }
            GpuCommand::CopyBufferToImage {
                staging_offset,
                dst,
                layer,
                x,
                y,
                width,
                height,
            } => {
                self.expect_layout(dst, ImageLayout::TransferDst)?;
                if staging_offset % self.alignment != 0 {
                    return Err(invalid(format!(
                        "staging offset {staging_offset} is not {}-byte aligned",
                        self.alignment
                    )));
                }
                let bytes = staging
                    .bytes(staging_offset, u64::from(width) * u64::from(height) * 4)
                    .ok_or_else(|| invalid("staging range out of bounds"))?;
                let img = self.image(dst)?;
                if layer >= img.layers || x + width > img.side || y + height > img.side {
                    return Err(invalid("buffer to image copy out of bounds"));
                }
                let side = img.side as usize;
                let row = width as usize * 4;
                let data = img.layer_mut(layer);
                for r in 0..height as usize {
                    let d = ((y as usize + r) * side + x as usize) * 4;
                    data[d..d + row].copy_from_slice(&bytes[r * row..(r + 1) * row]);
                }
            }
            GpuCommand::CopyBuffer {
                staging_offset,
                dst,
                bytes,
            } => {
                let src = staging
                    .bytes(staging_offset, bytes)
                    .ok_or_else(|| invalid("staging range out of bounds"))?;
                let buf = self
                    .buffers
                    .get_mut(&dst.0)
                    .ok_or_else(|| invalid(format!("unknown buffer {}", dst.0)))?;
                if src.len() > buf.len() {
                    return Err(invalid("buffer copy out of bounds"));
                }
                buf[..src.len()].copy_from_slice(src);
            }
            GpuCommand::BufferBarrier { buffer } => {
                if !self.buffers.contains_key(&buffer.0) {
                    return Err(invalid(format!("unknown buffer {}", buffer.0)));
                }
            }
        }
        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    fn copy_offset_alignment(&self) -> u64 {
        self.inner.borrow().alignment
    }

    fn create_image(&mut self, side: u32, layers: u32) -> Result<ImageHandle, GpuError> {
        let mut inner = self.inner.borrow_mut();
        let img = HeadlessImage {
            side,
            layers,
            layout: ImageLayout::Undefined,
            texels: vec![None; layers as usize],
        };
        let bytes = img.bytes();
        if let Some(limit) = inner.memory_limit
            && inner.memory_used + bytes > limit
        {
            return Err(GpuError::OutOfMemory { bytes });
        }
        inner.memory_used += bytes;
        let h = Self::alloc_handle(&mut inner);
        inner.images.insert(h, img);
        Ok(ImageHandle(h))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(img) = inner.images.remove(&image.0) {
            inner.memory_used -= img.bytes();
        }
    }

    fn create_buffer(&mut self, bytes: u64) -> Result<BufferHandle, GpuError> {
        let len = usize::try_from(bytes).map_err(|_| GpuError::OutOfMemory { bytes })?;
        let mut inner = self.inner.borrow_mut();
        let h = Self::alloc_handle(&mut inner);
        inner.buffers.insert(h, vec![0; len]);
        Ok(BufferHandle(h))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.inner.borrow_mut().buffers.remove(&buffer.0);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/atlas/headless.rs"]
mod tests;

//! Device seam between the atlas allocator and a GPU API.
//!
//! The atlas never talks to a driver directly. It creates resources through [`GpuDevice`] and
//! describes transfers as [`GpuCommand`] values pushed into a [`CommandRecorder`]; the embedder
//! translates those into real API calls and submits them.

/// Opaque handle to a 2D RGBA8 array image owned by a [`GpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u32);

/// Opaque handle to a device-local storage buffer owned by a [`GpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Layout an atlas image is in, tracked per image by the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// Freshly created, contents undefined.
    Undefined,
    /// Source of an image-to-image copy.
    TransferSrc,
    /// Destination of a copy.
    TransferDst,
    /// Sampled by shaders.
    ShaderReadOnly,
}

/// Resource creation failures reported by a device.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device could not satisfy an allocation.
    #[error("gpu out of memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Requested allocation size.
        bytes: u64,
    },
    /// A command referenced a missing resource or a resource in the wrong layout.
    #[error("gpu validation failed: {0}")]
    Validation(String),
}

/// Resource factory implemented by the embedder.
pub trait GpuDevice {
    /// Required alignment, in bytes, of staging offsets used as copy sources.
    fn copy_offset_alignment(&self) -> u64 {
        4
    }

    /// Create a square RGBA8 image array with `layers` layers. It starts out
    /// [`ImageLayout::Undefined`].
    fn create_image(&mut self, side: u32, layers: u32) -> Result<ImageHandle, GpuError>;

    /// Release an image. Only called once no recorded command references it any more.
    fn destroy_image(&mut self, image: ImageHandle);

    /// Create a storage buffer of `bytes` bytes.
    fn create_buffer(&mut self, bytes: u64) -> Result<BufferHandle, GpuError>;

    /// Release a buffer.
    fn destroy_buffer(&mut self, buffer: BufferHandle);
}

/// One transfer or synchronization step recorded by the atlas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCommand {
    /// Move layers `0..layer_count` of `image` from `old` to `new`.
    ImageBarrier {
        /// Target image.
        image: ImageHandle,
        /// Layout before the barrier.
        old: ImageLayout,
        /// Layout after the barrier.
        new: ImageLayout,
        /// Number of layers covered.
        layer_count: u32,
    },
    /// Copy the `extent x extent` top-left region of layers `0..layer_count`.
    CopyImage {
        /// Source image, in `TransferSrc`.
        src: ImageHandle,
        /// Destination image, in `TransferDst`.
        dst: ImageHandle,
        /// Side of the copied square region.
        extent: u32,
        /// Number of layers copied.
        layer_count: u32,
    },
    /// Copy tightly packed RGBA8 texels from the staging buffer into one layer region.
    CopyBufferToImage {
        /// Byte offset into the staging buffer.
        staging_offset: u64,
        /// Destination image, in `TransferDst`.
        dst: ImageHandle,
        /// Destination layer.
        layer: u32,
        /// Destination x.
        x: u32,
        /// Destination y.
        y: u32,
        /// Region width in texels.
        width: u32,
        /// Region height in texels.
        height: u32,
    },
    /// Copy bytes from the staging buffer to the start of a buffer.
    CopyBuffer {
        /// Byte offset into the staging buffer.
        staging_offset: u64,
        /// Destination buffer.
        dst: BufferHandle,
        /// Bytes to copy.
        bytes: u64,
    },
    /// Make a buffer write visible to shader reads.
    BufferBarrier {
        /// Target buffer.
        buffer: BufferHandle,
    },
}

/// Sink for recorded commands.
pub trait CommandRecorder {
    /// Append a command.
    fn record(&mut self, cmd: GpuCommand);
}

/// Resources a renderer binds after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorOut {
    /// The image array to sample.
    pub atlas_image: ImageHandle,
    /// Storage buffer of [`crate::Entry`] records, indexed by texture id.
    pub entries_buffer: BufferHandle,
    /// Current side of the atlas in texels.
    pub atlas_side: u32,
    /// Current layer count.
    pub atlas_layers: u32,
    /// Layout the image is in at the end of the recorded commands.
    pub image_layout: ImageLayout,
}

/// Recorder that keeps commands in a list, for replay on a device or inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<GpuCommand>,
}

impl CommandList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the recorded commands in order.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all recorded commands.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandRecorder for CommandList {
    fn record(&mut self, cmd: GpuCommand) {
        self.commands.push(cmd);
    }
}

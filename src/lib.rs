//! texpipe compiles a small texture DSL to bytecode, bakes it on the CPU and packs the results
//! into a layered GPU texture atlas.
//!
//! The public API has three layers:
//!
//! - [`TextureProgram`]: compile, link and bake a pipeline such as
//!   `stone |> overlay(tex(moss) |> opacity(128))`
//! - [`TextureAtlas`]: register textures, upload them through a staging buffer and keep the
//!   descriptor table current, driven by [`TextureAtlas::flush_uploads_and_barriers`] and
//!   [`TextureAtlas::notify_gpu_finished`]
//! - [`PipelineCache`]: map programs to atlas ids and rebake them when their inputs or
//!   animation frames change
//!
//! GPU work goes through the [`GpuDevice`] and [`CommandRecorder`] traits. [`HeadlessDevice`]
//! replays recorded commands on host memory.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub(crate) mod atlas;
pub(crate) mod foundation;
pub(crate) mod pipeline;
pub(crate) mod program;

pub use crate::foundation::config::{
    ALLOWED_ATLAS_SIDES, AtlasConfig, DEFAULT_STAGING_BYTES, ENTRY_BYTES, MAX_ATLAS_LAYERS,
};
pub use crate::foundation::error::{TexPipeError, TexPipeResult};

pub use crate::program::TextureProgram;
pub use crate::program::bytecode::{
    ANIM_GRID, ANIM_HORIZONTAL, ANIM_SMOOTH, DEFAULT_ANIM_FPS_Q, MAX_CODE_BYTES, SrcRef,
};
pub use crate::program::compile::Patch;
pub use crate::program::deps::AnimSpec;
pub use crate::program::error::{DecodeError, ParseError, VmError};
pub use crate::program::raster::Image;
pub use crate::program::vm::{MAX_IMAGE_PIXELS, TextureView};

pub use crate::atlas::gpu::{
    BufferHandle, CommandList, CommandRecorder, DescriptorOut, GpuCommand, GpuDevice, GpuError,
    ImageHandle, ImageLayout,
};
pub use crate::atlas::headless::HeadlessDevice;
pub use crate::atlas::staging::{SharedStaging, SharedStagingBuffer};
pub use crate::atlas::texture_atlas::{
    AtlasEvent, AtlasId, ENTRY_DIAG_PENDING, ENTRY_DIAG_TOO_LARGE, ENTRY_VALID, Entry,
    INVALID_TEXTURE_ID, OVERFLOW_ID, Placement, RepackMode, RepackPhase, TextureAtlas,
    TextureState,
};

pub use crate::pipeline::cache::{HostTextureView, PipelineCache, StoredTexture};
pub use crate::pipeline::hashed::HashedProgram;

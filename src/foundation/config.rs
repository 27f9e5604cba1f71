use crate::foundation::error::{TexPipeError, TexPipeResult};

/// Atlas sides the allocator can grow through.
pub const ALLOWED_ATLAS_SIDES: [u32; 3] = [1024, 2048, 4096];

/// Hard ceiling for the layer count of the atlas image array.
pub const MAX_ATLAS_LAYERS: u32 = 16;

/// Default size of the shared staging buffer (64 MiB).
pub const DEFAULT_STAGING_BYTES: u64 = 64 * 1024 * 1024;

/// Size in bytes of one GPU descriptor entry (std430).
pub const ENTRY_BYTES: u64 = 32;

/// Configuration of a [`crate::TextureAtlas`].
///
/// Deserializable from JSON; missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtlasConfig {
    /// Number of descriptor entries (and therefore ids), reserved ids included.
    pub max_texture_id: u32,
    /// Side of the atlas image at creation. One of 1024, 2048, 4096.
    pub initial_side: u32,
    /// Maximum number of array layers the atlas may grow to.
    pub max_layers: u32,
    /// Edge-extended border around every placed texture.
    pub padding_px: u32,
    /// Largest accepted width or height for a single texture.
    pub max_texture_size: u32,
    /// Capacity of the staging buffer created when none is supplied.
    pub staging_bytes: u64,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            max_texture_id: 4096,
            initial_side: 1024,
            max_layers: MAX_ATLAS_LAYERS,
            padding_px: 2,
            max_texture_size: 2048,
            staging_bytes: DEFAULT_STAGING_BYTES,
        }
    }
}

impl AtlasConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(s: &str) -> TexPipeResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| TexPipeError::config(format!("invalid atlas config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Number of ids reserved at the start of the id space (overflow + one per layer).
    pub fn reserved_count(&self) -> u32 {
        self.max_layers + 1
    }

    /// Bytes needed to upload the whole descriptor table.
    pub fn entries_bytes(&self) -> u64 {
        u64::from(self.max_texture_id) * ENTRY_BYTES
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> TexPipeResult<()> {
        if !ALLOWED_ATLAS_SIDES.contains(&self.initial_side) {
            return Err(TexPipeError::config(format!(
                "initial_side must be 1024, 2048 or 4096 (got {})",
                self.initial_side
            )));
        }
        if self.max_layers == 0 || self.max_layers > MAX_ATLAS_LAYERS {
            return Err(TexPipeError::config(format!(
                "max_layers must be 1..={MAX_ATLAS_LAYERS} (got {})",
                self.max_layers
            )));
        }
        if self.padding_px > 64 {
            return Err(TexPipeError::config(format!(
                "padding_px must be <= 64 (got {})",
                self.padding_px
            )));
        }
        if self.max_texture_id <= self.reserved_count() {
            return Err(TexPipeError::config(format!(
                "max_texture_id must be > max_layers + 1 reserved ids (got {})",
                self.max_texture_id
            )));
        }
        if self.max_texture_size == 0 || self.max_texture_size > 4096 {
            return Err(TexPipeError::config(format!(
                "max_texture_size must be 1..=4096 (got {})",
                self.max_texture_size
            )));
        }
        if self.entries_bytes() > self.staging_bytes {
            return Err(TexPipeError::config(format!(
                "staging_bytes ({}) cannot hold the descriptor table ({} bytes)",
                self.staging_bytes,
                self.entries_bytes()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;

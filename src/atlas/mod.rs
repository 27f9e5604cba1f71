pub(crate) mod gpu;
pub(crate) mod headless;
pub(crate) mod packer;
pub(crate) mod staging;
pub(crate) mod texture_atlas;

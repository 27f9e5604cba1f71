//! Program-keyed cache on top of the texture atlas.

pub(crate) mod anim;
pub(crate) mod cache;
pub(crate) mod hashed;

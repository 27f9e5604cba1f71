/// Convenience result type used across texpipe.
pub type TexPipeResult<T> = Result<T, TexPipeError>;

/// Top-level error taxonomy used by the public APIs.
///
/// Resource pressure (atlas full, staging full, GPU out of memory) is never reported through
/// this type; it is delivered as an [`crate::AtlasEvent`] and retried on a later flush.
#[derive(thiserror::Error, Debug)]
pub enum TexPipeError {
    /// Malformed DSL source or a program that exceeds a compile-time limit.
    #[error("compile error: {0}")]
    Compile(String),

    /// A texture name could not be resolved, or a program was used before linking.
    #[error("link error: {0}")]
    Link(String),

    /// The VM rejected a program while baking it.
    #[error("bake error: {0}")]
    Bake(String),

    /// Invalid arguments passed to an API call (bad sizes, bad row pitch, oversized texture).
    #[error("input error: {0}")]
    Input(String),

    /// Invalid configuration values.
    #[error("config error: {0}")]
    Config(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TexPipeError {
    /// Build a [`TexPipeError::Compile`] value.
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Build a [`TexPipeError::Link`] value.
    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link(msg.into())
    }

    /// Build a [`TexPipeError::Bake`] value.
    pub fn bake(msg: impl Into<String>) -> Self {
        Self::Bake(msg.into())
    }

    /// Build a [`TexPipeError::Input`] value.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Build a [`TexPipeError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;

//! Error types for the atlas crate.

use thiserror::Error;

/// Errors that can occur while constructing backing stores.
///
/// Runtime exhaustion is not an error: a full atlas surfaces as an invalid
/// [`GlyphLocation`](crate::GlyphLocation) and a full geometry store as a
/// `-1` offset. Contract violations (misaligned data, stale handles) are
/// panics, not errors.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// A texel store was configured with a degenerate shape.
    #[error("invalid texel store shape: {width}x{height}x{layers} at {bytes_per_texel} bytes per texel")]
    InvalidTexelShape {
        /// The requested width in texels.
        width: i32,
        /// The requested height in texels.
        height: i32,
        /// The requested layer count.
        layers: i32,
        /// The requested texel size in bytes.
        bytes_per_texel: u32,
    },

    /// A geometry store was configured with a zero alignment.
    #[error("invalid geometry store shape: {size} blocks with alignment {alignment}")]
    InvalidGeometryShape {
        /// The requested capacity in blocks.
        size: u32,
        /// The requested values-per-block alignment.
        alignment: u32,
    },

    /// The texture format cannot back a texel store (compressed or
    /// multi-aspect formats have no per-texel byte size).
    #[error("texture format {0:?} cannot back a texel store")]
    UnsupportedTextureFormat(wgpu::TextureFormat),
}

/// Result type for atlas operations.
pub type AtlasResult<T> = Result<T, AtlasError>;

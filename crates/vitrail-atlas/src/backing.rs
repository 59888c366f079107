//! Backing-store contracts consumed by the glyph atlas.
//!
//! The atlas core never talks to the GPU directly. It manages space inside
//! two abstract stores and writes through the interfaces below: a 3D texture
//! array holding glyph texels and a linear buffer holding per-glyph geometry
//! records. Concrete implementations live in [`crate::gpu`] (wgpu) and
//! [`crate::memory`] (CPU, for tests and headless use).
//!
//! Stores are shared with the renderer via `Arc`, so every method takes
//! `&self`; implementations synchronize internally. The atlas only calls
//! mutating methods while holding its own mutex.

use glam::IVec3;

/// One 32-bit record of glyph geometry data.
///
/// Geometry uploads are type-erased: a record may carry a float, a signed or
/// an unsigned integer depending on the glyph rendering technique. The
/// constructors and accessors reinterpret the same 32 bits.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryValue(pub u32);

impl GeometryValue {
    /// Wrap a float value.
    #[inline]
    pub fn from_f32(value: f32) -> Self {
        Self(value.to_bits())
    }

    /// Wrap a signed integer value.
    #[inline]
    pub fn from_i32(value: i32) -> Self {
        Self(value as u32)
    }

    /// Wrap an unsigned integer value.
    #[inline]
    pub fn from_u32(value: u32) -> Self {
        Self(value)
    }

    /// Reinterpret the record as a float.
    #[inline]
    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    /// Reinterpret the record as a signed integer.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Reinterpret the record as an unsigned integer.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A GPU-resident 3D texture array of glyph texels.
///
/// The store presents a `width x height x layers` volume. The atlas packs
/// rectangles into each layer and uploads texel data with [`set_data`].
/// Uploads may be buffered; [`flush`] makes everything issued so far visible
/// to subsequent GPU use.
///
/// [`set_data`]: TexelBackingStore::set_data
/// [`flush`]: TexelBackingStore::flush
pub trait TexelBackingStore: Send + Sync {
    /// Width, height and layer count of the backing texture array.
    fn dimensions(&self) -> IVec3;

    /// Bytes occupied by a single texel.
    fn bytes_per_texel(&self) -> u32;

    /// Whether [`resize`](TexelBackingStore::resize) may be called.
    fn resizeable(&self) -> bool;

    /// Upload a `w x h` texel region into layer `layer` at `(x, y)`.
    ///
    /// `data.len()` must equal `w * h * bytes_per_texel()` and the region
    /// must lie inside the layer; violations panic.
    fn set_data(&self, x: i32, y: i32, layer: i32, w: i32, h: i32, data: &[u8]);

    /// Grow the layer dimension to `new_layers`, preserving the contents of
    /// all existing layers.
    ///
    /// Panics if the store is not resizeable or `new_layers` does not
    /// exceed the current layer count.
    fn resize(&self, new_layers: i32);

    /// Make all uploads issued since the previous flush visible to the GPU.
    fn flush(&self);
}

/// A GPU-resident linear buffer of glyph geometry records.
///
/// Capacity is measured in *blocks* of [`alignment`] records each; the atlas
/// allocates whole blocks. Growth policy is the atlas's decision, the store
/// only guarantees content preservation across [`resize`].
///
/// [`alignment`]: GeometryBackingStore::alignment
/// [`resize`]: GeometryBackingStore::resize
pub trait GeometryBackingStore: Send + Sync {
    /// Current capacity in blocks.
    fn size(&self) -> u32;

    /// Number of 32-bit records per block. Always positive.
    fn alignment(&self) -> u32;

    /// Whether [`resize`](GeometryBackingStore::resize) may be called.
    fn resizeable(&self) -> bool;

    /// Write `data.len() / alignment()` blocks starting at `block_offset`.
    ///
    /// `data.len()` must be a non-zero multiple of [`alignment`] and the
    /// written range must lie inside the store; violations panic.
    ///
    /// [`alignment`]: GeometryBackingStore::alignment
    fn set_values(&self, block_offset: u32, data: &[GeometryValue]);

    /// Grow the capacity to `new_size` blocks, preserving contents.
    ///
    /// Panics if the store is not resizeable or `new_size` does not exceed
    /// the current capacity.
    fn resize(&self, new_size: u32);

    /// Make all writes issued since the previous flush visible to the GPU.
    fn flush(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_value_views() {
        assert_eq!(GeometryValue::from_f32(1.5).as_f32(), 1.5);
        assert_eq!(GeometryValue::from_i32(-7).as_i32(), -7);
        assert_eq!(GeometryValue::from_u32(42).as_u32(), 42);

        // All three views share the same bits.
        let value = GeometryValue::from_f32(2.0);
        assert_eq!(value.as_u32(), 2.0_f32.to_bits());
    }

    #[test]
    fn test_geometry_value_is_pod() {
        let values = [GeometryValue::from_u32(1), GeometryValue::from_u32(2)];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 1);
    }
}

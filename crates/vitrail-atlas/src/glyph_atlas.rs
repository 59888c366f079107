//! The concurrent glyph atlas.
//!
//! [`GlyphAtlas`] multiplexes one [`RectAtlas`] per texture layer and one
//! [`IntervalAllocator`] for the geometry buffer behind a single mutex.
//! When every layer is packed it grows the texel store one layer at a
//! time; when the geometry allocator runs dry it grows the geometry store.
//! Uploads go through the backing stores and become GPU-visible on
//! [`flush`](GlyphAtlas::flush).

use std::sync::Arc;

use glam::IVec2;
use parking_lot::Mutex;
use tracing::debug;

use crate::backing::{GeometryBackingStore, GeometryValue, TexelBackingStore};
use crate::interval::IntervalAllocator;
use crate::rect_atlas::{Padding, RectAtlas, RectKey};

/// Handle to a glyph resident in a [`GlyphAtlas`].
///
/// A location stays usable until the glyph is deallocated or the atlas is
/// cleared; after that the handle is stale and must not be passed back to
/// the atlas. An invalid location (allocation failure) reports `(-1, -1)`
/// origin and size and layer `-1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlyphLocation {
    data: Option<LocationData>,
}

#[derive(Debug, Clone, Copy)]
struct LocationData {
    rect: RectKey,
    layer: i32,
    min: IVec2,
    size: IVec2,
}

impl GlyphLocation {
    /// The invalid location returned by failed allocations.
    pub fn invalid() -> Self {
        Self { data: None }
    }

    /// Whether this location refers to a resident glyph.
    pub fn valid(&self) -> bool {
        self.data.is_some()
    }

    /// Unpadded origin within the owning layer, or `(-1, -1)`.
    pub fn location(&self) -> IVec2 {
        self.data.map_or(IVec2::splat(-1), |data| data.min)
    }

    /// Unpadded glyph size, or `(-1, -1)`.
    pub fn size(&self) -> IVec2 {
        self.data.map_or(IVec2::splat(-1), |data| data.size)
    }

    /// Index of the owning texture layer, or `-1`.
    pub fn layer(&self) -> i32 {
        self.data.map_or(-1, |data| data.layer)
    }
}

/// Packs rasterized glyph texels and per-glyph geometry records into a pair
/// of GPU backing stores.
///
/// The atlas is thread-safe: every mutating operation serializes on one
/// internal mutex, and the backing stores are only written while it is
/// held. There is no intra-atlas parallelism. Stores are shared via `Arc`
/// so the renderer can read them between [`flush`](GlyphAtlas::flush)es;
/// sequencing those reads against atlas writes is the caller's business.
pub struct GlyphAtlas {
    texel_store: Arc<dyn TexelBackingStore>,
    geometry_store: Arc<dyn GeometryBackingStore>,
    inner: Mutex<AtlasState>,
}

struct AtlasState {
    /// One packer per texture layer, indexed by layer.
    layers: Vec<RectAtlas>,
    geometry_allocator: IntervalAllocator,
}

impl GlyphAtlas {
    /// Create an atlas over the given stores.
    ///
    /// One packer is built per existing texture layer and the geometry
    /// allocator starts at the geometry store's current capacity.
    pub fn new(
        texel_store: Arc<dyn TexelBackingStore>,
        geometry_store: Arc<dyn GeometryBackingStore>,
    ) -> Self {
        let dimensions = texel_store.dimensions();
        let layer_dimensions = IVec2::new(dimensions.x, dimensions.y);
        let layers = (0..dimensions.z)
            .map(|_| RectAtlas::new(layer_dimensions))
            .collect();
        let geometry_allocator = IntervalAllocator::new(geometry_store.size());

        Self {
            texel_store,
            geometry_store,
            inner: Mutex::new(AtlasState {
                layers,
                geometry_allocator,
            }),
        }
    }

    /// The texel store this atlas packs into.
    pub fn texel_store(&self) -> &dyn TexelBackingStore {
        self.texel_store.as_ref()
    }

    /// The geometry store this atlas packs into.
    pub fn geometry_store(&self) -> &dyn GeometryBackingStore {
        self.geometry_store.as_ref()
    }

    /// Place a glyph of `size` texels and upload its pixels.
    ///
    /// Layers are tried in order; when all are packed and the texel store
    /// is resizeable, the store grows by one layer and the new layer is
    /// tried as well. `data` covers the unpadded glyph
    /// (`size.x * size.y * bytes_per_texel` bytes) and is written at the
    /// padded origin, leaving the reserved border untouched.
    ///
    /// Returns an invalid location when the glyph is larger than a layer,
    /// zero-sized, or no space could be found.
    pub fn allocate(&self, size: IVec2, data: &[u8], padding: Padding) -> GlyphLocation {
        let dimensions = self.texel_store.dimensions();
        if size.x <= 0 || size.y <= 0 || size.x > dimensions.x || size.y > dimensions.y {
            return GlyphLocation::invalid();
        }

        let mut state = self.inner.lock();

        let mut placed = None;
        for (layer, atlas) in state.layers.iter_mut().enumerate() {
            if let Some(key) = atlas.add_rectangle(size, padding) {
                placed = Some((layer, key));
                break;
            }
        }

        if placed.is_none() && self.texel_store.resizeable() {
            // Grow one layer at a time; the size check above guarantees an
            // unpadded glyph fits a fresh layer, though padding may not.
            let old_layers = state.layers.len();
            self.texel_store.resize(old_layers as i32 + 1);
            state
                .layers
                .push(RectAtlas::new(IVec2::new(dimensions.x, dimensions.y)));
            debug!(
                target: "vitrail_atlas::glyph_atlas",
                layers = old_layers + 1,
                "grew texel store by one layer"
            );
            placed = state.layers[old_layers]
                .add_rectangle(size, padding)
                .map(|key| (old_layers, key));
        }

        let Some((layer, key)) = placed else {
            return GlyphLocation::invalid();
        };

        let rect = state.layers[layer]
            .rectangle(key)
            .expect("freshly placed rectangle");
        let padded_min = rect.min();
        let unpadded_min = rect.unpadded_min();
        let unpadded_size = rect.unpadded_size();

        self.texel_store.set_data(
            padded_min.x,
            padded_min.y,
            layer as i32,
            size.x,
            size.y,
            data,
        );

        GlyphLocation {
            data: Some(LocationData {
                rect: key,
                layer: layer as i32,
                min: unpadded_min,
                size: unpadded_size,
            }),
        }
    }

    /// Release a glyph's space back to its layer.
    ///
    /// The freed leaf coalesces with empty neighbors. Panics on an invalid
    /// or stale (double-freed, cleared) location.
    pub fn deallocate(&self, location: GlyphLocation) {
        let data = location
            .data
            .expect("deallocate of an invalid glyph location");

        let mut state = self.inner.lock();
        let layer = data.layer as usize;
        assert!(layer < state.layers.len(), "glyph location layer out of range");
        state.layers[layer].delete_rectangle(data.rect);
    }

    /// Reserve space for `data` in the geometry store and upload it.
    ///
    /// `data.len()` must be a non-zero multiple of the store alignment;
    /// the data occupies `data.len() / alignment` blocks. When the
    /// allocator is exhausted and the store is resizeable, the store grows
    /// to `blocks + 2 * current_size` and the allocation retries.
    ///
    /// Returns the block offset, or `-1` when no space could be found.
    pub fn allocate_geometry_data(&self, data: &[GeometryValue]) -> i32 {
        let alignment = self.geometry_store.alignment();
        assert!(alignment > 0, "geometry store alignment must be positive");
        assert!(!data.is_empty(), "empty geometry allocation");
        assert_eq!(
            data.len() as u32 % alignment,
            0,
            "geometry allocation of {} values is not a multiple of the store alignment {}",
            data.len(),
            alignment
        );
        let blocks = data.len() as u32 / alignment;

        let mut state = self.inner.lock();
        let offset = match state.geometry_allocator.allocate_interval(blocks) {
            Some(offset) => offset,
            None if self.geometry_store.resizeable() => {
                let old_size = self.geometry_store.size();
                let new_size = blocks + 2 * old_size;
                self.geometry_store.resize(new_size);
                state.geometry_allocator.resize(self.geometry_store.size());
                debug!(
                    target: "vitrail_atlas::glyph_atlas",
                    old_size,
                    new_size,
                    "grew geometry store"
                );
                match state.geometry_allocator.allocate_interval(blocks) {
                    Some(offset) => offset,
                    None => return -1,
                }
            }
            None => return -1,
        };

        self.geometry_store.set_values(offset, data);
        offset as i32
    }

    /// Return geometry space to the free pool.
    ///
    /// `count` is in raw values, matching the
    /// [`allocate_geometry_data`](GlyphAtlas::allocate_geometry_data) input
    /// shape. An offset of `-1` (a failed allocation) is accepted with a
    /// zero count and ignored.
    pub fn deallocate_geometry_data(&self, offset: i32, count: u32) {
        if offset < 0 {
            assert_eq!(count, 0, "non-zero count for an invalid geometry offset");
            return;
        }

        let alignment = self.geometry_store.alignment();
        assert!(
            count > 0 && count % alignment == 0,
            "geometry free of {count} values is not a positive multiple of the store alignment {alignment}"
        );

        let mut state = self.inner.lock();
        state
            .geometry_allocator
            .free_interval(offset as u32, count / alignment);
    }

    /// Drop every glyph and geometry allocation.
    ///
    /// The stores keep their current capacity; their contents are simply up
    /// for reuse. All outstanding [`GlyphLocation`]s and geometry offsets
    /// become stale and must not be passed back.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let capacity = state.geometry_allocator.size();
        state.geometry_allocator.reset(capacity);
        for layer in &mut state.layers {
            layer.clear();
        }
        debug!(target: "vitrail_atlas::glyph_atlas", "cleared atlas");
    }

    /// Flush both backing stores, making all uploads GPU-visible.
    pub fn flush(&self) {
        let _state = self.inner.lock();
        self.texel_store.flush();
        self.geometry_store.flush();
    }
}

impl std::fmt::Debug for GlyphAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        let glyphs: usize = state.layers.iter().map(RectAtlas::allocation_count).sum();
        f.debug_struct("GlyphAtlas")
            .field("layers", &state.layers.len())
            .field("glyphs", &glyphs)
            .field("geometry", &state.geometry_allocator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryGeometryStore, MemoryTexelStore};

    fn test_atlas(
        width: i32,
        height: i32,
        layers: i32,
        resizeable: bool,
    ) -> (Arc<MemoryTexelStore>, Arc<MemoryGeometryStore>, GlyphAtlas) {
        let texels = Arc::new(MemoryTexelStore::new(width, height, layers, 1, resizeable).unwrap());
        let geometry = Arc::new(MemoryGeometryStore::new(1, 16, true).unwrap());
        let atlas = GlyphAtlas::new(texels.clone(), geometry.clone());
        (texels, geometry, atlas)
    }

    #[test]
    fn test_invalid_location_accessors() {
        let location = GlyphLocation::invalid();
        assert!(!location.valid());
        assert_eq!(location.location(), IVec2::splat(-1));
        assert_eq!(location.size(), IVec2::splat(-1));
        assert_eq!(location.layer(), -1);
    }

    #[test]
    fn test_allocate_uploads_pixels() {
        let (texels, _, atlas) = test_atlas(8, 8, 1, false);
        let pixels = [7u8; 4];

        let location = atlas.allocate(IVec2::new(2, 2), &pixels, Padding::NONE);
        assert!(location.valid());
        assert_eq!(location.location(), IVec2::ZERO);
        assert_eq!(location.size(), IVec2::new(2, 2));
        assert_eq!(location.layer(), 0);

        assert_eq!(texels.texel(0, 0, 0), vec![7]);
        assert_eq!(texels.texel(1, 1, 0), vec![7]);
        assert_eq!(texels.texel(2, 2, 0), vec![0]);
    }

    #[test]
    fn test_padded_allocation_reports_interior() {
        let (texels, _, atlas) = test_atlas(16, 16, 1, false);
        let pixels = [9u8; 9];

        let location = atlas.allocate(IVec2::new(3, 3), &pixels, Padding::uniform(1));
        assert!(location.valid());
        // The tree reserved 5x5 at the origin; the glyph interior is inset.
        assert_eq!(location.location(), IVec2::new(1, 1));
        assert_eq!(location.size(), IVec2::new(3, 3));

        // Pixels land at the padded origin; the border stays untouched.
        assert_eq!(texels.texel(0, 0, 0), vec![9]);
        assert_eq!(texels.texel(2, 2, 0), vec![9]);
        assert_eq!(texels.texel(3, 0, 0), vec![0]);
    }

    #[test]
    fn test_oversized_glyph_is_invalid() {
        let (_, _, atlas) = test_atlas(8, 8, 1, true);
        assert!(!atlas.allocate(IVec2::new(9, 1), &[0; 9], Padding::NONE).valid());
        assert!(!atlas.allocate(IVec2::new(0, 0), &[], Padding::NONE).valid());
        // Being oversized never grows the store.
        assert_eq!(atlas.texel_store().dimensions().z, 1);
    }

    #[test]
    fn test_full_fixed_atlas_is_invalid() {
        let (_, _, atlas) = test_atlas(4, 4, 1, false);
        assert!(atlas.allocate(IVec2::new(4, 4), &[1; 16], Padding::NONE).valid());
        assert!(!atlas.allocate(IVec2::new(1, 1), &[1], Padding::NONE).valid());
    }

    #[test]
    fn test_deallocate_makes_room() {
        let (_, _, atlas) = test_atlas(4, 4, 1, false);
        let first = atlas.allocate(IVec2::new(4, 4), &[1; 16], Padding::NONE);
        assert!(first.valid());

        atlas.deallocate(first);
        let second = atlas.allocate(IVec2::new(4, 4), &[2; 16], Padding::NONE);
        assert!(second.valid());
        assert_eq!(second.location(), IVec2::ZERO);
    }

    #[test]
    #[should_panic(expected = "invalid glyph location")]
    fn test_deallocate_invalid_location_panics() {
        let (_, _, atlas) = test_atlas(4, 4, 1, false);
        atlas.deallocate(GlyphLocation::invalid());
    }

    #[test]
    fn test_geometry_round_trip() {
        let (_, geometry, atlas) = test_atlas(4, 4, 1, false);
        let data = [
            GeometryValue::from_f32(0.5),
            GeometryValue::from_u32(11),
            GeometryValue::from_i32(-3),
        ];

        let offset = atlas.allocate_geometry_data(&data);
        assert_eq!(offset, 0);
        assert_eq!(geometry.values(0, 3), data.to_vec());

        atlas.deallocate_geometry_data(offset, data.len() as u32);
        assert_eq!(atlas.allocate_geometry_data(&data), 0);
    }

    #[test]
    fn test_deallocate_geometry_accepts_failed_offset() {
        let (_, _, atlas) = test_atlas(4, 4, 1, false);
        atlas.deallocate_geometry_data(-1, 0);
    }

    #[test]
    fn test_flush_reaches_both_stores() {
        let (texels, geometry, atlas) = test_atlas(4, 4, 1, false);
        atlas.flush();
        atlas.flush();
        assert_eq!(texels.flush_count(), 2);
        assert_eq!(geometry.flush_count(), 2);
    }
}

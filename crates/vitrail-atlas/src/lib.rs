//! Glyph atlas core for the Vitrail 2D renderer.
//!
//! This crate packs rasterized glyph bitmaps and per-glyph geometry records
//! into a small set of GPU-resident backing stores, hands out stable
//! handles, and releases the space when glyphs are evicted. It is the
//! storage-management half of text rendering; rasterization, shaping and
//! draw-call generation live elsewhere.
//!
//! # Architecture
//!
//! Three pieces cooperate:
//!
//! * [`RectAtlas`] packs rectangles into one texture layer with guillotine
//!   splits, supporting interleaved allocation and deallocation with
//!   coalescing on free.
//! * [`IntervalAllocator`] manages a linear geometry buffer the same way in
//!   one dimension.
//! * [`GlyphAtlas`] multiplexes one packer per texture layer and the
//!   interval allocator behind a single mutex, grows the backing stores
//!   when they run out, and routes uploads through them.
//!
//! The backing stores are abstract ([`TexelBackingStore`],
//! [`GeometryBackingStore`]): [`GpuTexelStore`] / [`GpuGeometryStore`] put
//! them on a wgpu device, while [`MemoryTexelStore`] /
//! [`MemoryGeometryStore`] keep everything in CPU memory for tests and
//! headless use.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use glam::IVec2;
//! use vitrail_atlas::{GlyphAtlas, MemoryGeometryStore, MemoryTexelStore, Padding};
//!
//! let texels = Arc::new(MemoryTexelStore::new(1024, 1024, 1, 1, true)?);
//! let geometry = Arc::new(MemoryGeometryStore::new(4, 256, true)?);
//! let atlas = GlyphAtlas::new(texels, geometry);
//!
//! let pixels = vec![0xff; 10 * 12];
//! let location = atlas.allocate(IVec2::new(10, 12), &pixels, Padding::uniform(1));
//! assert!(location.valid());
//!
//! // ... render using location.layer() / location.location() ...
//!
//! atlas.flush();
//! atlas.deallocate(location);
//! # Ok::<(), vitrail_atlas::AtlasError>(())
//! ```

mod backing;
mod error;
mod glyph_atlas;
mod gpu;
mod interval;
mod memory;
mod rect_atlas;

pub use backing::{GeometryBackingStore, GeometryValue, TexelBackingStore};
pub use error::{AtlasError, AtlasResult};
pub use glyph_atlas::{GlyphAtlas, GlyphLocation};
pub use gpu::{GpuGeometryStore, GpuTexelStore};
pub use interval::IntervalAllocator;
pub use memory::{MemoryGeometryStore, MemoryTexelStore};
pub use rect_atlas::{Padding, RectAtlas, RectKey, Rectangle};

// Re-export the math and GPU crates that appear in the public API.
pub use glam;
pub use wgpu;

//! CPU-resident backing stores.
//!
//! These implement the backing-store contracts entirely in memory. They are
//! the reference implementations for the test suite and serve headless
//! callers that want atlas bookkeeping without a GPU. Uploads apply
//! immediately; [`flush`](crate::TexelBackingStore::flush) only counts, so
//! tests can assert that the atlas delegates flushes.

use glam::IVec3;
use parking_lot::Mutex;

use crate::backing::{GeometryBackingStore, GeometryValue, TexelBackingStore};
use crate::error::{AtlasError, AtlasResult};

/// In-memory implementation of [`TexelBackingStore`].
///
/// Each layer is a row-major `width * height * bytes_per_texel` byte
/// buffer, zero-initialized.
pub struct MemoryTexelStore {
    width: i32,
    height: i32,
    bytes_per_texel: u32,
    resizeable: bool,
    inner: Mutex<TexelInner>,
}

struct TexelInner {
    layers: Vec<Vec<u8>>,
    flushes: u64,
}

impl MemoryTexelStore {
    /// Create a store of `layers` zeroed layers of `width x height` texels.
    pub fn new(
        width: i32,
        height: i32,
        layers: i32,
        bytes_per_texel: u32,
        resizeable: bool,
    ) -> AtlasResult<Self> {
        if width <= 0 || height <= 0 || layers < 1 || bytes_per_texel == 0 {
            return Err(AtlasError::InvalidTexelShape {
                width,
                height,
                layers,
                bytes_per_texel,
            });
        }

        let layer_bytes = width as usize * height as usize * bytes_per_texel as usize;
        Ok(Self {
            width,
            height,
            bytes_per_texel,
            resizeable,
            inner: Mutex::new(TexelInner {
                layers: (0..layers).map(|_| vec![0; layer_bytes]).collect(),
                flushes: 0,
            }),
        })
    }

    /// Number of flushes issued so far.
    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }

    /// Snapshot of one layer's texel bytes.
    ///
    /// Panics if `layer` is out of range.
    pub fn layer_data(&self, layer: i32) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.layers[layer as usize].clone()
    }

    /// Snapshot of the texel at `(x, y)` in `layer`.
    ///
    /// Panics if the coordinate is out of range.
    pub fn texel(&self, x: i32, y: i32, layer: i32) -> Vec<u8> {
        assert!(x >= 0 && x < self.width && y >= 0 && y < self.height);
        let bpt = self.bytes_per_texel as usize;
        let offset = (y as usize * self.width as usize + x as usize) * bpt;
        let inner = self.inner.lock();
        inner.layers[layer as usize][offset..offset + bpt].to_vec()
    }
}

impl TexelBackingStore for MemoryTexelStore {
    fn dimensions(&self) -> IVec3 {
        let inner = self.inner.lock();
        IVec3::new(self.width, self.height, inner.layers.len() as i32)
    }

    fn bytes_per_texel(&self) -> u32 {
        self.bytes_per_texel
    }

    fn resizeable(&self) -> bool {
        self.resizeable
    }

    fn set_data(&self, x: i32, y: i32, layer: i32, w: i32, h: i32, data: &[u8]) {
        assert!(w > 0 && h > 0, "empty texel upload");
        assert!(x >= 0 && y >= 0 && layer >= 0, "negative upload origin");
        assert!(
            x + w <= self.width && y + h <= self.height,
            "texel upload [{x}, {}) x [{y}, {}) exceeds layer {}x{}",
            x + w,
            y + h,
            self.width,
            self.height
        );

        let bpt = self.bytes_per_texel as usize;
        let expected = w as usize * h as usize * bpt;
        assert_eq!(data.len(), expected, "texel upload byte count mismatch");

        let mut inner = self.inner.lock();
        assert!((layer as usize) < inner.layers.len(), "upload layer out of range");

        let row_bytes = w as usize * bpt;
        let stride = self.width as usize * bpt;
        let layer_buf = &mut inner.layers[layer as usize];
        for row in 0..h as usize {
            let src = row * row_bytes;
            let dst = (y as usize + row) * stride + x as usize * bpt;
            layer_buf[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
    }

    fn resize(&self, new_layers: i32) {
        assert!(self.resizeable, "resize on a fixed-size texel store");
        let mut inner = self.inner.lock();
        let old_layers = inner.layers.len() as i32;
        assert!(
            new_layers > old_layers,
            "texel store resize must grow ({old_layers} -> {new_layers})"
        );

        let layer_bytes =
            self.width as usize * self.height as usize * self.bytes_per_texel as usize;
        inner
            .layers
            .resize_with(new_layers as usize, || vec![0; layer_bytes]);
    }

    fn flush(&self) {
        self.inner.lock().flushes += 1;
    }
}

impl std::fmt::Debug for MemoryTexelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryTexelStore")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layers", &inner.layers.len())
            .field("bytes_per_texel", &self.bytes_per_texel)
            .finish()
    }
}

/// In-memory implementation of [`GeometryBackingStore`].
pub struct MemoryGeometryStore {
    alignment: u32,
    resizeable: bool,
    inner: Mutex<GeometryInner>,
}

struct GeometryInner {
    values: Vec<GeometryValue>,
    size: u32,
    flushes: u64,
}

impl MemoryGeometryStore {
    /// Create a store of `size` zeroed blocks of `alignment` records each.
    pub fn new(alignment: u32, size: u32, resizeable: bool) -> AtlasResult<Self> {
        if alignment == 0 {
            return Err(AtlasError::InvalidGeometryShape { size, alignment });
        }

        Ok(Self {
            alignment,
            resizeable,
            inner: Mutex::new(GeometryInner {
                values: vec![GeometryValue::default(); (size * alignment) as usize],
                size,
                flushes: 0,
            }),
        })
    }

    /// Number of flushes issued so far.
    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }

    /// Snapshot of `blocks` blocks starting at `block_offset`.
    ///
    /// Panics if the range is out of bounds.
    pub fn values(&self, block_offset: u32, blocks: u32) -> Vec<GeometryValue> {
        let inner = self.inner.lock();
        assert!(block_offset + blocks <= inner.size, "snapshot out of range");
        let start = (block_offset * self.alignment) as usize;
        let end = start + (blocks * self.alignment) as usize;
        inner.values[start..end].to_vec()
    }
}

impl GeometryBackingStore for MemoryGeometryStore {
    fn size(&self) -> u32 {
        self.inner.lock().size
    }

    fn alignment(&self) -> u32 {
        self.alignment
    }

    fn resizeable(&self) -> bool {
        self.resizeable
    }

    fn set_values(&self, block_offset: u32, data: &[GeometryValue]) {
        assert!(!data.is_empty(), "empty geometry write");
        assert_eq!(
            data.len() as u32 % self.alignment,
            0,
            "geometry write of {} values is not a multiple of alignment {}",
            data.len(),
            self.alignment
        );

        let mut inner = self.inner.lock();
        let blocks = data.len() as u32 / self.alignment;
        assert!(
            block_offset + blocks <= inner.size,
            "geometry write [{block_offset}, {}) exceeds capacity {}",
            block_offset + blocks,
            inner.size
        );

        let start = (block_offset * self.alignment) as usize;
        inner.values[start..start + data.len()].copy_from_slice(data);
    }

    fn resize(&self, new_size: u32) {
        assert!(self.resizeable, "resize on a fixed-size geometry store");
        let mut inner = self.inner.lock();
        assert!(
            new_size > inner.size,
            "geometry store resize must grow ({} -> {new_size})",
            inner.size
        );

        inner
            .values
            .resize((new_size * self.alignment) as usize, GeometryValue::default());
        inner.size = new_size;
    }

    fn flush(&self) {
        self.inner.lock().flushes += 1;
    }
}

impl std::fmt::Debug for MemoryGeometryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryGeometryStore")
            .field("size", &inner.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

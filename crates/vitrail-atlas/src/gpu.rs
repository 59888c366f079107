//! wgpu-backed implementations of the backing-store contracts.
//!
//! Both stores stage uploads CPU-side and issue them on `flush()`, so a
//! burst of glyph allocations turns into one batch of queue writes. Growth
//! recreates the underlying resource and copies the old contents across on
//! a command encoder; bind groups built against the old texture or buffer
//! must be recreated afterwards.
//!
//! The device and queue are injected at construction. The stores hold no
//! global state and can serve several atlases on the same device.

use std::sync::Arc;

use glam::{IVec2, IVec3};
use parking_lot::Mutex;
use tracing::debug;

use crate::backing::{GeometryBackingStore, GeometryValue, TexelBackingStore};
use crate::error::{AtlasError, AtlasResult};

/// [`TexelBackingStore`] over a `wgpu` 2D texture array.
pub struct GpuTexelStore {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    format: wgpu::TextureFormat,
    bytes_per_texel: u32,
    width: i32,
    height: i32,
    resizeable: bool,
    inner: Mutex<TexelInner>,
}

struct TexelInner {
    texture: wgpu::Texture,
    layers: i32,
    pending: Vec<PendingTexels>,
}

struct PendingTexels {
    origin: IVec3,
    size: IVec2,
    data: Vec<u8>,
}

impl GpuTexelStore {
    /// Create a store backed by a fresh `width x height x layers` texture
    /// array of the given format.
    ///
    /// Only uncompressed single-aspect formats are supported; anything else
    /// has no per-texel byte size for the atlas to validate against.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        width: i32,
        height: i32,
        layers: i32,
        format: wgpu::TextureFormat,
        resizeable: bool,
    ) -> AtlasResult<Self> {
        let bytes_per_texel = format_bytes_per_texel(format)?;
        if width <= 0 || height <= 0 || layers < 1 {
            return Err(AtlasError::InvalidTexelShape {
                width,
                height,
                layers,
                bytes_per_texel,
            });
        }

        let texture = create_texture(&device, width, height, layers, format);
        Ok(Self {
            device,
            queue,
            format,
            bytes_per_texel,
            width,
            height,
            resizeable,
            inner: Mutex::new(TexelInner {
                texture,
                layers,
                pending: Vec::new(),
            }),
        })
    }

    /// The texture format backing this store.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Handle to the current backing texture.
    ///
    /// [`resize`](TexelBackingStore::resize) replaces the texture; views and
    /// bind groups built from an earlier handle keep reading the old one.
    pub fn texture(&self) -> wgpu::Texture {
        self.inner.lock().texture.clone()
    }

    /// Create a `D2Array` view of the current backing texture.
    pub fn create_view(&self) -> wgpu::TextureView {
        let inner = self.inner.lock();
        inner.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("glyph_texel_store_view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        })
    }

    fn write_pending(&self, texture: &wgpu::Texture, pending: &mut Vec<PendingTexels>) {
        for upload in pending.drain(..) {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: upload.origin.x as u32,
                        y: upload.origin.y as u32,
                        z: upload.origin.z as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &upload.data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_texel * upload.size.x as u32),
                    rows_per_image: Some(upload.size.y as u32),
                },
                wgpu::Extent3d {
                    width: upload.size.x as u32,
                    height: upload.size.y as u32,
                    depth_or_array_layers: 1,
                },
            );
        }
    }
}

impl TexelBackingStore for GpuTexelStore {
    fn dimensions(&self) -> IVec3 {
        let inner = self.inner.lock();
        IVec3::new(self.width, self.height, inner.layers)
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
        let expected = w as usize * h as usize * self.bytes_per_texel as usize;
        assert_eq!(data.len(), expected, "texel upload byte count mismatch");

        let mut inner = self.inner.lock();
        assert!(layer < inner.layers, "upload layer out of range");
        inner.pending.push(PendingTexels {
            origin: IVec3::new(x, y, layer),
            size: IVec2::new(w, h),
            data: data.to_vec(),
        });
    }

    fn resize(&self, new_layers: i32) {
        assert!(self.resizeable, "resize on a fixed-size texel store");
        let mut inner = self.inner.lock();
        let old_layers = inner.layers;
        assert!(
            new_layers > old_layers,
            "texel store resize must grow ({old_layers} -> {new_layers})"
        );

        // Land staged uploads in the old texture before copying it over.
        let TexelInner {
            texture, pending, ..
        } = &mut *inner;
        self.write_pending(texture, pending);

        let new_texture = create_texture(&self.device, self.width, self.height, new_layers, self.format);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyph_texel_store_resize"),
            });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &inner.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &new_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width as u32,
                height: self.height as u32,
                depth_or_array_layers: old_layers as u32,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        inner.texture = new_texture;
        inner.layers = new_layers;

        debug!(
            target: "vitrail_atlas::gpu",
            old_layers,
            new_layers,
            "grew texel store"
        );
    }

    fn flush(&self) {
        let mut inner = self.inner.lock();
        let TexelInner {
            texture, pending, ..
        } = &mut *inner;
        self.write_pending(texture, pending);
        self.queue.submit(std::iter::empty());
    }
}

impl std::fmt::Debug for GpuTexelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GpuTexelStore")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layers", &inner.layers)
            .field("format", &self.format)
            .field("pending_uploads", &inner.pending.len())
            .finish()
    }
}

fn create_texture(
    device: &wgpu::Device,
    width: i32,
    height: i32,
    layers: i32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("glyph_texel_store"),
        size: wgpu::Extent3d {
            width: width as u32,
            height: height as u32,
            depth_or_array_layers: layers as u32,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// [`GeometryBackingStore`] over a `wgpu` storage buffer.
pub struct GpuGeometryStore {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    alignment: u32,
    resizeable: bool,
    inner: Mutex<GeometryInner>,
}

struct GeometryInner {
    buffer: wgpu::Buffer,
    size: u32,
    pending: Vec<PendingValues>,
}

struct PendingValues {
    block_offset: u32,
    data: Vec<GeometryValue>,
}

impl GpuGeometryStore {
    /// Create a store of `size` blocks of `alignment` records each.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        alignment: u32,
        size: u32,
        resizeable: bool,
    ) -> AtlasResult<Self> {
        if alignment == 0 {
            return Err(AtlasError::InvalidGeometryShape { size, alignment });
        }

        let buffer = create_buffer(&device, block_bytes(size, alignment));
        Ok(Self {
            device,
            queue,
            alignment,
            resizeable,
            inner: Mutex::new(GeometryInner {
                buffer,
                size,
                pending: Vec::new(),
            }),
        })
    }

    /// Handle to the current backing buffer.
    ///
    /// [`resize`](GeometryBackingStore::resize) replaces the buffer; bind
    /// groups built from an earlier handle keep reading the old one.
    pub fn buffer(&self) -> wgpu::Buffer {
        self.inner.lock().buffer.clone()
    }

    fn write_pending(&self, buffer: &wgpu::Buffer, pending: &mut Vec<PendingValues>) {
        for write in pending.drain(..) {
            let offset = block_bytes(write.block_offset, self.alignment);
            self.queue
                .write_buffer(buffer, offset, bytemuck::cast_slice(&write.data));
        }
    }
}

impl GeometryBackingStore for GpuGeometryStore {
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
        inner.pending.push(PendingValues {
            block_offset,
            data: data.to_vec(),
        });
    }

    fn resize(&self, new_size: u32) {
        assert!(self.resizeable, "resize on a fixed-size geometry store");
        let mut inner = self.inner.lock();
        let old_size = inner.size;
        assert!(
            new_size > old_size,
            "geometry store resize must grow ({old_size} -> {new_size})"
        );

        let GeometryInner {
            buffer, pending, ..
        } = &mut *inner;
        self.write_pending(buffer, pending);

        let new_buffer = create_buffer(&self.device, block_bytes(new_size, self.alignment));
        let old_bytes = block_bytes(old_size, self.alignment);
        if old_bytes > 0 {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("glyph_geometry_store_resize"),
                });
            encoder.copy_buffer_to_buffer(&inner.buffer, 0, &new_buffer, 0, old_bytes);
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        inner.buffer = new_buffer;
        inner.size = new_size;

        debug!(
            target: "vitrail_atlas::gpu",
            old_size,
            new_size,
            "grew geometry store"
        );
    }

    fn flush(&self) {
        let mut inner = self.inner.lock();
        let GeometryInner {
            buffer, pending, ..
        } = &mut *inner;
        self.write_pending(buffer, pending);
        self.queue.submit(std::iter::empty());
    }
}

impl std::fmt::Debug for GpuGeometryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GpuGeometryStore")
            .field("size", &inner.size)
            .field("alignment", &self.alignment)
            .field("pending_writes", &inner.pending.len())
            .finish()
    }
}

/// Per-texel byte size of `format`.
///
/// Block-compressed and multi-aspect formats have no single per-texel size
/// for the store to validate uploads against, so they are rejected.
fn format_bytes_per_texel(format: wgpu::TextureFormat) -> AtlasResult<u32> {
    match format.block_copy_size(None) {
        Some(bytes) if format.block_dimensions() == (1, 1) => Ok(bytes),
        _ => Err(AtlasError::UnsupportedTextureFormat(format)),
    }
}

fn block_bytes(blocks: u32, alignment: u32) -> u64 {
    u64::from(blocks) * u64::from(alignment) * std::mem::size_of::<GeometryValue>() as u64
}

fn create_buffer(device: &wgpu::Device, bytes: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("glyph_geometry_store"),
        size: bytes,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

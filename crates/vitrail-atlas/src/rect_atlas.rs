//! Single-layer rectangle packing with guillotine splits.
//!
//! A [`RectAtlas`] partitions a fixed `width x height` region into a binary
//! tree of nodes. A leaf is either empty or filled by exactly one rectangle;
//! an interior node is split fully across one axis. Freeing a rectangle
//! merges empty siblings back together on the way up, so the tree stays
//! maximally coalesced after every deletion.
//!
//! Rectangles live in a versioned slab and are addressed by [`RectKey`].
//! A key outlives nothing: deleting the rectangle (or clearing the atlas)
//! invalidates it, and a stale key is detected rather than misresolved.

use glam::IVec2;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// A versioned handle to a rectangle allocated from a [`RectAtlas`].
    pub struct RectKey;
}

new_key_type! {
    struct NodeKey;
}

/// Reserved border texels around a glyph, preventing bilinear-filter bleed
/// between neighboring atlas entries.
///
/// Padding is an external inset: the atlas reserves the padded rectangle,
/// while the handle reports the unpadded interior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding {
    /// Reserved texels left of the glyph.
    pub left: u32,
    /// Reserved texels right of the glyph.
    pub right: u32,
    /// Reserved texels above the glyph.
    pub top: u32,
    /// Reserved texels below the glyph.
    pub bottom: u32,
}

impl Padding {
    /// No reserved border.
    pub const NONE: Self = Self {
        left: 0,
        right: 0,
        top: 0,
        bottom: 0,
    };

    /// The same border on all four sides.
    pub fn uniform(amount: u32) -> Self {
        Self {
            left: amount,
            right: amount,
            top: amount,
            bottom: amount,
        }
    }
}

/// An axis-aligned region in layer-local texel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    min: IVec2,
    size: IVec2,
}

impl Region {
    fn new(min: IVec2, size: IVec2) -> Self {
        Self { min, size }
    }
}

/// A rectangle handed out by [`RectAtlas::add_rectangle`].
///
/// The rectangle covers the full padded region reserved in the atlas; the
/// unpadded accessors describe the glyph interior.
#[derive(Debug, Clone, Copy)]
pub struct Rectangle {
    node: NodeKey,
    min: IVec2,
    size: IVec2,
    pad_min: IVec2,
    unpadded_size: IVec2,
}

impl Rectangle {
    /// Origin of the padded region.
    pub fn min(&self) -> IVec2 {
        self.min
    }

    /// Size of the padded region.
    pub fn size(&self) -> IVec2 {
        self.size
    }

    /// Origin of the unpadded interior.
    pub fn unpadded_min(&self) -> IVec2 {
        self.min + self.pad_min
    }

    /// Size of the unpadded interior, exactly the size requested at
    /// allocation.
    pub fn unpadded_size(&self) -> IVec2 {
        self.unpadded_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitAxis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Empty,
    Split {
        #[allow(dead_code)]
        axis: SplitAxis,
        /// The first child hugs the region origin.
        children: [NodeKey; 2],
    },
    Filled(RectKey),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    region: Region,
    parent: Option<NodeKey>,
    kind: NodeKind,
}

/// A dynamic 2D rectangle packer over a single texture layer.
///
/// Supports interleaved allocation and deallocation. Placement is recursive
/// first-fit with guillotine splits: an empty node larger than the request
/// is cut fully across the axis with the larger remainder, and the request
/// recurses into the child at the origin. Deleting a rectangle empties its
/// leaf and merges empty sibling pairs upward.
pub struct RectAtlas {
    dimensions: IVec2,
    nodes: SlotMap<NodeKey, Node>,
    rects: SlotMap<RectKey, Rectangle>,
    root: NodeKey,
}

impl RectAtlas {
    /// Create an empty atlas covering `[0, w) x [0, h)`.
    pub fn new(dimensions: IVec2) -> Self {
        assert!(
            dimensions.x > 0 && dimensions.y > 0,
            "degenerate atlas dimensions {dimensions}"
        );

        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            region: Region::new(IVec2::ZERO, dimensions),
            parent: None,
            kind: NodeKind::Empty,
        });
        Self {
            dimensions,
            nodes,
            rects: SlotMap::with_key(),
            root,
        }
    }

    /// Width and height of the managed layer.
    pub fn dimensions(&self) -> IVec2 {
        self.dimensions
    }

    /// Number of outstanding rectangles.
    pub fn allocation_count(&self) -> usize {
        self.rects.len()
    }

    /// Look up an outstanding rectangle. Returns `None` for stale keys.
    pub fn rectangle(&self, key: RectKey) -> Option<&Rectangle> {
        self.rects.get(key)
    }

    /// Reserve space for `size` plus the given padding.
    ///
    /// On success the returned key resolves to a [`Rectangle`] whose
    /// unpadded interior starts at `(x + left, y + top)` and has exactly
    /// the requested size. Returns `None` without mutating the tree when
    /// the request is zero-sized or no free region is large enough.
    pub fn add_rectangle(&mut self, size: IVec2, padding: Padding) -> Option<RectKey> {
        if size.x <= 0 || size.y <= 0 {
            return None;
        }

        let padded = IVec2::new(
            size.x + (padding.left + padding.right) as i32,
            size.y + (padding.top + padding.bottom) as i32,
        );
        if padded.x > self.dimensions.x || padded.y > self.dimensions.y {
            return None;
        }

        let leaf = self.place(self.root, padded)?;
        let region = self.nodes[leaf].region;
        let key = self.rects.insert(Rectangle {
            node: leaf,
            min: region.min,
            size: padded,
            pad_min: IVec2::new(padding.left as i32, padding.top as i32),
            unpadded_size: size,
        });
        self.nodes[leaf].kind = NodeKind::Filled(key);
        Some(key)
    }

    /// Release a rectangle and coalesce the tree around it.
    ///
    /// Panics if the key is stale (already deleted, or from a cleared or
    /// different atlas).
    pub fn delete_rectangle(&mut self, key: RectKey) {
        let rect = self
            .rects
            .remove(key)
            .expect("stale rectangle key");
        self.nodes[rect.node].kind = NodeKind::Empty;
        self.coalesce(rect.node);
    }

    /// Drop every rectangle and return to a single empty root.
    ///
    /// All outstanding keys become stale.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.rects.clear();
        self.root = self.nodes.insert(Node {
            region: Region::new(IVec2::ZERO, self.dimensions),
            parent: None,
            kind: NodeKind::Empty,
        });
    }

    /// Find (splitting as needed) an empty node exactly matching `size`.
    fn place(&mut self, key: NodeKey, size: IVec2) -> Option<NodeKey> {
        let node = self.nodes[key];
        match node.kind {
            NodeKind::Filled(_) => None,
            NodeKind::Split { children, .. } => self
                .place(children[0], size)
                .or_else(|| self.place(children[1], size)),
            NodeKind::Empty => {
                let region = node.region;
                if size.x > region.size.x || size.y > region.size.y {
                    return None;
                }
                if size == region.size {
                    return Some(key);
                }

                // Cut fully across the axis with the larger remainder; the
                // first child takes the origin and receives the rectangle.
                let remainder = region.size - size;
                let (axis, first_region, second_region) = if remainder.x >= remainder.y {
                    (
                        SplitAxis::X,
                        Region::new(region.min, IVec2::new(size.x, region.size.y)),
                        Region::new(
                            IVec2::new(region.min.x + size.x, region.min.y),
                            IVec2::new(remainder.x, region.size.y),
                        ),
                    )
                } else {
                    (
                        SplitAxis::Y,
                        Region::new(region.min, IVec2::new(region.size.x, size.y)),
                        Region::new(
                            IVec2::new(region.min.x, region.min.y + size.y),
                            IVec2::new(region.size.x, remainder.y),
                        ),
                    )
                };

                let first = self.nodes.insert(Node {
                    region: first_region,
                    parent: Some(key),
                    kind: NodeKind::Empty,
                });
                let second = self.nodes.insert(Node {
                    region: second_region,
                    parent: Some(key),
                    kind: NodeKind::Empty,
                });
                self.nodes[key].kind = NodeKind::Split {
                    axis,
                    children: [first, second],
                };
                self.place(first, size)
            }
        }
    }

    /// Merge empty sibling pairs upward from a freshly emptied leaf.
    fn coalesce(&mut self, mut key: NodeKey) {
        while let Some(parent) = self.nodes[key].parent {
            let NodeKind::Split { children, .. } = self.nodes[parent].kind else {
                unreachable!("parent of a leaf is always a split node");
            };
            let both_empty = children
                .iter()
                .all(|&child| matches!(self.nodes[child].kind, NodeKind::Empty));
            if !both_empty {
                break;
            }

            self.nodes.remove(children[0]);
            self.nodes.remove(children[1]);
            self.nodes[parent].kind = NodeKind::Empty;
            key = parent;
        }
    }
}

impl std::fmt::Debug for RectAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RectAtlas")
            .field("dimensions", &self.dimensions)
            .field("allocations", &self.rects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atlas(w: i32, h: i32) -> RectAtlas {
        RectAtlas::new(IVec2::new(w, h))
    }

    /// Walk the tree checking the structural invariants: children tile
    /// their parent exactly, filled leaves match their rectangle, and no
    /// split node has two empty children.
    fn check_invariants(atlas: &RectAtlas) {
        let mut leaf_area = 0i64;
        let mut filled = 0usize;
        let mut stack = vec![atlas.root];

        while let Some(key) = stack.pop() {
            let node = &atlas.nodes[key];
            match node.kind {
                NodeKind::Empty => {
                    leaf_area += i64::from(node.region.size.x) * i64::from(node.region.size.y);
                }
                NodeKind::Filled(rect_key) => {
                    let rect = atlas.rects.get(rect_key).expect("filled leaf with stale rect");
                    assert_eq!(rect.min(), node.region.min);
                    assert_eq!(rect.size(), node.region.size);
                    leaf_area += i64::from(node.region.size.x) * i64::from(node.region.size.y);
                    filled += 1;
                }
                NodeKind::Split { axis, children } => {
                    let first = &atlas.nodes[children[0]];
                    let second = &atlas.nodes[children[1]];
                    assert_eq!(first.region.min, node.region.min);
                    match axis {
                        SplitAxis::X => {
                            assert_eq!(first.region.size.y, node.region.size.y);
                            assert_eq!(second.region.size.y, node.region.size.y);
                            assert_eq!(
                                first.region.size.x + second.region.size.x,
                                node.region.size.x
                            );
                            assert_eq!(
                                second.region.min,
                                node.region.min + IVec2::new(first.region.size.x, 0)
                            );
                        }
                        SplitAxis::Y => {
                            assert_eq!(first.region.size.x, node.region.size.x);
                            assert_eq!(second.region.size.x, node.region.size.x);
                            assert_eq!(
                                first.region.size.y + second.region.size.y,
                                node.region.size.y
                            );
                            assert_eq!(
                                second.region.min,
                                node.region.min + IVec2::new(0, first.region.size.y)
                            );
                        }
                    }
                    assert!(
                        !(matches!(first.kind, NodeKind::Empty)
                            && matches!(second.kind, NodeKind::Empty)),
                        "uncoalesced empty siblings"
                    );
                    stack.push(children[0]);
                    stack.push(children[1]);
                }
            }
        }

        // Leaves tile the root region exactly.
        assert_eq!(
            leaf_area,
            i64::from(atlas.dimensions.x) * i64::from(atlas.dimensions.y)
        );
        assert_eq!(filled, atlas.rects.len());
    }

    #[test]
    fn test_exact_fit() {
        let mut atlas = atlas(16, 16);
        let key = atlas.add_rectangle(IVec2::new(16, 16), Padding::NONE).unwrap();
        let rect = atlas.rectangle(key).unwrap();
        assert_eq!(rect.min(), IVec2::ZERO);
        assert_eq!(rect.unpadded_size(), IVec2::new(16, 16));
        check_invariants(&atlas);

        assert!(atlas.add_rectangle(IVec2::new(1, 1), Padding::NONE).is_none());

        atlas.delete_rectangle(key);
        check_invariants(&atlas);
        assert!(atlas.add_rectangle(IVec2::new(16, 16), Padding::NONE).is_some());
    }

    #[test]
    fn test_guillotine_split_sequence() {
        let mut atlas = atlas(32, 32);
        let a = atlas.add_rectangle(IVec2::new(16, 32), Padding::NONE).unwrap();
        let b = atlas.add_rectangle(IVec2::new(16, 16), Padding::NONE).unwrap();
        let c = atlas.add_rectangle(IVec2::new(16, 16), Padding::NONE).unwrap();

        assert_eq!(atlas.rectangle(a).unwrap().min(), IVec2::new(0, 0));
        assert_eq!(atlas.rectangle(b).unwrap().min(), IVec2::new(16, 0));
        assert_eq!(atlas.rectangle(c).unwrap().min(), IVec2::new(16, 16));
        check_invariants(&atlas);

        assert!(atlas.add_rectangle(IVec2::new(1, 1), Padding::NONE).is_none());

        // Freeing both right-hand rectangles coalesces the right half.
        atlas.delete_rectangle(c);
        atlas.delete_rectangle(b);
        check_invariants(&atlas);

        let d = atlas.add_rectangle(IVec2::new(16, 32), Padding::NONE).unwrap();
        assert_eq!(atlas.rectangle(d).unwrap().min(), IVec2::new(16, 0));
    }

    #[test]
    fn test_padding_is_external_inset() {
        let mut atlas = atlas(64, 64);
        let padding = Padding {
            left: 1,
            right: 2,
            top: 3,
            bottom: 4,
        };
        let key = atlas.add_rectangle(IVec2::new(10, 20), padding).unwrap();
        let rect = atlas.rectangle(key).unwrap();

        assert_eq!(rect.min(), IVec2::ZERO);
        assert_eq!(rect.size(), IVec2::new(13, 27));
        assert_eq!(rect.unpadded_min(), IVec2::new(1, 3));
        assert_eq!(rect.unpadded_size(), IVec2::new(10, 20));
        check_invariants(&atlas);
    }

    #[test]
    fn test_padded_request_must_fit() {
        let mut atlas = atlas(16, 16);
        // 16x16 plus any padding exceeds the layer.
        assert!(
            atlas
                .add_rectangle(IVec2::new(16, 16), Padding::uniform(1))
                .is_none()
        );
        assert!(
            atlas
                .add_rectangle(IVec2::new(14, 14), Padding::uniform(1))
                .is_some()
        );
    }

    #[test]
    fn test_rejects_degenerate_requests() {
        let mut atlas = atlas(8, 8);
        assert!(atlas.add_rectangle(IVec2::new(0, 4), Padding::NONE).is_none());
        assert!(atlas.add_rectangle(IVec2::new(4, 0), Padding::NONE).is_none());
        assert!(atlas.add_rectangle(IVec2::new(9, 1), Padding::NONE).is_none());
        assert!(atlas.add_rectangle(IVec2::new(1, 9), Padding::NONE).is_none());
        assert_eq!(atlas.allocation_count(), 0);
    }

    #[test]
    fn test_delete_coalesces_to_full_capacity() {
        let mut atlas = atlas(64, 64);
        let mut keys = Vec::new();
        for _ in 0..16 {
            keys.push(
                atlas
                    .add_rectangle(IVec2::new(16, 16), Padding::NONE)
                    .unwrap(),
            );
        }
        assert!(atlas.add_rectangle(IVec2::new(17, 17), Padding::NONE).is_none());
        check_invariants(&atlas);

        for key in keys {
            atlas.delete_rectangle(key);
            check_invariants(&atlas);
        }

        // Fully coalesced: the whole layer is allocatable again.
        assert_eq!(atlas.allocation_count(), 0);
        assert!(atlas.add_rectangle(IVec2::new(64, 64), Padding::NONE).is_some());
    }

    #[test]
    fn test_interleaved_alloc_free() {
        let mut atlas = atlas(128, 128);
        let mut keys = Vec::new();
        for i in 0..32 {
            let size = IVec2::new(5 + (i % 7), 5 + (i % 11));
            keys.push(atlas.add_rectangle(size, Padding::NONE).unwrap());
            if i % 3 == 0 {
                atlas.delete_rectangle(keys.swap_remove(i as usize / 3));
            }
            check_invariants(&atlas);
        }
    }

    #[test]
    fn test_clear_invalidates_keys() {
        let mut atlas = atlas(32, 32);
        let key = atlas.add_rectangle(IVec2::new(8, 8), Padding::NONE).unwrap();

        atlas.clear();
        assert!(atlas.rectangle(key).is_none());
        assert_eq!(atlas.allocation_count(), 0);
        check_invariants(&atlas);

        let again = atlas.add_rectangle(IVec2::new(32, 32), Padding::NONE).unwrap();
        assert_eq!(atlas.rectangle(again).unwrap().min(), IVec2::ZERO);
    }

    #[test]
    #[should_panic(expected = "stale rectangle key")]
    fn test_double_delete_panics() {
        let mut atlas = atlas(16, 16);
        let key = atlas.add_rectangle(IVec2::new(4, 4), Padding::NONE).unwrap();
        atlas.delete_rectangle(key);
        atlas.delete_rectangle(key);
    }

    #[test]
    fn test_layout_is_deterministic_after_clear() {
        let sizes = [
            IVec2::new(10, 3),
            IVec2::new(4, 12),
            IVec2::new(7, 7),
            IVec2::new(16, 2),
        ];

        let mut atlas = atlas(32, 32);
        let first: Vec<IVec2> = sizes
            .iter()
            .map(|&size| {
                let key = atlas.add_rectangle(size, Padding::NONE).unwrap();
                atlas.rectangle(key).unwrap().min()
            })
            .collect();

        atlas.clear();
        let second: Vec<IVec2> = sizes
            .iter()
            .map(|&size| {
                let key = atlas.add_rectangle(size, Padding::NONE).unwrap();
                atlas.rectangle(key).unwrap().min()
            })
            .collect();

        assert_eq!(first, second);
    }
}

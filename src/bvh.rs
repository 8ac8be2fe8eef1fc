use std::fmt::Debug;

use bytemuck::{Pod, Zeroable};

use crate::{NodeQuery, PrimitiveType, SceneError, SlabBackend, StackEntry, AABB};

/// Raw address meaning "no node": an empty child lane, or the bottom of a traversal stack
pub const ENTRYPOINT_SENTINEL: i32 = 0x7654_3210;

/// Decoded node reference.
///
/// Packed records store addresses as `i32`: non-negative values are internal
/// node indices, negative values are leaf indices encoded as `-(index) - 1`,
/// and `ENTRYPOINT_SENTINEL` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAddress {
    Internal(u32),
    Leaf(u32),
    Sentinel,
}

impl NodeAddress {
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        if raw == ENTRYPOINT_SENTINEL {
            NodeAddress::Sentinel
        } else if raw >= 0 {
            NodeAddress::Internal(raw as u32)
        } else {
            NodeAddress::Leaf(!raw as u32)
        }
    }

    #[inline]
    pub const fn to_raw(self) -> i32 {
        match self {
            NodeAddress::Internal(index) => index as i32,
            NodeAddress::Leaf(index) => !(index as i32),
            NodeAddress::Sentinel => ENTRYPOINT_SENTINEL,
        }
    }

    #[inline]
    pub const fn is_sentinel(self) -> bool {
        matches!(self, NodeAddress::Sentinel)
    }
}

/// Packed leaf record. `prim_first < 0` marks an instance leaf whose object
/// is `prim_object[-prim_first - 1]`; otherwise the leaf covers primitive
/// slots `[prim_first, prim_last)`, all of type `prim_type`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LeafNode {
    pub prim_first: i32,
    pub prim_last: i32,
    pub prim_type: u32,
    pub visibility: u32,
}

/// Decoded leaf contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Primitives {
        first: u32,
        last: u32,
        /// `None` when the raw tag is not a known type
        prim_type: Option<PrimitiveType>,
    },
    Instance {
        slot: u32,
    },
}

impl LeafNode {
    #[inline]
    pub fn primitives(prim_type: PrimitiveType, first: u32, last: u32, visibility: u32) -> Self {
        Self {
            prim_first: first as i32,
            prim_last: last as i32,
            prim_type: prim_type.to_raw(),
            visibility,
        }
    }

    #[inline]
    pub fn instance(slot: u32, visibility: u32) -> Self {
        Self {
            prim_first: !(slot as i32),
            prim_last: 0,
            prim_type: 0,
            visibility,
        }
    }

    #[inline]
    pub fn kind(&self) -> LeafKind {
        if self.prim_first < 0 {
            LeafKind::Instance {
                slot: !self.prim_first as u32,
            }
        } else {
            LeafKind::Primitives {
                first: self.prim_first as u32,
                last: self.prim_last.max(self.prim_first) as u32,
                prim_type: PrimitiveType::from_raw(self.prim_type),
            }
        }
    }
}

/// Children of one node that the ray enters, in lane order
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildHits {
    pub entries: [StackEntry; 4],
    pub count: usize,
}

impl ChildHits {
    #[inline]
    pub fn push(&mut self, entry: StackEntry) {
        self.entries[self.count] = entry;
        self.count += 1;
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StackEntry] {
        &mut self.entries[..self.count]
    }
}

/// One child lane as handed to `BvhNode::from_children`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildSlot {
    pub bounds: AABB,
    pub address: NodeAddress,
    pub visibility: u32,
}

/// Packed internal node with `WIDTH` child lanes. Unused lanes have
/// inverted bounds, a sentinel address and an empty visibility mask.
pub trait BvhNode: Pod + Send + Sync + Debug {
    const WIDTH: usize;
    /// Name used in errors and logs
    const LAYOUT: &'static str;

    fn child(&self, lane: usize) -> NodeAddress;
    fn child_visibility(&self, lane: usize) -> u32;
    fn child_bounds(&self, lane: usize) -> AABB;

    /// Children the ray enters before `t_max` whose visibility matches the ray's
    fn intersect_children<B: SlabBackend>(&self, query: &NodeQuery, t_max: f32) -> ChildHits;

    /// Pack up to `WIDTH` children, remaining lanes are left empty
    fn from_children(children: &[ChildSlot]) -> Self;

    #[inline]
    fn children(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        (0..Self::WIDTH).map(|lane| self.child(lane))
    }
}

/// Copy packed records out of raw bytes. Any alignment is accepted; the
/// length must be a whole number of records.
fn read_records<T: Pod>(bytes: &[u8], layout: &'static str) -> Result<Vec<T>, SceneError> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(SceneError::NodeBytes {
            layout,
            reason: format!("{} bytes is not a whole number of {size}-byte records", bytes.len()),
        });
    }
    Ok(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
}

/// Read a node array from raw packed bytes
pub fn nodes_from_bytes<N: BvhNode>(bytes: &[u8]) -> Result<Vec<N>, SceneError> {
    read_records(bytes, N::LAYOUT)
}

/// Read a leaf array from raw packed bytes
pub fn leaves_from_bytes(bytes: &[u8]) -> Result<Vec<LeafNode>, SceneError> {
    read_records(bytes, "leaf")
}

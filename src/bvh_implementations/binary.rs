use bytemuck::{Pod, Zeroable};

use crate::{
    BvhNode, ChildHits, ChildSlot, NodeAddress, NodeQuery, SlabBackend, StackEntry, AABB,
    ENTRYPOINT_SENTINEL,
};

use super::{lane_bounds, pack_children};

/// Two-wide node, 64 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BinaryNode {
    /// `bounds[axis][min | max][lane]`
    pub bounds: [[[f32; 2]; 2]; 3],
    pub children: [i32; 2],
    pub visibility: [u32; 2],
}

impl BinaryNode {
    /// Node with both lanes empty
    pub const EMPTY: Self = Self {
        bounds: [[[f32::INFINITY; 2], [-f32::INFINITY; 2]]; 3],
        children: [ENTRYPOINT_SENTINEL; 2],
        visibility: [0; 2],
    };
}

impl Default for BinaryNode {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BvhNode for BinaryNode {
    const WIDTH: usize = 2;
    const LAYOUT: &'static str = "binary";

    #[inline]
    fn child(&self, lane: usize) -> NodeAddress {
        NodeAddress::from_raw(self.children[lane])
    }

    #[inline]
    fn child_visibility(&self, lane: usize) -> u32 {
        self.visibility[lane]
    }

    #[inline]
    fn child_bounds(&self, lane: usize) -> AABB {
        lane_bounds(&self.bounds, lane)
    }

    #[inline]
    fn intersect_children<B: SlabBackend>(&self, query: &NodeQuery, t_max: f32) -> ChildHits {
        let (mask, near) = B::slab2(&self.bounds, query, t_max);
        let mut hits = ChildHits::default();
        for lane in 0..2 {
            if mask & (1 << lane) != 0 && self.visibility[lane] & query.visibility != 0 {
                hits.push(StackEntry::new(self.child(lane), near[lane]));
            }
        }
        hits
    }

    fn from_children(children: &[ChildSlot]) -> Self {
        let (bounds, children, visibility) = pack_children::<2>(children);
        Self {
            bounds,
            children,
            visibility,
        }
    }
}

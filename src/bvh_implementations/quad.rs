use bytemuck::{Pod, Zeroable};

use crate::{
    BvhNode, ChildHits, ChildSlot, NodeAddress, NodeQuery, SlabBackend, StackEntry, AABB,
    ENTRYPOINT_SENTINEL,
};

use super::{lane_bounds, pack_children};

/// Four-wide node, 128 bytes. The bounds of all four children are tested at once.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadNode {
    /// `bounds[axis][min | max][lane]`
    pub bounds: [[[f32; 4]; 2]; 3],
    pub children: [i32; 4],
    pub visibility: [u32; 4],
}

impl QuadNode {
    /// Node with every lane empty
    pub const EMPTY: Self = Self {
        bounds: [[[f32::INFINITY; 4], [-f32::INFINITY; 4]]; 3],
        children: [ENTRYPOINT_SENTINEL; 4],
        visibility: [0; 4],
    };
}

impl Default for QuadNode {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BvhNode for QuadNode {
    const WIDTH: usize = 4;
    const LAYOUT: &'static str = "quad";

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
        let (mask, near) = B::slab4(&self.bounds, query, t_max);
        let mut hits = ChildHits::default();
        for lane in 0..4 {
            if mask & (1 << lane) != 0 && self.visibility[lane] & query.visibility != 0 {
                hits.push(StackEntry::new(self.child(lane), near[lane]));
            }
        }
        hits
    }

    fn from_children(children: &[ChildSlot]) -> Self {
        let (bounds, children, visibility) = pack_children::<4>(children);
        Self {
            bounds,
            children,
            visibility,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::*;

    fn unit_box_at(x: f32) -> AABB {
        AABB::new(Vec3A::new(x - 0.5, -0.5, -0.5), Vec3A::new(x + 0.5, 0.5, 0.5))
    }

    #[test]
    fn packed_size() {
        assert_eq!(std::mem::size_of::<QuadNode>(), 128);
        assert_eq!(std::mem::align_of::<QuadNode>(), 4);
    }

    #[test]
    fn lanes_round_trip() {
        let slots: Vec<ChildSlot> = (0..3)
            .map(|i| ChildSlot {
                bounds: unit_box_at(i as f32 * 2.0),
                address: if i % 2 == 0 {
                    NodeAddress::Internal(i)
                } else {
                    NodeAddress::Leaf(i)
                },
                visibility: 1 << i,
            })
            .collect();
        let node = QuadNode::from_children(&slots);

        for (lane, slot) in slots.iter().enumerate() {
            assert_eq!(node.child(lane), slot.address);
            assert_eq!(node.child_visibility(lane), slot.visibility);
            assert_eq!(node.child_bounds(lane), slot.bounds);
        }
        assert_eq!(node.child(3), NodeAddress::Sentinel);
        assert_eq!(node.child_visibility(3), 0);
        assert_eq!(
            node.children().filter(|c| !c.is_sentinel()).count(),
            3
        );
    }

    #[test]
    fn visibility_culls_lanes() {
        let slots: Vec<ChildSlot> = (0..4)
            .map(|i| ChildSlot {
                bounds: unit_box_at(0.0),
                address: NodeAddress::Leaf(i),
                visibility: if i < 2 { visibility::CAMERA } else { visibility::SHADOW },
            })
            .collect();
        let node = QuadNode::from_children(&slots);

        let ray = Ray::infinite_ray(Vec3A::new(0.0, 0.0, 5.0), Vec3A::new(0.0, 0.0, -1.0))
            .with_visibility(visibility::SHADOW);
        let query = NodeQuery::new(&ray);
        for hits in [
            node.intersect_children::<ScalarSlab>(&query, ray.t_max),
            node.intersect_children::<SimdSlab>(&query, ray.t_max),
        ] {
            assert_eq!(hits.count, 2);
            assert_eq!(hits.entries[0].address, NodeAddress::Leaf(2));
            assert_eq!(hits.entries[1].address, NodeAddress::Leaf(3));
        }
    }
}

use crate::{AABB, ChildSlot, ENTRYPOINT_SENTINEL};

pub mod binary;
pub use binary::*;

pub mod quad;
pub use quad::*;

/// Lanes of a `W`-wide node in the packed layout shared by both node types
pub(crate) fn pack_children<const W: usize>(
    children: &[ChildSlot],
) -> ([[[f32; W]; 2]; 3], [i32; W], [u32; W]) {
    debug_assert!(children.len() <= W, "{} children do not fit a {W}-wide node", children.len());
    let mut bounds = [[[f32::INFINITY; W], [-f32::INFINITY; W]]; 3];
    let mut addresses = [ENTRYPOINT_SENTINEL; W];
    let mut visibility = [0; W];
    for (lane, child) in children.iter().take(W).enumerate() {
        for axis in 0..3_usize {
            bounds[axis][0][lane] = child.bounds.min[axis];
            bounds[axis][1][lane] = child.bounds.max[axis];
        }
        addresses[lane] = child.address.to_raw();
        visibility[lane] = child.visibility;
    }
    (bounds, addresses, visibility)
}

#[inline]
pub(crate) fn lane_bounds<const W: usize>(bounds: &[[[f32; W]; 2]; 3], lane: usize) -> AABB {
    AABB::new(
        glam::Vec3A::new(bounds[0][0][lane], bounds[1][0][lane], bounds[2][0][lane]),
        glam::Vec3A::new(bounds[0][1][lane], bounds[1][1][lane], bounds[2][1][lane]),
    )
}

use glam::{Vec2, Vec3A, Vec4};

use crate::Ray;

/// Smallest direction component magnitude kept before inverting. Zero
/// components become this value with their sign preserved, so the slab
/// test treats the ray as parallel to those planes.
pub const DIRECTION_CLAMP: f32 = 8.271806e-25;

#[inline]
pub fn clamp_direction(direction: Vec3A) -> Vec3A {
    let clamp = |c: f32| {
        if c.abs() < DIRECTION_CLAMP {
            DIRECTION_CLAMP.copysign(c)
        } else {
            c
        }
    };
    Vec3A::new(clamp(direction.x), clamp(direction.y), clamp(direction.z))
}

#[inline]
pub fn inverse_direction(direction: Vec3A) -> Vec3A {
    clamp_direction(direction).recip()
}

/// Per-ray data the node intersector needs, computed once per ray and once
/// per instance entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeQuery {
    pub origin: Vec3A,
    pub idir: Vec3A,
    /// 1 where the direction is negative: index of the near plane in `bounds[axis]`
    pub dir_is_neg: [usize; 3],
    pub visibility: u32,
}

impl NodeQuery {
    #[inline]
    pub fn new(ray: &Ray) -> Self {
        let idir = inverse_direction(ray.direction);
        Self {
            origin: ray.origin,
            idir,
            dir_is_neg: [
                (idir.x < 0.0) as usize,
                (idir.y < 0.0) as usize,
                (idir.z < 0.0) as usize,
            ],
            visibility: ray.visibility,
        }
    }
}

/// Lane-wise slab test over the child boxes of one node.
///
/// `bounds` is laid out as `bounds[axis][min | max][lane]`. Returns a bitmask
/// with bit `lane` set for every child the ray enters before `t_max`, and the
/// entry distances. Distances of lanes outside the mask are meaningless.
pub trait SlabBackend {
    fn slab2(bounds: &[[[f32; 2]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 2]);
    fn slab4(bounds: &[[[f32; 4]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 4]);
}

/// One lane at a time
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarSlab;

/// All lanes at once through `glam::Vec4`/`Vec2`
#[derive(Debug, Clone, Copy, Default)]
pub struct SimdSlab;

pub type DefaultSlab = SimdSlab;

#[inline(always)]
fn scalar_slab<const W: usize>(
    bounds: &[[[f32; W]; 2]; 3],
    query: &NodeQuery,
    t_max: f32,
) -> (u32, [f32; W]) {
    let mut mask = 0;
    let mut near = [f32::INFINITY; W];
    for lane in 0..W {
        let mut t_near: f32 = 0.0;
        let mut t_far = t_max;
        for axis in 0..3_usize {
            let o = query.origin[axis];
            let idir = query.idir[axis];
            let neg = query.dir_is_neg[axis];
            t_near = t_near.max((bounds[axis][neg][lane] - o) * idir);
            t_far = t_far.min((bounds[axis][1 - neg][lane] - o) * idir);
        }
        if t_near <= t_far {
            mask |= 1 << lane;
            near[lane] = t_near;
        }
    }
    (mask, near)
}

impl SlabBackend for ScalarSlab {
    #[inline]
    fn slab2(bounds: &[[[f32; 2]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 2]) {
        scalar_slab(bounds, query, t_max)
    }

    #[inline]
    fn slab4(bounds: &[[[f32; 4]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 4]) {
        scalar_slab(bounds, query, t_max)
    }
}

impl SlabBackend for SimdSlab {
    #[inline]
    fn slab2(bounds: &[[[f32; 2]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 2]) {
        let mut t_near = Vec2::ZERO;
        let mut t_far = Vec2::splat(t_max);
        for axis in 0..3_usize {
            let o = Vec2::splat(query.origin[axis]);
            let idir = Vec2::splat(query.idir[axis]);
            let neg = query.dir_is_neg[axis];
            t_near = t_near.max((Vec2::from_array(bounds[axis][neg]) - o) * idir);
            t_far = t_far.min((Vec2::from_array(bounds[axis][1 - neg]) - o) * idir);
        }
        (t_near.cmple(t_far).bitmask(), t_near.to_array())
    }

    #[inline]
    fn slab4(bounds: &[[[f32; 4]; 2]; 3], query: &NodeQuery, t_max: f32) -> (u32, [f32; 4]) {
        let mut t_near = Vec4::ZERO;
        let mut t_far = Vec4::splat(t_max);
        for axis in 0..3_usize {
            let o = Vec4::splat(query.origin[axis]);
            let idir = Vec4::splat(query.idir[axis]);
            let neg = query.dir_is_neg[axis];
            t_near = t_near.max((Vec4::from_array(bounds[axis][neg]) - o) * idir);
            t_far = t_far.min((Vec4::from_array(bounds[axis][1 - neg]) - o) * idir);
        }
        (t_near.cmple(t_far).bitmask(), t_near.to_array())
    }
}

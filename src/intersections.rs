use crate::{PrimitiveHit, PrimitiveType, Primitives, Ray};

/// Distance a secondary ray origin is pushed off a surface along its normal
pub const RAY_INTERSECT_EPSILON: f32 = 0.0001;

/// Objects a ray can be tested against. Implementations only accept hits with
/// `0 < t < ray.t_max` and never touch anything but their return value.
pub trait RayIntersect {
    fn ray_intersect(&self, ray: &Ray) -> Option<PrimitiveHit>;
}

/// Test one primitive of the given type. `prim` indexes the per-type array;
/// an index outside of it reads as a miss.
#[inline]
pub fn intersect_primitive(
    primitives: &Primitives,
    prim_type: PrimitiveType,
    prim: u32,
    ray: &Ray,
) -> Option<PrimitiveHit> {
    let prim = prim as usize;
    match prim_type {
        PrimitiveType::Triangle => primitives.triangles.get(prim)?.ray_intersect(ray),
        PrimitiveType::MotionTriangle => primitives.motion_triangles.get(prim)?.ray_intersect(ray),
        PrimitiveType::Curve => primitives.curves.get(prim)?.ray_intersect(ray),
        PrimitiveType::MotionCurve => primitives.motion_curves.get(prim)?.ray_intersect(ray),
    }
}

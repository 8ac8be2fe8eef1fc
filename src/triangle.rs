extern crate glam;

use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

use crate::{PrimitiveHit, Ray, RayIntersect, AABB};

/// Determinant magnitude under which a ray counts as parallel to the triangle plane
pub const TRIANGLE_DETERMINANT_EPSILON: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertex0: glam::Vec3A,
    pub vertex1: glam::Vec3A,
    pub vertex2: glam::Vec3A,
    pub centroid: glam::Vec3A,
}

impl Triangle {
    /// Zeroed Triangle
    pub const ZERO: Self = Triangle {
        vertex0: glam::Vec3A::ZERO,
        vertex1: glam::Vec3A::ZERO,
        vertex2: glam::Vec3A::ZERO,
        centroid: glam::Vec3A::ZERO,
    };

    #[inline]
    pub fn new(vertex0: glam::Vec3A, vertex1: glam::Vec3A, vertex2: glam::Vec3A) -> Triangle {
        let mut tri = Triangle {
            vertex0,
            vertex1,
            vertex2,
            centroid: glam::Vec3A::ZERO,
        };
        tri.compute_centroid();
        tri
    }

    #[inline]
    pub fn compute_centroid(&mut self) {
        self.centroid = (self.vertex0 + self.vertex1 + self.vertex2) / 3.0;
    }

    /// Geometric normal, not normalized. Zero for degenerate triangles.
    #[inline]
    pub fn normal(&self) -> glam::Vec3A {
        (self.vertex1 - self.vertex0).cross(self.vertex2 - self.vertex0)
    }

    #[inline]
    pub fn bounds(&self) -> AABB {
        let mut aabb = AABB::default();
        aabb.grow(self.vertex0);
        aabb.grow(self.vertex1);
        aabb.grow(self.vertex2);
        aabb
    }
}

impl Default for Triangle {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Distribution<Triangle> for Standard {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Triangle {
        Triangle::new(rng.gen(), rng.gen(), rng.gen())
    }
}

/// Möller–Trumbore test. Accepts `0 < t < ray.t_max` only.
pub fn ray_triangle_intersect(tri: &Triangle, ray: &Ray) -> Option<PrimitiveHit> {
    let edge1 = tri.vertex1 - tri.vertex0;
    let edge2 = tri.vertex2 - tri.vertex0;
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);
    if !(a.abs() >= TRIANGLE_DETERMINANT_EPSILON) || !a.is_finite() {
        // ray parallel to triangle, or degenerate triangle
        return None;
    }
    let f = 1.0 / a;
    let s = ray.origin - tri.vertex0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = f * edge2.dot(q);
    if t > 0.0 && t < ray.t_max {
        Some(PrimitiveHit { t, u, v })
    } else {
        None
    }
}

impl RayIntersect for Triangle {
    #[inline]
    fn ray_intersect(&self, ray: &Ray) -> Option<PrimitiveHit> {
        ray_triangle_intersect(self, ray)
    }
}

extern crate glam;
use glam::{Affine3A, Vec3A};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Default for AABB {
    fn default() -> Self {
        Self {
            min: Vec3A::splat(f32::INFINITY),
            max: Vec3A::splat(-f32::INFINITY),
        }
    }
}

impl AABB {
    #[inline]
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Grow the box to contain a new point
    #[inline]
    pub fn grow(&mut self, point: Vec3A) {
        self.max = self.max.max(point);
        self.min = self.min.min(point);
    }

    /// Grow the box to contain another box
    #[inline]
    pub fn grow_aabb(&mut self, other: &AABB) {
        self.max = self.max.max(other.max);
        self.min = self.min.min(other.min);
    }

    #[inline]
    pub fn union(&self, other: &AABB) -> AABB {
        let mut aabb = *self;
        aabb.grow_aabb(other);
        aabb
    }

    /// Box padded by `margin` on every side
    #[inline]
    pub fn expand(&self, margin: f32) -> AABB {
        AABB::new(self.min - Vec3A::splat(margin), self.max + Vec3A::splat(margin))
    }

    /// If the AABB is valid (min <= max)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn extent(&self) -> Vec3A {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Surface area, zero for invalid boxes
    pub fn area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Bounds of the eight transformed corners
    pub fn transformed(&self, transform: &Affine3A) -> AABB {
        let mut bounds = AABB::default();
        if !self.is_valid() {
            return bounds;
        }

        for i in 0..8 {
            bounds.grow(transform.transform_point3a(Vec3A::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            )));
        }

        bounds
    }
}

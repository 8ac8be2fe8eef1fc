use glam::Vec3A;

use crate::{PrimitiveRef, PrimitiveType};

/// Ray visibility categories, matched against leaf and primitive masks with a bitwise AND
pub mod visibility {
    pub const CAMERA: u32 = 1 << 0;
    pub const DIFFUSE: u32 = 1 << 1;
    pub const GLOSSY: u32 = 1 << 2;
    pub const TRANSMIT: u32 = 1 << 3;
    pub const SHADOW: u32 = 1 << 4;
    pub const VOLUME_SCATTER: u32 = 1 << 5;
    pub const ALL: u32 = u32::MAX;
}

/// Ray object. Might be a proper ray (t_max = infinity) or a line segment (t_max is finite)
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3A,
    pub direction: Vec3A,
    pub t_max: f32,
    /// Shutter time in [0, 1], only read by motion primitives and motion instances
    pub time: f32,
    pub visibility: u32,
    /// Primitive the ray leaves from, never reported as a hit
    pub self_primitive: Option<PrimitiveRef>,
}

impl Default for Ray {
    fn default() -> Self {
        Self {
            origin: Default::default(),
            direction: Vec3A::new(1.0, 0.0, 0.0),
            t_max: 1.0,
            time: 0.0,
            visibility: visibility::ALL,
            self_primitive: None,
        }
    }
}

impl Ray {
    #[inline]
    pub fn new(origin: Vec3A, direction: Vec3A, t_max: f32) -> Self {
        Self {
            origin,
            direction,
            t_max,
            ..Default::default()
        }
    }

    /// Create a ray with infinite length (a proper ray)
    #[inline]
    pub fn infinite_ray(origin: Vec3A, direction: Vec3A) -> Self {
        Self::new(origin, direction, f32::INFINITY)
    }

    #[inline]
    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    #[inline]
    pub fn with_visibility(mut self, visibility: u32) -> Self {
        self.visibility = visibility;
        self
    }

    #[inline]
    pub fn with_self_primitive(mut self, primitive: PrimitiveRef) -> Self {
        self.self_primitive = Some(primitive);
        self
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3A {
        self.origin + self.direction * t
    }

    /// If the primitive is the one this ray was spawned from
    #[inline]
    pub fn skips(&self, object: u32, prim: u32, prim_type: PrimitiveType) -> bool {
        match self.self_primitive {
            Some(p) => p.prim == prim && p.object == object && p.prim_type == prim_type,
            None => false,
        }
    }
}

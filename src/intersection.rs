use strum::{EnumIter, IntoStaticStr};

use crate::BvhFeatures;

/// Primitive index of a record that holds no hit
pub const PRIM_NONE: u32 = u32::MAX;

/// Object index meaning "no object", also used for primitives that only live inside instanced BVHs
pub const OBJECT_NONE: u32 = u32::MAX;

/// Primitive type tag stored in leaves. Values are distinct bits so a set of types fits in a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[repr(u32)]
pub enum PrimitiveType {
    Triangle = 1 << 0,
    MotionTriangle = 1 << 1,
    Curve = 1 << 2,
    MotionCurve = 1 << 3,
}

impl PrimitiveType {
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(PrimitiveType::Triangle),
            2 => Some(PrimitiveType::MotionTriangle),
            4 => Some(PrimitiveType::Curve),
            8 => Some(PrimitiveType::MotionCurve),
            _ => None,
        }
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self as u32
    }

    /// Capabilities a scene needs to intersect this type
    pub const fn required_features(self) -> BvhFeatures {
        match self {
            PrimitiveType::Triangle => BvhFeatures::NONE,
            PrimitiveType::MotionTriangle => BvhFeatures::MOTION,
            PrimitiveType::Curve => BvhFeatures::HAIR,
            PrimitiveType::MotionCurve => BvhFeatures::HAIR.union(BvhFeatures::MOTION),
        }
    }
}

/// Identity of one primitive as seen from world space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveRef {
    pub object: u32,
    pub prim: u32,
    pub prim_type: PrimitiveType,
}

/// Result of a single primitive test, in the space the ray was given in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Hit record handed to the shading side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// Index into the per-type primitive array, `PRIM_NONE` when nothing was hit
    pub prim: u32,
    pub object: u32,
    pub prim_type: PrimitiveType,
}

impl Intersection {
    pub const NONE: Self = Self {
        t: f32::INFINITY,
        u: 0.0,
        v: 0.0,
        prim: PRIM_NONE,
        object: OBJECT_NONE,
        prim_type: PrimitiveType::Triangle,
    };

    #[inline]
    pub fn new(hit: PrimitiveHit, primitive: PrimitiveRef) -> Self {
        Self {
            t: hit.t,
            u: hit.u,
            v: hit.v,
            prim: primitive.prim,
            object: primitive.object,
            prim_type: primitive.prim_type,
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.prim != PRIM_NONE
    }

    #[inline]
    pub fn primitive(&self) -> Option<PrimitiveRef> {
        self.is_hit().then_some(PrimitiveRef {
            object: self.object,
            prim: self.prim,
            prim_type: self.prim_type,
        })
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::NONE
    }
}

use std::ops::{BitOr, BitOrAssign};

/// Capability mask of a scene. Leaves and instances that need a capability
/// the scene was not built with are rejected by `Scene::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BvhFeatures(u32);

impl BvhFeatures {
    pub const NONE: Self = Self(0);
    /// Curve primitives
    pub const HAIR: Self = Self(1 << 0);
    /// Motion primitives and time-interpolated object transforms
    pub const MOTION: Self = Self(1 << 1);
    /// Instance leaves
    pub const INSTANCING: Self = Self(1 << 2);
    pub const ALL: Self = Self(Self::HAIR.0 | Self::MOTION.0 | Self::INSTANCING.0);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BvhFeatures {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BvhFeatures {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

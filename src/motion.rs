use glam::{Affine3A, Quat, Vec3A};
use smallvec::SmallVec;

use crate::{PrimitiveHit, Ray, RayIntersect, Triangle, AABB};

/// Split a shutter time in [0, 1] into the key interval it falls in and the
/// blend factor inside that interval. Keys are spread uniformly over the shutter.
#[inline]
pub fn motion_step(time: f32, num_keys: usize) -> (usize, f32) {
    if num_keys < 2 {
        return (0, 0.0);
    }
    let last = num_keys - 1;
    let scaled = time.clamp(0.0, 1.0) * last as f32;
    let step = (scaled.floor() as usize).min(last - 1);
    (step, scaled - step as f32)
}

/// Triangle with one vertex key per motion step
#[derive(Debug, Clone, PartialEq)]
pub struct MotionTriangle {
    pub keys: SmallVec<[[Vec3A; 3]; 3]>,
}

impl MotionTriangle {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = [Vec3A; 3]>,
    {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Triangle with the vertices interpolated at `time`
    pub fn at_time(&self, time: f32) -> Triangle {
        match self.keys.len() {
            0 => Triangle::ZERO,
            1 => Triangle::new(self.keys[0][0], self.keys[0][1], self.keys[0][2]),
            n => {
                let (step, blend) = motion_step(time, n);
                let a = &self.keys[step];
                let b = &self.keys[step + 1];
                Triangle::new(
                    a[0].lerp(b[0], blend),
                    a[1].lerp(b[1], blend),
                    a[2].lerp(b[2], blend),
                )
            }
        }
    }

    /// Bounds over the whole shutter. Vertices move linearly between keys,
    /// so the union of the key bounds is exact.
    pub fn bounds(&self) -> AABB {
        let mut aabb = AABB::default();
        for key in &self.keys {
            key.iter().for_each(|v| aabb.grow(*v));
        }
        aabb
    }
}

impl RayIntersect for MotionTriangle {
    #[inline]
    fn ray_intersect(&self, ray: &Ray) -> Option<PrimitiveHit> {
        self.at_time(ray.time).ray_intersect(ray)
    }
}

/// Affine transform split into components that interpolate well
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecomposedTransform {
    pub translation: Vec3A,
    pub rotation: Quat,
    pub scale: Vec3A,
}

impl DecomposedTransform {
    pub fn from_affine(transform: &Affine3A) -> Self {
        let (scale, rotation, translation) = transform.to_scale_rotation_translation();
        Self {
            translation: translation.into(),
            rotation,
            scale: scale.into(),
        }
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(
            self.scale.into(),
            self.rotation,
            self.translation.into(),
        )
    }

    /// Translation and scale interpolate linearly, rotation spherically
    pub fn lerp(&self, other: &Self, blend: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, blend),
            rotation: self.rotation.slerp(other.rotation, blend),
            scale: self.scale.lerp(other.scale, blend),
        }
    }
}

/// Object-to-world transform keys spread uniformly over the shutter
#[derive(Debug, Clone, PartialEq)]
pub struct MotionTransform {
    pub keys: SmallVec<[DecomposedTransform; 3]>,
}

impl MotionTransform {
    pub fn new<'a, I>(transforms: I) -> Self
    where
        I: IntoIterator<Item = &'a Affine3A>,
    {
        Self {
            keys: transforms
                .into_iter()
                .map(DecomposedTransform::from_affine)
                .collect(),
        }
    }

    pub fn at_time(&self, time: f32) -> Affine3A {
        match self.keys.len() {
            0 => Affine3A::IDENTITY,
            1 => self.keys[0].to_affine(),
            n => {
                let (step, blend) = motion_step(time, n);
                self.keys[step].lerp(&self.keys[step + 1], blend).to_affine()
            }
        }
    }

    /// World-to-object transform at `time`
    #[inline]
    pub fn inverse_at(&self, time: f32) -> Affine3A {
        self.at_time(time).inverse()
    }
}

use glam::Affine3A;

use crate::{NodeQuery, Ray};

/// Mutable per-ray state of a traversal: the ray with its shrinking
/// `t_max`, plus the precomputed slab test inputs
#[derive(Debug, Clone, Copy)]
pub struct RayState {
    pub ray: Ray,
    pub query: NodeQuery,
}

impl RayState {
    #[inline]
    pub fn new(ray: Ray) -> Self {
        Self {
            query: NodeQuery::new(&ray),
            ray,
        }
    }
}

/// Move `ray` into object space. The local direction is normalized and
/// `t_max` scaled so that `t_world = t_local / scale`. Returns `None` when
/// the transform collapses or blows up the direction.
#[inline]
pub fn ray_to_object_space(ray: &Ray, inverse: &Affine3A) -> Option<(Ray, f32)> {
    let direction = inverse.transform_vector3a(ray.direction);
    let scale = direction.length();
    if !(scale > 0.0) || !scale.is_finite() {
        return None;
    }
    let local = Ray {
        origin: inverse.transform_point3a(ray.origin),
        direction: direction / scale,
        t_max: ray.t_max * scale,
        ..*ray
    };
    Some((local, scale))
}

#[derive(Debug, Clone, Copy)]
struct ActiveInstance {
    object: u32,
    scale: f32,
    saved: RayState,
}

/// Single saved-state slot for the instance the ray is currently inside
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceContext {
    active: Option<ActiveInstance>,
}

impl InstanceContext {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Object the ray is inside, if any
    #[inline]
    pub fn object(&self) -> Option<u32> {
        self.active.map(|active| active.object)
    }

    /// Save `state` and replace it with its object-space version. Returns the
    /// scale factor, or `None` (leaving `state` untouched) for a degenerate
    /// transform or when an instance is already active.
    #[inline]
    pub fn enter(&mut self, state: &mut RayState, object: u32, inverse: &Affine3A) -> Option<f32> {
        debug_assert!(!self.is_active(), "nested instance {object}");
        if self.is_active() {
            return None;
        }
        let (local, scale) = ray_to_object_space(&state.ray, inverse)?;
        self.active = Some(ActiveInstance {
            object,
            scale,
            saved: *state,
        });
        *state = RayState::new(local);
        Some(scale)
    }

    /// Restore the world-space state saved on entry, `t_max` included.
    /// Returns the scale factor the instance was entered with.
    #[inline]
    pub fn exit(&mut self, state: &mut RayState) -> Option<f32> {
        let active = self.active.take()?;
        *state = active.saved;
        Some(active.scale)
    }
}

use glam::{Vec3A, Vec4, Vec4Swizzles};
use smallvec::SmallVec;

use crate::{motion_step, PrimitiveHit, Ray, RayIntersect, AABB};

/// Deepest Bézier subdivision used when refining a curve segment
const MAX_CURVE_REFINEMENT: i32 = 10;

/// One curve segment given by four Catmull-Rom keys. The segment spans
/// `keys[1]..keys[2]`; `w` holds the radius at each key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub keys: [Vec4; 4],
}

impl Curve {
    #[inline]
    pub fn new(keys: [Vec4; 4]) -> Self {
        Self { keys }
    }

    /// Cubic Bézier control points of the segment and the radius at both ends
    #[inline]
    pub fn bezier(&self) -> ([Vec3A; 4], [f32; 2]) {
        catmull_rom_to_bezier(&self.keys)
    }

    pub fn bounds(&self) -> AABB {
        let (cp, radius) = self.bezier();
        bezier_bounds(&cp, radius)
    }
}

impl RayIntersect for Curve {
    #[inline]
    fn ray_intersect(&self, ray: &Ray) -> Option<PrimitiveHit> {
        let (cp, radius) = self.bezier();
        ray_curve_intersect(&cp, radius, ray)
    }
}

/// Curve segment with one set of keys per motion step
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCurve {
    pub keys: SmallVec<[[Vec4; 4]; 3]>,
}

impl MotionCurve {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = [Vec4; 4]>,
    {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn at_time(&self, time: f32) -> Curve {
        match self.keys.len() {
            0 => Curve::new([Vec4::ZERO; 4]),
            1 => Curve::new(self.keys[0]),
            n => {
                let (step, blend) = motion_step(time, n);
                let a = &self.keys[step];
                let b = &self.keys[step + 1];
                Curve::new([
                    a[0].lerp(b[0], blend),
                    a[1].lerp(b[1], blend),
                    a[2].lerp(b[2], blend),
                    a[3].lerp(b[3], blend),
                ])
            }
        }
    }

    pub fn bounds(&self) -> AABB {
        let mut aabb = AABB::default();
        for keys in &self.keys {
            aabb.grow_aabb(&Curve::new(*keys).bounds());
        }
        aabb
    }
}

impl RayIntersect for MotionCurve {
    #[inline]
    fn ray_intersect(&self, ray: &Ray) -> Option<PrimitiveHit> {
        self.at_time(ray.time).ray_intersect(ray)
    }
}

#[inline]
fn catmull_rom_to_bezier(keys: &[Vec4; 4]) -> ([Vec3A; 4], [f32; 2]) {
    let p: [Vec3A; 4] = keys.map(|k| Vec3A::from(k.xyz()));
    (
        [
            p[1],
            p[1] + (p[2] - p[0]) / 6.0,
            p[2] - (p[3] - p[1]) / 6.0,
            p[2],
        ],
        [keys[1].w, keys[2].w],
    )
}

/// Control hull bounds padded by the largest radius
fn bezier_bounds(cp: &[Vec3A; 4], radius: [f32; 2]) -> AABB {
    let mut aabb = AABB::default();
    cp.iter().for_each(|p| aabb.grow(*p));
    aabb.expand(radius[0].max(radius[1]))
}

fn subdivide_bezier(cp: &[Vec3A; 4]) -> [Vec3A; 7] {
    [
        cp[0],
        (cp[0] + cp[1]) / 2.0,
        (cp[0] + cp[1] * 2.0 + cp[2]) / 4.0,
        (cp[0] + cp[1] * 3.0 + cp[2] * 3.0 + cp[3]) / 8.0,
        (cp[1] + cp[2] * 2.0 + cp[3]) / 4.0,
        (cp[2] + cp[3]) / 2.0,
        cp[3],
    ]
}

/// Point on the curve at `u` and the derivative there
fn eval_bezier(cp: &[Vec3A; 4], u: f32) -> (Vec3A, Vec3A) {
    let cp1 = [
        cp[0].lerp(cp[1], u),
        cp[1].lerp(cp[2], u),
        cp[2].lerp(cp[3], u),
    ];
    let cp2 = [cp1[0].lerp(cp1[1], u), cp1[1].lerp(cp1[2], u)];
    (cp2[0].lerp(cp2[1], u), (cp2[1] - cp2[0]) * 3.0)
}

#[inline]
fn lerp(t: f32, a: f32, b: f32) -> f32 {
    (1.0 - t) * a + t * b
}

/// If the padded control hull misses the ray's line, or lies outside `[0, z_max]` along it
#[inline]
fn hull_misses(cp: &[Vec3A], half_width: f32, z_max: f32) -> bool {
    let min = cp.iter().fold(Vec3A::splat(f32::INFINITY), |m, p| m.min(*p));
    let max = cp.iter().fold(Vec3A::splat(-f32::INFINITY), |m, p| m.max(*p));
    // y first, the ray frame is oriented so the y extent is usually the smallest
    max.y + half_width < 0.0
        || min.y - half_width > 0.0
        || max.x + half_width < 0.0
        || min.x - half_width > 0.0
        || max.z + half_width < 0.0
        || min.z - half_width > z_max
}

struct CurveQuery {
    radius: [f32; 2],
    ray_length: f32,
    t_max: f32,
}

/// Flat curve test: the curve is a ribbon always facing the ray. The segment
/// is projected into a frame where the ray runs along +z through the origin
/// and subdivided until each piece is close to a line.
pub fn ray_curve_intersect(cp: &[Vec3A; 4], radius: [f32; 2], ray: &Ray) -> Option<PrimitiveHit> {
    let ray_length = ray.direction.length();
    let max_radius = radius[0].max(radius[1]);
    if !(ray_length > 0.0) || !(max_radius > 0.0) {
        return None;
    }

    let z_axis = ray.direction / ray_length;
    let dx = ray.direction.cross(cp[3] - cp[0]);
    let (x_axis, y_axis) = if dx.length_squared() > 0.0 {
        // chord runs along x, so the y extent of the hull stays small
        let y_axis = dx.normalize();
        (y_axis.cross(z_axis), y_axis)
    } else {
        // ray parallel to the chord, any frame will do
        z_axis.any_orthonormal_pair()
    };

    let to_ray = |p: Vec3A| {
        let d = p - ray.origin;
        Vec3A::new(d.dot(x_axis), d.dot(y_axis), d.dot(z_axis))
    };
    let local = cp.map(to_ray);

    let z_max = ray_length * ray.t_max;
    if hull_misses(&local, max_radius, z_max) {
        return None;
    }

    // refinement depth from the curvature of the projected hull
    let mut l0: f32 = 0.0;
    for i in 0..2 {
        l0 = l0.max((local[i] - local[i + 1] * 2.0 + local[i + 2]).abs().max_element());
    }
    let eps = 2.0 * max_radius * 0.05;
    let ratio = std::f32::consts::SQRT_2 * 6.0 * l0 / (8.0 * eps);
    let depth = if ratio > 1.0 {
        ((ratio.log2() / 2.0) as i32).clamp(0, MAX_CURVE_REFINEMENT)
    } else {
        0
    };

    let query = CurveQuery {
        radius,
        ray_length,
        t_max: ray.t_max,
    };
    let mut best = None;
    recursive_intersect(&query, &local, 0.0, 1.0, depth, &mut best);
    best
}

fn recursive_intersect(
    query: &CurveQuery,
    cp: &[Vec3A; 4],
    u0: f32,
    u1: f32,
    depth: i32,
    best: &mut Option<PrimitiveHit>,
) {
    let t_max = best.map_or(query.t_max, |hit| hit.t);
    let z_max = query.ray_length * t_max;

    if depth > 0 {
        let split = subdivide_bezier(cp);
        let u = [u0, (u0 + u1) / 2.0, u1];
        for seg in 0..2 {
            let cps = [
                split[seg * 3],
                split[seg * 3 + 1],
                split[seg * 3 + 2],
                split[seg * 3 + 3],
            ];
            let max_radius = lerp(u[seg], query.radius[0], query.radius[1])
                .max(lerp(u[seg + 1], query.radius[0], query.radius[1]));
            let z_max = query.ray_length * best.map_or(query.t_max, |hit| hit.t);
            if hull_misses(&cps, max_radius, z_max) {
                continue;
            }
            recursive_intersect(query, &cps, u[seg], u[seg + 1], depth - 1, best);
        }
        return;
    }

    // segment end caps: the sample point must lie between the tangent perpendiculars
    let edge = (cp[1].y - cp[0].y) * -cp[0].y + cp[0].x * (cp[0].x - cp[1].x);
    if edge < 0.0 {
        return;
    }
    let edge = (cp[2].y - cp[3].y) * -cp[3].y + cp[3].x * (cp[3].x - cp[2].x);
    if edge < 0.0 {
        return;
    }

    // closest point on the chord to the ray
    let chord = glam::Vec2::new(cp[3].x - cp[0].x, cp[3].y - cp[0].y);
    let denom = chord.length_squared();
    if denom == 0.0 {
        return;
    }
    let w = glam::Vec2::new(-cp[0].x, -cp[0].y).dot(chord) / denom;

    let u = lerp(w, u0, u1).clamp(u0, u1);
    let hit_width = 2.0 * lerp(u, query.radius[0], query.radius[1]);

    let (pc, dpcdw) = eval_bezier(cp, w.clamp(0.0, 1.0));
    let dist2 = pc.x * pc.x + pc.y * pc.y;
    if dist2 > hit_width * hit_width * 0.25 {
        return;
    }
    if !(pc.z > 0.0 && pc.z < z_max) {
        return;
    }

    let dist = dist2.sqrt();
    let edge_func = dpcdw.x * -pc.y + pc.x * dpcdw.y;
    let v = if edge_func > 0.0 {
        0.5 + dist / hit_width
    } else {
        0.5 - dist / hit_width
    };

    let t = pc.z / query.ray_length;
    if t > 0.0 && t < t_max {
        *best = Some(PrimitiveHit { t, u, v });
    }
}

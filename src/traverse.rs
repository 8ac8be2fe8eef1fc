use std::ops::ControlFlow;

use crate::{
    intersect_primitive, BvhFeatures, BvhNode, DefaultSlab, InstanceContext, Intersection,
    LeafKind, NodeAddress, PrimitiveRef, PrimitiveType, Ray, RayState, Scene, SlabBackend,
    TraversalStack, TraversalStats, BVH_STACK_SIZE,
};

/// What the traversal does with the hits it finds
pub trait HitCollector {
    /// If `t_max` shrinks to every recorded hit
    const SHRINKS_RAY: bool;

    /// Take one hit. `Break` ends the traversal.
    fn record(&mut self, isect: Intersection) -> ControlFlow<()>;

    /// Called after the ray moved into an instance
    #[inline]
    fn enter_instance(&mut self) {}

    /// Called after the world-space ray was restored. Hits recorded inside
    /// carry object-space distances, `t_world = t_local / scale`. Returns the
    /// world-space `t_max` to continue with.
    #[inline]
    fn leave_instance(&mut self, _scale: f32, outer_t_max: f32) -> f32 {
        outer_t_max
    }
}

/// Keep the nearest hit
#[derive(Debug, Clone, Copy)]
pub struct ClosestHit {
    pub isect: Intersection,
    hit_in_instance: bool,
}

impl ClosestHit {
    pub fn new(t_max: f32) -> Self {
        Self {
            isect: Intersection {
                t: t_max,
                ..Intersection::NONE
            },
            hit_in_instance: false,
        }
    }
}

impl HitCollector for ClosestHit {
    const SHRINKS_RAY: bool = true;

    #[inline]
    fn record(&mut self, isect: Intersection) -> ControlFlow<()> {
        self.isect = isect;
        self.hit_in_instance = true;
        ControlFlow::Continue(())
    }

    #[inline]
    fn enter_instance(&mut self) {
        self.hit_in_instance = false;
    }

    #[inline]
    fn leave_instance(&mut self, scale: f32, outer_t_max: f32) -> f32 {
        if !self.hit_in_instance {
            return outer_t_max;
        }
        self.hit_in_instance = false;
        self.isect.t = (self.isect.t / scale).min(outer_t_max);
        self.isect.t
    }
}

/// Stop at the first hit
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyHit {
    pub hit: Option<Intersection>,
    hit_in_instance: bool,
}

impl HitCollector for AnyHit {
    const SHRINKS_RAY: bool = false;

    #[inline]
    fn record(&mut self, isect: Intersection) -> ControlFlow<()> {
        self.hit = Some(isect);
        self.hit_in_instance = true;
        ControlFlow::Break(())
    }

    #[inline]
    fn enter_instance(&mut self) {
        self.hit_in_instance = false;
    }

    #[inline]
    fn leave_instance(&mut self, scale: f32, outer_t_max: f32) -> f32 {
        if let Some(hit) = self.hit.as_mut().filter(|_| self.hit_in_instance) {
            hit.t /= scale;
        }
        self.hit_in_instance = false;
        outer_t_max
    }
}

/// Append hits in discovery order until the slice is full. A primitive
/// reached through more than one leaf is recorded once.
#[derive(Debug)]
pub struct AllHits<'a> {
    hits: &'a mut [Intersection],
    count: usize,
    instance_start: usize,
}

impl<'a> AllHits<'a> {
    pub fn new(hits: &'a mut [Intersection]) -> Self {
        Self {
            hits,
            count: 0,
            instance_start: 0,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl HitCollector for AllHits<'_> {
    const SHRINKS_RAY: bool = false;

    #[inline]
    fn record(&mut self, isect: Intersection) -> ControlFlow<()> {
        if self.count >= self.hits.len() {
            return ControlFlow::Break(());
        }
        let duplicate = self.hits[..self.count].iter().any(|h| {
            h.prim == isect.prim && h.object == isect.object && h.prim_type == isect.prim_type
        });
        if !duplicate {
            self.hits[self.count] = isect;
            self.count += 1;
        }
        if self.count == self.hits.len() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    #[inline]
    fn enter_instance(&mut self) {
        self.instance_start = self.count;
    }

    #[inline]
    fn leave_instance(&mut self, scale: f32, outer_t_max: f32) -> f32 {
        for hit in &mut self.hits[self.instance_start..self.count] {
            hit.t /= scale;
        }
        self.instance_start = self.count;
        outer_t_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraversalState {
    Descend,
    Leaf(u32),
    Pop,
    InstanceEnter(u32),
    InstanceExit,
    Done,
}

/// Walk `scene` with `ray`, handing every accepted primitive hit to `collector`
pub fn traverse<N, B, C>(scene: &Scene<N>, ray: &Ray, collector: &mut C, stats: &mut TraversalStats)
where
    N: BvhNode,
    B: SlabBackend,
    C: HitCollector,
{
    let features = scene.features();
    let motion = features.contains(BvhFeatures::MOTION);

    let mut stack = TraversalStack::<BVH_STACK_SIZE>::new();
    let mut state = RayState::new(*ray);
    let mut instance = InstanceContext::default();
    let mut current = scene.root();
    let mut step = TraversalState::Descend;
    stack.push_sentinel();

    loop {
        step = match step {
            TraversalState::Descend => match current {
                NodeAddress::Internal(index) => match scene.nodes().get(index as usize) {
                    Some(node) => {
                        stats.nodes_visited += 1;
                        let mut hits = node.intersect_children::<B>(&state.query, state.ray.t_max);
                        match hits.count {
                            0 => TraversalState::Pop,
                            1 => {
                                current = hits.entries[0].address;
                                TraversalState::Descend
                            }
                            _ => {
                                current = stack.push_far_children(hits.as_mut_slice()).address;
                                TraversalState::Descend
                            }
                        }
                    }
                    None => {
                        debug_assert!(false, "node {index} out of range");
                        TraversalState::Pop
                    }
                },
                NodeAddress::Leaf(index) => TraversalState::Leaf(index),
                NodeAddress::Sentinel => TraversalState::Pop,
            },

            TraversalState::Leaf(index) => match scene.leaves().get(index as usize) {
                None => {
                    debug_assert!(false, "leaf {index} out of range");
                    TraversalState::Pop
                }
                // visibility is checked before any primitive math
                Some(leaf) if leaf.visibility & state.ray.visibility == 0 => {
                    stats.leaves_visited += 1;
                    TraversalState::Pop
                }
                Some(leaf) => {
                    stats.leaves_visited += 1;
                    match leaf.kind() {
                        LeafKind::Instance { slot } => TraversalState::InstanceEnter(slot),
                        LeafKind::Primitives {
                            first,
                            last,
                            prim_type: Some(prim_type),
                        } if features.contains(prim_type.required_features()) => {
                            let flow = intersect_leaf(
                                scene,
                                &mut state,
                                instance.object(),
                                first..last,
                                prim_type,
                                collector,
                                stats,
                            );
                            if flow.is_break() {
                                // results leave in world space even when stopping inside an instance
                                if let Some(scale) = instance.exit(&mut state) {
                                    collector.leave_instance(scale, state.ray.t_max);
                                }
                                TraversalState::Done
                            } else {
                                TraversalState::Pop
                            }
                        }
                        LeafKind::Primitives { .. } => {
                            debug_assert!(false, "leaf {index} has an unsupported primitive type");
                            TraversalState::Pop
                        }
                    }
                }
            },

            TraversalState::Pop => {
                let entry = stack.pop();
                match entry.address {
                    NodeAddress::Sentinel if instance.is_active() => TraversalState::InstanceExit,
                    NodeAddress::Sentinel => TraversalState::Done,
                    // entered beyond the current closest hit
                    _ if entry.distance > state.ray.t_max => TraversalState::Pop,
                    address => {
                        current = address;
                        TraversalState::Descend
                    }
                }
            }

            TraversalState::InstanceEnter(slot) => {
                let object = scene.primitives().prim_object.get(slot as usize).copied();
                let entry = object.and_then(|object| {
                    scene
                        .objects()
                        .get(object as usize)
                        .map(|entry| (object, entry))
                });
                match entry {
                    Some((object, entry))
                        if features.contains(BvhFeatures::INSTANCING)
                            && entry.visibility & state.ray.visibility != 0 =>
                    {
                        let inverse = entry.inverse_at(state.ray.time, motion);
                        match instance.enter(&mut state, object, &inverse) {
                            Some(_) => {
                                stats.instances_entered += 1;
                                collector.enter_instance();
                                stack.push_sentinel();
                                current = entry.root;
                                TraversalState::Descend
                            }
                            // degenerate transform, nothing inside can be hit
                            None => TraversalState::Pop,
                        }
                    }
                    _ => TraversalState::Pop,
                }
            }

            TraversalState::InstanceExit => {
                if let Some(scale) = instance.exit(&mut state) {
                    state.ray.t_max = collector.leave_instance(scale, state.ray.t_max);
                }
                TraversalState::Pop
            }

            TraversalState::Done => break,
        };
    }

    stats.max_stack_depth = stats.max_stack_depth.max(stack.high_water() as u32);
}

/// Test the primitive slots of one leaf
#[inline]
fn intersect_leaf<N, C>(
    scene: &Scene<N>,
    state: &mut RayState,
    instance_object: Option<u32>,
    slots: std::ops::Range<u32>,
    prim_type: PrimitiveType,
    collector: &mut C,
    stats: &mut TraversalStats,
) -> ControlFlow<()>
where
    N: BvhNode,
    C: HitCollector,
{
    let primitives = scene.primitives();
    for slot in slots {
        let slot = slot as usize;
        if primitives.slot_visibility(slot) & state.ray.visibility == 0 {
            continue;
        }
        let (Some(&prim), Some(&owner)) = (
            primitives.prim_index.get(slot),
            primitives.prim_object.get(slot),
        ) else {
            debug_assert!(false, "slot {slot} out of range");
            continue;
        };
        let object = instance_object.unwrap_or(owner);
        if state.ray.skips(object, prim, prim_type) {
            continue;
        }

        stats.primitives_tested += 1;
        let Some(hit) = intersect_primitive(primitives, prim_type, prim, &state.ray) else {
            continue;
        };
        if C::SHRINKS_RAY {
            state.ray.t_max = hit.t;
        }
        let primitive = PrimitiveRef {
            object,
            prim,
            prim_type,
        };
        if collector.record(Intersection::new(hit, primitive)).is_break() {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

impl<N: BvhNode> Scene<N> {
    /// Find the closest hit along `ray`. `isect` is reset first; returns if anything was hit.
    #[inline]
    pub fn intersect(&self, ray: &Ray, isect: &mut Intersection) -> bool {
        self.intersect_with::<DefaultSlab>(ray, isect, &mut TraversalStats::default())
    }

    pub fn intersect_with<B: SlabBackend>(
        &self,
        ray: &Ray,
        isect: &mut Intersection,
        stats: &mut TraversalStats,
    ) -> bool {
        let mut collector = ClosestHit::new(ray.t_max);
        traverse::<N, B, _>(self, ray, &mut collector, stats);
        *isect = collector.isect;
        isect.is_hit()
    }

    pub fn intersect_with_stats(&self, ray: &Ray, isect: &mut Intersection) -> (bool, TraversalStats) {
        let mut stats = TraversalStats::default();
        let hit = self.intersect_with::<DefaultSlab>(ray, isect, &mut stats);
        (hit, stats)
    }

    #[inline]
    pub fn closest_hit(&self, ray: &Ray) -> Option<Intersection> {
        let mut isect = Intersection::NONE;
        self.intersect(ray, &mut isect).then_some(isect)
    }

    /// If anything blocks `ray` before `t_max`
    #[inline]
    pub fn occluded(&self, ray: &Ray) -> bool {
        self.occluded_with::<DefaultSlab>(ray, &mut TraversalStats::default())
    }

    pub fn occluded_with<B: SlabBackend>(&self, ray: &Ray, stats: &mut TraversalStats) -> bool {
        let mut collector = AnyHit::default();
        traverse::<N, B, _>(self, ray, &mut collector, stats);
        collector.hit.is_some()
    }

    pub fn occluded_with_stats(&self, ray: &Ray) -> (bool, TraversalStats) {
        let mut stats = TraversalStats::default();
        let hit = self.occluded_with::<DefaultSlab>(ray, &mut stats);
        (hit, stats)
    }

    /// Record up to `hits.len()` hits along `ray` in discovery order, with
    /// world-space distances. Returns how many were written.
    #[inline]
    pub fn intersect_all(&self, ray: &Ray, hits: &mut [Intersection]) -> usize {
        self.intersect_all_with::<DefaultSlab>(ray, hits, &mut TraversalStats::default())
    }

    pub fn intersect_all_with<B: SlabBackend>(
        &self,
        ray: &Ray,
        hits: &mut [Intersection],
        stats: &mut TraversalStats,
    ) -> usize {
        if hits.is_empty() {
            return 0;
        }
        let mut collector = AllHits::new(hits);
        traverse::<N, B, _>(self, ray, &mut collector, stats);
        collector.count()
    }

    pub fn intersect_all_with_stats(
        &self,
        ray: &Ray,
        hits: &mut [Intersection],
    ) -> (usize, TraversalStats) {
        let mut stats = TraversalStats::default();
        let count = self.intersect_all_with::<DefaultSlab>(ray, hits, &mut stats);
        (count, stats)
    }
}

#[cfg(test)]
mod tests {
    use std::iter;
    use std::ops::ControlFlow;

    use rand::{thread_rng, Rng};

    use glam::{Affine3A, Quat, Vec3, Vec3A, Vec4};

    use approx::*;

    use crate::*;

    fn random_triangles(count: usize) -> Vec<Triangle> {
        let mut rng = thread_rng();
        iter::repeat(0)
            .take(count)
            .map(|_| {
                let v0 = rng.gen::<Vec3A>() * 9.0 - Vec3A::splat(5.0);
                let v1 = rng.gen();
                let v2 = rng.gen();
                Triangle::new(v0, v1, v2)
            })
            .collect()
    }

    fn random_transform<R: Rng>(rng: &mut R) -> Affine3A {
        Affine3A::from_scale_rotation_translation(
            Vec3::splat(rng.gen_range(0.5..2.0)),
            Quat::from_rotation_y(rng.gen_range(0.0..6.0)),
            rng.gen::<Vec3>() * 8.0 - Vec3::splat(4.0),
        )
    }

    fn random_rays(count: usize, t_max: Option<f32>) -> Vec<Ray> {
        let mut rng = thread_rng();
        iter::repeat(0)
            .take(count)
            .map(|_| {
                let origin = rng.gen::<Vec3A>() * 12.0 - Vec3A::splat(6.0);
                let direction = (rng.gen::<Vec3A>() - Vec3A::splat(0.5)).normalize_or_zero();
                let t_max = t_max.unwrap_or(f32::INFINITY);
                Ray::new(origin, direction, t_max).with_time(rng.gen())
            })
            .collect()
    }

    /// Triangles in world space plus a few instances of a second soup
    fn soup_builder() -> SceneBuilder {
        let mut rng = thread_rng();
        let mut builder = SceneBuilder::new();
        builder.add_triangles(random_triangles(300));
        let prototype = builder.add_prototype(Geometry::Triangles(random_triangles(40)));
        for _ in 0..4 {
            builder.add_instance(prototype, random_transform(&mut rng));
        }
        builder
    }

    fn unit_cube() -> Vec<Triangle> {
        let corner = |i: usize| {
            Vec3A::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            )
        };
        let faces = [
            [0, 1, 3, 2],
            [4, 6, 7, 5],
            [0, 4, 5, 1],
            [2, 3, 7, 6],
            [0, 2, 6, 4],
            [1, 5, 7, 3],
        ];
        faces
            .iter()
            .flat_map(|f| {
                [
                    Triangle::new(corner(f[0]), corner(f[1]), corner(f[2])),
                    Triangle::new(corner(f[0]), corner(f[2]), corner(f[3])),
                ]
            })
            .collect()
    }

    /// Large triangle in the plane `z` covering the area around the z axis
    fn wall(z: f32) -> Triangle {
        Triangle::new(
            Vec3A::new(-10.0, -10.0, z),
            Vec3A::new(10.0, -10.0, z),
            Vec3A::new(0.0, 10.0, z),
        )
    }

    fn straight_curve(z: f32, radius: f32) -> Curve {
        Curve::new([
            Vec4::new(-3.0, 0.0, z, radius),
            Vec4::new(-1.0, 0.0, z, radius),
            Vec4::new(1.0, 0.0, z, radius),
            Vec4::new(3.0, 0.0, z, radius),
        ])
    }

    fn assert_closest_matches<N: BvhNode, B: SlabBackend>(fixture: &Fixture<N>, rays: &[Ray]) {
        let mut hits = 0;
        for ray in rays {
            let mut isect = Intersection::NONE;
            let found = fixture
                .scene
                .intersect_with::<B>(ray, &mut isect, &mut TraversalStats::default());
            match fixture.brute_force_closest(ray) {
                Some(expected) => {
                    assert!(found, "{ray:?} should hit {expected:?}");
                    assert_relative_eq!(isect.t, expected.t, max_relative = 1e-5);
                    assert_eq!(isect.primitive(), expected.primitive());
                    hits += 1;
                }
                None => assert!(!found, "{ray:?} should miss, found {isect:?}"),
            }
        }
        assert!(hits > 0);
    }

    fn assert_occlusion_matches<N: BvhNode, B: SlabBackend>(fixture: &Fixture<N>, rays: &[Ray]) {
        for ray in rays {
            let blocked = fixture
                .scene
                .occluded_with::<B>(ray, &mut TraversalStats::default());
            assert_eq!(blocked, fixture.brute_force_closest(ray).is_some(), "{ray:?}");
        }
    }

    #[test]
    fn closest_matches_brute_force() {
        let builder = soup_builder();
        let rays = random_rays(500, None);
        let binary = builder.build::<BinaryNode>().unwrap();
        let quad = builder.build::<QuadNode>().unwrap();
        assert_closest_matches::<_, ScalarSlab>(&binary, &rays);
        assert_closest_matches::<_, SimdSlab>(&binary, &rays);
        assert_closest_matches::<_, ScalarSlab>(&quad, &rays);
        assert_closest_matches::<_, SimdSlab>(&quad, &rays);
    }

    #[test]
    fn occlusion_matches_brute_force() {
        let builder = soup_builder();
        let mut rays = random_rays(300, None);
        let mut rng = thread_rng();
        for ray in &mut rays {
            ray.t_max = rng.gen_range(0.5..15.0);
        }
        let binary = builder.build::<BinaryNode>().unwrap();
        let quad = builder.build::<QuadNode>().unwrap();
        assert_occlusion_matches::<_, ScalarSlab>(&binary, &rays);
        assert_occlusion_matches::<_, SimdSlab>(&binary, &rays);
        assert_occlusion_matches::<_, ScalarSlab>(&quad, &rays);
        assert_occlusion_matches::<_, SimdSlab>(&quad, &rays);
    }

    #[test]
    fn cube_front_face() {
        let mut builder = SceneBuilder::new();
        builder.add_triangles(unit_cube());
        let scene = builder.build::<QuadNode>().unwrap().scene;

        let toward = Ray::infinite_ray(Vec3A::new(0.1, 0.2, 5.0), Vec3A::new(0.0, 0.0, -1.0));
        let hit = scene.closest_hit(&toward).unwrap();
        assert_abs_diff_eq!(hit.t, 4.5, epsilon = 1e-5);
        assert_eq!(hit.object, 0);
        assert_eq!(hit.prim_type, PrimitiveType::Triangle);
        assert_abs_diff_eq!(toward.at(hit.t).z, 0.5, epsilon = 1e-5);

        let away = Ray::infinite_ray(toward.origin, Vec3A::new(0.0, 0.0, 1.0));
        assert!(scene.closest_hit(&away).is_none());
        let mut isect = Intersection::NONE;
        assert!(!scene.intersect(&away, &mut isect));
        assert!(!isect.is_hit());

        assert!(!scene.occluded(&Ray { t_max: 4.4, ..toward }));
        assert!(scene.occluded(&Ray { t_max: 4.6, ..toward }));
    }

    #[test]
    fn cube_along_face_diagonal() {
        let mut builder = SceneBuilder::new();
        builder.add_triangles(unit_cube());
        // runs down the edge shared by the two triangles of the front and back faces
        let toward = Ray::infinite_ray(Vec3A::new(0.0, 0.0, 5.0), Vec3A::new(0.0, 0.0, -1.0));
        let away = Ray::infinite_ray(toward.origin, Vec3A::new(0.0, 0.0, 1.0));
        for (hit, miss) in [
            {
                let scene = builder.build::<BinaryNode>().unwrap().scene;
                (scene.closest_hit(&toward), scene.closest_hit(&away))
            },
            {
                let scene = builder.build::<QuadNode>().unwrap().scene;
                (scene.closest_hit(&toward), scene.closest_hit(&away))
            },
        ] {
            let hit = hit.unwrap();
            assert_abs_diff_eq!(hit.t, 4.5, epsilon = 1e-5);
            assert_abs_diff_eq!(toward.at(hit.t).z, 0.5, epsilon = 1e-5);
            assert!(miss.is_none());
        }
    }

    #[test]
    fn empty_scene_misses() {
        let fixture = SceneBuilder::new().build::<BinaryNode>().unwrap();
        assert_eq!(fixture.scene.root(), NodeAddress::Sentinel);
        let ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::X);
        assert!(fixture.scene.closest_hit(&ray).is_none());
        assert!(!fixture.scene.occluded(&ray));
        let mut hits = [Intersection::NONE; 4];
        assert_eq!(fixture.scene.intersect_all(&ray, &mut hits), 0);
    }

    #[test]
    fn scaled_instance_reports_world_distance() {
        let mut builder = SceneBuilder::new();
        let cube = builder.add_prototype(Geometry::Triangles(unit_cube()));
        let big = builder.add_instance(
            cube,
            Affine3A::from_scale_rotation_translation(Vec3::splat(4.0), Quat::IDENTITY, Vec3::new(0.0, 0.0, -10.0)),
        );
        let small = builder.add_instance(
            cube,
            Affine3A::from_scale_rotation_translation(Vec3::splat(0.25), Quat::IDENTITY, Vec3::new(20.0, 0.0, -10.0)),
        );
        let scene = builder.build::<QuadNode>().unwrap().scene;

        let ray = Ray::infinite_ray(Vec3A::new(0.1, 0.2, 0.0), Vec3A::new(0.0, 0.0, -1.0));
        let (found, stats) = scene.intersect_with_stats(&ray, &mut Intersection::default());
        assert!(found);
        assert!(stats.instances_entered >= 1);
        let hit = scene.closest_hit(&ray).unwrap();
        // front face of the big cube sits at z = -8
        assert_abs_diff_eq!(hit.t, 8.0, epsilon = 1e-4);
        assert_eq!(hit.object, big);

        let ray = Ray::infinite_ray(Vec3A::new(20.01, 0.02, 0.0), Vec3A::new(0.0, 0.0, -1.0));
        let hit = scene.closest_hit(&ray).unwrap();
        assert_abs_diff_eq!(hit.t, 9.875, epsilon = 1e-4);
        assert_eq!(hit.object, small);

        // t_max is world space on the way in too
        assert!(!scene.occluded(&Ray { t_max: 9.8, ..ray }));
        assert!(scene.occluded(&Ray { t_max: 9.9, ..ray }));
    }

    #[test]
    fn closest_hit_leaving_instance_only_shrinks() {
        let hit = |t| {
            Intersection::new(
                PrimitiveHit { t, u: 0.0, v: 0.0 },
                PrimitiveRef {
                    object: 1,
                    prim: 0,
                    prim_type: PrimitiveType::Triangle,
                },
            )
        };
        let mut collector = ClosestHit::new(10.0);
        collector.enter_instance();
        assert_eq!(collector.record(hit(8.0)), ControlFlow::Continue(()));
        assert_abs_diff_eq!(collector.leave_instance(2.0, 10.0), 4.0);
        assert_abs_diff_eq!(collector.isect.t, 4.0);

        // nothing found inside: the outer t_max stands
        collector.enter_instance();
        assert_abs_diff_eq!(collector.leave_instance(0.5, 4.0), 4.0);
        assert_abs_diff_eq!(collector.isect.t, 4.0);
    }

    #[test]
    fn any_hit_stops_at_first() {
        let mut collector = AnyHit::default();
        let isect = Intersection {
            t: 3.0,
            prim: 2,
            ..Intersection::NONE
        };
        collector.enter_instance();
        assert!(collector.record(isect).is_break());
        assert_abs_diff_eq!(collector.leave_instance(0.5, 10.0), 10.0);
        assert_abs_diff_eq!(collector.hit.unwrap().t, 6.0);
    }

    #[test]
    fn multi_hit_respects_capacity() {
        let mut builder = SceneBuilder::new();
        builder.add_triangles((1..=8).map(|i| wall(-(i as f32))).collect());
        let fixture = builder.build::<QuadNode>().unwrap();
        let scene = &fixture.scene;
        let ray = Ray::infinite_ray(Vec3A::new(0.3, 0.2, 0.0), Vec3A::new(0.0, 0.0, -1.0));

        let mut hits = [Intersection::NONE; 3];
        assert_eq!(scene.intersect_all(&ray, &mut hits), 3);
        let mut prims: Vec<u32> = hits.iter().map(|h| h.prim).collect();
        prims.sort_unstable();
        prims.dedup();
        assert_eq!(prims.len(), 3);
        for hit in &hits {
            assert_abs_diff_eq!(hit.t, hit.prim as f32 + 1.0, epsilon = 1e-5);
        }

        let mut hits = [Intersection::NONE; 16];
        let count = scene.intersect_all(&ray, &mut hits);
        assert_eq!(count, 8);
        let mut distances: Vec<f32> = hits[..count].iter().map(|h| h.t).collect();
        distances.sort_by(f32::total_cmp);
        let mut expected: Vec<f32> = fixture.brute_force_all(&ray).iter().map(|h| h.t).collect();
        expected.sort_by(f32::total_cmp);
        assert_eq!(distances, expected);

        assert_eq!(scene.intersect_all(&ray, &mut []), 0);

        // t_max bounds multi-hit as well
        let mut hits = [Intersection::NONE; 16];
        assert_eq!(scene.intersect_all(&Ray { t_max: 4.5, ..ray }, &mut hits), 4);
    }

    #[test]
    fn multi_hit_through_instances() {
        let mut builder = SceneBuilder::new();
        let pair = builder.add_prototype(Geometry::Triangles(vec![wall(0.0), wall(-1.0)]));
        for (k, scale) in [1.0, 2.0, 0.5].into_iter().enumerate() {
            builder.add_instance(
                pair,
                Affine3A::from_scale_rotation_translation(
                    Vec3::splat(scale),
                    Quat::IDENTITY,
                    Vec3::new(0.0, 0.0, -5.0 * k as f32),
                ),
            );
        }
        let fixture = builder.build::<BinaryNode>().unwrap();
        let ray = Ray::infinite_ray(Vec3A::new(0.3, 0.2, 10.0), Vec3A::new(0.0, 0.0, -1.0));

        let mut expected: Vec<f32> = fixture.brute_force_all(&ray).iter().map(|h| h.t).collect();
        expected.sort_by(f32::total_cmp);
        assert_eq!(expected.len(), 6);

        let mut hits = [Intersection::NONE; 32];
        let count = fixture.scene.intersect_all(&ray, &mut hits);
        assert_eq!(count, 6);
        let mut distances: Vec<f32> = hits[..count].iter().map(|h| h.t).collect();
        distances.sort_by(f32::total_cmp);
        for (found, expected) in distances.iter().zip(&expected) {
            assert_relative_eq!(*found, *expected, max_relative = 1e-5);
        }

        // stopping inside an instance still reports world distances
        let mut hits = [Intersection::NONE; 3];
        assert_eq!(fixture.scene.intersect_all(&ray, &mut hits), 3);
        for hit in &hits {
            assert!(
                expected.iter().any(|t| relative_eq!(*t, hit.t, max_relative = 1e-5)),
                "{hit:?} not in {expected:?}"
            );
        }
    }

    #[test]
    fn stack_stays_within_requirement() {
        let builder = soup_builder();
        let rays = random_rays(300, None);
        let binary = builder.build::<BinaryNode>().unwrap().scene;
        let quad = builder.build::<QuadNode>().unwrap().scene;
        for scene_requirement in [binary.stack_requirement(), quad.stack_requirement()] {
            assert!(scene_requirement <= BVH_STACK_SIZE);
        }
        for ray in &rays {
            let (_, stats) = binary.intersect_with_stats(ray, &mut Intersection::default());
            assert!(stats.max_stack_depth as usize <= binary.stack_requirement());
            let (_, stats) = quad.occluded_with_stats(ray);
            assert!(stats.max_stack_depth as usize <= quad.stack_requirement());
            let mut hits = [Intersection::NONE; 64];
            let (_, stats) = quad.intersect_all_with_stats(ray, &mut hits);
            assert!(stats.max_stack_depth as usize <= quad.stack_requirement());
        }
    }

    #[test]
    fn stats_count_work() {
        let mut builder = SceneBuilder::new();
        builder.add_triangles(unit_cube());
        let scene = builder.build::<BinaryNode>().unwrap().scene;

        let ray = Ray::infinite_ray(Vec3A::new(0.1, 0.2, 5.0), Vec3A::new(0.0, 0.0, -1.0));
        let (found, stats) = scene.intersect_with_stats(&ray, &mut Intersection::default());
        assert!(found);
        assert!(stats.nodes_visited >= 1);
        assert!(stats.leaves_visited >= 1);
        assert!(stats.primitives_tested >= 1);
        assert_eq!(stats.instances_entered, 0);
        assert!(stats.max_stack_depth >= 1);

        let far = Ray::infinite_ray(Vec3A::new(50.0, 50.0, 5.0), Vec3A::new(0.0, 0.0, -1.0));
        let (found, stats) = scene.intersect_with_stats(&far, &mut Intersection::default());
        assert!(!found);
        assert_eq!(stats.nodes_visited, 1);
        assert_eq!(stats.primitives_tested, 0);
    }

    #[test]
    fn motion_instance_matches_brute_force() {
        let mut builder = SceneBuilder::new();
        let prototype = builder.add_prototype(Geometry::Triangles(random_triangles(60)));
        builder.add_motion_instance(
            prototype,
            &[
                Affine3A::from_translation(Vec3::new(-2.0, 0.0, 0.0)),
                Affine3A::from_rotation_translation(Quat::from_rotation_y(1.2), Vec3::new(2.0, 1.0, 0.0)),
            ],
        );
        builder.add_triangles(random_triangles(30));
        let fixture = builder.build::<QuadNode>().unwrap();
        assert!(fixture.scene.features().contains(BvhFeatures::MOTION));
        let rays = random_rays(400, None);
        assert_closest_matches::<_, DefaultSlab>(&fixture, &rays);
    }

    #[test]
    fn motion_primitives_match_brute_force() {
        let mut rng = thread_rng();
        let triangles = random_triangles(80)
            .into_iter()
            .map(|t| {
                let offset = rng.gen::<Vec3A>() * 2.0;
                let start = [t.vertex0, t.vertex1, t.vertex2];
                MotionTriangle::new([start, start.map(|v| v + offset)])
            })
            .collect();
        let mut builder = SceneBuilder::new();
        builder.add_geometry(Geometry::MotionTriangles(triangles));
        let binary = builder.build::<BinaryNode>().unwrap();
        let quad = builder.build::<QuadNode>().unwrap();
        let rays = random_rays(400, None);
        assert_closest_matches::<_, ScalarSlab>(&binary, &rays);
        assert_closest_matches::<_, SimdSlab>(&quad, &rays);
    }

    #[test]
    fn motion_curve_follows_time() {
        let start = straight_curve(-5.0, 0.1).keys;
        let end = start.map(|k| k + Vec4::new(0.0, 5.0, 0.0, 0.0));
        let mut builder = SceneBuilder::new();
        builder.add_geometry(Geometry::MotionCurves(vec![MotionCurve::new([start, end])]));
        builder.add_triangles(vec![wall(-20.0)]);
        let scene = builder.build::<QuadNode>().unwrap().scene;
        assert!(scene.features().contains(BvhFeatures::HAIR | BvhFeatures::MOTION));

        let ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::new(0.0, 0.0, -1.0));
        let early = scene.closest_hit(&ray.with_time(0.0)).unwrap();
        assert_eq!(early.prim_type, PrimitiveType::MotionCurve);
        assert_abs_diff_eq!(early.t, 5.0, epsilon = 1e-3);
        let late = scene.closest_hit(&ray.with_time(1.0)).unwrap();
        assert_eq!(late.prim_type, PrimitiveType::Triangle);
        assert_abs_diff_eq!(late.t, 20.0, epsilon = 1e-4);
    }

    #[test]
    fn curves_front_to_back() {
        let mut builder = SceneBuilder::new();
        builder.add_curves(vec![
            straight_curve(-3.0, 0.1),
            straight_curve(-5.0, 0.1),
            straight_curve(-7.0, 0.1),
        ]);
        let ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::new(0.0, 0.0, -1.0));
        for scene in [
            builder.build::<BinaryNode>().unwrap().scene.closest_hit(&ray),
            builder.build::<QuadNode>().unwrap().scene.closest_hit(&ray),
        ] {
            let hit = scene.unwrap();
            assert_eq!(hit.prim, 0);
            assert_eq!(hit.prim_type, PrimitiveType::Curve);
            assert_abs_diff_eq!(hit.t, 3.0, epsilon = 1e-3);
        }

        let scene = builder.build::<QuadNode>().unwrap().scene;
        assert!(!scene.occluded(&Ray { t_max: 2.5, ..ray }));
        assert!(scene.occluded(&Ray { t_max: 3.5, ..ray }));
        let mut hits = [Intersection::NONE; 8];
        assert_eq!(scene.intersect_all(&ray, &mut hits), 3);
    }

    #[test]
    fn visibility_masks() {
        let mut builder = SceneBuilder::new();
        let camera_only = builder.add_geometry_with_visibility(Geometry::Triangles(vec![wall(-2.0)]), visibility::CAMERA);
        let everywhere = builder.add_triangles(vec![wall(-4.0)]);
        let scene = builder.build::<BinaryNode>().unwrap().scene;

        let ray = Ray::infinite_ray(Vec3A::new(0.3, 0.2, 0.0), Vec3A::new(0.0, 0.0, -1.0));
        let camera = scene.closest_hit(&ray.with_visibility(visibility::CAMERA)).unwrap();
        assert_eq!(camera.object, camera_only);
        assert_abs_diff_eq!(camera.t, 2.0, epsilon = 1e-5);

        let shadow = scene.closest_hit(&ray.with_visibility(visibility::SHADOW)).unwrap();
        assert_eq!(shadow.object, everywhere);
        assert_abs_diff_eq!(shadow.t, 4.0, epsilon = 1e-5);
        assert!(!scene.occluded(&Ray { t_max: 3.0, ..ray.with_visibility(visibility::SHADOW) }));

        assert!(scene.closest_hit(&ray.with_visibility(0)).is_none());
    }

    #[test]
    fn self_primitive_is_skipped() {
        let mut builder = SceneBuilder::new();
        let object = builder.add_triangles(vec![wall(-2.0), wall(-4.0)]);
        let scene = builder.build::<QuadNode>().unwrap().scene;

        let ray = Ray::infinite_ray(Vec3A::new(0.3, 0.2, 0.0), Vec3A::new(0.0, 0.0, -1.0));
        assert_eq!(scene.closest_hit(&ray).unwrap().prim, 0);

        let spawned = ray.with_self_primitive(PrimitiveRef {
            object,
            prim: 0,
            prim_type: PrimitiveType::Triangle,
        });
        let hit = scene.closest_hit(&spawned).unwrap();
        assert_eq!(hit.prim, 1);
        assert_abs_diff_eq!(hit.t, 4.0, epsilon = 1e-5);

        // leaving the surface along its normal finds nothing behind
        let surface = ray.at(2.0);
        let normal = wall(-2.0).normal().normalize();
        let outward = if normal.z > 0.0 { normal } else { -normal };
        let bounce = Ray::infinite_ray(surface + outward * RAY_INTERSECT_EPSILON, outward);
        assert!(scene.closest_hit(&bounce).is_none());
    }

    #[test]
    fn parallel_matches_sequential() {
        use rayon::prelude::*;

        let scene = soup_builder().build::<QuadNode>().unwrap().scene;
        let rays = random_rays(1000, None);
        let sequential: Vec<Option<Intersection>> = rays.iter().map(|ray| scene.closest_hit(ray)).collect();
        let parallel: Vec<Option<Intersection>> = rays.par_iter().map(|ray| scene.closest_hit(ray)).collect();
        assert_eq!(sequential, parallel);
    }
}

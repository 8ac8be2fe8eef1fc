//! Fixture builder for tests and benches: a plain longest-axis midpoint
//! split, collapsed into 2 or 4 wide nodes. It is not a production builder.
//! Every fixture carries a brute-force reference the traversal results can be
//! compared against.

use glam::{Affine3A, Vec3A};

use crate::{
    intersect_primitive, ray_to_object_space, visibility, Axis, BvhFeatures, BvhNode, ChildSlot,
    Curve, Intersection, LeafNode, MotionCurve, MotionTransform, MotionTriangle, NodeAddress,
    Object, PrimitiveRef, PrimitiveType, Primitives, Ray, Scene, SceneError, Triangle, AABB,
    OBJECT_NONE, PRIM_NONE,
};

/// Most primitives a fixture leaf holds
pub const MAX_LEAF_SIZE: usize = 4;

/// Shutter samples used to bound a motion instance
const MOTION_BOUND_SAMPLES: usize = 32;

/// Primitives of one type added in one call
#[derive(Debug, Clone)]
pub enum Geometry {
    Triangles(Vec<Triangle>),
    MotionTriangles(Vec<MotionTriangle>),
    Curves(Vec<Curve>),
    MotionCurves(Vec<MotionCurve>),
}

impl Geometry {
    pub fn prim_type(&self) -> PrimitiveType {
        match self {
            Geometry::Triangles(_) => PrimitiveType::Triangle,
            Geometry::MotionTriangles(_) => PrimitiveType::MotionTriangle,
            Geometry::Curves(_) => PrimitiveType::Curve,
            Geometry::MotionCurves(_) => PrimitiveType::MotionCurve,
        }
    }
}

/// Geometry that can be instanced any number of times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrototypeId(usize);

#[derive(Debug, Clone, Copy)]
enum ItemKind {
    Primitive {
        prim_type: PrimitiveType,
        prim: u32,
        object: u32,
    },
    Instance {
        object: u32,
        prototype: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct BuildItem {
    bounds: AABB,
    centroid: Vec3A,
    kind: ItemKind,
    visibility: u32,
}

impl BuildItem {
    /// Items sharing a key may share a leaf
    #[inline]
    fn leaf_key(&self) -> u32 {
        match self.kind {
            ItemKind::Primitive { prim_type, .. } => prim_type.to_raw(),
            ItemKind::Instance { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Prototype {
    items: Vec<BuildItem>,
    bounds: AABB,
}

#[derive(Debug, Clone, Default)]
pub struct SceneBuilder {
    primitives: Primitives,
    objects: Vec<Object>,
    top: Vec<BuildItem>,
    prototypes: Vec<Prototype>,
    features: BvhFeatures,
    forced_features: Option<BvhFeatures>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use exactly these capabilities instead of the ones the added data needs
    pub fn with_features(mut self, features: BvhFeatures) -> Self {
        self.forced_features = Some(features);
        self
    }

    /// Add world-space geometry as a new object. Returns the object id.
    pub fn add_geometry(&mut self, geometry: Geometry) -> u32 {
        self.add_geometry_with_visibility(geometry, visibility::ALL)
    }

    pub fn add_geometry_with_visibility(&mut self, geometry: Geometry, visibility: u32) -> u32 {
        let object = self.objects.len() as u32;
        self.objects
            .push(Object::static_geometry().with_visibility(visibility));
        let items = self.append_geometry(geometry, object, visibility);
        self.top.extend(items);
        object
    }

    pub fn add_triangles(&mut self, triangles: Vec<Triangle>) -> u32 {
        self.add_geometry(Geometry::Triangles(triangles))
    }

    pub fn add_curves(&mut self, curves: Vec<Curve>) -> u32 {
        self.add_geometry(Geometry::Curves(curves))
    }

    /// Add object-space geometry that only becomes visible through instances
    pub fn add_prototype(&mut self, geometry: Geometry) -> PrototypeId {
        let items = self.append_geometry(geometry, OBJECT_NONE, visibility::ALL);
        let bounds = items
            .iter()
            .fold(AABB::default(), |bounds, item| bounds.union(&item.bounds));
        self.prototypes.push(Prototype { items, bounds });
        PrototypeId(self.prototypes.len() - 1)
    }

    /// Instance a prototype with an object-to-world transform. Returns the object id.
    pub fn add_instance(&mut self, prototype: PrototypeId, transform: Affine3A) -> u32 {
        let bounds = self.prototypes[prototype.0].bounds.transformed(&transform);
        self.push_instance(prototype, Object::new(transform, NodeAddress::Sentinel), bounds)
    }

    /// Instance a prototype whose transform moves over the shutter, keys spread uniformly
    pub fn add_motion_instance(&mut self, prototype: PrototypeId, transforms: &[Affine3A]) -> u32 {
        let motion = MotionTransform::new(transforms);
        let prototype_bounds = self.prototypes[prototype.0].bounds;
        let mut bounds = AABB::default();
        for i in 0..=MOTION_BOUND_SAMPLES {
            let time = i as f32 / MOTION_BOUND_SAMPLES as f32;
            bounds.grow_aabb(&prototype_bounds.transformed(&motion.at_time(time)));
        }
        // rotation between samples can bulge past the sampled boxes
        let bounds = bounds.expand(bounds.extent().max_element() * 0.01);

        let transform = transforms.first().copied().unwrap_or(Affine3A::IDENTITY);
        let object = Object::new(transform, NodeAddress::Sentinel).with_motion(motion);
        self.features |= BvhFeatures::MOTION;
        self.push_instance(prototype, object, bounds)
    }

    fn push_instance(&mut self, prototype: PrototypeId, object: Object, bounds: AABB) -> u32 {
        let id = self.objects.len() as u32;
        let visibility = object.visibility;
        self.objects.push(object);
        self.top.push(BuildItem {
            bounds,
            centroid: bounds.center(),
            kind: ItemKind::Instance {
                object: id,
                prototype: prototype.0,
            },
            visibility,
        });
        self.features |= BvhFeatures::INSTANCING;
        id
    }

    fn append_geometry(&mut self, geometry: Geometry, object: u32, visibility: u32) -> Vec<BuildItem> {
        let prim_type = geometry.prim_type();
        self.features |= prim_type.required_features();
        let base = self.primitives.count(prim_type) as u32;
        let bounds: Vec<AABB> = match geometry {
            Geometry::Triangles(triangles) => {
                let bounds = triangles.iter().map(Triangle::bounds).collect();
                self.primitives.triangles.extend(triangles);
                bounds
            }
            Geometry::MotionTriangles(triangles) => {
                let bounds = triangles.iter().map(MotionTriangle::bounds).collect();
                self.primitives.motion_triangles.extend(triangles);
                bounds
            }
            Geometry::Curves(curves) => {
                let bounds = curves.iter().map(Curve::bounds).collect();
                self.primitives.curves.extend(curves);
                bounds
            }
            Geometry::MotionCurves(curves) => {
                let bounds = curves.iter().map(MotionCurve::bounds).collect();
                self.primitives.motion_curves.extend(curves);
                bounds
            }
        };
        bounds
            .into_iter()
            .enumerate()
            .map(|(i, bounds)| BuildItem {
                bounds,
                centroid: bounds.center(),
                kind: ItemKind::Primitive {
                    prim_type,
                    prim: base + i as u32,
                    object,
                },
                visibility,
            })
            .collect()
    }

    /// Build and validate a scene with node layout `N`
    pub fn build<N: BvhNode>(&self) -> Result<Fixture<N>, SceneError> {
        let mut packer = Packer::<N>::default();

        let roots: Vec<NodeAddress> = self
            .prototypes
            .iter()
            .map(|prototype| packer.pack_tree(prototype.items.clone()))
            .collect();

        let mut objects = self.objects.clone();
        for item in &self.top {
            if let ItemKind::Instance { object, prototype } = item.kind {
                objects[object as usize].root = roots[prototype];
            }
        }

        let root = packer.pack_tree(self.top.clone());

        let primitives = Primitives {
            prim_index: packer.prim_index,
            prim_object: packer.prim_object,
            prim_visibility: packer.prim_visibility,
            ..self.primitives.clone()
        };
        let features = self.forced_features.unwrap_or(self.features);
        let scene = Scene::new(packer.nodes, packer.leaves, root, primitives, objects, features)?;

        Ok(Fixture {
            scene,
            top: self.top.clone(),
            prototypes: self
                .prototypes
                .iter()
                .map(|prototype| prototype.items.clone())
                .collect(),
        })
    }
}

/// Built scene plus what is needed to intersect it without a BVH
#[derive(Debug, Clone)]
pub struct Fixture<N: BvhNode> {
    pub scene: Scene<N>,
    top: Vec<BuildItem>,
    prototypes: Vec<Vec<BuildItem>>,
}

impl<N: BvhNode> Fixture<N> {
    /// Every hit along `ray`, by testing every primitive of every instance
    pub fn brute_force_all(&self, ray: &Ray) -> Vec<Intersection> {
        let features = self.scene.features();
        let mut hits = Vec::new();
        for item in &self.top {
            if item.visibility & ray.visibility == 0 {
                continue;
            }
            match item.kind {
                ItemKind::Primitive { .. } => hits.extend(self.test_item(item, ray, None)),
                ItemKind::Instance { object, prototype } => {
                    if !features.contains(BvhFeatures::INSTANCING) {
                        continue;
                    }
                    let entry = &self.scene.objects()[object as usize];
                    let inverse = entry.inverse_at(ray.time, features.contains(BvhFeatures::MOTION));
                    let Some((local, scale)) = ray_to_object_space(ray, &inverse) else {
                        continue;
                    };
                    for inner in &self.prototypes[prototype] {
                        if let Some(mut hit) = self.test_item(inner, &local, Some(object)) {
                            hit.t /= scale;
                            hits.push(hit);
                        }
                    }
                }
            }
        }
        hits
    }

    pub fn brute_force_closest(&self, ray: &Ray) -> Option<Intersection> {
        self.brute_force_all(ray)
            .into_iter()
            .min_by(|a, b| a.t.total_cmp(&b.t))
    }

    fn test_item(&self, item: &BuildItem, ray: &Ray, instance: Option<u32>) -> Option<Intersection> {
        let ItemKind::Primitive {
            prim_type,
            prim,
            object,
        } = item.kind
        else {
            return None;
        };
        let object = instance.unwrap_or(object);
        if item.visibility & ray.visibility == 0
            || !self.scene.features().contains(prim_type.required_features())
            || ray.skips(object, prim, prim_type)
        {
            return None;
        }
        let hit = intersect_primitive(self.scene.primitives(), prim_type, prim, ray)?;
        Some(Intersection::new(
            hit,
            PrimitiveRef {
                object,
                prim,
                prim_type,
            },
        ))
    }
}

#[derive(Debug, Clone)]
enum BuildNodeKind {
    Leaf { first: usize, count: usize },
    Internal { left: usize, right: usize },
}

#[derive(Debug, Clone)]
struct BuildNode {
    bounds: AABB,
    visibility: u32,
    kind: BuildNodeKind,
}

/// Packed output shared by the top-level tree and every prototype tree
#[derive(Debug)]
struct Packer<N> {
    nodes: Vec<N>,
    leaves: Vec<LeafNode>,
    prim_index: Vec<u32>,
    prim_object: Vec<u32>,
    prim_visibility: Vec<u32>,
}

impl<N> Default for Packer<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            leaves: Vec::new(),
            prim_index: Vec::new(),
            prim_object: Vec::new(),
            prim_visibility: Vec::new(),
        }
    }
}

impl<N: BvhNode> Packer<N> {
    fn pack_tree(&mut self, mut items: Vec<BuildItem>) -> NodeAddress {
        if items.is_empty() {
            return NodeAddress::Sentinel;
        }
        let mut arena = Vec::with_capacity(2 * items.len());
        let root = subdivide(&mut arena, &mut items, 0);
        self.pack_node(&arena, &items, root)
    }

    fn pack_node(&mut self, arena: &[BuildNode], items: &[BuildItem], index: usize) -> NodeAddress {
        let node = &arena[index];
        if let BuildNodeKind::Leaf { first, count } = node.kind {
            return self.pack_leaf(&items[first..first + count], node.visibility);
        }

        let address = self.nodes.len() as u32;
        self.nodes.push(N::zeroed());
        let mut slots = Vec::with_capacity(N::WIDTH);
        for child in collapse(arena, index, N::WIDTH) {
            slots.push(ChildSlot {
                bounds: arena[child].bounds,
                address: self.pack_node(arena, items, child),
                visibility: arena[child].visibility,
            });
        }
        self.nodes[address as usize] = N::from_children(&slots);
        NodeAddress::Internal(address)
    }

    fn pack_leaf(&mut self, items: &[BuildItem], visibility: u32) -> NodeAddress {
        let leaf = match items[0].kind {
            ItemKind::Instance { object, .. } => {
                let slot = self.prim_index.len() as u32;
                self.push_slot(PRIM_NONE, object, visibility);
                LeafNode::instance(slot, visibility)
            }
            ItemKind::Primitive { prim_type, .. } => {
                let first = self.prim_index.len() as u32;
                for item in items {
                    if let ItemKind::Primitive { prim, object, .. } = item.kind {
                        self.push_slot(prim, object, item.visibility);
                    }
                }
                LeafNode::primitives(prim_type, first, self.prim_index.len() as u32, visibility)
            }
        };
        self.leaves.push(leaf);
        NodeAddress::Leaf(self.leaves.len() as u32 - 1)
    }

    fn push_slot(&mut self, prim: u32, object: u32, visibility: u32) {
        self.prim_index.push(prim);
        self.prim_object.push(object);
        self.prim_visibility.push(visibility);
    }
}

/// Leaves hold one primitive type, and at most one instance
fn is_leaf(items: &[BuildItem]) -> bool {
    let key = items[0].leaf_key();
    items.len() == 1
        || (items.len() <= MAX_LEAF_SIZE
            && key != 0
            && items.iter().all(|item| item.leaf_key() == key))
}

fn subdivide(arena: &mut Vec<BuildNode>, items: &mut [BuildItem], first: usize) -> usize {
    let bounds = items
        .iter()
        .fold(AABB::default(), |bounds, item| bounds.union(&item.bounds));
    let visibility = items.iter().fold(0, |mask, item| mask | item.visibility);

    let kind = if is_leaf(items) {
        BuildNodeKind::Leaf {
            first,
            count: items.len(),
        }
    } else {
        let split = split_items(items);
        let (left_items, right_items) = items.split_at_mut(split);
        let left = subdivide(arena, left_items, first);
        let right = subdivide(arena, right_items, first + split);
        BuildNodeKind::Internal { left, right }
    };
    arena.push(BuildNode {
        bounds,
        visibility,
        kind,
    });
    arena.len() - 1
}

/// Reorder `items` and return a split point strictly inside the slice
fn split_items(items: &mut [BuildItem]) -> usize {
    if items.len() <= MAX_LEAF_SIZE {
        // small enough for one leaf but mixed: group by leaf key
        items.sort_by_key(BuildItem::leaf_key);
        let key = items[0].leaf_key();
        return items
            .iter()
            .position(|item| item.leaf_key() != key)
            .unwrap_or(items.len() / 2);
    }

    let centroids = items.iter().fold(AABB::default(), |mut bounds, item| {
        bounds.grow(item.centroid);
        bounds
    });
    let extent = centroids.extent();
    let axis = Axis::longest(extent);
    let split_pos = centroids.min[axis] + extent[axis] * 0.5;

    // Quick partition
    let mut i = 0;
    let mut j = items.len();
    while i < j {
        if items[i].centroid[axis] < split_pos {
            i += 1;
        } else {
            j -= 1;
            items.swap(i, j);
        }
    }

    // One side is empty, fall back to the median
    if i == 0 || i == items.len() {
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
        return mid;
    }
    i
}

/// Lanes of a `width`-wide node: open the largest internal child until the node is full
fn collapse(arena: &[BuildNode], index: usize, width: usize) -> Vec<usize> {
    let mut lanes = match arena[index].kind {
        BuildNodeKind::Internal { left, right } => vec![left, right],
        BuildNodeKind::Leaf { .. } => vec![index],
    };
    while lanes.len() < width {
        let widest = lanes
            .iter()
            .enumerate()
            .filter(|(_, &child)| matches!(arena[child].kind, BuildNodeKind::Internal { .. }))
            .max_by(|(_, &a), (_, &b)| arena[a].bounds.area().total_cmp(&arena[b].bounds.area()))
            .map(|(lane, _)| lane);
        let Some(lane) = widest else {
            break;
        };
        if let BuildNodeKind::Internal { left, right } = arena[lanes[lane]].kind {
            lanes[lane] = left;
            lanes.insert(lane + 1, right);
        }
    }
    lanes
}

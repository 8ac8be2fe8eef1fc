use std::collections::HashMap;

use glam::Affine3A;

use log::{debug, warn};

use crate::{
    leaves_from_bytes, nodes_from_bytes, visibility, BvhFeatures, BvhNode, Curve, LeafKind,
    LeafNode, MotionCurve, MotionTransform, MotionTriangle, NodeAddress, PrimitiveType, QuadNode,
    SceneError, Triangle, BVH_STACK_SIZE, OBJECT_NONE,
};

/// Primitive slots referenced by leaves, and the per-type primitive arrays
/// the slots index into
#[derive(Debug, Clone, Default)]
pub struct Primitives {
    /// Index into the per-type array of the leaf's type
    pub prim_index: Vec<u32>,
    /// Owning object of each slot. For instance leaves, the instanced object.
    pub prim_object: Vec<u32>,
    /// Per-slot visibility. Empty means every slot is fully visible.
    pub prim_visibility: Vec<u32>,
    pub triangles: Vec<Triangle>,
    pub motion_triangles: Vec<MotionTriangle>,
    pub curves: Vec<Curve>,
    pub motion_curves: Vec<MotionCurve>,
}

impl Primitives {
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.prim_index.len()
    }

    #[inline]
    pub fn slot_visibility(&self, slot: usize) -> u32 {
        self.prim_visibility
            .get(slot)
            .copied()
            .unwrap_or(visibility::ALL)
    }

    /// Number of primitives of one type
    pub fn count(&self, prim_type: PrimitiveType) -> usize {
        match prim_type {
            PrimitiveType::Triangle => self.triangles.len(),
            PrimitiveType::MotionTriangle => self.motion_triangles.len(),
            PrimitiveType::Curve => self.curves.len(),
            PrimitiveType::MotionCurve => self.motion_curves.len(),
        }
    }
}

/// Scene object: world transform, optional motion, and the root of its own
/// BVH when it is instanced
#[derive(Debug, Clone)]
pub struct Object {
    /// Object to world
    pub transform: Affine3A,
    /// World to object
    pub inverse: Affine3A,
    pub motion: Option<MotionTransform>,
    pub root: NodeAddress,
    pub visibility: u32,
}

impl Object {
    pub fn new(transform: Affine3A, root: NodeAddress) -> Self {
        Self {
            transform,
            inverse: transform.inverse(),
            motion: None,
            root,
            visibility: visibility::ALL,
        }
    }

    /// Object whose geometry lives directly in the top-level BVH
    pub fn static_geometry() -> Self {
        Self::new(Affine3A::IDENTITY, NodeAddress::Sentinel)
    }

    pub fn with_motion(mut self, motion: MotionTransform) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_visibility(mut self, visibility: u32) -> Self {
        self.visibility = visibility;
        self
    }

    /// World-to-object transform at `time`. The static inverse is used when
    /// motion is disabled or the object does not move.
    #[inline]
    pub fn inverse_at(&self, time: f32, motion_enabled: bool) -> Affine3A {
        match &self.motion {
            Some(motion) if motion_enabled => motion.inverse_at(time),
            _ => self.inverse,
        }
    }
}

/// Immutable, validated scene shared by every traversal. Node layout is
/// chosen at compile time, capabilities at runtime.
#[derive(Debug, Clone)]
pub struct Scene<N: BvhNode = QuadNode> {
    nodes: Vec<N>,
    leaves: Vec<LeafNode>,
    root: NodeAddress,
    primitives: Primitives,
    objects: Vec<Object>,
    features: BvhFeatures,
    top_depth: usize,
    object_depth: usize,
    stack_requirement: usize,
}

impl<N: BvhNode> Scene<N> {
    /// Validate and wrap prebuilt BVH data. Everything traversal would
    /// otherwise have to check per ray is checked here once.
    pub fn new(
        nodes: Vec<N>,
        leaves: Vec<LeafNode>,
        root: NodeAddress,
        primitives: Primitives,
        objects: Vec<Object>,
        features: BvhFeatures,
    ) -> Result<Self, SceneError> {
        let mut scene = Self {
            nodes,
            leaves,
            root,
            primitives,
            objects,
            features,
            top_depth: 0,
            object_depth: 0,
            stack_requirement: 0,
        };
        scene.validate()?;

        debug!(
            "scene: {} {} nodes, {} leaves, {} slots, {} objects, depth {}+{}, stack {}/{}",
            scene.nodes.len(),
            N::LAYOUT,
            scene.leaves.len(),
            scene.primitives.slot_count(),
            scene.objects.len(),
            scene.top_depth,
            scene.object_depth,
            scene.stack_requirement,
            BVH_STACK_SIZE
        );

        Ok(scene)
    }

    /// Same as `new`, with nodes and leaves given as raw packed bytes
    pub fn from_bytes(
        node_bytes: &[u8],
        leaf_bytes: &[u8],
        root: NodeAddress,
        primitives: Primitives,
        objects: Vec<Object>,
        features: BvhFeatures,
    ) -> Result<Self, SceneError> {
        let nodes = nodes_from_bytes::<N>(node_bytes)?;
        let leaves = leaves_from_bytes(leaf_bytes)?;
        Self::new(nodes, leaves, root, primitives, objects, features)
    }

    #[inline]
    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    #[inline]
    pub fn leaves(&self) -> &[LeafNode] {
        &self.leaves
    }

    #[inline]
    pub fn root(&self) -> NodeAddress {
        self.root
    }

    #[inline]
    pub fn primitives(&self) -> &Primitives {
        &self.primitives
    }

    #[inline]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    #[inline]
    pub fn features(&self) -> BvhFeatures {
        self.features
    }

    /// Worst-case number of stack entries a traversal of this scene uses
    #[inline]
    pub fn stack_requirement(&self) -> usize {
        self.stack_requirement
    }

    fn validate(&mut self) -> Result<(), SceneError> {
        let slots = self.primitives.slot_count();
        if self.primitives.prim_object.len() != slots {
            return Err(SceneError::PrimitiveArrayMismatch {
                array: "prim_object",
                len: self.primitives.prim_object.len(),
                expected: slots,
            });
        }
        if !self.primitives.prim_visibility.is_empty() && self.primitives.prim_visibility.len() != slots {
            return Err(SceneError::PrimitiveArrayMismatch {
                array: "prim_visibility",
                len: self.primitives.prim_visibility.len(),
                expected: slots,
            });
        }

        self.validate_objects()?;
        self.validate_motion_primitives()?;
        self.warn_unused_capabilities();

        let top = self.walk(self.root, false)?;
        self.top_depth = top.depth;

        // instanced BVHs are walked once per root, however often they are instanced
        let mut object_depths: HashMap<NodeAddress, usize> = HashMap::new();
        for &object in &top.instanced {
            let root = self.objects[object as usize].root;
            if root.is_sentinel() {
                return Err(SceneError::MissingObjectRoot { object });
            }
            if object_depths.contains_key(&root) {
                continue;
            }
            let walk = self.walk(root, true)?;
            object_depths.insert(root, walk.depth);
        }
        self.object_depth = object_depths.values().copied().max().unwrap_or(0);

        let lanes = N::WIDTH - 1;
        self.stack_requirement = 1 + lanes * self.top_depth;
        if !top.instanced.is_empty() {
            self.stack_requirement += 1 + lanes * self.object_depth;
        }
        if self.stack_requirement > BVH_STACK_SIZE {
            return Err(SceneError::StackTooShallow {
                required: self.stack_requirement,
                capacity: BVH_STACK_SIZE,
            });
        }
        Ok(())
    }

    fn validate_objects(&self) -> Result<(), SceneError> {
        for (object, entry) in self.objects.iter().enumerate() {
            let object = object as u32;
            if !is_invertible(&entry.transform) {
                return Err(SceneError::SingularTransform { object });
            }
            if let Some(motion) = &entry.motion {
                if motion.keys.is_empty() {
                    return Err(SceneError::EmptyMotion { object });
                }
                if motion
                    .keys
                    .iter()
                    .any(|key| !is_invertible(&key.to_affine()))
                {
                    return Err(SceneError::SingularTransform { object });
                }
            }
        }
        Ok(())
    }

    fn validate_motion_primitives(&self) -> Result<(), SceneError> {
        let empty_triangle = self
            .primitives
            .motion_triangles
            .iter()
            .position(|tri| tri.keys.is_empty())
            .map(|prim| (PrimitiveType::MotionTriangle, prim));
        let empty_curve = self
            .primitives
            .motion_curves
            .iter()
            .position(|curve| curve.keys.is_empty())
            .map(|prim| (PrimitiveType::MotionCurve, prim));
        match empty_triangle.or(empty_curve) {
            Some((prim_type, prim)) => Err(SceneError::EmptyMotionPrimitive {
                prim_type,
                prim: prim as u32,
            }),
            None => Ok(()),
        }
    }

    fn warn_unused_capabilities(&self) {
        if !self.features.contains(BvhFeatures::MOTION) {
            let moving = self.objects.iter().filter(|o| o.motion.is_some()).count();
            if moving > 0 {
                warn!("{moving} objects have motion transforms but motion is disabled, using their static transforms");
            }
            let motion_prims = self.primitives.motion_triangles.len() + self.primitives.motion_curves.len();
            if motion_prims > 0 {
                warn!("{motion_prims} motion primitives present but motion is disabled");
            }
        }
        if !self.features.contains(BvhFeatures::HAIR) {
            let curves = self.primitives.curves.len() + self.primitives.motion_curves.len();
            if curves > 0 {
                warn!("{curves} curves present but hair is disabled");
            }
        }
    }

    /// Check everything reachable from `root` and measure its depth in
    /// internal nodes
    fn walk(&self, root: NodeAddress, in_instance: bool) -> Result<Walk, SceneError> {
        let mut walk = Walk::default();
        if root.is_sentinel() {
            if in_instance {
                return Err(SceneError::InvalidRoot(root.to_raw()));
            }
            return Ok(walk);
        }

        let mut visited = 0_usize;
        let mut pending = vec![(root, 0_usize)];
        while let Some((address, depth)) = pending.pop() {
            match address {
                NodeAddress::Sentinel => {}
                NodeAddress::Internal(node) => {
                    let Some(entry) = self.nodes.get(node as usize) else {
                        return Err(SceneError::NodeOutOfRange {
                            node,
                            count: self.nodes.len(),
                        });
                    };
                    visited += 1;
                    if visited > self.nodes.len() {
                        return Err(SceneError::Cycle { node });
                    }
                    walk.depth = walk.depth.max(depth + 1);
                    for lane in 0..N::WIDTH {
                        let child = entry.child(lane);
                        if child.is_sentinel() {
                            if entry.child_visibility(lane) != 0 {
                                return Err(SceneError::SentinelLaneVisible { node, lane });
                            }
                            continue;
                        }
                        pending.push((child, depth + 1));
                    }
                }
                NodeAddress::Leaf(leaf) => {
                    let Some(entry) = self.leaves.get(leaf as usize) else {
                        return Err(SceneError::LeafOutOfRange {
                            leaf,
                            count: self.leaves.len(),
                        });
                    };
                    self.check_leaf(leaf, entry, in_instance, &mut walk)?;
                }
            }
        }
        Ok(walk)
    }

    fn check_leaf(
        &self,
        leaf: u32,
        entry: &LeafNode,
        in_instance: bool,
        walk: &mut Walk,
    ) -> Result<(), SceneError> {
        let slots = self.primitives.slot_count();
        match entry.kind() {
            LeafKind::Instance { slot } => {
                if in_instance {
                    return Err(SceneError::NestedInstance { leaf });
                }
                if !self.features.contains(BvhFeatures::INSTANCING) {
                    return Err(SceneError::InstancingDisabled { leaf });
                }
                if slot as usize >= slots {
                    return Err(SceneError::PrimitiveRangeOutOfBounds {
                        leaf,
                        first: slot,
                        last: slot + 1,
                        count: slots,
                    });
                }
                let object = self.primitives.prim_object[slot as usize];
                if object as usize >= self.objects.len() {
                    return Err(SceneError::ObjectOutOfRange {
                        slot,
                        object,
                        count: self.objects.len(),
                    });
                }
                walk.instanced.push(object);
            }
            LeafKind::Primitives {
                first,
                last,
                prim_type,
            } => {
                let Some(prim_type) = prim_type else {
                    return Err(SceneError::UnknownPrimitiveType {
                        leaf,
                        raw: entry.prim_type,
                    });
                };
                let required = prim_type.required_features();
                if !self.features.contains(required) {
                    return Err(SceneError::UnsupportedPrimitive {
                        leaf,
                        prim_type,
                        missing: BvhFeatures::from_bits_truncate(
                            required.bits() & !self.features.bits(),
                        ),
                    });
                }
                if entry.prim_last < entry.prim_first || last as usize > slots {
                    return Err(SceneError::PrimitiveRangeOutOfBounds {
                        leaf,
                        first,
                        last: entry.prim_last as u32,
                        count: slots,
                    });
                }
                let count = self.primitives.count(prim_type);
                for slot in first..last {
                    let prim = self.primitives.prim_index[slot as usize];
                    if prim as usize >= count {
                        return Err(SceneError::PrimitiveIndexOutOfRange {
                            slot,
                            prim_type,
                            prim,
                            count,
                        });
                    }
                    let object = self.primitives.prim_object[slot as usize];
                    if object != OBJECT_NONE && object as usize >= self.objects.len() {
                        return Err(SceneError::ObjectOutOfRange {
                            slot,
                            object,
                            count: self.objects.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Walk {
    /// Internal nodes on the longest root-to-leaf path
    depth: usize,
    instanced: Vec<u32>,
}

#[inline]
fn is_invertible(transform: &Affine3A) -> bool {
    let det = transform.matrix3.determinant();
    transform.is_finite() && det.is_finite() && det.abs() > f32::EPSILON * f32::EPSILON
}

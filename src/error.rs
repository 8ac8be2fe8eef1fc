//! Errors reported while validating a scene.

use thiserror::Error;

use crate::{BvhFeatures, PrimitiveType};

/// Problems found by `Scene::new`. Traversal itself never fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    /// Root address points at nothing usable.
    #[error("root address {0:#x} is not a node or leaf")]
    InvalidRoot(i32),

    /// Instanced object has no BVH of its own.
    #[error("object {object} is instanced but has no root")]
    MissingObjectRoot { object: u32 },

    #[error("internal node {node} out of range ({count} nodes)")]
    NodeOutOfRange { node: u32, count: usize },

    #[error("leaf {leaf} out of range ({count} leaves)")]
    LeafOutOfRange { leaf: u32, count: usize },

    /// Child lane without a child that can still be entered.
    #[error("empty lane {lane} of node {node} has a visibility mask")]
    SentinelLaneVisible { node: u32, lane: usize },

    /// Tree reaches a node it already visited, or is deeper than it has nodes.
    #[error("node {node} is reachable along a cycle")]
    Cycle { node: u32 },

    #[error("leaf {leaf} covers slots {first}..{last}, only {count} slots exist")]
    PrimitiveRangeOutOfBounds {
        leaf: u32,
        first: u32,
        last: u32,
        count: usize,
    },

    #[error("slot {slot} references {prim_type:?} {prim}, only {count} exist")]
    PrimitiveIndexOutOfRange {
        slot: u32,
        prim_type: PrimitiveType,
        prim: u32,
        count: usize,
    },

    #[error("slot {slot} references object {object}, only {count} objects exist")]
    ObjectOutOfRange { slot: u32, object: u32, count: usize },

    #[error("leaf {leaf} has unknown primitive type tag {raw:#x}")]
    UnknownPrimitiveType { leaf: u32, raw: u32 },

    /// Primitive type present in the tree but its capability is disabled.
    #[error("leaf {leaf} holds {prim_type:?} primitives, which need {missing:?}")]
    UnsupportedPrimitive {
        leaf: u32,
        prim_type: PrimitiveType,
        missing: BvhFeatures,
    },

    #[error("instance leaf {leaf} is inside an instanced BVH")]
    NestedInstance { leaf: u32 },

    #[error("instance leaf {leaf} found but instancing is disabled")]
    InstancingDisabled { leaf: u32 },

    #[error("object {object} has a singular or non-finite transform")]
    SingularTransform { object: u32 },

    #[error("object {object} has a motion transform without keys")]
    EmptyMotion { object: u32 },

    #[error("{prim_type:?} {prim} has no motion keys")]
    EmptyMotionPrimitive { prim_type: PrimitiveType, prim: u32 },

    /// Worst-case stack use of the tree does not fit the traversal stack.
    #[error("traversal needs {required} stack entries, capacity is {capacity}")]
    StackTooShallow { required: usize, capacity: usize },

    #[error("{array} has {len} entries, prim_index has {expected}")]
    PrimitiveArrayMismatch {
        array: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("raw {layout} bytes cannot be viewed as records: {reason}")]
    NodeBytes { layout: &'static str, reason: String },
}

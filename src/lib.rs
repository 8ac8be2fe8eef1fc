pub mod axis;
pub use axis::*;

pub mod aabb;
pub use aabb::*;

pub mod features;
pub use features::*;

pub mod intersection;
pub use intersection::*;

pub mod ray;
pub use ray::*;

pub mod triangle;
pub use triangle::*;

pub mod motion;
pub use motion::*;

pub mod curve;
pub use curve::*;

pub mod intersections;
pub use intersections::*;

pub mod node_intersect;
pub use node_intersect::*;

pub mod stack;
pub use stack::*;

pub mod bvh;
pub use bvh::*;

pub mod bvh_implementations;
pub use bvh_implementations::*;

pub mod error;
pub use error::*;

pub mod stats;
pub use stats::*;

pub mod instance;
pub use instance::*;

pub mod scene;
pub use scene::*;

pub mod traverse;
pub use traverse::*;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
#[cfg(any(test, feature = "test-util"))]
pub use test_util::*;

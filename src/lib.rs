//! Parallel Barnes-Hut tree code.
//!
//! A `2^D`-tree (octree for D = 3, quadtree for D = 2) built over point
//! masses through a Morton-code spatial index. The tree owns its particles
//! in Morton order and computes approximate gravitational accelerations and
//! potentials through a multipole acceptance criterion, falling back to
//! direct summation inside leaves. Construction, sorting and the tree walk
//! all run on the ambient rayon thread pool.
//!
//! ```no_run
//! use treecode::{Octree, TreeConfig, WalkOpts};
//!
//! let xs = vec![-10.0, 1.0, 2.0, 10.0];
//! let ys = xs.clone();
//! let zs = xs.clone();
//! let ms = vec![1.0; 4];
//!
//! let tree = Octree::new([&xs, &ys, &zs], &ms, TreeConfig::default()).unwrap();
//! let mut accs = Vec::new();
//! tree.accs_u(&mut accs, WalkOpts::new(0.75)).unwrap();
//! ```

use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{AddAssign, SubAssign};

use num_traits::{Float, FromPrimitive};

pub mod collision;
pub mod config;
pub mod error;
pub mod gravity;
pub mod morton;
pub mod particle;
pub mod sample;
pub mod tree;

pub use collision::{coll_get_aabb_vertices, coll_leaves_permutation};
pub use config::{MacKind, Split, TreeConfig, WalkOpts, DEFAULT_MAX_LEAF_N, DEFAULT_NCRIT};
pub use error::{ErrorKind, TreeError};
pub use morton::node_compare;
pub use tree::{Node, Tree};

/// Finite-precision IEEE-754 scalar the tree is generic over.
///
/// Implemented by `f32` and `f64`; the blanket impl picks up anything with
/// the same arithmetic surface.
pub trait Scalar:
    Float
    + FromPrimitive
    + AddAssign
    + SubAssign
    + Sum
    + Send
    + Sync
    + Display
    + Debug
    + Default
    + 'static
{
}

impl<T> Scalar for T where
    T: Float
        + FromPrimitive
        + AddAssign
        + SubAssign
        + Sum
        + Send
        + Sync
        + Display
        + Debug
        + Default
        + 'static
{
}

/// Three-dimensional tree.
pub type Octree<F> = Tree<3, F>;

/// Two-dimensional tree.
pub type Quadtree<F> = Tree<2, F>;

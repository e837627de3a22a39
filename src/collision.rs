use rayon::prelude::*;

use crate::morton::node_cmp;
use crate::tree::Node;
use crate::Scalar;

/// Indices of the leaf nodes, sorted along the Morton curve for broad-phase
/// queries.
pub fn coll_leaves_permutation<const D: usize, F: Scalar>(nodes: &[Node<D, F>]) -> Vec<usize> {
    let mut leaves: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_leaf())
        .map(|(i, _)| i)
        .collect();
    leaves.par_sort_by(|&a, &b| node_cmp::<D>(nodes[a].code, nodes[b].code));
    leaves
}

/// The `2^D` vertices of the axis-aligned box of edge lengths `aabb_sizes`
/// around `pos`, each coordinate clamped into `[lo, hi]`.
pub fn coll_get_aabb_vertices<const D: usize, F: Scalar>(
    pos: &[F; D],
    aabb_sizes: &[F; D],
    lo: F,
    hi: F,
) -> Vec<[F; D]> {
    let half = F::from(0.5).unwrap();
    (0..1usize << D)
        .map(|corner| {
            std::array::from_fn(|k| {
                let h = aabb_sizes[k] * half;
                let v = if (corner >> k) & 1 == 1 {
                    pos[k] + h
                } else {
                    pos[k] - h
                };
                v.max(lo).min(hi)
            })
        })
        .collect()
}

use rayon::prelude::*;
use tracing::debug;

use crate::config::{MacKind, TreeConfig};
use crate::error::TreeError;
use crate::morton::max_level;
use crate::particle::{apply_perm, compose_perm, invert_perm, sort_perm, ParticleSet};
use crate::Scalar;

// Ranges at or below this build serially; larger ones fan out their child
// subtrees as parallel tasks.
const PAR_BUILD_CUTOFF: usize = 8192;

/// One tree cell: a contiguous particle range plus its monopole summary.
///
/// Nodes sit in a single depth-first pre-order vector. The first child of
/// an interior node is the next node, so all offsets are relative and
/// independently built subtree segments splice without fix-ups.
#[derive(Clone, Copy, Debug)]
pub struct Node<const D: usize, F> {
    pub begin: usize,
    pub end: usize,
    /// Morton code; the position of the leading bit encodes the level.
    pub code: u64,
    pub level: u32,
    pub n_children: u32,
    pub subtree_size: usize,
    pub mass: F,
    pub com: [F; D],
    /// Geometric edge length, `box_size / 2^level`.
    pub size: F,
    pub coord_min: [F; D],
    pub coord_max: [F; D],
}

impl<const D: usize, F: Scalar> Node<D, F> {
    fn raw(begin: usize, end: usize, code: u64, level: u32) -> Self {
        Self {
            begin,
            end,
            code,
            level,
            n_children: 0,
            subtree_size: 1,
            mass: F::zero(),
            com: [F::zero(); D],
            size: F::zero(),
            coord_min: [F::zero(); D],
            coord_max: [F::zero(); D],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.n_children == 0
    }

    pub fn nparts(&self) -> usize {
        self.end - self.begin
    }

    /// Per-axis extent (max minus min) of the member coordinates.
    pub fn dispersion(&self) -> [F; D] {
        std::array::from_fn(|k| self.coord_max[k] - self.coord_min[k])
    }

    pub fn max_dispersion(&self) -> F {
        self.dispersion()
            .into_iter()
            .fold(F::zero(), |a, b| a.max(b))
    }
}

fn build_range<const D: usize, F: Scalar>(
    codes: &[u64],
    begin: usize,
    end: usize,
    code: u64,
    level: u32,
    max_leaf_n: usize,
    out: &mut Vec<Node<D, F>>,
) {
    let idx = out.len();
    out.push(Node::raw(begin, end, code, level));
    // Coincident particles bottom out at the deepest level and stay a leaf
    // whatever their count.
    if end - begin <= max_leaf_n || level == max_level(D) {
        return;
    }
    let shift = D as u32 * (max_level(D) - level - 1);
    let mut n_children = 0;
    let mut cur = begin;
    for c in 0..(1u64 << D) {
        let child_code = (code << D) | c;
        let len = codes[cur..end].partition_point(|&k| (k >> shift) == child_code);
        if len == 0 {
            continue;
        }
        n_children += 1;
        build_range(codes, cur, cur + len, child_code, level + 1, max_leaf_n, out);
        cur += len;
    }
    out[idx].n_children = n_children;
    out[idx].subtree_size = out.len() - idx;
}

fn build_range_par<const D: usize, F: Scalar>(
    codes: &[u64],
    begin: usize,
    end: usize,
    code: u64,
    level: u32,
    max_leaf_n: usize,
    out: &mut Vec<Node<D, F>>,
) {
    if end - begin <= PAR_BUILD_CUTOFF.max(max_leaf_n) || level == max_level(D) {
        build_range(codes, begin, end, code, level, max_leaf_n, out);
        return;
    }
    let idx = out.len();
    out.push(Node::raw(begin, end, code, level));
    let shift = D as u32 * (max_level(D) - level - 1);
    let mut ranges = Vec::new();
    let mut cur = begin;
    for c in 0..(1u64 << D) {
        let child_code = (code << D) | c;
        let len = codes[cur..end].partition_point(|&k| (k >> shift) == child_code);
        if len == 0 {
            continue;
        }
        ranges.push((cur, cur + len, child_code));
        cur += len;
    }
    let segments: Vec<Vec<Node<D, F>>> = ranges
        .par_iter()
        .map(|&(b, e, c)| {
            let mut seg = Vec::new();
            build_range_par(codes, b, e, c, level + 1, max_leaf_n, &mut seg);
            seg
        })
        .collect();
    for seg in segments {
        out.extend(seg);
    }
    out[idx].n_children = ranges.len() as u32;
    out[idx].subtree_size = out.len() - idx;
}

// Bottom-up summary pass: a reverse sweep over the pre-order array visits
// every child before its parent.
fn summarise<const D: usize, F: Scalar>(
    nodes: &mut [Node<D, F>],
    parts: &ParticleSet<D, F>,
    box_size: F,
) {
    let two = F::from(2.0).unwrap();
    for idx in (0..nodes.len()).rev() {
        let mut mass = F::zero();
        let mut weighted = [F::zero(); D];
        let mut lo = [F::infinity(); D];
        let mut hi = [F::neg_infinity(); D];
        if nodes[idx].is_leaf() {
            for i in nodes[idx].begin..nodes[idx].end {
                let m = parts.masses[i];
                mass += m;
                for k in 0..D {
                    let x = parts.coords[k][i];
                    weighted[k] += m * x;
                    lo[k] = lo[k].min(x);
                    hi[k] = hi[k].max(x);
                }
            }
        } else {
            let mut child = idx + 1;
            for _ in 0..nodes[idx].n_children {
                let c = &nodes[child];
                mass += c.mass;
                for k in 0..D {
                    weighted[k] += c.mass * c.com[k];
                    lo[k] = lo[k].min(c.coord_min[k]);
                    hi[k] = hi[k].max(c.coord_max[k]);
                }
                child += c.subtree_size;
            }
        }
        let node = &mut nodes[idx];
        node.mass = mass;
        node.com = if mass > F::zero() {
            std::array::from_fn(|k| weighted[k] / mass)
        } else {
            // Massless cell: fall back to the midpoint of the member bounds.
            std::array::from_fn(|k| (lo[k] + hi[k]) / two)
        };
        node.size = box_size / two.powi(node.level as i32);
        node.coord_min = lo;
        node.coord_max = hi;
    }
}

/// A Morton-ordered `2^D`-tree over point masses.
///
/// Owns copies of the particle arrays, reordered along the Morton curve;
/// `perm`/`inv_perm` translate between the internal and the input order.
#[derive(Clone, Debug)]
pub struct Tree<const D: usize, F: Scalar> {
    pub(crate) box_size: F,
    pub(crate) box_size_deduced: bool,
    pub(crate) max_leaf_n: usize,
    pub(crate) ncrit: usize,
    pub(crate) mac: MacKind,
    pub(crate) parts: ParticleSet<D, F>,
    pub(crate) perm: Vec<usize>,
    pub(crate) inv_perm: Vec<usize>,
    pub(crate) last_perm: Vec<usize>,
    pub(crate) nodes: Vec<Node<D, F>>,
}

impl<const D: usize, F: Scalar> Default for Tree<D, F> {
    fn default() -> Self {
        Self {
            box_size: F::zero(),
            box_size_deduced: false,
            max_leaf_n: crate::config::DEFAULT_MAX_LEAF_N,
            ncrit: crate::config::DEFAULT_NCRIT,
            mac: MacKind::default(),
            parts: ParticleSet::default(),
            perm: Vec::new(),
            inv_perm: Vec::new(),
            last_perm: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

impl<const D: usize, F: Scalar> Tree<D, F> {
    /// Build a tree from one coordinate slice per axis plus the masses.
    /// The inputs are copied and sorted into Morton order.
    pub fn new(coords: [&[F]; D], masses: &[F], cfg: TreeConfig<F>) -> Result<Self, TreeError> {
        cfg.validate()?;
        let mut parts = ParticleSet::from_slices(coords, masses)?;
        let n = parts.len();
        let (box_size, box_size_deduced) = match cfg.box_size {
            Some(b) => (b, false),
            None => (parts.deduce_box_size(), true),
        };
        let codes = parts.codes(box_size)?;
        let perm = sort_perm(&codes);
        let inv_perm = invert_perm(&perm);
        parts.reorder(&perm);
        let sorted_codes = apply_perm(&perm, &codes);
        let nodes = Self::build_nodes(&sorted_codes, &parts, box_size, cfg.max_leaf_n);
        debug!(
            nparts = n,
            nnodes = nodes.len(),
            box_size = %box_size,
            deduced = box_size_deduced,
            "tree constructed"
        );
        Ok(Self {
            box_size,
            box_size_deduced,
            max_leaf_n: cfg.max_leaf_n,
            ncrit: cfg.ncrit,
            mac: cfg.mac,
            parts,
            last_perm: perm.clone(),
            perm,
            inv_perm,
            nodes,
        })
    }

    fn build_nodes(
        sorted_codes: &[u64],
        parts: &ParticleSet<D, F>,
        box_size: F,
        max_leaf_n: usize,
    ) -> Vec<Node<D, F>> {
        let mut nodes = Vec::new();
        if !sorted_codes.is_empty() {
            build_range_par(sorted_codes, 0, sorted_codes.len(), 1, 0, max_leaf_n, &mut nodes);
            summarise(&mut nodes, parts, box_size);
        }
        nodes
    }

    pub fn box_size(&self) -> F {
        self.box_size
    }

    pub fn box_size_deduced(&self) -> bool {
        self.box_size_deduced
    }

    pub fn nparts(&self) -> usize {
        self.parts.len()
    }

    pub fn max_leaf_n(&self) -> usize {
        self.max_leaf_n
    }

    pub fn ncrit(&self) -> usize {
        self.ncrit
    }

    pub fn mac(&self) -> MacKind {
        self.mac
    }

    /// `perm()[i]` is the input-order index of the particle now at Morton
    /// position `i`.
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    pub fn inv_perm(&self) -> &[usize] {
        &self.inv_perm
    }

    /// Permutation applied by the most recent (re)construction, relative to
    /// the preceding state. Equal to `perm` after a fresh build.
    pub fn last_perm(&self) -> &[usize] {
        &self.last_perm
    }

    pub fn nodes(&self) -> &[Node<D, F>] {
        &self.nodes
    }

    pub fn coords_o(&self) -> [&[F]; D] {
        std::array::from_fn(|k| self.parts.coords[k].as_slice())
    }

    pub fn masses_o(&self) -> &[F] {
        &self.parts.masses
    }

    /// Rewrite positions through a closure seeing the Morton-order slices,
    /// then rebuild the index. On failure the tree is reset to the default
    /// empty state; no partially rebuilt tree is ever observable.
    pub fn update_positions_o<G>(&mut self, update: G) -> Result<(), TreeError>
    where
        G: FnOnce([&mut [F]; D]),
    {
        update(self.parts.coords.each_mut().map(|c| c.as_mut_slice()));
        self.rebuild()
    }

    /// Like [`Tree::update_positions_o`], but in the caller's input order.
    pub fn update_positions_u<G>(&mut self, update: G) -> Result<(), TreeError>
    where
        G: FnOnce([&mut [F]; D]),
    {
        let n = self.nparts();
        let mut unordered: [Vec<F>; D] = std::array::from_fn(|k| {
            let mut v = vec![F::zero(); n];
            for i in 0..n {
                v[self.perm[i]] = self.parts.coords[k][i];
            }
            v
        });
        update(unordered.each_mut().map(|c| c.as_mut_slice()));
        for k in 0..D {
            for i in 0..n {
                self.parts.coords[k][i] = unordered[k][self.perm[i]];
            }
        }
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<(), TreeError> {
        let box_size = if self.box_size_deduced {
            self.parts.deduce_box_size()
        } else {
            self.box_size
        };
        let codes = match self.parts.codes(box_size) {
            Ok(codes) => codes,
            Err(e) => {
                *self = Self::default();
                return Err(e);
            }
        };
        let step = sort_perm(&codes);
        self.parts.reorder(&step);
        let sorted_codes = apply_perm(&step, &codes);
        self.perm = compose_perm(&self.perm, &step);
        self.inv_perm = invert_perm(&self.perm);
        self.last_perm = step;
        self.box_size = box_size;
        self.nodes = Self::build_nodes(&sorted_codes, &self.parts, box_size, self.max_leaf_n);
        debug!(nnodes = self.nodes.len(), box_size = %box_size, "tree rebuilt");
        Ok(())
    }
}

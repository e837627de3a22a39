//! Tree walk: approximate accelerations and potentials.
//!
//! Targets are processed in Morton-contiguous batches, each batch being the
//! particle range of the shallowest node holding at most `ncrit` particles
//! (a leaf stops the descent regardless of its size). Every batch walks the
//! pre-order node array once: interiors far enough away under the MAC
//! contribute their monopole to each target and their subtree is skipped,
//! close interiors are descended, and leaves are direct-summed with
//! self-interactions skipped by index.
//!
//! Batches are independent and run in parallel over disjoint output slices;
//! per-target accumulation is in ascending Morton order, so a walk that
//! accepts no node reproduces the exact evaluators bit for bit.

use rayon::prelude::*;
use tracing::debug;

use crate::config::{MacKind, Split, WalkOpts};
use crate::error::TreeError;
use crate::tree::{Node, Tree};
use crate::Scalar;

/// Softened pair acceleration: `out += m * dx / (|dx|^2 + eps^2)^(3/2)`.
///
/// Shared by the walk and the exact evaluators so both produce identical
/// floating-point sequences; `eps2` enters the reduction exactly once.
#[inline(always)]
fn acc_term<const D: usize, F: Scalar>(dx: &[F; D], m: F, eps2: F, out: &mut [F; D]) {
    let mut d2 = eps2;
    for k in 0..D {
        d2 = d2 + dx[k] * dx[k];
    }
    let f = m / (d2 * d2.sqrt());
    for k in 0..D {
        out[k] += f * dx[k];
    }
}

/// Softened pair potential: `-m / sqrt(|dx|^2 + eps^2)`.
#[inline(always)]
fn pot_term<const D: usize, F: Scalar>(dx: &[F; D], m: F, eps2: F) -> F {
    let mut d2 = eps2;
    for k in 0..D {
        d2 = d2 + dx[k] * dx[k];
    }
    -(m / d2.sqrt())
}

/// Destination of per-pair contributions, indexed by batch-local target.
trait Sink<const D: usize, F: Scalar> {
    fn add(&mut self, t: usize, dx: &[F; D], m: F, eps2: F);
}

struct AccSink<'a, const D: usize, F>(&'a mut [[F; D]]);

impl<const D: usize, F: Scalar> Sink<D, F> for AccSink<'_, D, F> {
    #[inline(always)]
    fn add(&mut self, t: usize, dx: &[F; D], m: F, eps2: F) {
        acc_term(dx, m, eps2, &mut self.0[t]);
    }
}

struct PotSink<'a, F>(&'a mut [F]);

impl<const D: usize, F: Scalar> Sink<D, F> for PotSink<'_, F> {
    #[inline(always)]
    fn add(&mut self, t: usize, dx: &[F; D], m: F, eps2: F) {
        self.0[t] += pot_term(dx, m, eps2);
    }
}

struct AccPotSink<'a, const D: usize, F>(&'a mut [([F; D], F)]);

impl<const D: usize, F: Scalar> Sink<D, F> for AccPotSink<'_, D, F> {
    #[inline(always)]
    fn add(&mut self, t: usize, dx: &[F; D], m: F, eps2: F) {
        let (acc, pot) = &mut self.0[t];
        acc_term(dx, m, eps2, acc);
        *pot += pot_term(dx, m, eps2);
    }
}

#[inline]
fn mac_accepts<const D: usize, F: Scalar>(
    node: &Node<D, F>,
    centre: &[F; D],
    theta2: F,
    mac: MacKind,
) -> bool {
    let mut d2 = F::zero();
    for k in 0..D {
        let dk = node.com[k] - centre[k];
        d2 = d2 + dk * dk;
    }
    let ext = match mac {
        MacKind::Bh => node.size,
        MacKind::BhGeom => node.size + node.max_dispersion(),
    };
    ext * ext < theta2 * d2
}

impl<const D: usize, F: Scalar> Tree<D, F> {
    /// Accelerations in Morton (tree-internal) order.
    pub fn accs_o(&self, out: &mut Vec<[F; D]>, opts: WalkOpts<F>) -> Result<(), TreeError> {
        opts.validate()?;
        out.clear();
        out.resize(self.nparts(), [F::zero(); D]);
        self.walk_with(opts, out.as_mut_slice(), |b0, b1, theta2, eps2, slice| {
            self.walk_batch(b0, b1, theta2, eps2, &mut AccSink(slice));
        });
        Ok(())
    }

    /// Accelerations permuted back to the caller's input order.
    pub fn accs_u(&self, out: &mut Vec<[F; D]>, opts: WalkOpts<F>) -> Result<(), TreeError> {
        let mut ordered = Vec::new();
        self.accs_o(&mut ordered, opts)?;
        unpermute(&self.inv_perm, &ordered, out);
        Ok(())
    }

    /// Potentials in Morton (tree-internal) order.
    pub fn pots_o(&self, out: &mut Vec<F>, opts: WalkOpts<F>) -> Result<(), TreeError> {
        opts.validate()?;
        out.clear();
        out.resize(self.nparts(), F::zero());
        self.walk_with(opts, out.as_mut_slice(), |b0, b1, theta2, eps2, slice| {
            self.walk_batch(b0, b1, theta2, eps2, &mut PotSink(slice));
        });
        Ok(())
    }

    /// Potentials permuted back to the caller's input order.
    pub fn pots_u(&self, out: &mut Vec<F>, opts: WalkOpts<F>) -> Result<(), TreeError> {
        let mut ordered = Vec::new();
        self.pots_o(&mut ordered, opts)?;
        unpermute(&self.inv_perm, &ordered, out);
        Ok(())
    }

    /// Accelerations and potentials in one walk, Morton order.
    pub fn accs_pots_o(
        &self,
        accs: &mut Vec<[F; D]>,
        pots: &mut Vec<F>,
        opts: WalkOpts<F>,
    ) -> Result<(), TreeError> {
        opts.validate()?;
        let mut both = vec![([F::zero(); D], F::zero()); self.nparts()];
        self.walk_with(opts, both.as_mut_slice(), |b0, b1, theta2, eps2, slice| {
            self.walk_batch(b0, b1, theta2, eps2, &mut AccPotSink(slice));
        });
        accs.clear();
        pots.clear();
        accs.extend(both.iter().map(|&(a, _)| a));
        pots.extend(both.iter().map(|&(_, p)| p));
        Ok(())
    }

    /// Accelerations and potentials in one walk, input order.
    pub fn accs_pots_u(
        &self,
        accs: &mut Vec<[F; D]>,
        pots: &mut Vec<F>,
        opts: WalkOpts<F>,
    ) -> Result<(), TreeError> {
        let mut acc_o = Vec::new();
        let mut pot_o = Vec::new();
        self.accs_pots_o(&mut acc_o, &mut pot_o, opts)?;
        unpermute(&self.inv_perm, &acc_o, accs);
        unpermute(&self.inv_perm, &pot_o, pots);
        Ok(())
    }

    /// Exact acceleration on the particle at Morton position `i`, by direct
    /// summation over all other particles.
    pub fn exact_acc_o(&self, i: usize, eps: F) -> Result<[F; D], TreeError> {
        self.check_exact(i, eps)?;
        let eps2 = eps * eps;
        let xt: [F; D] = std::array::from_fn(|k| self.parts.coords[k][i]);
        let mut out = [F::zero(); D];
        for j in 0..self.nparts() {
            if j == i {
                continue;
            }
            let dx: [F; D] = std::array::from_fn(|k| self.parts.coords[k][j] - xt[k]);
            acc_term(&dx, self.parts.masses[j], eps2, &mut out);
        }
        Ok(out)
    }

    /// Exact acceleration on the particle at input-order position `i`.
    pub fn exact_acc_u(&self, i: usize, eps: F) -> Result<[F; D], TreeError> {
        self.check_exact(i, eps)?;
        self.exact_acc_o(self.inv_perm[i], eps)
    }

    /// Exact potential at the particle at Morton position `i`.
    pub fn exact_pot_o(&self, i: usize, eps: F) -> Result<F, TreeError> {
        self.check_exact(i, eps)?;
        let eps2 = eps * eps;
        let xt: [F; D] = std::array::from_fn(|k| self.parts.coords[k][i]);
        let mut out = F::zero();
        for j in 0..self.nparts() {
            if j == i {
                continue;
            }
            let dx: [F; D] = std::array::from_fn(|k| self.parts.coords[k][j] - xt[k]);
            out += pot_term(&dx, self.parts.masses[j], eps2);
        }
        Ok(out)
    }

    /// Exact potential at the particle at input-order position `i`.
    pub fn exact_pot_u(&self, i: usize, eps: F) -> Result<F, TreeError> {
        self.check_exact(i, eps)?;
        self.exact_pot_o(self.inv_perm[i], eps)
    }

    fn check_exact(&self, i: usize, eps: F) -> Result<(), TreeError> {
        if i >= self.nparts() {
            return Err(TreeError::IndexOutOfRange {
                index: i,
                nparts: self.nparts(),
            });
        }
        if !eps.is_finite() || eps < F::zero() {
            return Err(TreeError::InvalidSoftening {
                got: eps.to_f64().unwrap_or(f64::NAN),
            });
        }
        Ok(())
    }

    /// Morton-contiguous target batches: the particle ranges of the
    /// shallowest nodes with at most `ncrit` members. The ranges tile
    /// `[0, nparts)` in ascending order.
    fn collect_batches(&self) -> Vec<(usize, usize)> {
        let nodes = self.nodes();
        let mut batches = Vec::new();
        let mut i = 0;
        while i < nodes.len() {
            let n = &nodes[i];
            if n.is_leaf() || n.nparts() <= self.ncrit {
                batches.push((n.begin, n.end));
                i += n.subtree_size;
            } else {
                i += 1;
            }
        }
        batches
    }

    /// Raw batches, with oversized ones expanded into `ncrit`-sized chunks
    /// when `split` promotes them to independent jobs.
    fn split_batches(&self, split: Split) -> Vec<(usize, usize)> {
        let batches = self.collect_batches();
        match split {
            Split::Parallel => {
                let mut expanded = Vec::with_capacity(batches.len());
                for (b0, b1) in batches {
                    let mut pos = b0;
                    while pos < b1 {
                        let hi = (pos + self.ncrit).min(b1);
                        expanded.push((pos, hi));
                        pos = hi;
                    }
                }
                expanded
            }
            Split::None | Split::Serial => batches,
        }
    }

    /// Partition the output buffer over the batches and run them in
    /// parallel. `Split::Serial` keeps oversized batches inside one task
    /// and walks their `ncrit`-sized chunks sequentially.
    fn walk_with<T, W>(&self, opts: WalkOpts<F>, out: &mut [T], walk_one: W)
    where
        T: Send,
        W: Fn(usize, usize, F, F, &mut [T]) + Sync,
    {
        let theta2 = opts.theta * opts.theta;
        let eps2 = opts.eps * opts.eps;
        let batches = self.split_batches(opts.split);
        debug!(nbatches = batches.len(), split = ?opts.split, "tree walk");
        let chunk = match opts.split {
            Split::Serial => Some(self.ncrit),
            Split::None | Split::Parallel => None,
        };
        let jobs = partition_out(out, &batches);
        jobs.into_par_iter().for_each(|((b0, b1), slice)| match chunk {
            Some(c) if b1 - b0 > c => {
                let mut slice = slice;
                let mut pos = b0;
                while pos < b1 {
                    let hi = (pos + c).min(b1);
                    let (head, tail) = slice.split_at_mut(hi - pos);
                    walk_one(pos, hi, theta2, eps2, head);
                    slice = tail;
                    pos = hi;
                }
            }
            _ => walk_one(b0, b1, theta2, eps2, slice),
        });
    }

    /// One pre-order scan for the targets `[b0, b1)`.
    fn walk_batch<S: Sink<D, F>>(&self, b0: usize, b1: usize, theta2: F, eps2: F, sink: &mut S) {
        let nodes = self.nodes();
        let coords = &self.parts.coords;
        let masses = &self.parts.masses;
        let two = F::from(2.0).unwrap();

        // Representative point: midpoint of the batch's coordinate bounds.
        let centre: [F; D] = std::array::from_fn(|k| {
            let mut lo = F::infinity();
            let mut hi = F::neg_infinity();
            for i in b0..b1 {
                lo = lo.min(coords[k][i]);
                hi = hi.max(coords[k][i]);
            }
            (lo + hi) / two
        });

        let mut i = 0;
        while i < nodes.len() {
            let n = &nodes[i];
            if n.is_leaf() {
                for t in b0..b1 {
                    let xt: [F; D] = std::array::from_fn(|k| coords[k][t]);
                    for s in n.begin..n.end {
                        if s == t {
                            continue;
                        }
                        let dx: [F; D] = std::array::from_fn(|k| coords[k][s] - xt[k]);
                        sink.add(t - b0, &dx, masses[s], eps2);
                    }
                }
                i += 1;
            } else {
                // A node overlapping its own targets is always opened, so
                // self-interactions only ever surface inside leaves where
                // the index check above removes them.
                let disjoint = n.end <= b0 || n.begin >= b1;
                if disjoint && mac_accepts(n, &centre, theta2, self.mac) {
                    for t in b0..b1 {
                        let dx: [F; D] = std::array::from_fn(|k| n.com[k] - coords[k][t]);
                        sink.add(t - b0, &dx, n.mass, eps2);
                    }
                    i += n.subtree_size;
                } else {
                    i += 1;
                }
            }
        }
    }
}

/// Gather Morton-ordered results back to input order:
/// `out[j] = ordered[inv_perm[j]]`.
fn unpermute<T: Copy>(inv_perm: &[usize], ordered: &[T], out: &mut Vec<T>) {
    out.clear();
    out.extend(inv_perm.iter().map(|&p| ordered[p]));
}

/// Slice a contiguous output buffer into one disjoint `&mut` window per
/// batch. The batches tile the buffer in ascending order.
fn partition_out<'a, T>(
    out: &'a mut [T],
    batches: &[(usize, usize)],
) -> Vec<((usize, usize), &'a mut [T])> {
    let mut jobs = Vec::with_capacity(batches.len());
    let mut rest = out;
    for &(b0, b1) in batches {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(b1 - b0);
        jobs.push(((b0, b1), head));
        rest = tail;
    }
    jobs
}

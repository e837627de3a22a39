//! Morton-ordered particle storage.
//!
//! Coordinates and masses live in structure-of-arrays form, one vector per
//! axis plus one for the masses. After construction the tree holds them in
//! Morton order; the permutations kept by the tree map back to the caller's
//! input order.

use rayon::prelude::*;

use crate::error::TreeError;
use crate::morton::{self, coord_bits};
use crate::Scalar;

/// Owned particle arrays, one vector per axis plus masses.
#[derive(Clone, Debug)]
pub struct ParticleSet<const D: usize, F> {
    pub coords: [Vec<F>; D],
    pub masses: Vec<F>,
}

impl<const D: usize, F> Default for ParticleSet<D, F> {
    fn default() -> Self {
        Self {
            coords: std::array::from_fn(|_| Vec::new()),
            masses: Vec::new(),
        }
    }
}

impl<const D: usize, F: Scalar> ParticleSet<D, F> {
    /// Copy the caller's arrays, checking that all D+1 of them agree on the
    /// particle count.
    pub fn from_slices(coords: [&[F]; D], masses: &[F]) -> Result<Self, TreeError> {
        let expected = masses.len();
        for (axis, c) in coords.iter().enumerate() {
            if c.len() != expected {
                return Err(TreeError::MismatchedLengths {
                    axis,
                    got: c.len(),
                    expected,
                });
            }
        }
        Ok(Self {
            coords: std::array::from_fn(|k| coords[k].to_vec()),
            masses: masses.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Smallest box with a safety margin that strictly contains every
    /// particle: `2 * (1 + 0.05) * max|coord|`.
    pub fn deduce_box_size(&self) -> F {
        let max_abs = self
            .coords
            .iter()
            .map(|c| {
                c.par_iter()
                    .map(|x| x.abs())
                    .reduce(F::zero, |a, b| a.max(b))
            })
            .fold(F::zero(), |a, b| a.max(b));
        let two = F::from(2.0).unwrap();
        let margin = F::one() + F::from(0.05).unwrap();
        max_abs * two * margin
    }

    /// Morton codes for all particles, in the current array order.
    pub fn codes(&self, box_size: F) -> Result<Vec<u64>, TreeError> {
        let bits = coord_bits(D);
        (0..self.len())
            .into_par_iter()
            .map(|i| {
                let mut us = [0u64; D];
                for (axis, u) in us.iter_mut().enumerate() {
                    let x = self.coords[axis][i];
                    *u = morton::discretise(x, box_size, bits).ok_or_else(|| {
                        TreeError::CoordOutOfRange {
                            index: i,
                            axis,
                            coord: x.to_f64().unwrap_or(f64::NAN),
                            box_size: box_size.to_f64().unwrap_or(f64::NAN),
                        }
                    })?;
                }
                Ok(morton::encode(&us))
            })
            .collect()
    }

    /// Physically reorder every array by `perm`.
    pub fn reorder(&mut self, perm: &[usize]) {
        for c in self.coords.iter_mut() {
            *c = apply_perm(perm, c);
        }
        self.masses = apply_perm(perm, &self.masses);
    }
}

/// Indices sorted by Morton code. The sort is stable, so coincident
/// particles keep their input order.
pub fn sort_perm(codes: &[u64]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..codes.len()).collect();
    perm.par_sort_by_key(|&i| codes[i]);
    perm
}

/// Inverse permutation: `inv[perm[i]] = i`.
pub fn invert_perm(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Gather `data` through `perm`: `out[i] = data[perm[i]]`.
pub fn apply_perm<T: Copy + Send + Sync>(perm: &[usize], data: &[T]) -> Vec<T> {
    perm.par_iter().map(|&p| data[p]).collect()
}

/// Composition `out[i] = first[step[i]]`, the permutation mapping the state
/// before `first` onto the state after `step`.
pub fn compose_perm(first: &[usize], step: &[usize]) -> Vec<usize> {
    step.par_iter().map(|&s| first[s]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_helpers_roundtrip() {
        let codes = vec![30u64, 10, 20, 10];
        let perm = sort_perm(&codes);
        // Stable: the two equal codes keep input order.
        assert_eq!(perm, vec![1, 3, 2, 0]);
        let inv = invert_perm(&perm);
        for (i, &p) in perm.iter().enumerate() {
            assert_eq!(inv[p], i);
        }
        let data = vec!['a', 'b', 'c', 'd'];
        assert_eq!(apply_perm(&perm, &data), vec!['b', 'd', 'c', 'a']);
        // Composing with the identity leaves the permutation unchanged.
        let id: Vec<usize> = (0..4).collect();
        assert_eq!(compose_perm(&perm, &id), perm);
        assert_eq!(compose_perm(&id, &perm), perm);
    }

    #[test]
    fn deduced_box_has_margin() {
        let set = ParticleSet::<3, f64>::from_slices(
            [&[-10.0, 1.0], &[2.0, -3.0], &[0.5, 4.0]],
            &[1.0, 1.0],
        )
        .unwrap();
        assert_eq!(set.deduce_box_size(), 21.0);
    }

    #[test]
    fn mismatched_lengths_name_the_axis() {
        let err = ParticleSet::<2, f64>::from_slices([&[1.0, 2.0], &[1.0]], &[1.0, 1.0])
            .unwrap_err();
        assert_eq!(
            err,
            TreeError::MismatchedLengths {
                axis: 1,
                got: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn codes_follow_spatial_order() {
        let set = ParticleSet::<1, f64>::from_slices([&[-0.4, -0.1, 0.3]], &[1.0; 3]).unwrap();
        let codes = set.codes(1.0).unwrap();
        assert!(codes[0] < codes[1] && codes[1] < codes[2]);
    }
}

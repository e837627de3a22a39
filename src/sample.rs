//! Seeded particle generators for tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Scalar;

/// Borrow a coordinate array as per-axis slices, the shape
/// [`crate::Tree::new`] takes.
pub fn coord_slices<const D: usize, F>(coords: &[Vec<F>; D]) -> [&[F]; D] {
    std::array::from_fn(|k| coords[k].as_slice())
}

/// `n` particles uniformly distributed in a cube of edge `box_size` centred
/// on the origin, with masses uniform in `[0, 1)`.
pub fn uniform_cube<const D: usize, F: Scalar>(
    n: usize,
    box_size: f64,
    seed: u64,
) -> ([Vec<F>; D], Vec<F>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coords: [Vec<F>; D] = std::array::from_fn(|_| Vec::with_capacity(n));
    let mut masses = Vec::with_capacity(n);
    for _ in 0..n {
        for c in coords.iter_mut() {
            c.push(F::from((rng.gen::<f64>() - 0.5) * box_size).unwrap());
        }
        masses.push(F::from(rng.gen::<f64>()).unwrap());
    }
    (coords, masses)
}

/// `n` particles drawn from a Plummer sphere of scale radius `a`, rejected
/// until they fall inside the box, with total mass 1.
pub fn plummer_sphere<F: Scalar>(
    n: usize,
    a: f64,
    box_size: f64,
    seed: u64,
) -> ([Vec<F>; 3], Vec<F>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let half = box_size / 2.0;
    let mut coords: [Vec<F>; 3] = std::array::from_fn(|_| Vec::with_capacity(n));
    let mut masses = Vec::with_capacity(n);
    let m = 1.0 / n as f64;
    for _ in 0..n {
        loop {
            // Inverse-transform sampling of the cumulative mass profile
            // M(r) = r^3 / (r^2 + a^2)^(3/2).
            let u: f64 = rng.gen_range(1e-10..1.0);
            let r = a / (u.powf(-2.0 / 3.0) - 1.0).sqrt();
            let cos_t: f64 = rng.gen_range(-1.0..1.0);
            let sin_t = (1.0 - cos_t * cos_t).sqrt();
            let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            let x = r * sin_t * phi.cos();
            let y = r * sin_t * phi.sin();
            let z = r * cos_t;
            if x.abs() < half && y.abs() < half && z.abs() < half {
                coords[0].push(F::from(x).unwrap());
                coords[1].push(F::from(y).unwrap());
                coords[2].push(F::from(z).unwrap());
                break;
            }
        }
        masses.push(F::from(m).unwrap());
    }
    (coords, masses)
}

// Softened kernels: agreement with direct summation across an epsilon grid
// and finiteness in the presence of coincident particles.

use itertools::iproduct;

use treecode::sample::{coord_slices, uniform_cube};
use treecode::{Octree, TreeConfig, WalkOpts};

fn rel_err(exact: f64, approx: f64) -> f64 {
    if exact == approx {
        0.0
    } else {
        ((exact - approx) / exact).abs()
    }
}

#[test]
fn softened_walks_match_direct_summation() {
    let mut accs = Vec::new();
    for (n, max_leaf_n, ncrit) in iproduct!([10usize, 100, 1_000], [1usize, 8], [16usize, 256]) {
        let (coords, masses) = uniform_cube::<3, f64>(n, 1.0, n as u64);
        for eps in [0.0, 0.1, 100.0] {
            let tree = Octree::new(
                coord_slices(&coords),
                &masses,
                TreeConfig::default()
                    .with_box_size(1.0)
                    .with_max_leaf_n(max_leaf_n)
                    .with_ncrit(ncrit),
            )
            .unwrap();
            tree.accs_o(&mut accs, WalkOpts::new(1e-3).with_eps(eps))
                .unwrap();
            let mut max_diff = 0.0f64;
            for i in 0..n {
                let eacc = tree.exact_acc_o(i, eps).unwrap();
                for k in 0..3 {
                    max_diff = max_diff.max(rel_err(eacc[k], accs[i][k]));
                }
            }
            assert!(
                max_diff < 1e-10,
                "n={n} max_leaf_n={max_leaf_n} ncrit={ncrit} eps={eps}: \
                 max relative error {max_diff:e}"
            );
        }
    }
}

#[test]
fn coincident_particles_stay_finite_under_softening() {
    let n = 300;
    let (mut coords, masses) = uniform_cube::<3, f64>(n, 1.0, 37);
    // Ten coincident pairs scattered through the set.
    for p in 0..10 {
        let idx = p * 29 + 3;
        for c in coords.iter_mut() {
            c[idx] = c[idx + 1];
        }
    }

    for eps in [0.1, 100.0] {
        for max_leaf_n in [1usize, 16] {
            let tree = Octree::new(
                coord_slices(&coords),
                &masses,
                TreeConfig::default()
                    .with_box_size(1.0)
                    .with_max_leaf_n(max_leaf_n),
            )
            .unwrap();
            let mut accs = Vec::new();
            let mut pots = Vec::new();
            tree.accs_u(&mut accs, WalkOpts::new(0.75).with_eps(eps))
                .unwrap();
            tree.pots_u(&mut pots, WalkOpts::new(0.75).with_eps(eps))
                .unwrap();
            assert!(accs.iter().all(|a| a.iter().all(|c| c.is_finite())));
            assert!(pots.iter().all(|p| p.is_finite()));
        }
    }
}

#[test]
fn zero_softening_skips_self_interactions_only() {
    // With eps = 0 a walk over distinct particles must stay finite; the
    // only singular pairing would be a particle against itself.
    let (coords, masses) = uniform_cube::<3, f64>(200, 1.0, 41);
    let tree = Octree::new(
        coord_slices(&coords),
        &masses,
        TreeConfig::default().with_box_size(1.0).with_max_leaf_n(1),
    )
    .unwrap();
    let mut accs = Vec::new();
    tree.accs_o(&mut accs, WalkOpts::new(0.75)).unwrap();
    assert!(accs.iter().all(|a| a.iter().all(|c| c.is_finite())));
}

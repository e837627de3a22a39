//! Benchmark driver: builds a tree over a Plummer sphere and times the
//! acceleration/potential evaluations against the exact reference at one
//! query index.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use treecode::sample::{coord_slices, plummer_sphere};
use treecode::{MacKind, Octree, Scalar, Split, TreeConfig, WalkOpts};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FpArg {
    Float,
    Double,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MacArg {
    Bh,
    BhGeom,
}

impl From<MacArg> for MacKind {
    fn from(m: MacArg) -> Self {
        match m {
            MacArg::Bh => MacKind::Bh,
            MacArg::BhGeom => MacKind::BhGeom,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SplitArg {
    None,
    Serial,
    Parallel,
}

impl From<SplitArg> for Split {
    fn from(s: SplitArg) -> Self {
        match s {
            SplitArg::None => Split::None,
            SplitArg::Serial => Split::Serial,
            SplitArg::Parallel => Split::Parallel,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Barnes-Hut tree benchmark on a Plummer sphere")]
struct Args {
    /// Number of particles.
    #[arg(long, default_value_t = 1_000_000)]
    nparts: usize,

    /// Particle index whose potential/acceleration is printed and checked.
    #[arg(long, default_value_t = 0)]
    idx: usize,

    #[arg(long, default_value_t = treecode::DEFAULT_MAX_LEAF_N)]
    max_leaf_n: usize,

    #[arg(long, default_value_t = treecode::DEFAULT_NCRIT)]
    ncrit: usize,

    /// Worker threads; 0 uses the available hardware concurrency.
    #[arg(long, default_value_t = 0)]
    nthreads: usize,

    /// Box size; 0 deduces it from the coordinates.
    #[arg(long, default_value_t = 10.0)]
    box_size: f64,

    /// Plummer scale radius.
    #[arg(long, default_value_t = 0.05)]
    a: f64,

    /// Opening angle.
    #[arg(long, default_value_t = 0.75)]
    theta: f64,

    /// Softening length.
    #[arg(long, default_value_t = 0.0)]
    eps: f64,

    #[arg(long, value_enum, default_value_t = SplitArg::None)]
    split: SplitArg,

    #[arg(long, value_enum, default_value_t = FpArg::Double)]
    fp: FpArg,

    #[arg(long, value_enum, default_value_t = MacArg::Bh)]
    mac: MacArg,

    /// Read results in Morton order instead of input order.
    #[arg(long)]
    ordered: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn run<F: Scalar>(args: &Args) -> Result<()> {
    // With box deduction requested, sample inside a generous envelope; the
    // tree then shrink-wraps it.
    let sample_box = if args.box_size > 0.0 {
        args.box_size
    } else {
        100.0 * args.a
    };
    let gen_start = Instant::now();
    let (coords, masses) = plummer_sphere::<F>(args.nparts, args.a, sample_box, args.seed);
    println!("Generated {} particles in {:?}", args.nparts, gen_start.elapsed());

    let mut cfg = TreeConfig::default()
        .with_max_leaf_n(args.max_leaf_n)
        .with_ncrit(args.ncrit)
        .with_mac(args.mac.into());
    if args.box_size != 0.0 {
        cfg = cfg.with_box_size(F::from(args.box_size).unwrap());
    }

    let build_start = Instant::now();
    let tree = Octree::<F>::new(coord_slices(&coords), &masses, cfg)?;
    println!(
        "Built tree: {} nodes, box size {} ({}) in {:?}",
        tree.nodes().len(),
        tree.box_size(),
        if tree.box_size_deduced() { "deduced" } else { "given" },
        build_start.elapsed()
    );

    let opts = WalkOpts::new(F::from(args.theta).unwrap())
        .with_eps(F::from(args.eps).unwrap())
        .with_split(args.split.into());
    let eps = F::from(args.eps).unwrap();

    let mut accs = Vec::new();
    let t = Instant::now();
    if args.ordered {
        tree.accs_o(&mut accs, opts)?;
    } else {
        tree.accs_u(&mut accs, opts)?;
    }
    println!("Accelerations in {:?}", t.elapsed());

    let mut pots = Vec::new();
    let t = Instant::now();
    if args.ordered {
        tree.pots_o(&mut pots, opts)?;
    } else {
        tree.pots_u(&mut pots, opts)?;
    }
    println!("Potentials in {:?}", t.elapsed());

    let (epot, eacc) = if args.ordered {
        (tree.exact_pot_o(args.idx, eps)?, tree.exact_acc_o(args.idx, eps)?)
    } else {
        (tree.exact_pot_u(args.idx, eps)?, tree.exact_acc_u(args.idx, eps)?)
    };
    println!("pot[{}]  = {}", args.idx, pots[args.idx]);
    println!("exact    = {}", epot);
    println!("acc[{}]  = {:?}", args.idx, accs[args.idx]);
    println!("exact    = {:?}", eacc);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.nparts == 0 {
        bail!("nparts must be positive");
    }
    if !args.box_size.is_finite() || args.box_size < 0.0 {
        bail!("box size must be finite and non-negative, got {}", args.box_size);
    }
    if !(args.a > 0.0) {
        bail!("Plummer scale radius must be positive, got {}", args.a);
    }
    if args.idx >= args.nparts {
        bail!("query index {} out of range for {} particles", args.idx, args.nparts);
    }
    if args.nthreads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.nthreads)
            .build_global()
            .context("failed to initialise the thread pool")?;
    }

    match args.fp {
        FpArg::Float => run::<f32>(&args),
        FpArg::Double => run::<f64>(&args),
    }
}

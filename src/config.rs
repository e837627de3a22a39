use crate::error::TreeError;
use crate::Scalar;

/// Default upper bound on particles per leaf node.
pub const DEFAULT_MAX_LEAF_N: usize = 256;

/// Default upper bound on the size of a target batch sharing one tree walk.
pub const DEFAULT_NCRIT: usize = 16;

/// Multipole acceptance criterion variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MacKind {
    /// Classic Barnes-Hut: accept when `size^2 < theta^2 * d^2`.
    #[default]
    Bh,
    /// Geometric variant: accept when `(size + max dispersion)^2 < theta^2 * d^2`,
    /// tightening acceptance for nodes with elongated mass distributions.
    BhGeom,
}

/// Batch-splitting strategy for target batches larger than `ncrit`.
///
/// Batches exceed `ncrit` only when `max_leaf_n > ncrit` makes a whole leaf
/// the batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Split {
    /// Walk the oversized batch as a single unit.
    #[default]
    None,
    /// Walk `ncrit`-sized chunks sequentially within one task.
    Serial,
    /// Promote `ncrit`-sized chunks to independent parallel jobs.
    Parallel,
}

/// Tree construction options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeConfig<F> {
    /// Edge length of the root cube. `None` deduces it from the coordinates
    /// as `2 * (1 + 0.05) * max|coord|`.
    pub box_size: Option<F>,
    /// Maximum number of particles per leaf node.
    pub max_leaf_n: usize,
    /// Maximum number of targets sharing one tree walk.
    pub ncrit: usize,
    /// Acceptance criterion used by the walk.
    pub mac: MacKind,
}

impl<F> Default for TreeConfig<F> {
    fn default() -> Self {
        Self {
            box_size: None,
            max_leaf_n: DEFAULT_MAX_LEAF_N,
            ncrit: DEFAULT_NCRIT,
            mac: MacKind::default(),
        }
    }
}

impl<F: Scalar> TreeConfig<F> {
    pub fn with_box_size(mut self, box_size: F) -> Self {
        self.box_size = Some(box_size);
        self
    }

    pub fn with_max_leaf_n(mut self, max_leaf_n: usize) -> Self {
        self.max_leaf_n = max_leaf_n;
        self
    }

    pub fn with_ncrit(mut self, ncrit: usize) -> Self {
        self.ncrit = ncrit;
        self
    }

    pub fn with_mac(mut self, mac: MacKind) -> Self {
        self.mac = mac;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TreeError> {
        if let Some(b) = self.box_size {
            // Zero is a valid sentinel here; it fails later in the
            // discretiser for any non-trivial input.
            if !b.is_finite() || b < F::zero() {
                return Err(TreeError::InvalidBoxSize {
                    got: b.to_f64().unwrap_or(f64::NAN),
                });
            }
        }
        if self.max_leaf_n == 0 || self.ncrit == 0 {
            return Err(TreeError::ZeroNodeCapacity);
        }
        Ok(())
    }
}

/// Per-call walk options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WalkOpts<F> {
    /// Opening angle; smaller values trade speed for accuracy.
    pub theta: F,
    /// Softening length, added in quadrature to every pair separation.
    pub eps: F,
    /// Oversized-batch splitting strategy.
    pub split: Split,
}

impl<F: Scalar> WalkOpts<F> {
    pub fn new(theta: F) -> Self {
        Self {
            theta,
            eps: F::zero(),
            split: Split::default(),
        }
    }

    pub fn with_eps(mut self, eps: F) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_split(mut self, split: Split) -> Self {
        self.split = split;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TreeError> {
        if !self.theta.is_finite() || self.theta <= F::zero() {
            return Err(TreeError::InvalidTheta {
                got: self.theta.to_f64().unwrap_or(f64::NAN),
            });
        }
        if !self.eps.is_finite() || self.eps < F::zero() {
            return Err(TreeError::InvalidSoftening {
                got: self.eps.to_f64().unwrap_or(f64::NAN),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults() {
        let cfg = TreeConfig::<f64>::default();
        assert_eq!(cfg.box_size, None);
        assert_eq!(cfg.max_leaf_n, DEFAULT_MAX_LEAF_N);
        assert_eq!(cfg.ncrit, DEFAULT_NCRIT);
        assert_eq!(cfg.mac, MacKind::Bh);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_box_and_capacities() {
        let inf = TreeConfig::default().with_box_size(f64::INFINITY);
        assert_eq!(inf.validate().unwrap_err().kind(), ErrorKind::Argument);

        let neg = TreeConfig::default().with_box_size(-1.0);
        assert_eq!(neg.validate().unwrap_err().kind(), ErrorKind::Argument);

        let zero_leaf = TreeConfig::<f64>::default().with_max_leaf_n(0);
        assert_eq!(zero_leaf.validate().unwrap_err().kind(), ErrorKind::Argument);

        let zero_ncrit = TreeConfig::<f64>::default().with_ncrit(0);
        assert_eq!(zero_ncrit.validate().unwrap_err().kind(), ErrorKind::Argument);

        // Zero box size is an argument-level no-op; it only fails once a
        // particle has to be discretised into it.
        assert!(TreeConfig::default().with_box_size(0.0).validate().is_ok());
    }

    #[test]
    fn walk_opts_validation() {
        assert!(WalkOpts::new(0.75).validate().is_ok());
        assert_eq!(
            WalkOpts::new(0.0).validate().unwrap_err().kind(),
            ErrorKind::Domain
        );
        assert_eq!(
            WalkOpts::new(-1.0).validate().unwrap_err().kind(),
            ErrorKind::Domain
        );
        assert_eq!(
            WalkOpts::new(0.5).with_eps(-0.1).validate().unwrap_err().kind(),
            ErrorKind::Domain
        );
    }
}

//! Crate-wide type definitions: settings, errors, diagnostics.

use num::Float;

use crate::parallel::CommScalar;

/// Scalar type for coordinates and weights.
///
/// Satisfied by `f32` and `f64`. The bound collects what the partitioning
/// pipeline needs: floating-point arithmetic, exchangeability over the
/// communicator, and thread safety for the parallel local loops.
pub trait Scalar: Float + CommScalar + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static {}

impl<T> Scalar for T where
    T: Float + CommScalar + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static
{
}

/// Generic error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Out-of-range settings or mismatched input sizes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The target block capacities cannot hold the input weight.
    #[error("target block weights sum to {target} but input weights sum to {input}; the input does not fit, maybe call CommTree::adapt_weights first")]
    Infeasible {
        /// Sum of the target block capacities.
        target: f64,
        /// Sum of the input vertex weights.
        input: f64,
    },

    /// The coordinates have zero extent along an axis.
    #[error("coordinates have zero extent in dimension {0}")]
    DegenerateExtent(usize),

    /// A coordinate does not agree with the given bounds after rescaling.
    #[error("coordinate {value} in dimension {dim} does not agree with bounds {min} and {max}")]
    InvalidCoordinate {
        /// Dimension of the offending coordinate.
        dim: usize,
        /// The coordinate value.
        value: f64,
        /// Lower bound for this dimension.
        min: f64,
        /// Upper bound for this dimension.
        max: f64,
    },

    /// Multisection produced a rectangle with zero weight.
    #[error("found a rectangle with zero weight; inappropriate input data or the coordinate scaling needs refinement")]
    InsufficientResolution,

    /// Coordinate and weight distributions disagree.
    #[error("size mismatch between {0} and the coordinate distribution")]
    DimensionMismatch(String),

    /// A target block weight is zero while the assigned weight is not.
    #[error("target weight {weight} for block {block} is zero while the assigned weight is nonzero")]
    DegenerateWeights {
        /// Index of the weight dimension.
        weight: usize,
        /// Index of the block.
        block: usize,
    },

    /// An internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Result Type
pub type Result<T> = std::result::Result<T, Error>;

/// Selection of the initial partitioning method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialPartition {
    /// Equal slabs of the space-filling-curve order, requires `k == p`.
    Sfc,
    /// Balanced geometric k-means.
    #[default]
    KMeans,
    /// Recursive multisection of 1-D weighted projections.
    Multisection,
    /// Keep the identity assignment, all points in block 0.
    None,
}

/// Recognized options for the partitioning pipeline.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Spatial dimension of the coordinates, 2 or 3.
    pub dimensions: usize,
    /// Number of blocks to partition into.
    pub num_blocks: usize,
    /// Imbalance tolerance.
    pub epsilon: f64,
    /// Hilbert curve refinement depth; 0 derives it from the input size.
    pub sfc_resolution: usize,
    /// Initial partitioning method.
    pub initial_partition: InitialPartition,
    /// Lower bound on the first-round sample per process, -1 for the full
    /// local set.
    pub min_sampling_nodes: i64,
    /// Outer k-means iteration budget.
    pub max_kmeans_iterations: usize,
    /// Inner balance-loop budget per outer iteration.
    pub balance_iterations: usize,
    /// Exponent applied to the weight ratio in the influence update.
    pub influence_exponent: f64,
    /// Per-step multiplicative cap on influence changes.
    pub influence_change_cap: f64,
    /// Pin the influence of a block once it is within the tolerance.
    pub freeze_balanced_influence: bool,
    /// Shrink the influence change cap when the ratio flips direction.
    pub tighten_bounds: bool,
    /// Decay influence towards one when centers stabilise; only valid with
    /// a single vertex weight.
    pub erode_influence: bool,
    /// Constrain k-means moves to centers of the point's previous block.
    pub repartition: bool,
    /// Force multisection into repeated bisection.
    pub bisect: bool,
    /// User override for the number of multisection cuts per dimension;
    /// empty derives them from `num_blocks`. The product must equal
    /// `num_blocks`.
    pub cuts_per_dim: Vec<usize>,
    /// Choose the projection axis by maximum extent. This is the only
    /// supported mode.
    pub use_extent: bool,
    /// Relabel blocks by the space-filling-curve order of their centroids.
    pub mapping_renumbering: bool,
    /// Seed for the internal random shuffle; fixed seeds make the
    /// partition bit-reproducible.
    pub seed: u64,
    /// Emit per-iteration diagnostics through the `log` facade.
    pub verbose: bool,
    /// Enable expensive cross-process consistency checks.
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dimensions: 2,
            num_blocks: 2,
            epsilon: 0.05,
            sfc_resolution: 0,
            initial_partition: InitialPartition::KMeans,
            min_sampling_nodes: 100,
            max_kmeans_iterations: 50,
            balance_iterations: 20,
            influence_exponent: 0.5,
            influence_change_cap: 0.1,
            freeze_balanced_influence: false,
            tighten_bounds: true,
            erode_influence: false,
            repartition: false,
            bisect: false,
            cuts_per_dim: Vec::new(),
            use_extent: true,
            mapping_renumbering: false,
            seed: 0,
            verbose: false,
            debug_mode: false,
        }
    }
}

impl Settings {
    /// Check the settings for consistency.
    ///
    /// Cross-field constraints that depend on the input (for example the
    /// number of weights) are checked where the input is known.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions < 2 || self.dimensions > 3 {
            return Err(Error::InvalidArgument(format!(
                "space filling curves are only implemented for two or three dimensions, got {}",
                self.dimensions
            )));
        }
        if self.num_blocks == 0 {
            return Err(Error::InvalidArgument("number of blocks is zero".into()));
        }
        if self.epsilon < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "imbalance tolerance is negative: {}",
                self.epsilon
            )));
        }
        if self.influence_change_cap <= 0.0 || self.influence_change_cap >= 1.0 {
            return Err(Error::InvalidArgument(format!(
                "influence change cap must lie in (0, 1), got {}",
                self.influence_change_cap
            )));
        }
        if !self.use_extent {
            return Err(Error::InvalidArgument(
                "choosing the projection dimension by maximum extent is the only supported mode"
                    .into(),
            ));
        }
        if !self.cuts_per_dim.is_empty() {
            let product: usize = self.cuts_per_dim.iter().product();
            if product != self.num_blocks {
                return Err(Error::InvalidArgument(format!(
                    "the product of cuts_per_dim is {} but the number of blocks is {}",
                    product, self.num_blocks
                )));
            }
        }
        Ok(())
    }
}

/// Convergence state reported by the k-means partitioner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConvergenceState {
    /// Center movement fell below the threshold and all blocks are within
    /// the balance tolerance.
    #[default]
    Converged,
    /// The iteration budget ran out; the returned partition is valid but
    /// possibly imbalanced.
    BudgetExhausted,
}

/// Diagnostic data returned alongside a partition.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Total number of inner balance iterations performed.
    pub balance_iterations: usize,
    /// Final imbalance per vertex weight.
    pub final_imbalance: Vec<f64>,
    /// How the run ended.
    pub convergence: ConvergenceState,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_settings_validation() {
        assert!(Settings::default().validate().is_ok());

        let bad_dims = Settings {
            dimensions: 4,
            ..Settings::default()
        };
        assert!(bad_dims.validate().is_err());

        let bad_cuts = Settings {
            num_blocks: 8,
            cuts_per_dim: vec![2, 3],
            ..Settings::default()
        };
        assert!(matches!(
            bad_cuts.validate(),
            Err(Error::InvalidArgument(_))
        ));

        let good_cuts = Settings {
            num_blocks: 6,
            cuts_per_dim: vec![2, 3],
            ..Settings::default()
        };
        assert!(good_cuts.validate().is_ok());
    }
}

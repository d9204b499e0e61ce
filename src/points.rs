//! Distributed point sets: coordinates, vertex weights and global indices.

use rayon::prelude::*;

use crate::parallel::Collectives;
use crate::types::{Error, Result, Scalar};

/// The local fragment of a distributed point set.
///
/// Coordinates are stored per dimension and weights per weight dimension,
/// all aligned with the vector of global indices: entry `i` of every local
/// vector describes the same point. The union of the local fragments over
/// all ranks is a partition of `[0, global_count)` in terms of global
/// indices.
#[derive(Clone, Debug)]
pub struct DistributedPoints<T> {
    /// Local coordinate values, one vector per spatial dimension.
    coords: Vec<Vec<T>>,
    /// Local vertex weights, one vector per weight dimension.
    weights: Vec<Vec<T>>,
    /// Global indices of the local points.
    global_ids: Vec<u64>,
    /// Total number of points over all ranks.
    global_count: usize,
}

impl<T> DistributedPoints<T>
where
    T: Scalar,
{
    /// Create a point set from its local fragments.
    ///
    /// Points with no weights are given a single unit weight. All local
    /// vectors must have the same length.
    pub fn new(
        coords: Vec<Vec<T>>,
        weights: Vec<Vec<T>>,
        global_ids: Vec<u64>,
        global_count: usize,
    ) -> Result<Self> {
        if coords.len() < 2 || coords.len() > 3 {
            return Err(Error::InvalidArgument(format!(
                "expected two or three coordinate dimensions, got {}",
                coords.len()
            )));
        }
        let local_count = global_ids.len();
        for (d, coord) in coords.iter().enumerate() {
            if coord.len() != local_count {
                return Err(Error::DimensionMismatch(format!(
                    "coordinate dimension {d}"
                )));
            }
        }
        let weights = if weights.is_empty() {
            vec![vec![T::one(); local_count]]
        } else {
            weights
        };
        for (w, weight) in weights.iter().enumerate() {
            if weight.len() != local_count {
                return Err(Error::DimensionMismatch(format!("node weight {w}")));
            }
            if weight.iter().any(|v| *v < T::zero()) {
                return Err(Error::InvalidArgument(format!(
                    "node weight {w} contains negative values"
                )));
            }
        }

        Ok(Self {
            coords,
            weights,
            global_ids,
            global_count,
        })
    }

    /// Point set with unit weights and consecutive global indices, for a
    /// single process owning all points.
    pub fn from_coordinates(coords: Vec<Vec<T>>) -> Result<Self> {
        let local_count = coords.first().map(|c| c.len()).unwrap_or(0);
        let global_ids = (0..local_count as u64).collect();
        Self::new(coords, Vec::new(), global_ids, local_count)
    }

    /// Number of spatial dimensions.
    pub fn dims(&self) -> usize {
        self.coords.len()
    }

    /// Number of vertex weights per point.
    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    /// Number of locally owned points.
    pub fn local_count(&self) -> usize {
        self.global_ids.len()
    }

    /// Total number of points over all ranks.
    pub fn global_count(&self) -> usize {
        self.global_count
    }

    /// Local coordinate values along dimension `d`.
    pub fn coords(&self, d: usize) -> &[T] {
        &self.coords[d]
    }

    /// All local coordinate vectors.
    pub fn all_coords(&self) -> &[Vec<T>] {
        &self.coords
    }

    /// Local values of weight `w`.
    pub fn weights(&self, w: usize) -> &[T] {
        &self.weights[w]
    }

    /// All local weight vectors.
    pub fn all_weights(&self) -> &[Vec<T>] {
        &self.weights
    }

    /// Global indices of the local points.
    pub fn global_ids(&self) -> &[u64] {
        &self.global_ids
    }

    /// Replace the local fragments, typically after a redistribution.
    pub(crate) fn install(
        &mut self,
        coords: Vec<Vec<T>>,
        weights: Vec<Vec<T>>,
        global_ids: Vec<u64>,
    ) {
        self.coords = coords;
        self.weights = weights;
        self.global_ids = global_ids;
    }

    /// Minimum and maximum local coordinate per dimension.
    ///
    /// Returns `None` when this rank owns no points.
    pub fn local_bounds(&self) -> Option<(Vec<T>, Vec<T>)> {
        if self.local_count() == 0 {
            return None;
        }
        let min = self
            .coords
            .par_iter()
            .map(|c| c.iter().copied().fold(T::infinity(), T::min))
            .collect();
        let max = self
            .coords
            .par_iter()
            .map(|c| c.iter().copied().fold(T::neg_infinity(), T::max))
            .collect();
        Some((min, max))
    }

    /// Global minimum and maximum coordinate per dimension.
    ///
    /// Fails with [`Error::DegenerateExtent`] when an axis has zero extent,
    /// which would break the space-filling curve.
    pub fn global_bounds<C: Collectives>(&self, comm: &C) -> Result<(Vec<T>, Vec<T>)> {
        let dims = self.dims();
        let (mut min, mut max) = self
            .local_bounds()
            .unwrap_or((vec![T::infinity(); dims], vec![T::neg_infinity(); dims]));
        comm.min_into(&mut min);
        comm.max_into(&mut max);
        for d in 0..dims {
            if !(min[d] < max[d]) {
                return Err(Error::DegenerateExtent(d));
            }
        }
        Ok((min, max))
    }

    /// Global sum of every vertex weight.
    pub fn global_weight_sums<C: Collectives>(&self, comm: &C) -> Vec<T> {
        let mut sums: Vec<T> = self
            .weights
            .iter()
            .map(|w| w.iter().copied().fold(T::zero(), |a, b| a + b))
            .collect();
        comm.sum_into(&mut sums);
        sums
    }

    /// Row-normalized weights: per point, the weights sum to one over the
    /// weight dimensions. With a single weight all entries are one.
    pub fn normalized_weights(&self) -> Vec<Vec<T>> {
        let local_n = self.local_count();
        let num_weights = self.num_weights();
        let mut normalized = vec![vec![T::one(); local_n]; num_weights];
        if num_weights > 1 {
            for i in 0..local_n {
                let mut weight_sum = T::zero();
                for w in 0..num_weights {
                    weight_sum = weight_sum + self.weights[w][i];
                }
                if weight_sum > T::zero() {
                    for w in 0..num_weights {
                        normalized[w][i] = self.weights[w][i] / weight_sum;
                    }
                }
            }
        }
        normalized
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::points_fixture_2d;
    use crate::parallel::SerialComm;
    use approx::assert_relative_eq;

    #[test]
    fn test_construction_checks() {
        let coords = vec![vec![0.0, 1.0], vec![0.0, 1.0]];
        let points = DistributedPoints::from_coordinates(coords).unwrap();
        assert_eq!(points.dims(), 2);
        assert_eq!(points.num_weights(), 1);
        assert_eq!(points.local_count(), 2);

        let mismatched = DistributedPoints::new(
            vec![vec![0.0, 1.0], vec![0.0]],
            Vec::new(),
            vec![0, 1],
            2,
        );
        assert!(mismatched.is_err());

        let negative = DistributedPoints::new(
            vec![vec![0.0, 1.0], vec![0.0, 1.0]],
            vec![vec![1.0, -1.0]],
            vec![0, 1],
            2,
        );
        assert!(negative.is_err());
    }

    #[test]
    fn test_global_bounds() {
        let points = points_fixture_2d::<f64>(100, 0);
        let (min, max) = points.global_bounds(&SerialComm).unwrap();
        for d in 0..2 {
            assert!(min[d] < max[d]);
            assert!(min[d] >= 0.0 && max[d] <= 1.0);
        }
    }

    #[test]
    fn test_degenerate_extent() {
        let coords = vec![vec![0.5, 0.5, 0.5], vec![0.0, 1.0, 2.0]];
        let points = DistributedPoints::from_coordinates(coords).unwrap();
        assert!(matches!(
            points.global_bounds(&SerialComm),
            Err(Error::DegenerateExtent(0))
        ));
    }

    #[test]
    fn test_normalized_weights() {
        let coords = vec![vec![0.0, 1.0], vec![0.0, 1.0]];
        let weights = vec![vec![1.0, 3.0], vec![3.0, 1.0]];
        let points = DistributedPoints::new(coords, weights, vec![0, 1], 2).unwrap();
        let normalized = points.normalized_weights();
        assert_relative_eq!(normalized[0][0], 0.25);
        assert_relative_eq!(normalized[1][0], 0.75);
        assert_relative_eq!(normalized[0][1], 0.75);
        assert_relative_eq!(normalized[1][1], 0.25);
    }
}

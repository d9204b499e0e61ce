//! Axis-aligned bounding boxes with nearest/farthest point distances.

use crate::types::{Error, Result, Scalar};

/// An axis-aligned box `[min, max)` in two or three dimensions.
///
/// Containment is closed on the minimum face and open on the maximum face,
/// uniformly in every use in this crate. The k-means assignment uses the
/// nearest-point distance from the per-process box to prune whole groups of
/// centers.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox<T> {
    /// Lower corner, `min[d] < max[d]` for every dimension.
    pub min: Vec<T>,
    /// Upper corner.
    pub max: Vec<T>,
}

impl<T> BoundingBox<T>
where
    T: Scalar,
{
    /// Construct a box from its corners.
    pub fn new(min: Vec<T>, max: Vec<T>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(Error::InvalidArgument(
                "bounding box corners have different dimensions".into(),
            ));
        }
        for d in 0..min.len() {
            if !(min[d] < max[d]) {
                return Err(Error::DegenerateExtent(d));
            }
        }
        Ok(Self { min, max })
    }

    /// The box spanned by a set of local points, one coordinate vector per
    /// dimension. A degenerate axis is widened by a small fraction of the
    /// largest extent so the box stays usable.
    pub fn from_local_points(coords: &[Vec<T>]) -> Result<Self> {
        let dims = coords.len();
        let mut min = vec![T::infinity(); dims];
        let mut max = vec![T::neg_infinity(); dims];
        for d in 0..dims {
            for &value in &coords[d] {
                min[d] = min[d].min(value);
                max[d] = max[d].max(value);
            }
        }

        let widest = (0..dims)
            .map(|d| max[d] - min[d])
            .fold(T::zero(), T::max);
        if widest <= T::zero() {
            return Err(Error::DegenerateExtent(0));
        }
        let err = widest * T::from(1e-6).unwrap();
        for d in 0..dims {
            if !(min[d] < max[d]) {
                min[d] = min[d] - err;
                max[d] = max[d] + err;
            }
        }
        Self::new(min, max)
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    /// Euclidean distances from `query` to the nearest and farthest point
    /// of the box. The nearest distance is zero for queries inside.
    pub fn distances(&self, query: &[T]) -> (T, T) {
        let mut near_sq = T::zero();
        let mut far_sq = T::zero();
        for d in 0..self.dims() {
            let q = query[d];
            let clamped = q.max(self.min[d]).min(self.max[d]);
            let diff = q - clamped;
            near_sq = near_sq + diff * diff;

            let to_min = (q - self.min[d]).abs();
            let to_max = (q - self.max[d]).abs();
            let farthest = to_min.max(to_max);
            far_sq = far_sq + farthest * farthest;
        }
        (near_sq.sqrt(), far_sq.sqrt())
    }

    /// Whether the box contains `point`; closed on the minimum face, open
    /// on the maximum face.
    pub fn contains(&self, point: &[T]) -> bool {
        (0..self.dims()).all(|d| self.min[d] <= point[d] && point[d] < self.max[d])
    }

    /// Union of two boxes: the smallest box containing both.
    pub fn union(&self, other: &Self) -> Self {
        let dims = self.dims();
        let mut min = Vec::with_capacity(dims);
        let mut max = Vec::with_capacity(dims);
        for d in 0..dims {
            min.push(self.min[d].min(other.min[d]));
            max.push(self.max[d].max(other.max[d]));
        }
        Self { min, max }
    }

    /// Split at the component-wise midpoint into `2^d` children, ordered by
    /// the bit pattern of their octant: bit `d` set selects the upper half
    /// along dimension `d`.
    pub fn split(&self) -> Vec<Self> {
        let dims = self.dims();
        let half = T::from(0.5).unwrap();
        let mid: Vec<T> = (0..dims)
            .map(|d| (self.min[d] + self.max[d]) * half)
            .collect();

        (0..1usize << dims)
            .map(|octant| {
                let mut min = Vec::with_capacity(dims);
                let mut max = Vec::with_capacity(dims);
                for d in 0..dims {
                    if octant & (1 << d) == 0 {
                        min.push(self.min[d]);
                        max.push(mid[d]);
                    } else {
                        min.push(mid[d]);
                        max.push(self.max[d]);
                    }
                }
                Self { min, max }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> BoundingBox<f64> {
        BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap()
    }

    #[test]
    fn test_distances_inside_and_outside() {
        let cell = unit_square();

        let (near, far) = cell.distances(&[0.5, 0.5]);
        assert_relative_eq!(near, 0.0);
        assert_relative_eq!(far, 0.5f64.hypot(0.5));

        let (near, far) = cell.distances(&[2.0, 0.5]);
        assert_relative_eq!(near, 1.0);
        assert_relative_eq!(far, 2.0f64.hypot(0.5));
    }

    #[test]
    fn test_contains_convention() {
        let cell = unit_square();
        assert!(cell.contains(&[0.0, 0.0]));
        assert!(cell.contains(&[0.999, 0.5]));
        assert!(!cell.contains(&[1.0, 0.5]));
        assert!(!cell.contains(&[0.5, -0.1]));
    }

    #[test]
    fn test_split_covers_box() {
        let cell = BoundingBox::new(vec![0.0, 0.0, 0.0], vec![2.0, 2.0, 2.0]).unwrap();
        let children = cell.split();
        assert_eq!(children.len(), 8);

        // every child has half the side length and together they tile the box
        for child in &children {
            for d in 0..3 {
                assert_relative_eq!(child.max[d] - child.min[d], 1.0);
            }
        }
        let probe = [1.5, 0.5, 1.5];
        let owners = children.iter().filter(|c| c.contains(&probe)).count();
        assert_eq!(owners, 1);
    }

    #[test]
    fn test_from_points_and_union() {
        let a = BoundingBox::from_local_points(&[vec![0.0, 0.5], vec![0.0, 0.25]]).unwrap();
        let b = BoundingBox::from_local_points(&[vec![2.0, 3.0], vec![1.0, 2.0]]).unwrap();
        let u = a.union(&b);
        assert!(u.contains(&[0.0, 0.0]));
        assert!(u.contains(&[2.5, 1.5]));
        assert!(!u.contains(&[3.5, 1.0]));
    }
}

//! Recursive multisection partitioning.
//!
//! Coordinates are scaled onto an integer grid of side `(N-1)^(1/d)`, so
//! the 1-D projections stay short. Starting from the full grid as a single
//! rectangle, every level cuts each current rectangle along its
//! longest axis: the vertex weights inside the rectangle are projected
//! onto that axis, summed over all ranks in one reduction, and split by
//! the optimal 1-D cut placement. After the last level every point is
//! labelled with the leaf rectangle containing it.

pub mod cut1d;
pub mod rect_tree;

pub use rect_tree::{Rect, RectTree};

use itertools::Itertools;
use log::debug;

use crate::parallel::Collectives;
use crate::points::DistributedPoints;
use crate::types::{Error, Result, Scalar, Settings};

/// Partition the points into `settings.num_blocks` rectangular blocks of
/// approximately equal weight (first vertex weight).
///
/// Returns the partition vector aligned with the local points and the
/// rectangle tree that produced it.
pub fn compute_partition<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, RectTree<T>)> {
    settings.validate()?;

    let dims = points.dims();
    let local_n = points.local_count();
    let global_n = points.global_count();
    let num_blocks = settings.num_blocks;

    if num_blocks > global_n {
        return Err(Error::InvalidArgument(format!(
            "creating {num_blocks} blocks from {global_n} points is impossible"
        )));
    }
    if dims != settings.dimensions {
        return Err(Error::DimensionMismatch("settings.dimensions".into()));
    }

    let num_cuts = cuts_per_level(settings, dims)?;

    // scale the coordinates onto the integer grid; the scaled maximum
    // bounds the projection array length
    let scale = ((global_n.max(2) - 1) as f64).powf(1.0 / dims as f64);
    let (min, max) = {
        let (mut min, mut max) = points
            .local_bounds()
            .unwrap_or((vec![T::infinity(); dims], vec![T::neg_infinity(); dims]));
        comm.min_into(&mut min);
        comm.max_into(&mut max);
        (min, max)
    };

    let mut scaled_points = vec![vec![0i64; dims]; local_n];
    for d in 0..dims {
        let extent = (max[d] - min[d]).to_f64().unwrap_or(0.0);
        let factor = if extent > 0.0 { scale / extent } else { 0.0 };
        let coords = points.coords(d);
        for i in 0..local_n {
            let normalized = (coords[i] - min[d]).to_f64().unwrap_or(0.0);
            scaled_points[i][d] = (normalized * factor) as i64;
        }
    }

    let weights = points.weights(0);
    let total_weight = comm.sum_scalar(weights.iter().copied().fold(T::zero(), |a, b| a + b));

    let root = Rect {
        bottom: vec![0i64; dims],
        top: vec![scale as i64; dims],
        weight: total_weight,
    };
    let mut tree = RectTree::new(root);

    for &this_dim_cuts in &num_cuts {
        let leaves = tree.leaves();
        debug!(
            "multisection level: {} rectangles, {this_dim_cuts} cuts each",
            leaves.len()
        );

        // per leaf, the axis of maximum extent and a projection bin per
        // scaled coordinate on that axis
        let chosen_dims = leaves
            .iter()
            .map(|&leaf| tree.rect(leaf).longest_axis())
            .collect_vec();
        let projections =
            project_onto_axes(&tree, &leaves, &chosen_dims, &scaled_points, weights, comm)?;

        for (l, &leaf) in leaves.iter().enumerate() {
            let rect = tree.rect(leaf).clone();
            let axis = chosen_dims[l];

            let (cut_offsets, part_weights) =
                cut1d::partition_1d_optimal(&projections[l], this_dim_cuts)?;

            let mut children = Vec::with_capacity(this_dim_cuts);
            for h in 0..this_dim_cuts {
                let mut child = Rect {
                    bottom: rect.bottom.clone(),
                    top: rect.top.clone(),
                    weight: part_weights[h],
                };
                child.bottom[axis] = rect.bottom[axis] + cut_offsets[h] as i64;
                if h + 1 < this_dim_cuts {
                    child.top[axis] = rect.bottom[axis] + cut_offsets[h + 1] as i64 - 1;
                }
                if !(child.weight > T::zero()) {
                    return Err(Error::InsufficientResolution);
                }
                children.push(child);
            }
            tree.add_children(leaf, children);
        }
    }

    let num_leaves = tree.index_leaves();
    if num_leaves != num_blocks {
        return Err(Error::InternalInvariant(format!(
            "multisection produced {num_leaves} rectangles instead of {num_blocks}"
        )));
    }

    let mut partition = Vec::with_capacity(local_n);
    for point in &scaled_points {
        let leaf = tree.containing_leaf(point)?;
        // index_leaves assigned every leaf an id
        partition.push(tree.leaf_id(leaf).unwrap());
    }

    Ok((partition, tree))
}

/// How many cuts to perform at every level: the user override, repeated
/// bisection, or the d-th root of the block count per dimension.
fn cuts_per_level(settings: &Settings, dims: usize) -> Result<Vec<usize>> {
    let k = settings.num_blocks;

    if settings.bisect {
        if !k.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "bisection requires a power-of-two block count, got {k}"
            )));
        }
        return Ok(vec![2; k.trailing_zeros() as usize]);
    }

    if !settings.cuts_per_dim.is_empty() {
        // the product is validated by Settings::validate
        return Ok(settings.cuts_per_dim.clone());
    }

    // floating-point roots land one below the integer root for perfect
    // powers, so test the successor as well
    let mut root = (k as f64).powf(1.0 / dims as f64) as usize;
    if (root + 1).pow(dims as u32) == k {
        root += 1;
    }
    if root.pow(dims as u32) != k {
        return Err(Error::InvalidArgument(format!(
            "the number of blocks {k} has no integer {dims}-th root; set cuts_per_dim explicitly"
        )));
    }
    Ok(vec![root; dims])
}

/// Project every local point's weight onto the chosen axis of its leaf
/// rectangle and sum the projections over all ranks in one reduction.
fn project_onto_axes<T: Scalar, C: Collectives>(
    tree: &RectTree<T>,
    leaves: &[usize],
    chosen_dims: &[usize],
    scaled_points: &[Vec<i64>],
    weights: &[T],
    comm: &C,
) -> Result<Vec<Vec<T>>> {
    let mut leaf_index_of = std::collections::HashMap::new();
    for (l, &leaf) in leaves.iter().enumerate() {
        leaf_index_of.insert(leaf, l);
    }

    let mut projections = leaves
        .iter()
        .enumerate()
        .map(|(l, &leaf)| {
            let rect = tree.rect(leaf);
            let axis = chosen_dims[l];
            let length = (rect.top[axis] - rect.bottom[axis] + 1) as usize;
            vec![T::zero(); length]
        })
        .collect_vec();

    for (i, point) in scaled_points.iter().enumerate() {
        let leaf = tree.containing_leaf(point)?;
        let l = *leaf_index_of
            .get(&leaf)
            .ok_or_else(|| Error::InternalInvariant("containing leaf is not a leaf".into()))?;
        let axis = chosen_dims[l];
        let relative = (point[axis] - tree.rect(leaf).bottom[axis]) as usize;
        projections[l][relative] = projections[l][relative] + weights[i];
    }

    // flatten all projections into one buffer for a single reduction
    let mut flat = projections.iter().flatten().copied().collect_vec();
    comm.sum_into(&mut flat);

    let mut offset = 0;
    for projection in projections.iter_mut() {
        let len = projection.len();
        projection.copy_from_slice(&flat[offset..offset + len]);
        offset += len;
    }
    Ok(projections)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::{grid_points_2d, points_fixture_3d};
    use crate::parallel::SerialComm;
    use crate::types::InitialPartition;

    fn block_counts(partition: &[usize], k: usize) -> Vec<usize> {
        let mut counts = vec![0usize; k];
        for &b in partition {
            counts[b] += 1;
        }
        counts
    }

    #[test]
    fn test_grid_multisection_is_exact() {
        let (points, _) = grid_points_2d::<f64>(16, 16);
        let settings = Settings {
            num_blocks: 4,
            initial_partition: InitialPartition::Multisection,
            ..Settings::default()
        };

        let (partition, tree) = compute_partition(&points, &settings, &SerialComm).unwrap();
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(partition.len(), 256);

        // a 16x16 grid into 2x2 rectangles splits exactly
        let counts = block_counts(&partition, 4);
        assert_eq!(counts, vec![64, 64, 64, 64]);
    }

    #[test]
    fn test_bisection_mode() {
        let (points, _) = grid_points_2d::<f64>(16, 16);
        let settings = Settings {
            num_blocks: 8,
            bisect: true,
            ..Settings::default()
        };

        let (partition, tree) = compute_partition(&points, &settings, &SerialComm).unwrap();
        assert_eq!(tree.num_leaves(), 8);

        let counts = block_counts(&partition, 8);
        assert_eq!(counts.iter().sum::<usize>(), 256);
        for &count in &counts {
            assert_eq!(count, 32);
        }
    }

    #[test]
    fn test_bisection_requires_power_of_two() {
        let (points, _) = grid_points_2d::<f64>(10, 10);
        let settings = Settings {
            num_blocks: 6,
            bisect: true,
            ..Settings::default()
        };
        assert!(matches!(
            compute_partition(&points, &settings, &SerialComm),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cuts_per_dim_override() {
        let (points, _) = grid_points_2d::<f64>(12, 12);
        let settings = Settings {
            num_blocks: 6,
            cuts_per_dim: vec![3, 2],
            ..Settings::default()
        };

        let (partition, tree) = compute_partition(&points, &settings, &SerialComm).unwrap();
        assert_eq!(tree.num_leaves(), 6);
        let counts = block_counts(&partition, 6);
        assert_eq!(counts.iter().sum::<usize>(), 144);
        let worst = counts.iter().copied().max().unwrap() as f64;
        assert!(worst <= 24.0 * 1.2, "worst block holds {worst} points");
    }

    #[test]
    fn test_no_integer_root_fails() {
        let (points, _) = grid_points_2d::<f64>(10, 10);
        let settings = Settings {
            num_blocks: 6,
            ..Settings::default()
        };
        assert!(matches!(
            compute_partition(&points, &settings, &SerialComm),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_3d_multisection_balance() {
        let points = points_fixture_3d::<f64>(1000, 5);
        let settings = Settings {
            dimensions: 3,
            num_blocks: 8,
            ..Settings::default()
        };

        let (partition, tree) = compute_partition(&points, &settings, &SerialComm).unwrap();
        assert_eq!(tree.num_leaves(), 8);
        let counts = block_counts(&partition, 8);
        assert_eq!(counts.iter().sum::<usize>(), 1000);
        // uniform points cut by weighted multisection stay near 125 each
        for &count in &counts {
            assert!((75..=175).contains(&count), "block holds {count} points");
        }
    }
}

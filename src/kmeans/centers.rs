//! Center placement and the recentre step of the balanced k-means.

use itertools::Itertools;

use crate::parallel::Collectives;
use crate::points::DistributedPoints;
use crate::sfc::hilbert;
use crate::types::{Error, Result, Scalar, Settings};

/// Place the initial centers for every existing block along the
/// space-filling curve.
///
/// The input is already partitioned into `grouping.len()` old blocks; for
/// old block `b`, `grouping[b]` centers are placed at evenly spaced
/// positions of the block's curve order. The positions are located through
/// a concatenation of per-block prefix sums over the per-rank block counts:
/// the rank owning the requested within-block index contributes that
/// point's coordinates, and one global sum replicates all centers.
///
/// Returns `centers[b][j]`, the `j`-th center of old block `b`, as a
/// coordinate vector.
pub(crate) fn find_initial_centers_sfc<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    partition: &[usize],
    grouping: &[usize],
    min: &[T],
    max: &[T],
    settings: &Settings,
    comm: &C,
) -> Result<Vec<Vec<Vec<T>>>> {
    let local_n = points.local_count();
    let dims = points.dims();
    let num_old_blocks = grouping.len();
    let num_ranks = comm.size();
    let rank = comm.rank();

    if partition.len() != local_n {
        return Err(Error::DimensionMismatch("old partition".into()));
    }

    // local points in curve order, needed to translate a within-block
    // index into a concrete point
    let resolution = hilbert::resolution(settings, points.global_count(), dims);
    let sfc_indices = hilbert::hilbert_indices(points, resolution, min, max)?;
    let mut sorted_local_indices: Vec<usize> = (0..local_n).collect();
    sorted_local_indices
        .sort_unstable_by(|&a, &b| sfc_indices[a].total_cmp(&sfc_indices[b]).then(a.cmp(&b)));

    // per-rank block counts, gathered everywhere; concat[b * (p + 1) + r]
    // is the number of block-b points on ranks below r
    let mut local_counts = vec![0u64; num_old_blocks];
    for i in 0..local_n {
        let block = partition[i];
        if block >= num_old_blocks {
            return Err(Error::InvalidArgument(format!(
                "old partition value {block} exceeds the number of old blocks {num_old_blocks}"
            )));
        }
        local_counts[block] += 1;
    }
    let all_counts = {
        let mut out = vec![0u64; num_old_blocks * num_ranks];
        comm.all_gather(&local_counts, &mut out);
        out
    };

    let mut concat_prefix_sums = vec![0u64; (num_ranks + 1) * num_old_blocks];
    for b in 0..num_old_blocks {
        let base = b * (num_ranks + 1);
        for r in 0..num_ranks {
            concat_prefix_sums[base + r + 1] =
                concat_prefix_sums[base + r] + all_counts[r * num_old_blocks + b];
        }
    }
    let global_block_sizes = (0..num_old_blocks)
        .map(|b| concat_prefix_sums[b * (num_ranks + 1) + num_ranks])
        .collect_vec();

    if global_block_sizes.iter().sum::<u64>() != points.global_count() as u64 {
        return Err(Error::InternalInvariant(
            "block sizes do not sum to the global point count".into(),
        ));
    }

    // requested within-block indices: the j-th of k_b centers sits at the
    // middle of the j-th of k_b equal stretches of the block's curve order
    let wanted_indices = (0..num_old_blocks)
        .map(|b| {
            let k_b = grouping[b] as u64;
            let stride = global_block_sizes[b] / k_b.max(1);
            (0..k_b).map(|j| j * stride + stride / 2).collect_vec()
        })
        .collect_vec();

    // each rank fills in only the centers whose within-block index it owns
    let total_new_blocks: usize = grouping.iter().sum();
    let mut flat_centers = vec![T::zero(); total_new_blocks * dims];
    let block_offsets = std::iter::once(0)
        .chain(grouping.iter().scan(0, |acc, &g| {
            *acc += g;
            Some(*acc)
        }))
        .collect_vec();

    for b in 0..num_old_blocks {
        let base = b * (num_ranks + 1);
        let range_start = concat_prefix_sums[base + rank];
        let range_end = concat_prefix_sums[base + rank + 1];

        for (j, &center_index) in wanted_indices[b].iter().enumerate() {
            if center_index < range_start || center_index >= range_end {
                continue;
            }
            let mut counter = range_start;
            for &local in &sorted_local_indices {
                if partition[local] != b {
                    continue;
                }
                if counter == center_index {
                    let offset = (block_offsets[b] + j) * dims;
                    for d in 0..dims {
                        flat_centers[offset + d] = points.coords(d)[local];
                    }
                    break;
                }
                counter += 1;
            }
        }
    }

    // every center is owned by exactly one rank, one sum replicates them
    comm.sum_into(&mut flat_centers);

    let centers = (0..num_old_blocks)
        .map(|b| {
            (0..grouping[b])
                .map(|j| {
                    let offset = (block_offsets[b] + j) * dims;
                    flat_centers[offset..offset + dims].to_vec()
                })
                .collect_vec()
        })
        .collect_vec();
    Ok(centers)
}

/// Centers taken directly from the curve: the k midpoints of the k equal
/// stretches of `[0, 1]`, mapped through the inverse curve into the input
/// space. Independent of the point distribution.
pub fn find_initial_centers_from_sfc_only<T: Scalar>(
    num_blocks: usize,
    resolution: usize,
    min: &[T],
    max: &[T],
) -> Result<Vec<Vec<T>>> {
    let dims = min.len();
    let offset = 1.0 / (num_blocks as f64 * 2.0);
    (0..num_blocks)
        .map(|i| {
            let curve_position = i as f64 / num_blocks as f64 + offset;
            let unit = hilbert::index_to_point(curve_position, resolution, dims)?;
            Ok((0..dims)
                .map(|d| T::from(unit[d]).unwrap() * (max[d] - min[d]) + min[d])
                .collect_vec())
        })
        .collect()
}

/// The weighted centroid of every rank's local points, replicated on all
/// ranks. Used to seed the repartitioning mode, where the previous blocks
/// are exactly the ranks. Returns `centers[rank][dim]`; an empty rank
/// contributes the origin.
pub(crate) fn find_local_centers<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    comm: &C,
) -> Vec<Vec<T>> {
    let dims = points.dims();
    let local_n = points.local_count();
    let num_ranks = comm.size();
    let rank = comm.rank();

    let weights = points.weights(0);
    let local_weight_sum = weights.iter().copied().fold(T::zero(), |a, b| a + b);

    let mut flat = vec![T::zero(); num_ranks * dims];
    if local_weight_sum > T::zero() {
        for d in 0..dims {
            let coords = points.coords(d);
            let mut center = T::zero();
            for i in 0..local_n {
                // dividing every term keeps intermediate sums small
                center = center + weights[i] * coords[i] / local_weight_sum;
            }
            flat[rank * dims + d] = center;
        }
    }
    comm.sum_into(&mut flat);

    (0..num_ranks)
        .map(|r| flat[r * dims..(r + 1) * dims].to_vec())
        .collect()
}

/// Recentre step: the weighted mean of every block over the sampled
/// indices, using the first vertex weight. Blocks with no global weight
/// get NaN coordinates so the caller can keep their previous position.
pub(crate) fn find_centers<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    partition: &[usize],
    num_blocks: usize,
    sample: &[usize],
    comm: &C,
) -> Vec<Vec<T>> {
    let dims = points.dims();
    let weights = points.weights(0);

    let mut weight_sum = vec![T::zero(); num_blocks];
    for &i in sample {
        weight_sum[partition[i]] = weight_sum[partition[i]] + weights[i];
    }

    // local weighted means, then scaled by the local share of the global
    // block weight; the final global sum yields the global weighted mean
    let mut result = vec![vec![T::zero(); num_blocks]; dims];
    for d in 0..dims {
        let coords = points.coords(d);
        for &i in sample {
            let block = partition[i];
            if weight_sum[block] > T::zero() {
                result[d][block] =
                    result[d][block] + coords[i] * weights[i] / weight_sum[block];
            }
        }
    }

    let mut total_weight = weight_sum.clone();
    comm.sum_into(&mut total_weight);

    let mut flat = vec![T::zero(); num_blocks * dims];
    for d in 0..dims {
        for j in 0..num_blocks {
            if total_weight[j] > T::zero() {
                let ratio = weight_sum[j] / total_weight[j];
                flat[j * dims + d] = result[d][j] * ratio;
            }
        }
    }
    comm.sum_into(&mut flat);

    // make empty blocks explicit
    (0..num_blocks)
        .map(|j| {
            if total_weight[j] > T::zero() {
                flat[j * dims..(j + 1) * dims].to_vec()
            } else {
                vec![T::nan(); dims]
            }
        })
        .collect()
}

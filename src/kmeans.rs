//! Balanced geometric k-means partitioning.
//!
//! The partitioner minimizes the effective squared distance of every point
//! to its block center, where the effective distance scales the Euclidean
//! distance by per-block influence factors that are adapted until every
//! block respects its capacity. Initial centers are read off the
//! space-filling curve, assignment uses distance bounds and per-process box
//! pruning, and early iterations run on a growing random sample of the
//! local points.
//!
//! Three modes build on the core [`compute_partition`]:
//! * [`compute_partition_flat`] partitions from scratch against a flat
//!   communication tree,
//! * [`compute_hierarchical_partition`] descends the tree level by level,
//!   each point pinned to the subtree of its current block,
//! * [`compute_repartition`] rebalances an existing partition with
//!   minimal movement.

mod assign;
mod centers;

pub use centers::find_initial_centers_from_sfc_only;
pub(crate) use centers::find_centers as block_centroids;

use itertools::Itertools;
use log::{debug, info, warn};
use rand::prelude::*;

use crate::cell::BoundingBox;
use crate::comm_tree::CommTree;
use crate::parallel::Collectives;
use crate::points::DistributedPoints;
use crate::sfc;
use crate::types::{
    ConvergenceState, Diagnostics, Error, Result, Scalar, Settings,
};
use assign::{assign_blocks, AssignInputs, BalanceState};
use centers::{find_centers, find_initial_centers_sfc, find_local_centers};

/// Fraction of the bounding box diagonal below which center movement
/// counts as converged.
const CONVERGENCE_FRACTION: f64 = 0.002;

/// Core balanced k-means iteration.
///
/// `group_of_centers[b]` holds the initial centers for old block `b`; a
/// point whose `old_partition` value is `b` may only be assigned to the
/// centers of group `b` (in repartition mode there is a single group and
/// `old_partition` is the assignment to rebalance). The produced partition
/// numbers blocks in group order, `0..total_new_blocks`.
///
/// On success the per-weight imbalance is within `settings.epsilon`, up to
/// the iteration budget; running out of budget is reported through the
/// diagnostics, not as an error.
pub fn compute_partition<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    target_block_weights: &[Vec<T>],
    old_partition: &[usize],
    group_of_centers: Vec<Vec<Vec<T>>>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    let dims = points.dims();
    let local_n = points.local_count();
    let global_n = points.global_count();
    let num_weights = points.num_weights();
    let num_old_blocks = group_of_centers.len();

    if target_block_weights.len() != num_weights {
        return Err(Error::DimensionMismatch("target block weights".into()));
    }
    if old_partition.len() != local_n {
        return Err(Error::DimensionMismatch("old partition".into()));
    }
    if settings.erode_influence && num_weights > 1 {
        return Err(Error::InvalidArgument(
            "influence erosion is only supported with a single vertex weight".into(),
        ));
    }

    // blocks with unequal capacities rule out erosion as well
    for targets in target_block_weights.iter() {
        let (lo, hi) = targets
            .iter()
            .fold((T::infinity(), T::neg_infinity()), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            });
        if lo != hi && settings.erode_influence {
            return Err(Error::InvalidArgument(
                "influence erosion is not supported for heterogeneous block sizes".into(),
            ));
        }
    }

    // flatten the center groups; block_offsets partitions the flat list
    let mut block_offsets = vec![0usize; num_old_blocks + 1];
    for b in 0..num_old_blocks {
        block_offsets[b + 1] = block_offsets[b] + group_of_centers[b].len();
    }
    let total_new_blocks = block_offsets[num_old_blocks];
    let mut centers: Vec<Vec<T>> = group_of_centers.into_iter().flatten().collect();
    if centers.is_empty() || centers[0].len() != dims {
        return Err(Error::DimensionMismatch("initial centers".into()));
    }
    for targets in target_block_weights.iter() {
        if targets.len() != total_new_blocks {
            return Err(Error::DimensionMismatch("target block weights".into()));
        }
    }

    // the input must fit the requested capacities
    let node_weight_sums = points.global_weight_sums(comm);
    for w in 0..num_weights {
        let capacity = target_block_weights[w]
            .iter()
            .copied()
            .fold(T::zero(), |a, b| a + b);
        let epsilon = T::from(settings.epsilon).unwrap();
        if node_weight_sums[w] > capacity * (T::one() + epsilon) {
            return Err(Error::Infeasible {
                target: capacity.to_f64().unwrap_or(f64::NAN),
                input: node_weight_sums[w].to_f64().unwrap_or(f64::NAN),
            });
        }
    }

    let normalized_weights = points.normalized_weights();

    // per-process bounding box for candidate pruning, global box for the
    // convergence threshold
    let local_bounds = points.local_bounds();
    let bounding_box = local_bounds
        .as_ref()
        .and_then(|(min, max)| BoundingBox::new(min.clone(), max.clone()).ok());

    let (global_min, global_max) = {
        let (mut min, mut max) = local_bounds
            .clone()
            .unwrap_or((vec![T::infinity(); dims], vec![T::neg_infinity(); dims]));
        comm.min_into(&mut min);
        comm.max_into(&mut max);
        (min, max)
    };

    let mut diagonal_sq = T::zero();
    let mut volume = T::one();
    for d in 0..dims {
        let diff = global_max[d] - global_min[d];
        diagonal_sq = diagonal_sq + diff * diff;
        volume = volume * diff;
    }
    let diagonal = diagonal_sq.sqrt();
    let threshold = T::from(CONVERGENCE_FRACTION).unwrap() * diagonal;
    let expected_block_diameter = (volume / T::from(total_new_blocks).unwrap())
        .powf(T::one() / T::from(dims).unwrap());

    // progressive sampling: start from a shuffled prefix, double per round
    let mut local_indices = (0..local_n).collect_vec();
    let avg_blocks_per_rank = total_new_blocks as f64 / comm.size() as f64;
    let min_nodes = if settings.min_sampling_nodes < 0 {
        local_n
    } else {
        ((settings.min_sampling_nodes as f64 * avg_blocks_per_rank).ceil() as usize).max(1)
    };
    let random_initialization = comm.all(local_n > min_nodes);

    let mut sampling_rounds = 0usize;
    let mut samples: Vec<usize> = Vec::new();
    if random_initialization {
        let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(comm.rank() as u64));
        fisher_yates_shuffle(&mut local_indices, &mut rng);

        let denominator = (settings.min_sampling_nodes.max(1) as f64) * total_new_blocks as f64;
        sampling_rounds = ((global_n as f64 / denominator).log2().ceil() as isize + 1).max(1) as usize;

        samples.resize(sampling_rounds, 0);
        samples[0] = min_nodes.min(local_n);
        for r in 1..sampling_rounds {
            samples[r] = (samples[r - 1] * 2).min(local_n);
        }
        samples[sampling_rounds - 1] = local_n;
    }

    let mut state = BalanceState {
        upper_bound_own: vec![T::infinity(); local_n],
        lower_bound_next: vec![T::zero(); local_n],
        influence: vec![vec![T::one(); total_new_blocks]; num_weights],
        imbalance: vec![T::one(); num_weights],
    };

    let mut result = if settings.repartition {
        old_partition.to_vec()
    } else {
        vec![0usize; local_n]
    };

    let mut iter = 0usize;
    let mut total_balance_iters = 0usize;
    let mut delta = T::zero();
    let mut balanced = false;
    let max_iterations = settings.max_kmeans_iterations;

    loop {
        let sample_len = if iter < sampling_rounds {
            let len = samples[iter];
            // sorting the prefix increases locality of the sweep
            local_indices[..len].sort_unstable();
            len
        } else {
            local_n
        };
        let sample = &local_indices[..sample_len];

        // scale the targets down to the sampled share of the total weight
        let mut adjusted_block_weights = Vec::with_capacity(num_weights);
        for w in 0..num_weights {
            let weights = points.weights(w);
            let local_sampled: T = sample
                .iter()
                .map(|&i| weights[i])
                .fold(T::zero(), |a, b| a + b);
            let sampled_sum = comm.sum_scalar(local_sampled);
            let ratio = sampled_sum / node_weight_sums[w];
            adjusted_block_weights.push(
                target_block_weights[w]
                    .iter()
                    .map(|&t| t * ratio)
                    .collect_vec(),
            );
        }

        let inputs = AssignInputs {
            coords: points.all_coords(),
            centers: &centers,
            block_offsets: &block_offsets,
            node_weights: points.all_weights(),
            normalized_weights: &normalized_weights,
            old_block: old_partition,
            target_block_weights: &adjusted_block_weights,
            bounding_box: bounding_box.as_ref(),
        };
        total_balance_iters +=
            assign_blocks(&inputs, sample, &mut result, &mut state, settings, comm)?;

        // recentre; empty blocks keep their last known center
        let new_centers = find_centers(points, &result, total_new_blocks, sample, comm);
        let new_centers = new_centers
            .into_iter()
            .enumerate()
            .map(|(j, center)| {
                if center[0].is_nan() {
                    centers[j].clone()
                } else {
                    center
                }
            })
            .collect_vec();

        let mut squared_deltas = vec![T::zero(); total_new_blocks];
        let mut deltas = vec![T::zero(); total_new_blocks];
        for j in 0..total_new_blocks {
            for d in 0..dims {
                debug_assert!(
                    new_centers[j][d] <= global_max[d] + T::from(1e-6).unwrap()
                        && new_centers[j][d] >= global_min[d] - T::from(1e-6).unwrap(),
                    "new center coordinate out of bounds"
                );
                let diff = centers[j][d] - new_centers[j][d];
                squared_deltas[j] = squared_deltas[j] + diff * diff;
            }
            deltas[j] = squared_deltas[j].sqrt();
        }

        // single-weight influence erosion: fade the influence towards one
        // while the center stands still
        let old_influence = state.influence.clone();
        let mut erosion_min_ratio = T::infinity();
        if settings.erode_influence {
            for j in 0..total_new_blocks {
                let shift = (deltas[j] / expected_block_diameter - T::from(0.1).unwrap())
                    .max(T::zero());
                let erosion = T::from(2.0).unwrap()
                    / (T::one() + (-shift).exp())
                    - T::one();
                state.influence[0][j] = ((T::one() - erosion) * state.influence[0][j].ln()).exp();
                let ratio = old_influence[0][j] / state.influence[0][j];
                erosion_min_ratio = erosion_min_ratio.min(ratio);
            }
        }

        centers = new_centers;

        delta = deltas.iter().copied().fold(T::zero(), T::max);
        let delta_sq = delta * delta;
        let mut max_influence = T::zero();
        for w in 0..num_weights {
            for j in 0..total_new_blocks {
                max_influence = max_influence.max(state.influence[w][j]);
            }
        }

        // widen the bounds conservatively by the center movement
        let slack = T::from(1e-6).unwrap();
        for &i in sample {
            let cluster = result[i];
            let mut influence_effect = T::zero();
            for w in 0..num_weights {
                influence_effect =
                    influence_effect + state.influence[w][cluster] * normalized_weights[w][i];
            }

            if settings.erode_influence {
                state.upper_bound_own[i] = state.upper_bound_own[i]
                    * (state.influence[0][cluster] / old_influence[0][cluster] + slack);
                state.lower_bound_next[i] =
                    state.lower_bound_next[i] * (erosion_min_ratio - slack);
            }

            state.upper_bound_own[i] = state.upper_bound_own[i]
                + (T::from(2.0).unwrap()
                    * deltas[cluster]
                    * (state.upper_bound_own[i] / influence_effect).sqrt()
                    + squared_deltas[cluster])
                    * (influence_effect + slack);

            let pure_sqrt = (state.lower_bound_next[i] / max_influence).sqrt();
            if pure_sqrt < delta {
                state.lower_bound_next[i] = T::zero();
            } else {
                let diff = (-T::from(2.0).unwrap() * delta * pure_sqrt + delta_sq)
                    * (max_influence + slack);
                state.lower_bound_next[i] = (state.lower_bound_next[i] + diff).max(T::zero());
            }
        }

        // balance is judged on the freshly reduced block weights
        let mut balanced_now = true;
        for w in 0..num_weights {
            let weights = points.weights(w);
            let mut block_weights = vec![T::zero(); total_new_blocks];
            for &i in sample {
                block_weights[result[i]] = block_weights[result[i]] + weights[i];
            }
            comm.sum_into(&mut block_weights);

            let epsilon = T::from(settings.epsilon).unwrap();
            for j in 0..total_new_blocks {
                if block_weights[j] > adjusted_block_weights[w][j] * (T::one() + epsilon) {
                    balanced_now = false;
                }
            }
        }
        balanced = balanced_now;

        iter += 1;

        if settings.verbose {
            debug!(
                "iteration {iter}: delta {delta}, imbalance {:?}",
                state.imbalance.iter().map(|v| v.to_f64()).collect_vec()
            );
        }

        let keep_sampling = iter < sampling_rounds;
        let keep_refining = iter < max_iterations && (delta > threshold || !balanced);
        if !keep_sampling && !keep_refining {
            break;
        }
    }

    let convergence = if delta <= threshold && balanced {
        ConvergenceState::Converged
    } else {
        ConvergenceState::BudgetExhausted
    };
    if convergence == ConvergenceState::BudgetExhausted {
        warn!(
            "k-means stopped after {iter} iterations without converging; returning the current partition"
        );
    }

    let diagnostics = Diagnostics {
        iterations: iter,
        balance_iterations: total_balance_iters,
        final_imbalance: state
            .imbalance
            .iter()
            .map(|v| v.to_f64().unwrap_or(f64::NAN))
            .collect(),
        convergence,
    };
    info!(
        "k-means finished: {} blocks, {} iterations, imbalance {:?}",
        total_new_blocks, iter, diagnostics.final_imbalance
    );

    Ok((result, diagnostics))
}

/// Flat partition from scratch against the leaves of `tree`. Initial
/// centers are read off the space-filling curve.
pub fn compute_partition_flat<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    tree: &CommTree<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    let num_blocks = tree.num_leaves();
    if num_blocks != settings.num_blocks {
        return Err(Error::InvalidArgument(format!(
            "the tree has {num_blocks} leaves but the settings ask for {} blocks",
            settings.num_blocks
        )));
    }

    let (min, max) = points.global_bounds(comm)?;
    let old_partition = vec![0usize; points.local_count()];
    let centers = find_initial_centers_sfc(
        points,
        &old_partition,
        &[num_blocks],
        &min,
        &max,
        settings,
        comm,
    )?;
    let targets = tree.balance_vectors(None);

    compute_partition(points, &targets, &old_partition, centers, settings, comm)
}

/// Hierarchical partition: one k-means pass per tree level, each pass
/// splitting every block of the previous level into its children.
///
/// The points are redistributed along the space-filling curve first, so
/// the prefix sums behind the center seeding are meaningful.
pub fn compute_hierarchical_partition<T: Scalar, C: Collectives>(
    points: &mut DistributedPoints<T>,
    tree: &CommTree<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    if settings.num_blocks != tree.num_leaves() {
        return Err(Error::InvalidArgument(format!(
            "the tree has {} leaves but the settings ask for {} blocks",
            tree.num_leaves(),
            settings.num_blocks
        )));
    }

    let mut settings = settings.clone();
    if settings.erode_influence {
        warn!("influence erosion is not supported hierarchically, disabling it");
        settings.erode_influence = false;
    }

    sfc::redistribute(points, &settings, comm)?;
    if settings.debug_mode && !sfc::confirm_distribution(points, &settings, comm)? {
        return Err(Error::InternalInvariant(
            "input must be distributed along the space-filling curve".into(),
        ));
    }

    let (min, max) = points.global_bounds(comm)?;

    let mut partition = vec![0usize; points.local_count()];
    let mut diagnostics = Diagnostics::default();

    // the root is skipped: it names the block count but no capacities below
    for h in 1..tree.num_levels() {
        let level = tree.level(h);
        info!("hierarchy level {h} with {} nodes", level.len());

        let grouping = CommTree::grouping(level);
        let group_of_centers = find_initial_centers_sfc(
            points, &partition, &grouping, &min, &max, &settings, comm,
        )?;
        let targets = tree.balance_vectors(Some(h));

        let (new_partition, level_diagnostics) = compute_partition(
            points,
            &targets,
            &partition,
            group_of_centers,
            &settings,
            comm,
        )?;
        partition = new_partition;

        diagnostics.iterations += level_diagnostics.iterations;
        diagnostics.balance_iterations += level_diagnostics.balance_iterations;
        diagnostics.final_imbalance = level_diagnostics.final_imbalance;
        diagnostics.convergence = level_diagnostics.convergence;
    }

    Ok((partition, diagnostics))
}

/// Rebalance an existing partition with minimal movement.
///
/// The previous assignment seeds both the initial centers (block
/// centroids) and the starting assignment, so only as many points move as
/// the balance correction requires.
pub fn compute_repartition<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    target_block_weights: &[Vec<T>],
    previous: &[usize],
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    let local_n = points.local_count();
    if previous.len() != local_n {
        return Err(Error::DimensionMismatch("previous partition".into()));
    }
    let num_blocks = settings.num_blocks;

    // when the partition coincides with the distribution the block
    // centroids are exactly the local centroids
    let distribution_is_partition = num_blocks == comm.size()
        && comm.all(previous.iter().all(|&b| b == comm.rank()));

    let initial_centers = if distribution_is_partition {
        find_local_centers(points, comm)
    } else {
        let all: Vec<usize> = (0..local_n).collect();
        find_centers(points, previous, num_blocks, &all, comm)
    };

    let mut repart_settings = settings.clone();
    repart_settings.repartition = true;

    compute_partition(
        points,
        target_block_weights,
        previous,
        vec![initial_centers],
        &repart_settings,
        comm,
    )
}

/// Repartition against the current distribution: `k` must equal the number
/// of ranks and every rank's points form one block. Targets are the equal
/// share of every global weight.
pub fn compute_repartition_from_distribution<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    if settings.num_blocks != comm.size() {
        return Err(Error::InvalidArgument(
            "deriving the previous partition from the distribution requires k == p".into(),
        ));
    }

    let share = T::from(settings.num_blocks).unwrap();
    let targets = points
        .global_weight_sums(comm)
        .into_iter()
        .map(|total| vec![total / share; settings.num_blocks])
        .collect_vec();
    let previous = vec![comm.rank(); points.local_count()];

    compute_repartition(points, &targets, &previous, settings, comm)
}

/// Hierarchical partition followed by a repartitioning pass against the
/// leaf capacities.
pub fn compute_hier_plus_repart<T: Scalar, C: Collectives>(
    points: &mut DistributedPoints<T>,
    tree: &CommTree<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    let (partition, first) = compute_hierarchical_partition(points, tree, settings, comm)?;

    let targets = tree.balance_vectors(None);
    let (partition, mut diagnostics) =
        compute_repartition(points, &targets, &partition, settings, comm)?;

    diagnostics.iterations += first.iterations;
    diagnostics.balance_iterations += first.balance_iterations;
    Ok((partition, diagnostics))
}

fn fisher_yates_shuffle<R: Rng>(indices: &mut [usize], rng: &mut R) {
    let n = indices.len();
    for i in 0..n.saturating_sub(1) {
        let j = i + rng.gen_range(0..n - i);
        indices.swap(i, j);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::{grid_points_2d, points_fixture_2d};
    use crate::metrics;
    use crate::parallel::SerialComm;

    fn block_counts(partition: &[usize], k: usize) -> Vec<usize> {
        let mut counts = vec![0usize; k];
        for &b in partition {
            counts[b] += 1;
        }
        counts
    }

    #[test]
    fn test_flat_partition_balances_uniform_points() {
        let points = points_fixture_2d::<f64>(1000, 13);
        let mut tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        tree.adapt_weights(&[1000.0]).unwrap();

        let settings = Settings {
            num_blocks: 4,
            epsilon: 0.05,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, diagnostics) =
            compute_partition_flat(&points, &tree, &settings, &comm).unwrap();

        assert_eq!(partition.len(), 1000);
        assert!(partition.iter().all(|&b| b < 4));

        let imbalance = metrics::imbalance(
            &partition,
            4,
            points.all_weights(),
            &tree.balance_vectors(None),
            &comm,
        );
        assert!(
            imbalance[0] <= settings.epsilon + 1e-9,
            "imbalance {} exceeds epsilon, diagnostics {:?}",
            imbalance[0],
            diagnostics
        );
    }

    #[test]
    fn test_partition_is_deterministic_under_fixed_seed() {
        let points = points_fixture_2d::<f64>(800, 21);
        let mut tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        tree.adapt_weights(&[800.0]).unwrap();
        let settings = Settings {
            num_blocks: 4,
            seed: 17,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (first, _) = compute_partition_flat(&points, &tree, &settings, &comm).unwrap();
        let (second, _) = compute_partition_flat(&points, &tree, &settings, &comm).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_heterogeneous_targets() {
        // leaf capacities 1:2:1 over 100 unit-weight points
        let points = points_fixture_2d::<f64>(100, 3);
        let sizes = vec![vec![1.0, 2.0, 1.0]];
        let mut tree = CommTree::<f64>::flat_heterogeneous(&sizes, &[true]).unwrap();
        tree.adapt_weights(&[100.0]).unwrap();

        let settings = Settings {
            num_blocks: 3,
            epsilon: 0.05,
            max_kmeans_iterations: 100,
            balance_iterations: 50,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, _) = compute_partition_flat(&points, &tree, &settings, &comm).unwrap();
        let counts = block_counts(&partition, 3);

        let targets = [25.0, 50.0, 25.0];
        for (j, &count) in counts.iter().enumerate() {
            let imbalance = (count as f64 - targets[j]) / targets[j];
            assert!(
                imbalance <= settings.epsilon + 1e-9,
                "block {j} holds {count} points against a target of {}",
                targets[j]
            );
        }
    }

    #[test]
    fn test_hierarchical_partition() {
        let (mut points, _) = grid_points_2d::<f64>(16, 16);
        let mut tree = CommTree::<f64>::from_levels(&[2, 2], 1).unwrap();
        tree.adapt_weights(&[256.0]).unwrap();

        let settings = Settings {
            num_blocks: 4,
            epsilon: 0.1,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, _) =
            compute_hierarchical_partition(&mut points, &tree, &settings, &comm).unwrap();
        assert_eq!(partition.len(), 256);
        assert!(partition.iter().all(|&b| b < 4));

        let counts = block_counts(&partition, 4);
        for &count in &counts {
            assert!(count > 0, "hierarchical partition left a block empty");
        }
    }

    #[test]
    fn test_repartition_is_stable() {
        // a balanced partition must survive repartitioning nearly unchanged
        let points = points_fixture_2d::<f64>(400, 9);
        let mut tree = CommTree::<f64>::flat_homogeneous(2, 1).unwrap();
        tree.adapt_weights(&[400.0]).unwrap();
        let settings = Settings {
            num_blocks: 2,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (original, _) = compute_partition_flat(&points, &tree, &settings, &comm).unwrap();
        let targets = tree.balance_vectors(None);
        let (repartitioned, _) =
            compute_repartition(&points, &targets, &original, &settings, &comm).unwrap();

        let moved = original
            .iter()
            .zip(&repartitioned)
            .filter(|(a, b)| a != b)
            .count();
        assert!(
            moved <= original.len() / 10,
            "repartitioning moved {moved} of {} points",
            original.len()
        );
    }

    #[test]
    fn test_erode_rejected_for_multiple_weights() {
        let coords = vec![vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0]];
        let weights = vec![vec![1.0; 3], vec![1.0; 3]];
        let points = DistributedPoints::new(coords, weights, vec![0, 1, 2], 3).unwrap();

        let settings = Settings {
            num_blocks: 1,
            erode_influence: true,
            ..Settings::default()
        };
        let targets = vec![vec![3.0], vec![3.0]];
        let centers = vec![vec![vec![1.0, 1.0]]];
        let result = compute_partition(
            &points,
            &targets,
            &[0, 0, 0],
            centers,
            &settings,
            &SerialComm,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_infeasible_targets_rejected() {
        let points = points_fixture_2d::<f64>(100, 4);
        let settings = Settings {
            num_blocks: 2,
            ..Settings::default()
        };
        let targets = vec![vec![10.0, 10.0]]; // 100 points cannot fit
        let centers = vec![vec![vec![0.3, 0.3], vec![0.7, 0.7]]];
        let result = compute_partition(
            &points,
            &targets,
            &vec![0; 100],
            centers,
            &settings,
            &SerialComm,
        );
        assert!(matches!(result, Err(Error::Infeasible { .. })));
    }
}

//! The assign/balance inner loop of the balanced k-means.
//!
//! Each call reassigns the sampled points to their best center under the
//! current influence values, then corrects the influences until every block
//! is within the balance tolerance or the inner budget runs out. Points
//! keep triangle-inequality style bounds on the effective distance to their
//! own center and to the runner-up, so most iterations skip most points;
//! candidate centers are scanned in ascending order of their effective
//! distance from the process bounding box and the scan stops as soon as no
//! remaining center can beat the runner-up.

use itertools::Itertools;
use log::debug;

use crate::cell::BoundingBox;
use crate::parallel::Collectives;
use crate::types::{Error, Result, Scalar, Settings};

/// Bound and influence state carried across the outer k-means iterations.
pub(crate) struct BalanceState<T> {
    /// Per point: upper bound on the effective distance to its own center.
    pub upper_bound_own: Vec<T>,
    /// Per point: lower bound on the effective distance to the runner-up.
    pub lower_bound_next: Vec<T>,
    /// Per weight and block: multiplicative influence on the distance.
    pub influence: Vec<Vec<T>>,
    /// Per weight: imbalance reached by the last assignment.
    pub imbalance: Vec<T>,
}

/// Immutable inputs of one assignment call.
pub(crate) struct AssignInputs<'a, T> {
    /// Local coordinates, one vector per dimension.
    pub coords: &'a [Vec<T>],
    /// All centers, flattened over the old blocks.
    pub centers: &'a [Vec<T>],
    /// Prefix sums partitioning the center list by old block.
    pub block_offsets: &'a [usize],
    /// Local vertex weights, one vector per weight dimension.
    pub node_weights: &'a [Vec<T>],
    /// Row-normalized vertex weights.
    pub normalized_weights: &'a [Vec<T>],
    /// Per point: the old block constraining its candidate centers.
    pub old_block: &'a [usize],
    /// Target capacity per weight and block, already scaled for sampling.
    pub target_block_weights: &'a [Vec<T>],
    /// Bounding box of the local points; `None` on an empty rank.
    pub bounding_box: Option<&'a BoundingBox<T>>,
}

/// Assign the sampled points and balance the block weights.
///
/// Updates `assignment` and the bound/influence state in place and returns
/// the number of balance iterations used.
pub(crate) fn assign_blocks<T: Scalar, C: Collectives>(
    inputs: &AssignInputs<'_, T>,
    sample: &[usize],
    assignment: &mut [usize],
    state: &mut BalanceState<T>,
    settings: &Settings,
    comm: &C,
) -> Result<usize> {
    let dims = inputs.coords.len();
    let num_weights = inputs.node_weights.len();
    let num_old_blocks = inputs.block_offsets.len() - 1;
    let num_new_blocks = inputs.centers.len();
    let epsilon = T::from(settings.epsilon).unwrap();
    let slack = T::from(1e-5).unwrap();

    if settings.repartition && num_old_blocks != 1 {
        return Err(Error::InvalidArgument(
            "repartitioning expects a single group of centers".into(),
        ));
    }

    // effective minimum distance from the local bounding box to every
    // center; the candidate scan walks centers of an old block in
    // ascending order of this bound
    let min_distance: Vec<T> = inputs
        .centers
        .iter()
        .map(|center| match inputs.bounding_box {
            Some(cell) => cell.distances(center).0,
            None => T::zero(),
        })
        .collect();

    let effective_min_distance = |influence: &[Vec<T>], block: usize| {
        let mut influence_min = T::infinity();
        for weights in influence.iter() {
            influence_min = influence_min.min(weights[block]);
        }
        min_distance[block] * min_distance[block] * influence_min
    };

    let mut effect_min_dist = (0..num_new_blocks)
        .map(|j| effective_min_distance(&state.influence, j))
        .collect_vec();
    let mut cluster_indices = (0..num_new_blocks).collect_vec();

    let sort_candidate_ranges =
        |cluster_indices: &mut Vec<usize>, effect_min_dist: &mut Vec<T>| {
            for old in 0..num_old_blocks {
                let range = inputs.block_offsets[old]..inputs.block_offsets[old + 1];
                cluster_indices[range.clone()].sort_unstable_by(|&a, &b| {
                    effect_min_dist[a]
                        .partial_cmp(&effect_min_dist[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.cmp(&b))
                });
                effect_min_dist[range].sort_unstable_by(|a, b| {
                    a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
        };
    sort_candidate_ranges(&mut cluster_indices, &mut effect_min_dist);

    let mut influence_grew = vec![vec![false; num_new_blocks]; num_weights];
    let mut change_upper = vec![T::from(1.0 + settings.influence_change_cap).unwrap(); num_new_blocks];
    let mut change_lower = vec![T::from(1.0 - settings.influence_change_cap).unwrap(); num_new_blocks];

    let sq_dist_to = |point: usize, center: &[T]| {
        let mut sq_dist = T::zero();
        for d in 0..dims {
            let diff = center[d] - inputs.coords[d][point];
            sq_dist = sq_dist + diff * diff;
        }
        sq_dist
    };

    let influence_effect = |influence: &[Vec<T>], point: usize, block: usize| {
        let mut effect = T::zero();
        for w in 0..num_weights {
            effect = effect + influence[w][block] * inputs.normalized_weights[w][point];
        }
        effect
    };

    let mut iter = 0;
    let mut all_weights_balanced = false;

    // iterate if necessary to achieve balance
    while !all_weights_balanced && iter < settings.balance_iterations {
        let mut block_weights = vec![vec![T::zero(); num_new_blocks]; num_weights];
        let mut own_effect = vec![T::zero(); sample.len()];
        let mut skipped = 0usize;

        for (very_local, &i) in sample.iter().enumerate() {
            let old_cluster = assignment[i];
            let father_block = inputs.old_block[i];

            own_effect[very_local] = influence_effect(&state.influence, i, old_cluster);

            let mut decided = false;
            if state.lower_bound_next[i] > state.upper_bound_own[i] {
                // assignment cannot have changed
                skipped += 1;
                decided = true;
            } else {
                let new_effective =
                    sq_dist_to(i, &inputs.centers[old_cluster]) * own_effect[very_local];
                state.upper_bound_own[i] = new_effective;
                if state.lower_bound_next[i] > state.upper_bound_own[i] {
                    skipped += 1;
                    decided = true;
                }
            }

            if !decided {
                // scan the centers of the father block in ascending order
                // of their box distance; stop when none can beat the
                // runner-up
                let (range_start, range_end) = if settings.repartition {
                    (0, num_new_blocks)
                } else {
                    (
                        inputs.block_offsets[father_block],
                        inputs.block_offsets[father_block + 1],
                    )
                };

                let mut best_block = 0;
                let mut best_value = T::infinity();
                let mut best_effect = T::one();
                let mut second_best_value = T::infinity();

                let mut c = range_start;
                while c < range_end && second_best_value > effect_min_dist[c] {
                    let j = cluster_indices[c];
                    let effect = influence_effect(&state.influence, i, j);
                    let effective_distance = sq_dist_to(i, &inputs.centers[j]) * effect;

                    if effective_distance < best_value {
                        second_best_value = best_value;
                        best_block = j;
                        best_value = effective_distance;
                        best_effect = effect;
                    } else if effective_distance < second_best_value {
                        second_best_value = effective_distance;
                    }
                    c += 1;
                }

                state.upper_bound_own[i] = best_value;
                state.lower_bound_next[i] = second_best_value;
                own_effect[very_local] = best_effect;
                assignment[i] = best_block;
            }

            for w in 0..num_weights {
                block_weights[w][assignment[i]] =
                    block_weights[w][assignment[i]] + inputs.node_weights[w][i];
            }
        }

        for weights in block_weights.iter_mut() {
            comm.sum_into(weights);
        }

        // imbalance per weight is the worst over all new blocks
        all_weights_balanced = true;
        for w in 0..num_weights {
            let mut worst = T::neg_infinity();
            for j in 0..num_new_blocks {
                let target = inputs.target_block_weights[w][j];
                if target <= T::zero() {
                    if block_weights[w][j] > T::zero() {
                        return Err(Error::DegenerateWeights { weight: w, block: j });
                    }
                    continue;
                }
                worst = worst.max((block_weights[w][j] - target) / target);
            }
            state.imbalance[w] = worst;
            if worst > epsilon {
                all_weights_balanced = false;
            }
        }

        // adapt the influence values towards balance
        let mut min_ratio = T::infinity();
        let mut max_ratio = T::neg_infinity();
        for w in 0..num_weights {
            for j in 0..num_new_blocks {
                let target = inputs.target_block_weights[w][j];
                if target <= T::zero() {
                    continue;
                }
                let ratio = block_weights[w][j] / target;

                if (ratio - T::one()).abs() < epsilon && settings.freeze_balanced_influence {
                    min_ratio = min_ratio.min(T::one());
                    max_ratio = max_ratio.max(T::one());
                    continue;
                }

                let this_influence = state.influence[w][j];
                let exponent = T::from(settings.influence_exponent).unwrap();
                state.influence[w][j] = (this_influence * ratio.powf(exponent))
                    .min(this_influence * change_upper[j])
                    .max(this_influence * change_lower[j]);

                let influence_ratio = state.influence[w][j] / this_influence;
                min_ratio = min_ratio.min(influence_ratio);
                max_ratio = max_ratio.max(influence_ratio);

                if settings.tighten_bounds && iter > 0 && (ratio > T::one()) != influence_grew[w][j]
                {
                    // the influence switched direction, damp further steps
                    let tenth = T::from(0.1).unwrap();
                    let ninety = T::from(0.9).unwrap();
                    change_upper[j] = tenth + ninety * change_upper[j];
                    change_lower[j] = tenth + ninety * change_lower[j];
                }
                influence_grew[w][j] = ratio > T::one();
            }
        }

        // widen the bounds by the influence movement
        if min_ratio <= max_ratio {
            for (very_local, &i) in sample.iter().enumerate() {
                let cluster = assignment[i];
                let new_effect = influence_effect(&state.influence, i, cluster);
                state.upper_bound_own[i] =
                    state.upper_bound_own[i] * (new_effect / own_effect[very_local] + slack);
                state.lower_bound_next[i] = state.lower_bound_next[i] * (min_ratio - slack);
            }
        }

        // the box pruning order changes with the influences
        for j in 0..num_new_blocks {
            effect_min_dist[j] = effective_min_distance(&state.influence, j);
        }
        sort_candidate_ranges(&mut cluster_indices, &mut effect_min_dist);

        iter += 1;

        if settings.verbose {
            let taken = sample.len() - skipped;
            debug!(
                "balance iteration {iter}: {taken}/{} points touched, imbalance {:?}",
                sample.len(),
                state.imbalance.iter().map(|v| v.to_f64()).collect_vec()
            );
        }
    }

    Ok(iter)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parallel::SerialComm;

    fn flat_inputs<'a>(
        coords: &'a [Vec<f64>],
        centers: &'a [Vec<f64>],
        offsets: &'a [usize],
        node_weights: &'a [Vec<f64>],
        normalized: &'a [Vec<f64>],
        old_block: &'a [usize],
        targets: &'a [Vec<f64>],
        cell: &'a BoundingBox<f64>,
    ) -> AssignInputs<'a, f64> {
        AssignInputs {
            coords,
            centers,
            block_offsets: offsets,
            node_weights,
            normalized_weights: normalized,
            old_block,
            target_block_weights: targets,
            bounding_box: Some(cell),
        }
    }

    #[test]
    fn test_assigns_nearest_center_when_balanced() {
        // two clusters of two points each, centers on top of them
        let coords = vec![vec![0.0, 0.1, 1.0, 1.1], vec![0.0; 4]];
        let centers = vec![vec![0.05, 0.0], vec![1.05, 0.0]];
        let offsets = vec![0, 2];
        let weights = vec![vec![1.0; 4]];
        let normalized = vec![vec![1.0; 4]];
        let old_block = vec![0usize; 4];
        let targets = vec![vec![2.0, 2.0]];
        let cell = BoundingBox::new(vec![-0.1, -0.1], vec![1.2, 0.1]).unwrap();

        let inputs = flat_inputs(
            &coords, &centers, &offsets, &weights, &normalized, &old_block, &targets, &cell,
        );
        let sample = vec![0, 1, 2, 3];
        let mut assignment = vec![0usize; 4];
        let mut state = BalanceState {
            upper_bound_own: vec![f64::INFINITY; 4],
            lower_bound_next: vec![0.0; 4],
            influence: vec![vec![1.0, 1.0]],
            imbalance: vec![1.0],
        };
        let settings = Settings::default();

        let iters = assign_blocks(
            &inputs,
            &sample,
            &mut assignment,
            &mut state,
            &settings,
            &SerialComm,
        )
        .unwrap();

        assert_eq!(assignment, vec![0, 0, 1, 1]);
        assert_eq!(iters, 1);
        assert!(state.imbalance[0] <= settings.epsilon);
    }

    #[test]
    fn test_influence_drives_balance() {
        // six points near one center: without influence correction all six
        // would stay in block 0 against a target of three per block
        let xs: Vec<f64> = vec![0.0, 0.01, 0.02, 0.03, 0.04, 0.3];
        let coords = vec![xs, vec![0.0; 6]];
        let centers = vec![vec![0.02, 0.0], vec![0.3, 0.0]];
        let offsets = vec![0, 2];
        let weights = vec![vec![1.0; 6]];
        let normalized = vec![vec![1.0; 6]];
        let old_block = vec![0usize; 6];
        let targets = vec![vec![3.0, 3.0]];
        let cell = BoundingBox::new(vec![-0.1, -0.1], vec![0.4, 0.1]).unwrap();

        let inputs = flat_inputs(
            &coords, &centers, &offsets, &weights, &normalized, &old_block, &targets, &cell,
        );
        let sample = (0..6).collect_vec();
        let mut assignment = vec![0usize; 6];
        let mut state = BalanceState {
            upper_bound_own: vec![f64::INFINITY; 6],
            lower_bound_next: vec![0.0; 6],
            influence: vec![vec![1.0, 1.0]],
            imbalance: vec![1.0],
        };
        let settings = Settings {
            epsilon: 0.05,
            balance_iterations: 100,
            ..Settings::default()
        };

        assign_blocks(
            &inputs,
            &sample,
            &mut assignment,
            &mut state,
            &settings,
            &SerialComm,
        )
        .unwrap();

        let block0 = assignment.iter().filter(|&&b| b == 0).count();
        assert_eq!(block0, 3, "influence correction should even out the load");
        // the crowded block was made less attractive
        assert!(state.influence[0][0] > state.influence[0][1]);
    }

    #[test]
    fn test_zero_target_with_load_fails() {
        let coords = vec![vec![0.0], vec![0.0]];
        let centers = vec![vec![0.0, 0.0], vec![1.0, 0.0]];
        let offsets = vec![0, 2];
        let weights = vec![vec![1.0]];
        let normalized = vec![vec![1.0]];
        let old_block = vec![0usize];
        let targets = vec![vec![0.0, 1.0]];
        let cell = BoundingBox::new(vec![-0.1, -0.1], vec![1.1, 0.1]).unwrap();

        let inputs = flat_inputs(
            &coords, &centers, &offsets, &weights, &normalized, &old_block, &targets, &cell,
        );
        let mut assignment = vec![0usize];
        let mut state = BalanceState {
            upper_bound_own: vec![f64::INFINITY],
            lower_bound_next: vec![0.0],
            influence: vec![vec![1.0, 1.0]],
            imbalance: vec![1.0],
        };
        let result = assign_blocks(
            &inputs,
            &[0],
            &mut assignment,
            &mut state,
            &Settings::default(),
            &SerialComm,
        );
        assert!(matches!(result, Err(Error::DegenerateWeights { .. })));
    }
}

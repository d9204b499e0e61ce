//! Quality metrics for a partition: cut, imbalance, communication volume
//! and the block graph.
//!
//! All metrics give the same result under any distribution of the same
//! global data; they are reporting tools, not part of the partitioning
//! hot path.

use itertools::Itertools;

use crate::graph::DistributedGraph;
use crate::parallel::Collectives;
use crate::types::{Result, Scalar};

/// Total weight of the edges crossing between blocks, each edge counted
/// once. Requires a halo exchange for the partition values of non-local
/// neighbors.
pub fn compute_cut<T: Scalar, C: Collectives>(
    graph: &DistributedGraph<T>,
    partition: &[usize],
    comm: &C,
) -> Result<T> {
    let block_of = graph.exchange_partition_halo(partition, comm)?;

    let mut local_cut = T::zero();
    for i in 0..graph.local_count() {
        let own_block = partition[i];
        for (neighbor, weight) in graph.row(i) {
            if block_of[&neighbor] != own_block {
                local_cut = local_cut + weight;
            }
        }
    }

    // both endpoints of a cut edge contribute
    let two = T::from(2.0).unwrap();
    Ok(comm.sum_scalar(local_cut) / two)
}

/// Load of every block for one weight dimension.
pub fn block_loads<T: Scalar, C: Collectives>(
    partition: &[usize],
    num_blocks: usize,
    weights: &[T],
    comm: &C,
) -> Vec<T> {
    let mut loads = vec![T::zero(); num_blocks];
    for (&block, &weight) in partition.iter().zip(weights) {
        loads[block] = loads[block] + weight;
    }
    comm.sum_into(&mut loads);
    loads
}

/// Imbalance per weight dimension against the target capacities:
/// the worst `(load - target) / target` over all blocks.
pub fn imbalance<T: Scalar, C: Collectives>(
    partition: &[usize],
    num_blocks: usize,
    node_weights: &[Vec<T>],
    target_block_weights: &[Vec<T>],
    comm: &C,
) -> Vec<f64> {
    node_weights
        .iter()
        .zip(target_block_weights)
        .map(|(weights, targets)| {
            let loads = block_loads(partition, num_blocks, weights, comm);
            loads
                .iter()
                .zip(targets)
                .map(|(&load, &target)| {
                    if target > T::zero() {
                        ((load - target) / target).to_f64().unwrap_or(f64::NAN)
                    } else if load > T::zero() {
                        f64::INFINITY
                    } else {
                        0.0
                    }
                })
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect()
}

/// Imbalance against equal shares of the total weight.
pub fn imbalance_uniform<T: Scalar, C: Collectives>(
    partition: &[usize],
    num_blocks: usize,
    weights: &[T],
    comm: &C,
) -> f64 {
    let loads = block_loads(partition, num_blocks, weights, comm);
    let total = loads.iter().copied().fold(T::zero(), |a, b| a + b);
    let ideal = total / T::from(num_blocks).unwrap();
    if !(ideal > T::zero()) {
        return 0.0;
    }
    loads
        .iter()
        .map(|&load| ((load - ideal) / ideal).to_f64().unwrap_or(f64::NAN))
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Communication volume: for every block, the number of distinct foreign
/// blocks its vertices' edges touch, summed over the vertices. Returns
/// `(max over blocks, total)`.
pub fn communication_volume<T: Scalar, C: Collectives>(
    graph: &DistributedGraph<T>,
    partition: &[usize],
    num_blocks: usize,
    comm: &C,
) -> Result<(u64, u64)> {
    let block_of = graph.exchange_partition_halo(partition, comm)?;

    let mut volume = vec![0u64; num_blocks];
    for i in 0..graph.local_count() {
        let own_block = partition[i];
        let foreign = graph
            .row(i)
            .map(|(neighbor, _)| block_of[&neighbor])
            .filter(|&block| block != own_block)
            .unique()
            .count();
        volume[own_block] += foreign as u64;
    }
    comm.sum_into(&mut volume);

    let max = volume.iter().copied().max().unwrap_or(0);
    let total = volume.iter().sum();
    Ok((max, total))
}

/// The block graph: a dense k-by-k matrix whose entry `(a, b)` is the
/// total weight of cut edges between blocks `a` and `b`.
///
/// Every rank's local contribution travels once around the rank ring, so
/// the matrix is replicated after `p - 1` rounds.
pub fn block_graph<T: Scalar, C: Collectives>(
    graph: &DistributedGraph<T>,
    partition: &[usize],
    num_blocks: usize,
    comm: &C,
) -> Result<Vec<Vec<T>>> {
    let block_of = graph.exchange_partition_halo(partition, comm)?;

    let mut contribution = vec![T::zero(); num_blocks * num_blocks];
    for i in 0..graph.local_count() {
        let own_block = partition[i];
        for (neighbor, weight) in graph.row(i) {
            let other_block = block_of[&neighbor];
            if other_block != own_block {
                contribution[own_block * num_blocks + other_block] =
                    contribution[own_block * num_blocks + other_block] + weight;
            }
        }
    }

    // pass a copy around the ring; every arriving buffer is another
    // rank's original contribution
    let mut result = contribution.clone();
    let mut travelling = contribution;
    for _ in 1..comm.size() {
        comm.rotate(&mut travelling);
        for (acc, &incoming) in result.iter_mut().zip(&travelling) {
            *acc = *acc + incoming;
        }
    }

    // each cut edge was counted once from either endpoint, so averaging
    // the two triangles restores the symmetric edge weight
    let two = T::from(2.0).unwrap();
    let matrix = (0..num_blocks)
        .map(|a| {
            (0..num_blocks)
                .map(|b| (result[a * num_blocks + b] + result[b * num_blocks + a]) / two)
                .collect_vec()
        })
        .collect_vec();
    Ok(matrix)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::grid_points_2d;
    use crate::parallel::SerialComm;
    use approx::assert_relative_eq;

    /// 4-cycle 0 - 1 - 3 - 2 - 0.
    fn square_graph() -> DistributedGraph<f64> {
        DistributedGraph::new(
            vec![0, 2, 4, 6, 8],
            vec![1, 2, 0, 3, 0, 3, 1, 2],
            Vec::new(),
            vec![0, 1, 2, 3],
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_cut_of_square() {
        let graph = square_graph();
        let comm = SerialComm;

        // splitting the cycle in half cuts two edges
        let cut = compute_cut(&graph, &[0, 0, 1, 1], &comm).unwrap();
        assert_relative_eq!(cut, 2.0);

        // no cut for a single block
        let cut = compute_cut(&graph, &[0, 0, 0, 0], &comm).unwrap();
        assert_relative_eq!(cut, 0.0);
    }

    #[test]
    fn test_imbalance_vector() {
        let comm = SerialComm;
        let partition = vec![0, 0, 0, 1];
        let weights = vec![vec![1.0; 4]];
        let targets = vec![vec![2.0, 2.0]];
        let result = imbalance(&partition, 2, &weights, &targets, &comm);
        assert_relative_eq!(result[0], 0.5);

        assert_relative_eq!(imbalance_uniform(&partition, 2, &[1.0; 4], &comm), 0.5);
        assert_relative_eq!(
            imbalance_uniform(&[0, 0, 1, 1], 2, &[1.0; 4], &comm),
            0.0
        );
    }

    #[test]
    fn test_communication_volume() {
        let graph = square_graph();
        let comm = SerialComm;
        let (max, total) = communication_volume(&graph, &[0, 0, 1, 1], 2, &comm).unwrap();
        // each block has two border vertices touching one foreign block
        assert_eq!(max, 2);
        assert_eq!(total, 4);
    }

    #[test]
    fn test_block_graph_counts_cut_edges() {
        let graph = square_graph();
        let comm = SerialComm;
        let matrix = block_graph(&graph, &[0, 0, 1, 1], 2, &comm).unwrap();
        assert_relative_eq!(matrix[0][1], 2.0);
        assert_relative_eq!(matrix[1][0], 2.0);
        assert_relative_eq!(matrix[0][0], 0.0);
    }

    #[test]
    fn test_cut_matches_grid_structure() {
        // a 4x4 grid split into two vertical halves cuts 4 edges
        let (_, graph) = grid_points_2d::<f64>(4, 4);
        let comm = SerialComm;
        let partition: Vec<usize> = (0..16).map(|i| usize::from((i % 4) >= 2)).collect();
        let cut = compute_cut(&graph, &partition, &comm).unwrap();
        assert_relative_eq!(cut, 4.0);
    }
}
